//! Meeting Client Session Library
//!
//! This library implements the coordination core of a multi-party real-time
//! meeting client:
//!
//! - Admission control (direct join or host-gated waiting room)
//! - A consistent participant roster mirrored from the signaling service
//! - One peer-to-peer media connection per remote participant, negotiated
//!   over an offer/answer/ICE exchange with a glare-free joiner-offers rule
//! - Live media changes (mute, camera, screen share) via track replacement,
//!   never renegotiation
//! - Automatic transport reconnection with diff-based roster resync
//!
//! # Architecture
//!
//! The session is an actor: a single serialized event loop that owns the
//! room, roster, and peer link map, fed by three sources:
//!
//! ```text
//! SessionHandle (UI commands)  ─┐
//! SignalingTransport (events)  ─┼─> Session actor ─> SessionEvent channel
//! MediaEngine (peer events)    ─┘      (serialized loop)
//! ```
//!
//! External collaborators are injected at the trait seams:
//!
//! - [`api::RoomApi`]: the room-state REST service ([`api::HttpRoomApi`]
//!   is the production implementation)
//! - [`signaling::transport::Connector`]: dials one signaling connection
//!   ([`signaling::transport::WsConnector`] speaks WebSocket + JSON)
//! - [`media::MediaEngine`]: the WebRTC engine owning capture tracks and
//!   native peer connections; SDP and ICE payloads stay opaque here
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meeting_client::api::HttpRoomApi;
//! use meeting_client::config::SessionConfig;
//! use meeting_client::session::{JoinMedia, Session};
//! use meeting_client::signaling::transport::WsConnector;
//!
//! # async fn run(engine: Arc<dyn meeting_client::media::MediaEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_env()?;
//! let api = Arc::new(HttpRoomApi::new(
//!     config.api_base_url.clone(),
//!     config.access_token.clone(),
//! ));
//! let connector = Arc::new(WsConnector::new(
//!     config.signaling_url.clone(),
//!     config.access_token.clone(),
//! ));
//!
//! let (session, mut events, _task) = Session::spawn(&config, api, engine, connector);
//!
//! let _outcome = session
//!     .join_by_key("blue-falcon-42", JoinMedia::default())
//!     .await?;
//!
//! while let Some(_event) = events.recv().await {
//!     // drive the UI
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod media;
pub mod session;
pub mod signaling;

pub use config::SessionConfig;
pub use errors::SessionError;
pub use session::{JoinOutcome, Session, SessionEvent, SessionHandle, SessionState};
