//! Session layer: admission control, roster mirroring, peer orchestration,
//! and the coordinator actor that ties them together.

pub mod admission;
pub mod coordinator;
pub mod events;
pub mod peers;
pub mod roster;

pub use admission::{AdmissionState, HostAdmissionQueue, PendingGuest};
pub use coordinator::{JoinMedia, JoinOutcome, Session, SessionHandle, SessionState};
pub use events::{ChatMessage, SessionEvent};
