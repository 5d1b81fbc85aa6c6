//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for all
//! sensitive values the client carries: bearer tokens, API keys, and room
//! passphrases.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one gets safe logging behavior for free;
//! reading the value requires an explicit [`ExposeSecret::expose_secret`]
//! call. Secrets are zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     username: String,
//!     access_token: SecretString,
//! }
//!
//! let creds = Credentials {
//!     username: "alice".to_string(),
//!     access_token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! // Debug output redacts the token
//! assert!(!format!("{creds:?}").contains("eyJhbGciOi"));
//!
//! // Access requires an explicit expose
//! let token: &str = creds.access_token.expose_secret();
//! # assert_eq!(token, "eyJhbGciOi...");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
