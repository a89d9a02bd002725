//! Domain layer for CHORUS.
//!
//! Holds the session model and the stream reconciliation engine, with no
//! knowledge of HTTP or storage.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;

// Re-export common error type
pub use error::{ChorusError, Result};
