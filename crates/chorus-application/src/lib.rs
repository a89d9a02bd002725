//! Application layer for CHORUS.
//!
//! This crate coordinates the domain model with the transport: it owns the
//! active session, feeds it decoded events and persists it as it changes.

pub mod session;

pub use session::SessionController;
