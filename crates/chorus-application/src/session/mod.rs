//! Session application services.
//!
//! This module drives a [`chorus_core::session::Session`] from the
//! dispatcher's streams: the primary stream opened on submit and the poll
//! fallback that recovers pending jobs afterwards.

mod controller;
mod pipeline;
mod poll;
mod run;

pub use controller::SessionController;
