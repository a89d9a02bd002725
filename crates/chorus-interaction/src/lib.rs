//! Interaction layer for CHORUS.
//!
//! Talks to the dispatcher: opens event streams over HTTP and decodes the
//! response body into frame payloads for the session engine.

pub mod attachment;
pub mod frame;
pub mod transport;

pub use attachment::load_attachment;
pub use frame::{FRAME_TAG, FrameDecoder, decode_frames};
pub use transport::{ByteStream, EventTransport, FrameStream, HttpEventTransport};
