//! Transport sessions to a single collector.
//!
//! A [`TransportSession`] owns the publish socket(s) to the collector's data
//! endpoints and, optionally, performs a request/acknowledge handshake before
//! publishing anything. Publish/subscribe style collectors miss frames sent
//! before their subscription is live, so no data leaves the session until a
//! peer has explicitly answered the handshake.
//!
//! Every frame on the wire is a big-endian `u32` length followed by the
//! payload. The handshake probe is an empty frame; any reply frame counts as
//! an acknowledgement.

pub(crate) mod connection;
mod endpoint;
mod publish;
mod session;


pub use connection::{Connection, frame_payload, read_frame, write_frame};
pub use endpoint::Endpoint;
pub use publish::{PublishOutcome, PublishSocket};
pub use session::{
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HIGH_WATER_MARK, DEFAULT_MAX_FRAME_SIZE, Session,
    SessionConfig, TransportSession,
};
