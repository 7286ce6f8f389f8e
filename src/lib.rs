//! Resilient pooled publisher for shipping metrics to a remote collector.
//!
//! Messages are encoded once by the [`Publisher`], then delivered through a
//! fixed-size [`SessionPool`] of [`TransportSession`]s, either on the
//! caller's thread or from an [`AsyncDeliveryQueue`]. Sessions perform a
//! request/acknowledge handshake before publishing so nothing is sent into a
//! socket with no live subscriber. An optional [`LivenessProber`] watches the
//! collector's control endpoint and forces every session to reconnect when it
//! goes quiet.
//!
//! Delivery is at-most-once. Transport failures are absorbed: the dropped
//! payload is written to a [`DiagnosticStream`] and a rate-limited warning is
//! logged through the `log` facade.

pub mod config;
pub mod delivery;
pub mod diagnostics;
pub mod encoding;
pub mod error;
pub mod liveness;
pub mod pool;
pub mod publisher;
pub mod rate_limited_warner;
pub mod transport;

pub use config::{ConfigError, PublisherConfig};
pub use delivery::{
    AsyncDeliveryQueue, DeliveryConfig, EnqueueError, OverflowPolicy, ReconnectFlag,
    SessionSender, Transmit,
};
pub use diagnostics::DiagnosticStream;
pub use encoding::{EncodeError, Encoding, Message};
pub use error::{BuildError, TransportError};
pub use liveness::{LivenessProber, ProberConfig};
pub use pool::{PoolConfig, ReconnectHandle, SessionGuard, SessionPool};
pub use publisher::{Instrumentation, Publisher, PublisherBuilder, PublisherOptions};
pub use rate_limited_warner::RateLimitedWarner;
pub use transport::{Endpoint, Session, SessionConfig, TransportSession};
