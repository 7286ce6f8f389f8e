//! Error types shared across the publisher components.
//!
//! Transport failures never cross the [`Publisher`](crate::Publisher)
//! boundary; they are recovered inside the pool and only surface here so
//! sessions can report what went wrong. Construction failures are fatal and
//! are returned from the builders.

use std::{io, time::Duration};

use thiserror::Error;

use crate::transport::Endpoint;

/// Failures raised by a single transport session.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening a connection to an endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    /// The handshake endpoint did not acknowledge within the timeout.
    #[error("no handshake reply from {endpoint} within {timeout:?}")]
    HandshakeTimeout { endpoint: Endpoint, timeout: Duration },
    /// The payload exceeds the configured frame limit.
    #[error("payload of {size} bytes exceeds the {limit} byte frame limit")]
    FrameTooLarge { size: usize, limit: usize },
    /// The session has nowhere to publish.
    #[error("session has no data endpoints")]
    NoDataEndpoints,
    /// Writing to an established connection failed.
    #[error("transport write failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors that may occur while building a publisher or one of its parts.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid publisher configuration: {0}")]
    InvalidConfig(String),
    /// Spawning a background thread failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
