//! Lazy-Pirate liveness probing of the collector.
//!
//! A publish-only socket cannot tell whether anyone is listening. The prober
//! runs a bounded request/reply exchange against the collector's control
//! endpoint: each request carries a sequence number and must be answered
//! with the same number within `request_timeout`. An unanswered request is
//! retried on a fresh connection with the same sequence number; once
//! `retries` consecutive attempts go unanswered the failure callback fires
//! (typically [`ReconnectHandle::force_reconnect_all`](crate::ReconnectHandle))
//! and probing restarts from scratch.

mod prober;


pub use prober::{
    DEFAULT_PROBE_INTERVAL, DEFAULT_REQUEST_RETRIES, DEFAULT_REQUEST_TIMEOUT, LivenessProber,
    ProberConfig,
};
