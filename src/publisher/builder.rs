//! Builder for [`Publisher`].
//!
//! Collects endpoint strings and tuning knobs, validates them, and wires the
//! session pool, delivery queue and liveness prober together.

use std::{sync::Arc, time::Duration};

use crate::{
    delivery::{DeliveryConfig, OverflowPolicy},
    diagnostics::DiagnosticStream,
    encoding::Encoding,
    error::BuildError,
    liveness::ProberConfig,
    pool::{PoolConfig, SessionPool},
    transport::{Endpoint, SessionConfig, TransportSession},
};

use super::{Publisher, PublisherOptions};

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

fn parse_endpoint(raw: &str, field: &str) -> Result<Endpoint, BuildError> {
    raw.parse()
        .map_err(|err| BuildError::InvalidConfig(format!("{field}: {err}")))
}

/// Fluent builder for a [`Publisher`] over [`TransportSession`]s.
#[derive(Clone, Debug, Default)]
pub struct PublisherBuilder {
    data_endpoints: Vec<String>,
    handshake_endpoint: Option<String>,
    control_endpoint: Option<String>,
    pool_size: Option<usize>,
    high_water_mark: Option<usize>,
    handshake_timeout_ms: Option<u64>,
    reconnect_interval_ms: Option<u64>,
    probe_timeout_ms: Option<u64>,
    probe_retries: Option<u32>,
    probe_interval_ms: Option<u64>,
    max_frame_size: Option<usize>,
    queue_capacity: Option<usize>,
    overflow_policy: Option<OverflowPolicy>,
    async_delivery: bool,
    debug_stderr: bool,
    encoding: Encoding,
    diagnostics: Option<DiagnosticStream>,
}

impl PublisherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data endpoint; every message is published to all of them.
    pub fn with_data_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.data_endpoints.push(endpoint.into());
        self
    }

    /// Replace the data endpoints.
    pub fn with_data_endpoints<I, E>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        self.data_endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    option_setter!(
        #[doc = "Require a handshake against this endpoint before publishing."]
        with_handshake_endpoint,
        handshake_endpoint,
        String
    );
    option_setter!(
        #[doc = "Probe this control endpoint and force reconnects when it stops answering."]
        with_control_endpoint,
        control_endpoint,
        String
    );
    option_setter!(with_pool_size, pool_size, usize);
    option_setter!(with_high_water_mark, high_water_mark, usize);
    option_setter!(with_handshake_timeout_ms, handshake_timeout_ms, u64);
    option_setter!(with_reconnect_interval_ms, reconnect_interval_ms, u64);
    option_setter!(with_probe_timeout_ms, probe_timeout_ms, u64);
    option_setter!(with_probe_retries, probe_retries, u32);
    option_setter!(with_probe_interval_ms, probe_interval_ms, u64);
    option_setter!(with_max_frame_size, max_frame_size, usize);
    option_setter!(with_queue_capacity, queue_capacity, usize);
    option_setter!(with_overflow_policy, overflow_policy, OverflowPolicy);

    /// Deliver from a background thread instead of the caller's thread.
    pub fn with_async_delivery(mut self, enabled: bool) -> Self {
        self.async_delivery = enabled;
        self
    }

    /// Mirror every encoded payload to the diagnostic stream.
    pub fn with_debug_stderr(mut self, enabled: bool) -> Self {
        self.debug_stderr = enabled;
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Replace the standard error fallback stream.
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticStream) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.data_endpoints.is_empty() {
            return Err(BuildError::InvalidConfig(
                "at least one data endpoint is required".into(),
            ));
        }
        if let Some(size) = self.pool_size {
            ensure_positive!(size, "pool_size")?;
        }
        if let Some(hwm) = self.high_water_mark {
            ensure_positive!(hwm, "hwm")?;
        }
        if let Some(size) = self.max_frame_size {
            ensure_positive!(size, "max_frame_size")?;
        }
        if let Some(capacity) = self.queue_capacity {
            ensure_positive!(capacity, "queue_capacity")?;
        }
        self.validate_timeouts()
    }

    fn validate_timeouts(&self) -> Result<(), BuildError> {
        if let Some(timeout) = self.handshake_timeout_ms {
            ensure_positive!(timeout, "handshake_timeout_ms")?;
        }
        if let Some(interval) = self.reconnect_interval_ms {
            ensure_positive!(interval, "reconnect_interval_ms")?;
        }
        if let Some(timeout) = self.probe_timeout_ms {
            ensure_positive!(timeout, "probe_timeout_ms")?;
        }
        if let Some(retries) = self.probe_retries {
            ensure_positive!(retries, "probe_retries")?;
        }
        if let Some(interval) = self.probe_interval_ms {
            ensure_positive!(interval, "probe_interval_ms")?;
        }
        Ok(())
    }

    /// Session settings shared by every pooled session.
    pub fn build_session_config(&self) -> Result<SessionConfig, BuildError> {
        self.validate()?;
        let data_endpoints = self
            .data_endpoints
            .iter()
            .map(|raw| parse_endpoint(raw, "data_endpoints"))
            .collect::<Result<Vec<_>, _>>()?;
        let mut config = SessionConfig::new(data_endpoints);
        if let Some(raw) = &self.handshake_endpoint {
            config.handshake_endpoint = Some(parse_endpoint(raw, "handshake_endpoint")?);
        }
        if let Some(hwm) = self.high_water_mark {
            config.high_water_mark = hwm;
        }
        if let Some(timeout) = self.handshake_timeout_ms {
            config.handshake_timeout = Duration::from_millis(timeout);
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = size;
        }
        Ok(config)
    }

    fn build_pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::default();
        if let Some(size) = self.pool_size {
            config.capacity = size;
        }
        if let Some(interval) = self.reconnect_interval_ms {
            config.reconnect_interval = Duration::from_millis(interval);
        }
        config
    }

    fn build_prober_config(&self) -> Result<Option<ProberConfig>, BuildError> {
        let Some(raw) = &self.control_endpoint else {
            return Ok(None);
        };
        let mut config = ProberConfig::new(parse_endpoint(raw, "control_endpoint")?);
        if let Some(timeout) = self.probe_timeout_ms {
            config.request_timeout = Duration::from_millis(timeout);
        }
        if let Some(retries) = self.probe_retries {
            config.retries = retries;
        }
        if let Some(interval) = self.probe_interval_ms {
            config.interval = Duration::from_millis(interval);
        }
        Ok(Some(config))
    }

    fn build_delivery_config(&self) -> Option<DeliveryConfig> {
        if !self.async_delivery {
            return None;
        }
        let mut config = DeliveryConfig::default();
        if let Some(capacity) = self.queue_capacity {
            config.capacity = capacity;
        }
        if let Some(policy) = self.overflow_policy {
            config.overflow = policy;
        }
        Some(config)
    }

    /// Validate the settings and start the publisher.
    pub fn build(&self) -> Result<Publisher, BuildError> {
        let session_config = Arc::new(self.build_session_config()?);
        let options = PublisherOptions {
            encoding: self.encoding,
            debug_stderr: self.debug_stderr,
            delivery: self.build_delivery_config(),
            prober: self.build_prober_config()?,
            diagnostics: self.diagnostics.clone().unwrap_or_default(),
        };
        let pool = SessionPool::new(
            || TransportSession::new(Arc::clone(&session_config)),
            self.build_pool_config(),
            options.diagnostics.clone(),
        )?;
        Publisher::new(pool, options)
    }
}
