//! INI configuration for the publisher.
//!
//! Settings live in one section of an INI document, parsed with `rust-ini`:
//!
//! ```ini
//! [metricpub]
//! enabled = true
//! data_endpoints = tcp://127.0.0.1:5565, tcp://127.0.0.1:5566
//! handshake_endpoint = tcp://127.0.0.1:5567
//! pool_size = 4
//! encoding = "msgpack"
//! ```
//!
//! Values may be wrapped in double quotes and may reference environment
//! variables as `${NAME}`; a reference to an unset variable is an error.

use std::{
    fmt::Display,
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use ini::{Ini, Properties};
use log::debug;
use thiserror::Error;

use crate::{delivery::OverflowPolicy, encoding::Encoding, publisher::PublisherBuilder};

/// Errors raised while loading a [`PublisherConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid ini document: {0}")]
    Parse(#[from] ini::ParseError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("missing section [{0}]")]
    MissingSection(String),
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),
}

const KNOWN_KEYS: &[&str] = &[
    "enabled",
    "data_endpoints",
    "handshake_endpoint",
    "control_endpoint",
    "pool_size",
    "hwm",
    "handshake_timeout_ms",
    "reconnect_interval_ms",
    "probe_timeout_ms",
    "probe_retries",
    "probe_interval_ms",
    "max_frame_size",
    "debug_stderr",
    "encoding",
    "async_delivery",
    "queue_capacity",
    "overflow_policy",
];

/// Publisher settings as read from configuration.
///
/// Unset optional values fall back to the builder defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub data_endpoints: Vec<String>,
    pub handshake_endpoint: Option<String>,
    pub control_endpoint: Option<String>,
    pub pool_size: Option<usize>,
    pub hwm: Option<usize>,
    pub handshake_timeout_ms: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub probe_retries: Option<u32>,
    pub probe_interval_ms: Option<u64>,
    pub max_frame_size: Option<usize>,
    pub debug_stderr: bool,
    pub encoding: Encoding,
    pub async_delivery: bool,
    pub queue_capacity: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
}

impl PublisherConfig {
    /// Load `section` from an INI document, resolving `${VAR}` from the
    /// process environment.
    pub fn from_ini_str(text: &str, section: &str) -> Result<Self, ConfigError> {
        Self::from_ini_str_with_env(text, section, |name| std::env::var(name).ok())
    }

    /// Load `section` from the INI file at `path`.
    pub fn from_ini_file(path: impl AsRef<Path>, section: &str) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini_str(&text, section)
    }

    /// Like [`from_ini_str`](Self::from_ini_str) with a custom variable lookup.
    pub fn from_ini_str_with_env<F>(text: &str, section: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ini = Ini::load_from_str(text)?;
        let props = ini
            .section(Some(section))
            .ok_or_else(|| ConfigError::MissingSection(section.to_owned()))?;
        Values { props, env: &env }.read()
    }

    /// A [`PublisherBuilder`] carrying these settings.
    pub fn builder(&self) -> PublisherBuilder {
        let mut builder = PublisherBuilder::new()
            .with_data_endpoints(self.data_endpoints.iter().cloned())
            .with_debug_stderr(self.debug_stderr)
            .with_encoding(self.encoding)
            .with_async_delivery(self.async_delivery);
        macro_rules! apply {
            ($($field:ident => $setter:ident),* $(,)?) => {
                $(if let Some(value) = self.$field.clone() {
                    builder = builder.$setter(value);
                })*
            };
        }
        apply!(
            handshake_endpoint => with_handshake_endpoint,
            control_endpoint => with_control_endpoint,
            pool_size => with_pool_size,
            hwm => with_high_water_mark,
            handshake_timeout_ms => with_handshake_timeout_ms,
            reconnect_interval_ms => with_reconnect_interval_ms,
            probe_timeout_ms => with_probe_timeout_ms,
            probe_retries => with_probe_retries,
            probe_interval_ms => with_probe_interval_ms,
            max_frame_size => with_max_frame_size,
            queue_capacity => with_queue_capacity,
            overflow_policy => with_overflow_policy,
        );
        builder
    }
}

struct Values<'a, F> {
    props: &'a Properties,
    env: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Values<'_, F> {
    fn read(&self) -> Result<PublisherConfig, ConfigError> {
        for (key, _) in self.props.iter() {
            if !KNOWN_KEYS.contains(&key) {
                debug!("ignoring unknown publisher setting '{key}'");
            }
        }
        let enabled = self
            .boolean("enabled")?
            .ok_or(ConfigError::MissingKey("enabled"))?;
        let data_endpoints = self.list("data_endpoints")?;
        if enabled && data_endpoints.is_empty() {
            return Err(ConfigError::MissingKey("data_endpoints"));
        }
        Ok(PublisherConfig {
            enabled,
            data_endpoints,
            handshake_endpoint: self.string("handshake_endpoint")?,
            control_endpoint: self.string("control_endpoint")?,
            pool_size: self.parsed("pool_size")?,
            hwm: self.parsed("hwm")?,
            handshake_timeout_ms: self.parsed("handshake_timeout_ms")?,
            reconnect_interval_ms: self.parsed("reconnect_interval_ms")?,
            probe_timeout_ms: self.parsed("probe_timeout_ms")?,
            probe_retries: self.parsed("probe_retries")?,
            probe_interval_ms: self.parsed("probe_interval_ms")?,
            max_frame_size: self.parsed("max_frame_size")?,
            debug_stderr: self.boolean("debug_stderr")?.unwrap_or(false),
            encoding: self.parsed("encoding")?.unwrap_or_default(),
            async_delivery: self.boolean("async_delivery")?.unwrap_or(false),
            queue_capacity: self.parsed("queue_capacity")?,
            overflow_policy: self.parsed("overflow_policy")?,
        })
    }

    fn string(&self, key: &'static str) -> Result<Option<String>, ConfigError> {
        let Some(raw) = self.props.get(key) else {
            return Ok(None);
        };
        let value = substitute_env(strip_quotes(raw.trim()), self.env)?;
        Ok(Some(value).filter(|v| !v.is_empty()))
    }

    fn parsed<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(key)?
            .map(|value| {
                value.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
                    key,
                    reason: err.to_string(),
                })
            })
            .transpose()
    }

    fn boolean(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        self.string(key)?
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key,
                    reason: format!("expected true or false, got '{value}'"),
                }),
            })
            .transpose()
    }

    fn list(&self, key: &'static str) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .string(key)?
            .map(|value| {
                value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|item| !item.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

/// Replace every `${NAME}` in `value` with `env(NAME)`.
fn substitute_env<F>(value: &str, env: &F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let resolved = env(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_owned()))?;
        out.push_str(&rest[..start]);
        out.push_str(&resolved);
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}
