//! Overflow policy for the delivery queue.

use std::{fmt, str::FromStr, time::Duration};

const VALID_POLICIES: &str = "drop, drop_oldest, timeout:N";

/// Determines how the delivery queue reacts when it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the new message, preserving queued ones.
    #[default]
    DropNewest,
    /// Evict the oldest queued message to make room for the new one.
    DropOldest,
    /// Block the producer up to the duration, then drop the new message.
    Timeout(Duration),
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::DropNewest => f.write_str("drop"),
            OverflowPolicy::DropOldest => f.write_str("drop_oldest"),
            OverflowPolicy::Timeout(timeout) => write!(f, "timeout:{}", timeout.as_millis()),
        }
    }
}

/// Parses a policy string into an [`OverflowPolicy`].
///
/// # Accepted input formats
/// - "drop": Drop new messages when the queue is full.
/// - "drop_oldest": Evict the oldest queued message instead.
/// - "timeout:N": Wait up to N milliseconds before dropping (N is a positive integer).
impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(policy: &str) -> Result<Self, Self::Err> {
        let normalized = policy.trim().to_ascii_lowercase();

        if let Some(rest) = normalized.strip_prefix("timeout:") {
            let ms: i64 = rest
                .trim()
                .parse()
                .map_err(|_| "timeout must be a positive integer (N in 'timeout:N')".to_string())?;
            if ms <= 0 {
                return Err("timeout must be greater than zero".into());
            }
            return Ok(OverflowPolicy::Timeout(Duration::from_millis(ms as u64)));
        }

        match normalized.as_str() {
            "drop" | "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "timeout" => Err("timeout requires a positive integer N, use 'timeout:N'".into()),
            _ => Err(format!(
                "invalid overflow policy '{normalized}'. Valid options are: {VALID_POLICIES}"
            )),
        }
    }
}
