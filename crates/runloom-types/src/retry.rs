//! Retry configuration for workflow steps.
//!
//! A step with `retries = N` is attempted at most `N + 1` times. The delay
//! between attempts is either fixed or doubles per attempt (exponential);
//! fixed is the default. Delays are written as human strings ("500ms",
//! "5s", "2m", "1h") in serialized definitions.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// RetryDelay
// ---------------------------------------------------------------------------

/// A retry delay, serialized as a unit-suffixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDelay(pub Duration);

impl RetryDelay {
    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay(Duration::from_millis(500))
    }
}

/// Error parsing a delay string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid retry delay '{0}': expected a number with ms/s/m/h suffix")]
pub struct ParseDelayError(pub String);

impl FromStr for RetryDelay {
    type Err = ParseDelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ParseDelayError(s.to_string()))?;
        let (digits, unit) = s.split_at(split);
        let value: u64 = digits.parse().map_err(|_| ParseDelayError(s.to_string()))?;
        let duration = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value * 60),
            "h" => Duration::from_secs(value * 3600),
            _ => return Err(ParseDelayError(s.to_string())),
        };
        Ok(RetryDelay(duration))
    }
}

impl std::fmt::Display for RetryDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.0.as_millis();
        if ms % 3_600_000 == 0 && ms > 0 {
            write!(f, "{}h", ms / 3_600_000)
        } else if ms % 60_000 == 0 && ms > 0 {
            write!(f, "{}m", ms / 60_000)
        } else if ms % 1000 == 0 {
            write!(f, "{}s", ms / 1000)
        } else {
            write!(f, "{ms}ms")
        }
    }
}

impl Serialize for RetryDelay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RetryDelay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Shape of the delay between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every attempt.
    #[default]
    Fixed,
    /// Delay doubles per attempt: base, 2x base, 4x base, ...
    Exponential,
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Per-step retry policy.
///
/// The default is zero retries: the first failure is terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of re-attempts after the first failure.
    #[serde(default)]
    pub retries: u32,
    /// Base delay between attempts.
    #[serde(default)]
    pub delay: RetryDelay,
    /// Delay shape.
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryConfig {
    /// Fixed-delay policy with the given number of retries.
    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            retries,
            delay: RetryDelay(delay),
            backoff: Backoff::Fixed,
        }
    }

    /// Exponential-backoff policy with the given base delay.
    pub fn exponential(retries: u32, base: Duration) -> Self {
        Self {
            retries,
            delay: RetryDelay(base),
            backoff: Backoff::Exponential,
        }
    }

    /// Total attempt budget (`retries + 1`).
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delay_units() {
        assert_eq!("500ms".parse::<RetryDelay>().unwrap().0, Duration::from_millis(500));
        assert_eq!("5s".parse::<RetryDelay>().unwrap().0, Duration::from_secs(5));
        assert_eq!("2m".parse::<RetryDelay>().unwrap().0, Duration::from_secs(120));
        assert_eq!("1h".parse::<RetryDelay>().unwrap().0, Duration::from_secs(3600));
    }

    #[test]
    fn parse_delay_rejects_garbage() {
        assert!("".parse::<RetryDelay>().is_err());
        assert!("5".parse::<RetryDelay>().is_err());
        assert!("abc".parse::<RetryDelay>().is_err());
        assert!("5d".parse::<RetryDelay>().is_err());
        assert!("ms500".parse::<RetryDelay>().is_err());
    }

    #[test]
    fn delay_display_roundtrip() {
        for s in ["500ms", "5s", "2m", "1h"] {
            let delay: RetryDelay = s.parse().unwrap();
            assert_eq!(delay.to_string(), s);
            let reparsed: RetryDelay = delay.to_string().parse().unwrap();
            assert_eq!(reparsed, delay);
        }
    }

    #[test]
    fn delay_serde_string_form() {
        let config: RetryConfig = serde_json::from_str(r#"{"retries": 2, "delay": "5s"}"#).unwrap();
        assert_eq!(config.retries, 2);
        assert_eq!(config.delay.0, Duration::from_secs(5));
        assert_eq!(config.backoff, Backoff::Fixed);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"5s\""));
    }

    #[test]
    fn config_compares_structurally() {
        assert_eq!(
            RetryConfig::default(),
            RetryConfig::fixed(0, Duration::from_millis(500))
        );
        assert_ne!(
            RetryConfig::fixed(2, Duration::from_millis(100)),
            RetryConfig::exponential(2, Duration::from_millis(100))
        );
    }

    #[test]
    fn default_is_zero_retries() {
        let config = RetryConfig::default();
        assert_eq!(config.retries, 0);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff, Backoff::Fixed);
    }

    #[test]
    fn max_attempts_is_retries_plus_one() {
        assert_eq!(RetryConfig::fixed(2, Duration::from_millis(10)).max_attempts(), 3);
        assert_eq!(RetryConfig::exponential(4, Duration::from_millis(10)).max_attempts(), 5);
    }
}
