//! Parsing of check-level cache durations.

use std::time::Duration;

use crate::error::ConfigurationError;

/// How long a check's results stay valid in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFor {
    /// Never cache: lookups always miss, writes are no-ops.
    Disabled,
    /// Cache with the given TTL.
    Ttl(Duration),
}

impl CacheFor {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CacheFor::Disabled => None,
            CacheFor::Ttl(d) => Some(*d),
        }
    }
}

/// Parse a duration of the form `<digits>(s|m|h|d)`.
///
/// Anything else is a configuration error; already-typed `Duration` values
/// bypass this parser entirely.
pub fn parse_duration(check: &str, input: &str) -> Result<Duration, ConfigurationError> {
    let invalid = || ConfigurationError::InvalidDuration {
        check: check.to_string(),
        input: input.to_string(),
    };

    if input.len() < 2 {
        return Err(invalid());
    }
    let (digits, suffix) = input.split_at(input.len() - 1);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let seconds = match suffix {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86_400,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_suffixes() {
        assert_eq!(parse_duration("c", "5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("c", "5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("c", "2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("c", "1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn rejects_malformed_inputs() {
        for input in ["", "m", "5", "5x", "m5", "5.5m", "-5m", "5 m", "5ms"] {
            assert!(parse_duration("c", input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn error_names_the_check() {
        let err = parse_duration("app.checks.latency", "7w").unwrap_err();
        assert!(err.to_string().contains("app.checks.latency"));
    }
}
