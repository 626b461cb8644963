//! Time values taken from the command line (`--timeout`, `--backoff`).

use std::str::FromStr;
use std::time::Duration;

use crate::{ReproError, ReproResult};

/// Wall-clock limit for one attempt. Zero would kill every target as soon as it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeout(pub Duration);

impl FromStr for AttemptTimeout {
    type Err = ReproError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let limit = parse_duration(s)?;
        if limit.is_zero() {
            return Err(ReproError::InvalidArgument(format!(
                "attempt timeout {s:?} must be greater than zero"
            )));
        }
        Ok(Self(limit))
    }
}

/// Pause between attempts. Zero retries immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff(pub Duration);

impl FromStr for RetryBackoff {
    type Err = ReproError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

/// A bare number is seconds, like the `*_secs` config keys. Otherwise one or more
/// `<number><unit>` parts (`ms`, `s`, `m`, `h`) are summed, so `1m30s` is 90 seconds.
pub fn parse_duration(input: &str) -> ReproResult<Duration> {
    let invalid = |why: &str| ReproError::InvalidArgument(format!("invalid duration {input:?}: {why}"));
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty"));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| invalid("number out of range"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(60 * 60)),
            "" => return Err(invalid("missing unit after the last number")),
            other => return Err(invalid(&format!("unknown unit {other:?} (expected ms|s|m|h)"))),
        };
        total = total.saturating_add(part);
        rest = &rest[unit_len..];
    }
    Ok(total)
}
