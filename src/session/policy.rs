//! Token lifetime policy and the duration strings used to configure it.

use std::time::Duration;

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime in days.
pub const DEFAULT_REFRESH_TTL_DAYS: u32 = 7;

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// How long issued tokens stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl_days: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl_days: DEFAULT_REFRESH_TTL_DAYS,
        }
    }
}

impl SessionPolicy {
    /// Refresh token lifetime in seconds.
    pub fn refresh_ttl_secs(&self) -> i64 {
        i64::from(self.refresh_ttl_days) * SECS_PER_DAY
    }
}

/// Parse a duration such as `"900"`, `"900s"`, `"15m"`, `"1h"` or `"7d"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((idx, 's')) => (&s[..idx], 1),
        Some((idx, 'm')) => (&s[..idx], 60),
        Some((idx, 'h')) => (&s[..idx], 60 * 60),
        Some((idx, 'd')) => (&s[..idx], 24 * 60 * 60),
        _ => (s, 1),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid duration '{}': expected e.g. 900s, 15m, 1h or 7d", s))?;

    if value == 0 {
        return Err(format!("Duration must be greater than zero: {}", s));
    }

    value
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration is too large: {}", s))
}

/// Parse a day count such as `"7d"` or `"7"`.
pub fn parse_days(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let digits = s.strip_suffix('d').unwrap_or(s);

    let days: u32 = digits
        .parse()
        .map_err(|_| format!("Invalid day count '{}': expected e.g. 7d", s))?;

    if days == 0 {
        return Err(format!("Day count must be greater than zero: {}", s));
    }

    Ok(days)
}
