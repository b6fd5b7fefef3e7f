//! Configuration properties recognized by the core (spec §6), modeled on
//! the teacher's `database::DatabaseConfig` (`rust/src/database/mod.rs`):
//! env-var-backed defaults, explicit overrides via a builder.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::error::{PersistError, Result};

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub database_url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: u32,
    pub connection_timeout: StdDuration,
    /// Data-horizon cutoff for `is_data_horizon_controlled` entity types.
    /// `None` means no eviction ever runs.
    pub data_horizon_period: Option<Duration>,
    pub crypt_password: Option<String>,
    pub crypt_salt: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/domain_store".to_string()),
            user: std::env::var("DATABASE_USER").ok(),
            password: std::env::var("DATABASE_PASSWORD").ok(),
            pool_size: std::env::var("DATABASE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            connection_timeout: StdDuration::from_secs(30),
            data_horizon_period: std::env::var("DATA_HORIZON_PERIOD")
                .ok()
                .and_then(|s| parse_interval(&s).ok()),
            crypt_password: std::env::var("CRYPT_PASSWORD").ok(),
            crypt_salt: std::env::var("CRYPT_SALT").ok(),
        }
    }
}

impl PersistenceConfig {
    pub fn with_data_horizon(mut self, period: &str) -> Result<Self> {
        self.data_horizon_period = Some(parse_interval(period)?);
        Ok(self)
    }
}

/// Parses the `dataHorizonPeriod` grammar from spec §6:
/// optional sign, then one or more `<integer><unit>` tokens, unit in
/// `{y, M, d, h, m, s, ms}`.
pub fn parse_interval(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PersistError::Configuration("empty interval string".into()));
    }

    let (sign, rest) = match input.as_bytes()[0] {
        b'-' => (-1i64, &input[1..]),
        b'+' => (1i64, &input[1..]),
        _ => (1i64, input),
    };

    if rest.is_empty() {
        return Err(PersistError::Configuration(format!(
            "invalid interval string: {input:?}"
        )));
    }

    let mut total = Duration::zero();
    let mut chars = rest.char_indices().peekable();
    let mut token_start = 0usize;
    let mut saw_token = false;

    while let Some(&(idx, c)) = chars.peek() {
        if c.is_ascii_digit() {
            chars.next();
            continue;
        }
        // First non-digit character: consume the unit, which is either
        // "ms" or a single letter from {y,M,d,h,m,s}.
        let digits = &rest[token_start..idx];
        if digits.is_empty() {
            return Err(PersistError::Configuration(format!(
                "invalid interval string: {input:?}"
            )));
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| PersistError::Configuration(format!("invalid interval string: {input:?}")))?;

        let unit_start = idx;
        let unit_end = if rest[idx..].starts_with("ms") {
            idx + 2
        } else {
            idx + c.len_utf8()
        };
        let unit = &rest[unit_start..unit_end];
        total = total
            + unit_to_duration(unit, value)
                .ok_or_else(|| PersistError::Configuration(format!("unknown interval unit {unit:?}")))?;
        saw_token = true;

        // Advance the char iterator past the unit.
        for _ in 0..unit.chars().count() {
            chars.next();
        }
        token_start = unit_end;
    }

    if !saw_token || token_start != rest.len() {
        return Err(PersistError::Configuration(format!(
            "invalid interval string: {input:?}"
        )));
    }

    Ok(total * sign as i32)
}

fn unit_to_duration(unit: &str, value: i64) -> Option<Duration> {
    Some(match unit {
        "y" => Duration::days(value * 365),
        "M" => Duration::days(value * 30),
        "d" => Duration::days(value),
        "h" => Duration::hours(value),
        "m" => Duration::minutes(value),
        "s" => Duration::seconds(value),
        "ms" => Duration::milliseconds(value),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_token() {
        assert_eq!(parse_interval("30d").unwrap(), Duration::days(30));
        assert_eq!(parse_interval("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_interval("500ms").unwrap(), Duration::milliseconds(500));
        assert_eq!(parse_interval("1s").unwrap(), Duration::seconds(1));
    }

    #[test]
    fn parses_compound_tokens() {
        let d = parse_interval("1M2d3h").unwrap();
        assert_eq!(d, Duration::days(30) + Duration::days(2) + Duration::hours(3));
    }

    #[test]
    fn respects_sign() {
        assert_eq!(parse_interval("-1h").unwrap(), Duration::hours(-1));
        assert_eq!(parse_interval("+1h").unwrap(), Duration::hours(1));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("abc").is_err());
        assert!(parse_interval("10x").is_err());
        assert!(parse_interval("10").is_err());
    }

    #[test]
    fn case_distinguishes_minutes_from_months() {
        assert_eq!(parse_interval("1m").unwrap(), Duration::minutes(1));
        assert_eq!(parse_interval("1M").unwrap(), Duration::days(30));
    }
}
