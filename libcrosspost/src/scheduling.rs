//! Time parsing for `--at` style arguments
//!
//! Accepted forms, tried in order:
//! - RFC 3339 timestamps: "2030-05-01T09:30:00Z"
//! - Local wall-clock times: "2030-05-01 09:30"
//! - Relative durations: "30m", "2h", "1 hour", "in 2 hours"
//! - Natural language: "tomorrow", "next monday 10am"
//!
//! Parsing does not check that the result is in the future; the scheduler
//! rejects past times itself.

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};

use crate::{CrosspostError, Result};

const LOCAL_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];

/// Parse a schedule string relative to the current time
///
/// # Errors
///
/// Returns `InvalidInput` if no supported format matches.
pub fn parse_schedule(input: &str) -> Result<DateTime<Utc>> {
    parse_schedule_from(input, Utc::now())
}

/// Parse a schedule string relative to `now`
pub fn parse_schedule_from(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CrosspostError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(dt) = parse_local(input) {
        return Ok(dt);
    }

    let relative = input.strip_prefix("in ").unwrap_or(input);
    if let Ok(duration) = parse_duration(relative) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|_| {
        CrosspostError::InvalidInput(format!("Could not parse schedule string: {}", input))
    })
}

fn parse_local(input: &str) -> Option<DateTime<Utc>> {
    LOCAL_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(input, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

/// Parse "30m", "2h", "1 hour" into a chrono duration
pub fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input).map_err(|e| {
        CrosspostError::InvalidInput(format!("Could not parse duration '{}': {}", input, e))
    })?;
    Duration::from_std(std_duration)
        .map_err(|_| CrosspostError::InvalidInput("Duration out of range".to_string()))
}
