//! Conversions between lap time strings (`M:SS.mmm`), elapsed time strings (`HH:MM:SS`) and
//! seconds.

use std::error::Error;
use std::fmt;

/// ParseError is returned if a time string does not have the expected layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub input: String,
    pub reason: &'static str,
}

impl ParseError {
    fn new(input: &str, reason: &'static str) -> ParseError {
        ParseError {
            input: input.to_owned(),
            reason,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Invalid time string \"{}\": {}", self.input, self.reason)
    }
}

impl Error for ParseError {}

/// lap_time_to_seconds parses a lap time such as `1:31.045` into seconds.
pub fn lap_time_to_seconds(s: &str) -> Result<f64, ParseError> {
    let (minutes, seconds) = s
        .trim()
        .split_once(':')
        .ok_or_else(|| ParseError::new(s, "missing colon"))?;

    let minutes: u32 = minutes
        .parse()
        .map_err(|_| ParseError::new(s, "minutes are not numeric"))?;

    if seconds.is_empty() || !seconds.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(ParseError::new(s, "seconds are not numeric"));
    }
    let seconds: f64 = seconds
        .parse()
        .map_err(|_| ParseError::new(s, "seconds are not numeric"))?;
    if seconds >= 60.0 {
        return Err(ParseError::new(s, "seconds must be below 60"));
    }

    Ok(minutes as f64 * 60.0 + seconds)
}

/// seconds_to_lap_time renders seconds as `M:SS.mmm`, rounded to milliseconds.
pub fn seconds_to_lap_time(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let rem_ms = total_ms % 60_000;
    format!("{}:{:02}.{:03}", minutes, rem_ms / 1000, rem_ms % 1000)
}

/// seconds_to_time_string renders the whole seconds of secs as `HH:MM:SS`. Hours do not wrap.
pub fn seconds_to_time_string(secs: f64) -> String {
    let total = secs.max(0.0).floor() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// time_string_to_seconds parses `HH:MM:SS` into seconds.
pub fn time_string_to_seconds(s: &str) -> Result<f64, ParseError> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 3 {
        return Err(ParseError::new(s, "expected HH:MM:SS"));
    }

    let mut fields = [0u64; 3];
    for (field, part) in fields.iter_mut().zip(parts.iter()) {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(ParseError::new(s, "fields are not numeric"));
        }
        *field = part
            .parse()
            .map_err(|_| ParseError::new(s, "fields are not numeric"))?;
    }

    let [hours, minutes, seconds] = fields;
    if minutes >= 60 || seconds >= 60 {
        return Err(ParseError::new(s, "minutes and seconds must be below 60"));
    }

    let total = hours
        .checked_mul(3600)
        .and_then(|secs| secs.checked_add(minutes * 60 + seconds))
        .ok_or_else(|| ParseError::new(s, "hours out of range"))?;
    Ok(total as f64)
}
