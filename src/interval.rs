// src/interval.rs

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Matches H:MM and H:MM:SS clock-style durations. The sign is captured
// separately so it applies to the whole quantity, not just the hour digits
// ("-0:30" must come out as -30 minutes).
static CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-)?(\d{1,3}):(\d{1,2})(?::(\d{1,2}))?$").expect("clock interval regex is valid")
});

/// A raw interval cell as stored upstream: sometimes a duration-shaped
/// string, sometimes a bare number of hours. Attendance exports have mixed
/// both encodings for years, so the wire type accepts either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntervalValue {
    Text(String),
    Number(f64),
}

/// Converts a raw interval cell into a signed whole number of minutes.
///
/// Accepted shapes:
/// - missing cell or empty string: 0
/// - bare number: interpreted as hours, multiplied by 60, rounded
/// - `H:MM` or `H:MM:SS` (optional leading minus): hours and minutes,
///   seconds rounded to the nearest minute
/// - decimal string, `,` or `.` as separator: interpreted as hours
///
/// Anything else is 0. Historical rows contain too many malformed cells to
/// make parse failures actionable, so unrecognized input deliberately
/// contributes nothing instead of failing the whole view.
pub fn parse_minutes(raw: Option<&IntervalValue>) -> i64 {
    let Some(value) = raw else {
        return 0;
    };

    match value {
        IntervalValue::Number(n) => {
            if n.is_finite() {
                (n * 60.0).round() as i64
            } else {
                0
            }
        }
        IntervalValue::Text(text) => {
            let text = text.trim();
            if text.is_empty() {
                return 0;
            }

            if let Some(caps) = CLOCK_RE.captures(text) {
                let sign: i64 = if caps.get(1).is_some() { -1 } else { 1 };
                // Capture groups 2 and 3 always match when the regex does and
                // stay within i64 range at 1-3 digits.
                let hours: i64 = caps[2].parse().unwrap_or(0);
                let minutes: i64 = caps[3].parse().unwrap_or(0);
                let seconds: i64 = caps
                    .get(4)
                    .and_then(|m| m.as_str().parse::<i64>().ok())
                    .unwrap_or(0);
                return sign * (hours * 60 + minutes + ((seconds as f64) / 60.0).round() as i64);
            }

            match text.replace(',', ".").parse::<f64>() {
                Ok(hours) if hours.is_finite() => (hours * 60.0).round() as i64,
                _ => 0,
            }
        }
    }
}

/// Renders a signed minute count as `HH:MM` with a leading minus for
/// negative values. Zero renders as the empty string: the dashboards treat
/// "no overtime" cells as blank, and callers wanting a dash substitute it
/// themselves.
///
/// Left inverse of [`parse_minutes`] over every value that function produces
/// from a well-formed clock string.
pub fn format_minutes(minutes: i64) -> String {
    if minutes == 0 {
        return String::new();
    }
    let sign = if minutes < 0 { "-" } else { "" };
    let abs = minutes.abs();
    format!("{}{:02}:{:02}", sign, abs / 60, abs % 60)
}
