use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveTime;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeInputError {
    #[error("Invalid time format: '{0}'")]
    InvalidTimeFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn to_naive_time(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

static COLON_TIME_RE: OnceLock<Regex> = OnceLock::new();
static DIGITS_ONLY_RE: OnceLock<Regex> = OnceLock::new();

fn colon_time_pattern() -> &'static Regex {
    COLON_TIME_RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2}):(\d{2})$").expect("colon time regex is valid")
    })
}

fn digits_only_pattern() -> &'static Regex {
    DIGITS_ONLY_RE.get_or_init(|| {
        Regex::new(r"^\d{1,4}$").expect("digits regex is valid")
    })
}

/// Parses `"15:30"`, `"9:05"`, `"15"`, `"930"` or `"1530"` into a time of day.
pub fn parse_time_input(input: &str) -> Result<TimeOfDay, TimeInputError> {
    let trimmed = input.trim();
    let invalid = || TimeInputError::InvalidTimeFormat(input.to_string());

    let (hour, minute) = if let Some(caps) = colon_time_pattern().captures(trimmed) {
        let hour = caps[1].parse::<u32>().map_err(|_| invalid())?;
        let minute = caps[2].parse::<u32>().map_err(|_| invalid())?;
        (hour, minute)
    } else if digits_only_pattern().is_match(trimmed) {
        let num = trimmed.parse::<u32>().map_err(|_| invalid())?;
        if trimmed.len() <= 2 {
            (num, 0)
        } else {
            (num / 100, num % 100)
        }
    } else {
        return Err(invalid());
    };

    if hour > 23 || minute > 59 {
        return Err(invalid());
    }

    Ok(TimeOfDay { hour, minute })
}

/// Canonical `HH:MM` rendering of a parsed input.
pub fn canonical_time(input: &str) -> Result<String, TimeInputError> {
    parse_time_input(input).map(|time| time.to_string())
}
