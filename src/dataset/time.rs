//! CF-style time coordinates (`<unit> since <reference date>`)

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};

/// Largest offset (in milliseconds) that is decoded; beyond it chrono overflows
const MAX_OFFSET_MS: f64 = 1e17;

/// Step of a CF time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStep {
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
}

impl TimeStep {
    fn millis(&self) -> f64 {
        match self {
            TimeStep::Seconds => 1_000.0,
            TimeStep::Minutes => 60_000.0,
            TimeStep::Hours => 3_600_000.0,
            TimeStep::Days => 86_400_000.0,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(TimeStep::Seconds),
            "min" | "mins" | "minute" | "minutes" => Some(TimeStep::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(TimeStep::Hours),
            "d" | "day" | "days" => Some(TimeStep::Days),
            _ => None,
        }
    }
}

/// Parsed `units` attribute of a time coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUnits {
    step: TimeStep,
    epoch: NaiveDateTime,
}

impl TimeUnits {
    /// Parse `"days since 1950-01-01"`, `"hours since 1900/01/01 00:00:00"`...
    ///
    /// Timezone suffixes are ignored; the reference is taken as UTC.
    pub fn parse(units: &str) -> Option<Self> {
        let lower = units.trim().to_ascii_lowercase();
        let (step, reference) = lower.split_once(" since ")?;
        let step = TimeStep::parse(step.trim())?;
        let epoch = parse_reference(reference.trim())?;
        Some(Self { step, epoch })
    }

    /// Axis step
    pub fn step(&self) -> TimeStep {
        self.step
    }

    /// Convert a coordinate value to a timestamp
    pub fn decode(&self, value: f64) -> Option<DateTime<Utc>> {
        let offset_ms = value * self.step.millis();
        if !offset_ms.is_finite() || offset_ms.abs() > MAX_OFFSET_MS {
            return None;
        }
        let delta = TimeDelta::try_milliseconds(offset_ms.round() as i64)?;
        self.epoch
            .checked_add_signed(delta)
            .map(|naive| naive.and_utc())
    }

    /// Convert a timestamp to a coordinate value
    pub fn encode(&self, datetime: DateTime<Utc>) -> f64 {
        let delta = datetime.naive_utc() - self.epoch;
        delta.num_milliseconds() as f64 / self.step.millis()
    }
}

/// Whether `units` has the `since YYYY-MM-DD` shape of a time axis
/// (`-` or `/` as date separator)
pub fn is_time_units(units: &str) -> bool {
    let Some(pos) = units.find("since ") else {
        return false;
    };
    let date = units[pos + "since ".len()..].as_bytes();
    if date.len() < 10 {
        return false;
    }
    let digits = |range: std::ops::Range<usize>| date[range].iter().all(u8::is_ascii_digit);
    let separator = |b: u8| b == b'-' || b == b'/';
    digits(0..4) && separator(date[4]) && digits(5..7) && separator(date[7]) && digits(8..10)
}

fn parse_reference(reference: &str) -> Option<NaiveDateTime> {
    let date_part = reference.get(..10)?.replace('/', "-");
    let date = NaiveDate::parse_from_str(&date_part, "%Y-%m-%d").ok()?;

    let rest = reference[10..].trim_start_matches(['t', 'T', ' ']);
    let clock = rest
        .split(|c: char| c == ' ' || c == 'z' || c == '+')
        .next()
        .unwrap_or("");
    let time = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(clock, fmt).ok())
        .unwrap_or(NaiveTime::MIN);

    Some(date.and_time(time))
}

/// Parse a caller-supplied date: RFC 3339, `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (midnight UTC)
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}
