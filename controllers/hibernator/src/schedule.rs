//! Weekly time-window scheduling.
//!
//! Decides whether an instant falls inside any of a Hibernator's weekly
//! windows and how many seconds remain until the next boundary.
//!
//! Instants are mapped onto a linear week (`weekday * 86400 + seconds of day`,
//! Sunday = 0) in the configured zone. Ranges whose `weekdayFrom` comes after
//! `weekdayTo` wrap past Saturday and are split into two linear ranges that
//! both report the index of the range they came from.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use crds::{DateTimeWithZone, TimeRange, TimeRangesWithZone, UnknownWeekday, Weekday};
use thiserror::Error;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;

/// Errors raised while interpreting a schedule
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid time zone {0:?}")]
    InvalidTimeZone(String),

    #[error("invalid time of day {0:?}, expected H[:MM[:SS]]")]
    InvalidTime(String),

    #[error(transparent)]
    InvalidWeekday(#[from] UnknownWeekday),

    #[error("invalid date time {0:?}, expected RFC 3339 or YYYY-MM-DD HH:MM[:SS]")]
    InvalidDateTime(String),
}

/// Result of [`nearest_time_gap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NearestTimeGap {
    /// Seconds to the end of the containing window, or to the next window start
    pub time_gap_in_seconds: i64,
    pub within_range: bool,
    /// Index of the containing range in `timeRanges`, -1 when outside every range
    pub matched_index: i32,
}

impl NearestTimeGap {
    fn outside(gap: i64) -> Self {
        Self {
            time_gap_in_seconds: gap,
            within_range: false,
            matched_index: -1,
        }
    }

    /// Containing ranges beat non-containing ones, then the smaller gap wins
    fn is_better_than(&self, other: &Self) -> bool {
        if self.within_range != other.within_range {
            return self.within_range;
        }
        self.time_gap_in_seconds < other.time_gap_in_seconds
    }
}

/// A range on the linear week, `day_from <= day_to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinearRange {
    index: usize,
    day_from: u32,
    day_to: u32,
    time_from: i64,
    time_to: i64,
}

impl LinearRange {
    fn contains(&self, day: u32, seconds: i64) -> bool {
        (self.day_from..=self.day_to).contains(&day) && (self.time_from..=self.time_to).contains(&seconds)
    }

    /// Seconds until the next daily window of this range opens
    fn next_start(&self, position: i64) -> i64 {
        (self.day_from..=self.day_to)
            .map(|day| {
                let start = i64::from(day) * SECONDS_PER_DAY + self.time_from - position;
                if start < 0 { start + SECONDS_PER_WEEK } else { start }
            })
            .min()
            .unwrap_or(SECONDS_PER_WEEK)
    }
}

/// Parse `H[:MM[:SS]]` into seconds since midnight
pub fn parse_time_of_day(value: &str) -> Result<i64, ScheduleError> {
    let invalid = || ScheduleError::InvalidTime(value.to_string());
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty() || p.len() > 2) {
        return Err(invalid());
    }

    let mut fields = [0_i64; 3];
    for (field, part) in fields.iter_mut().zip(&parts) {
        *field = part.parse::<u8>().map(i64::from).map_err(|_| invalid())?;
    }
    let [hours, minutes, seconds] = fields;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(invalid());
    }
    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Resolve an IANA zone name; empty means UTC
pub fn resolve_time_zone(name: &str) -> Result<Tz, ScheduleError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    name.parse::<Tz>()
        .map_err(|e| ScheduleError::InvalidTimeZone(format!("{name}: {e}")))
}

/// Resolve a `pauseUntil` style instant
///
/// RFC 3339 values carry their own offset; plain `YYYY-MM-DD HH:MM[:SS]`
/// values are read in `timeZone`.
pub fn parse_date_time(value: &DateTimeWithZone) -> Result<DateTime<Utc>, ScheduleError> {
    let raw = value.date_time.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }

    let zone = resolve_time_zone(&value.time_zone)?;
    let invalid = || ScheduleError::InvalidDateTime(raw.to_string());
    let local = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .map_err(|_| invalid())?;
    zone.from_local_datetime(&local)
        .earliest()
        .map(|instant| instant.with_timezone(&Utc))
        .ok_or_else(invalid)
}

fn linearize(index: usize, range: &TimeRange) -> Result<Vec<LinearRange>, ScheduleError> {
    let day_from = range.weekday_from.parse::<Weekday>()?.ordinal();
    let day_to = range.weekday_to.parse::<Weekday>()?.ordinal();
    let time_from = parse_time_of_day(&range.time_from)?;
    let time_to = parse_time_of_day(&range.time_to)?;

    let linear = |day_from, day_to| LinearRange {
        index,
        day_from,
        day_to,
        time_from,
        time_to,
    };
    if day_from <= day_to {
        Ok(vec![linear(day_from, day_to)])
    } else {
        Ok(vec![
            linear(day_from, Weekday::Sat.ordinal()),
            linear(Weekday::Sun.ordinal(), day_to),
        ])
    }
}

fn normalize(ranges: &[TimeRange]) -> Result<Vec<LinearRange>, ScheduleError> {
    let mut linear = Vec::with_capacity(ranges.len() * 2);
    for (index, range) in ranges.iter().enumerate() {
        linear.extend(linearize(index, range)?);
    }
    Ok(linear)
}

/// Weekday ordinal and seconds of day of `instant` in `zone`
fn week_position<Z: TimeZone>(instant: DateTime<Utc>, zone: &Z) -> (u32, i64) {
    let local = instant.with_timezone(zone);
    (
        local.weekday().num_days_from_sunday(),
        i64::from(local.num_seconds_from_midnight()),
    )
}

/// Gap to the nearest window boundary
///
/// Inside a window the gap runs to that day's `timeTo`; outside, to the next
/// `timeFrom` of any range. A schedule without ranges is never active and is
/// re-checked a week later. Ranges whose `timeFrom` is after `timeTo` never
/// contain an instant and are ignored.
pub fn nearest_time_gap(
    schedule: &TimeRangesWithZone,
    instant: DateTime<Utc>,
) -> Result<NearestTimeGap, ScheduleError> {
    let zone = resolve_time_zone(&schedule.time_zone)?;
    let ranges = normalize(&schedule.time_ranges)?;
    let (day, seconds) = week_position(instant, &zone);
    let position = i64::from(day) * SECONDS_PER_DAY + seconds;

    let mut best: Option<NearestTimeGap> = None;
    for range in ranges.iter().filter(|r| r.time_from <= r.time_to) {
        let candidate = if range.contains(day, seconds) {
            NearestTimeGap {
                time_gap_in_seconds: range.time_to - seconds,
                within_range: true,
                matched_index: i32::try_from(range.index).unwrap_or(i32::MAX),
            }
        } else {
            NearestTimeGap::outside(range.next_start(position))
        };

        if best.is_none_or(|current| candidate.is_better_than(&current)) {
            best = Some(candidate);
        }
    }

    Ok(best.unwrap_or_else(|| NearestTimeGap::outside(SECONDS_PER_WEEK)))
}
