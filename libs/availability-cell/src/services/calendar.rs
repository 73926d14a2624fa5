//! Wall-clock to instant conversions in the practice timezone.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::models::{AvailabilityError, DayRange};

pub fn parse_time_zone(name: &str) -> Result<Tz, AvailabilityError> {
    name.parse::<Tz>()
        .map_err(|_| AvailabilityError::InvalidTimeZone(name.to_string()))
}

/// ISO weekday of a calendar date, Monday = 1.
pub fn iso_weekday(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

/// Resolves a local wall-clock time to an instant.
///
/// Folds resolve to the earlier instant. Times inside a DST gap keep the
/// offset in force before the transition, which moves them forward by the
/// length of the gap.
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(instant) => instant.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let before = tz.offset_from_utc_datetime(&(local - Duration::days(1))).fix();
            let utc = local - Duration::seconds(i64::from(before.local_minus_utc()));
            Utc.from_utc_datetime(&utc)
        }
    }
}

pub fn local_instant(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    resolve_local(tz, date.and_time(time))
}

/// UTC range covering the whole local day, from local midnight to the
/// millisecond before the next local midnight.
pub fn local_day_range(tz: &Tz, date: NaiveDate) -> Result<DayRange, AvailabilityError> {
    let next = date
        .succ_opt()
        .ok_or_else(|| AvailabilityError::Validation(format!("Date {} is out of range", date)))?;

    Ok(DayRange {
        date,
        start: local_instant(tz, date, NaiveTime::MIN),
        end: local_instant(tz, next, NaiveTime::MIN) - Duration::milliseconds(1),
    })
}

/// Bounds stored for an all-day block: 00:00:00 to 23:59:59 local.
pub fn all_day_bounds(tz: &Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    (
        local_instant(tz, date, NaiveTime::MIN),
        local_instant(tz, date, last_second),
    )
}

/// Accepts an RFC 3339 instant, a local `YYYY-MM-DDTHH:MM[:SS]` or a bare
/// `YYYY-MM-DD` (local midnight).
pub fn parse_instant(tz: &Tz, value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Some(instant.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(local) = NaiveDateTime::parse_from_str(value, format) {
            return Some(resolve_local(tz, local));
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| local_instant(tz, date, NaiveTime::MIN))
}

pub fn format_slot(tz: &Tz, instant: DateTime<Utc>) -> String {
    instant.with_timezone(tz).format("%H:%M").to_string()
}
