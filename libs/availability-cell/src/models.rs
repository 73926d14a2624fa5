use std::num::NonZeroU32;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared_models::error::AppError;

/// One block of regular weekly availability, e.g. Monday 09:00-12:00 at a
/// given location, sliced into `slot_duration_minutes` steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringWindow {
    pub id: i64,
    /// ISO weekday, Monday = 1 ... Sunday = 7.
    pub day_of_week: u8,
    #[serde(with = "wall_clock")]
    pub start_time: NaiveTime,
    #[serde(with = "wall_clock")]
    pub end_time: NaiveTime,
    pub slot_duration_minutes: NonZeroU32,
    pub location_id: i64,
}

/// Ad-hoc exclusion interval. All-day blocks are stored already normalised
/// to the local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: i64,
    pub start_date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    pub reason: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
}

impl TimeBlock {
    /// Half-open: a slot starting exactly at `end_date_time` is free.
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.start_date_time <= instant && instant < self.end_date_time
    }

    pub fn title(&self) -> String {
        match (&self.reason, self.is_all_day) {
            (Some(reason), _) if !reason.is_empty() => format!("Block: {}", reason),
            (_, true) => "Block: All day".to_string(),
            _ => "Block: ".to_string(),
        }
    }
}

/// Time block as shown on the professional's calendar.
#[derive(Debug, Clone, Serialize)]
pub struct TimeBlockView {
    #[serde(flatten)]
    pub block: TimeBlock,
    pub title: String,
    pub all_day: bool,
}

impl From<TimeBlock> for TimeBlockView {
    fn from(block: TimeBlock) -> Self {
        Self {
            title: block.title(),
            all_day: block.is_all_day,
            block,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookedAppointment {
    pub date_time: DateTime<Utc>,
    pub status: String,
}

impl BookedAppointment {
    /// Every status except the `CANCELED*` family holds its slot.
    pub fn occupies_slot(&self) -> bool {
        !self.status.to_ascii_uppercase().starts_with("CANCELED")
    }
}

/// UTC bounds of one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    /// Last millisecond of the day, inclusive.
    pub end: DateTime<Utc>,
}

/// Raw availability query as it arrives from the caller. Fields are
/// optional so that missing values surface as validation errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    #[serde(alias = "professionalId")]
    pub professional_id: Option<String>,
    #[serde(alias = "locationId")]
    pub location_id: Option<String>,
}

/// Validated form of [`AvailabilityQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    pub date: NaiveDate,
    pub professional_id: String,
    pub location_id: i64,
}

impl TryFrom<&AvailabilityQuery> for SlotRequest {
    type Error = AvailabilityError;

    fn try_from(query: &AvailabilityQuery) -> Result<Self, Self::Error> {
        let (Some(date), Some(professional_id), Some(location_id)) = (
            non_blank(&query.date),
            non_blank(&query.professional_id),
            non_blank(&query.location_id),
        ) else {
            return Err(AvailabilityError::Validation(
                "date, professional_id and location_id are required".to_string(),
            ));
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            AvailabilityError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", date))
        })?;
        let location_id = location_id.parse::<i64>().map_err(|_| {
            AvailabilityError::Validation(format!("Invalid location_id '{}'", location_id))
        })?;

        Ok(Self {
            date,
            professional_id: professional_id.to_string(),
            location_id,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecurringWindowRequest {
    pub day_of_week: Option<u8>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub slot_duration_minutes: Option<u32>,
    pub location_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTimeBlockRequest {
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
}

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimeZone(String),

    #[error("Dependency error: {0}")]
    Dependency(#[from] anyhow::Error),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Validation(msg) => AppError::ValidationError(msg),
            AvailabilityError::NotFound(msg) => AppError::NotFound(msg),
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::InvalidTimeZone(zone) => {
                AppError::Internal(format!("Practice timezone '{}' is not configured correctly", zone))
            }
            AvailabilityError::Dependency(source) => {
                tracing::error!("Schedule storage failure: {:#}", source);
                AppError::Database("Failed to load schedule data".to_string())
            }
        }
    }
}

/// `HH:MM[:SS]` wall-clock times as stored in `time` columns.
pub mod wall_clock {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M:%S";

    pub fn parse(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid time of day '{}'", raw)))
    }
}
