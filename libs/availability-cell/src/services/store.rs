use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DayRange, RecurringWindow, TimeBlock};

/// Read side of the weekly schedule.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Windows configured for one weekday at one location. An empty result
    /// means nothing is configured.
    async fn recurring_windows(
        &self,
        professional_id: &str,
        day_of_week: u8,
        location_id: i64,
    ) -> Result<Vec<RecurringWindow>>;
}

/// Data that removes candidate slots: existing appointments and time blocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExclusionSource: Send + Sync {
    /// Start instants of non-canceled appointments inside `range`, across
    /// every location of the professional.
    async fn booked_instants(
        &self,
        professional_id: &str,
        range: &DayRange,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Blocks whose span touches the calendar day of `range`.
    async fn time_blocks(
        &self,
        professional_id: &str,
        range: &DayRange,
    ) -> Result<Vec<TimeBlock>>;
}
