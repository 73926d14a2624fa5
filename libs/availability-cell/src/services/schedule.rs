use anyhow::anyhow;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use urlencoding::encode;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    wall_clock, AvailabilityError, CreateRecurringWindowRequest, CreateTimeBlockRequest,
    RecurringWindow, TimeBlock, TimeBlockView,
};
use crate::services::calendar;
use crate::services::supabase_store::{
    decode_rows, postgrest_timestamp, AVAILABILITY_TABLE, TIME_BLOCKS_TABLE,
};

/// Professional-facing management of recurring windows and time blocks.
/// Every query is scoped to the calling professional.
pub struct ScheduleService {
    supabase: SupabaseClient,
    time_zone: Tz,
}

#[derive(Debug)]
struct NewWindow {
    day_of_week: u8,
    start_time: NaiveTime,
    end_time: NaiveTime,
    slot_duration_minutes: u32,
    location_id: i64,
}

impl TryFrom<CreateRecurringWindowRequest> for NewWindow {
    type Error = AvailabilityError;

    fn try_from(request: CreateRecurringWindowRequest) -> Result<Self, Self::Error> {
        let (Some(day_of_week), Some(start), Some(end), Some(slot_duration_minutes), Some(location_id)) = (
            request.day_of_week,
            request.start_time,
            request.end_time,
            request.slot_duration_minutes,
            request.location_id,
        ) else {
            return Err(AvailabilityError::Validation(
                "day_of_week, start_time, end_time, slot_duration_minutes and location_id are required".to_string(),
            ));
        };

        if !(1..=7).contains(&day_of_week) {
            return Err(AvailabilityError::Validation(
                "Day of week must be between 1 (Monday) and 7 (Sunday)".to_string(),
            ));
        }

        let parse = |value: &str| {
            wall_clock::parse(value).ok_or_else(|| {
                AvailabilityError::Validation(format!("Invalid time '{}', expected HH:MM", value))
            })
        };
        let start_time = parse(&start)?;
        let end_time = parse(&end)?;

        if start_time >= end_time {
            return Err(AvailabilityError::Validation(
                "Start time must be before end time".to_string(),
            ));
        }
        if slot_duration_minutes == 0 {
            return Err(AvailabilityError::Validation("Slot duration must be positive".to_string()));
        }

        Ok(Self {
            day_of_week,
            start_time,
            end_time,
            slot_duration_minutes,
            location_id,
        })
    }
}

impl ScheduleService {
    pub fn new(config: &AppConfig) -> Result<Self, AvailabilityError> {
        Ok(Self {
            supabase: SupabaseClient::new(config),
            time_zone: calendar::parse_time_zone(&config.practice_timezone)?,
        })
    }

    pub async fn list_recurring_windows(
        &self,
        professional_id: &str,
        auth_token: &str,
    ) -> Result<Vec<RecurringWindow>, AvailabilityError> {
        debug!("Fetching recurring windows for professional: {}", professional_id);

        let path = format!(
            "{}?professional_user_id=eq.{}&order=day_of_week.asc,start_time.asc",
            AVAILABILITY_TABLE, encode(professional_id)
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;

        Ok(decode_rows(rows)?)
    }

    pub async fn add_recurring_window(
        &self,
        professional_id: &str,
        request: CreateRecurringWindowRequest,
        auth_token: &str,
    ) -> Result<RecurringWindow, AvailabilityError> {
        let window = NewWindow::try_from(request).inspect_err(|e| {
            warn!("Rejected recurring window for professional {}: {}", professional_id, e);
        })?;
        let start_time = window.start_time.format("%H:%M:%S").to_string();

        let existing_path = format!(
            "{}?professional_user_id=eq.{}&day_of_week=eq.{}&location_id=eq.{}&start_time=eq.{}",
            AVAILABILITY_TABLE, encode(professional_id), window.day_of_week, window.location_id, start_time
        );
        let existing: Vec<Value> = self
            .supabase
            .request(Method::GET, &existing_path, Some(auth_token), None)
            .await?;

        if !existing.is_empty() {
            return Err(AvailabilityError::Conflict(
                "A schedule already exists for that day, start time and location".to_string(),
            ));
        }

        let row = json!({
            "professional_user_id": professional_id,
            "day_of_week": window.day_of_week,
            "start_time": start_time,
            "end_time": window.end_time.format("%H:%M:%S").to_string(),
            "slot_duration_minutes": window.slot_duration_minutes,
            "location_id": window.location_id
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                AVAILABILITY_TABLE,
                Some(auth_token),
                Some(row),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        let created = decode_rows::<RecurringWindow>(result)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Failed to create recurring window"))?;

        info!("Recurring window {} created for professional {}", created.id, professional_id);
        Ok(created)
    }

    pub async fn remove_recurring_window(
        &self,
        professional_id: &str,
        window_id: i64,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let path = format!(
            "{}?id=eq.{}&professional_user_id=eq.{}",
            AVAILABILITY_TABLE, window_id, encode(professional_id)
        );
        self.delete_owned(&path, auth_token, "Schedule not found").await?;

        info!("Recurring window {} removed for professional {}", window_id, professional_id);
        Ok(())
    }

    pub async fn list_time_blocks(
        &self,
        professional_id: &str,
        auth_token: &str,
    ) -> Result<Vec<TimeBlockView>, AvailabilityError> {
        debug!("Fetching time blocks for professional: {}", professional_id);

        let path = format!(
            "{}?professional_user_id=eq.{}&order=start_date_time.asc",
            TIME_BLOCKS_TABLE, encode(professional_id)
        );
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await?;
        let blocks: Vec<TimeBlock> = decode_rows(rows)?;

        Ok(blocks.into_iter().map(TimeBlockView::from).collect())
    }

    pub async fn add_time_block(
        &self,
        professional_id: &str,
        request: CreateTimeBlockRequest,
        auth_token: &str,
    ) -> Result<TimeBlockView, AvailabilityError> {
        let (start, end) = self.block_bounds(&request).inspect_err(|e| {
            warn!("Rejected time block for professional {}: {}", professional_id, e);
        })?;

        let row = json!({
            "professional_user_id": professional_id,
            "start_date_time": postgrest_timestamp(start),
            "end_date_time": postgrest_timestamp(end),
            "reason": request.reason.filter(|r| !r.trim().is_empty()),
            "is_all_day": request.is_all_day
        });

        let result: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::POST,
                TIME_BLOCKS_TABLE,
                Some(auth_token),
                Some(row),
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        let created = decode_rows::<TimeBlock>(result)?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Failed to create time block"))?;

        info!("Time block {} created for professional {}", created.id, professional_id);
        Ok(created.into())
    }

    pub async fn remove_time_block(
        &self,
        professional_id: &str,
        block_id: i64,
        auth_token: &str,
    ) -> Result<(), AvailabilityError> {
        let path = format!(
            "{}?id=eq.{}&professional_user_id=eq.{}",
            TIME_BLOCKS_TABLE, block_id, encode(professional_id)
        );
        self.delete_owned(&path, auth_token, "Time block not found").await?;

        info!("Time block {} removed for professional {}", block_id, professional_id);
        Ok(())
    }

    /// Resolves the stored interval. All-day blocks cover the whole local
    /// calendar date of their start.
    fn block_bounds(
        &self,
        request: &CreateTimeBlockRequest,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), AvailabilityError> {
        let parse = |value: &str| {
            calendar::parse_instant(&self.time_zone, value).ok_or_else(|| {
                AvailabilityError::Validation(format!("Invalid date/time '{}'", value))
            })
        };

        let start = request
            .start_date_time
            .as_deref()
            .ok_or_else(|| AvailabilityError::Validation("start_date_time is required".to_string()))
            .and_then(parse)?;

        if request.is_all_day {
            let local_date = start.with_timezone(&self.time_zone).date_naive();
            return Ok(calendar::all_day_bounds(&self.time_zone, local_date));
        }

        let end = request
            .end_date_time
            .as_deref()
            .ok_or_else(|| {
                AvailabilityError::Validation("end_date_time is required unless the block is all day".to_string())
            })
            .and_then(parse)?;

        if start > end {
            return Err(AvailabilityError::Validation(
                "Block start must not be after its end".to_string(),
            ));
        }

        Ok((start, end))
    }

    async fn delete_owned(
        &self,
        path: &str,
        auth_token: &str,
        not_found: &str,
    ) -> Result<(), AvailabilityError> {
        let deleted: Vec<Value> = self
            .supabase
            .request_with_headers(
                Method::DELETE,
                path,
                Some(auth_token),
                None,
                Some(SupabaseClient::return_representation()),
            )
            .await?;

        if deleted.is_empty() {
            return Err(AvailabilityError::NotFound(not_found.to_string()));
        }

        Ok(())
    }
}
