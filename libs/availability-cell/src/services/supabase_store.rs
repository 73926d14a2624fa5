use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use urlencoding::encode;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{BookedAppointment, DayRange, RecurringWindow, TimeBlock};
use crate::services::store::{ExclusionSource, ScheduleRepository};

pub const AVAILABILITY_TABLE: &str = "/rest/v1/professional_availability";
pub const TIME_BLOCKS_TABLE: &str = "/rest/v1/professional_time_blocks";
pub const APPOINTMENTS_TABLE: &str = "/rest/v1/appointments";

/// Public, read-only access to schedule data through PostgREST.
pub struct SupabaseScheduleStore {
    supabase: SupabaseClient,
}

impl SupabaseScheduleStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

/// `Z`-suffixed so the value survives query-string encoding.
pub fn postgrest_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(Into::into)
}

#[async_trait]
impl ScheduleRepository for SupabaseScheduleStore {
    async fn recurring_windows(
        &self,
        professional_id: &str,
        day_of_week: u8,
        location_id: i64,
    ) -> Result<Vec<RecurringWindow>> {
        debug!(
            "Fetching windows for professional {} on weekday {} at location {}",
            professional_id, day_of_week, location_id
        );

        let path = format!(
            "{}?professional_user_id=eq.{}&day_of_week=eq.{}&location_id=eq.{}&order=start_time.asc",
            AVAILABILITY_TABLE, encode(professional_id), day_of_week, location_id
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;

        decode_rows(rows)
    }
}

#[async_trait]
impl ExclusionSource for SupabaseScheduleStore {
    async fn booked_instants(
        &self,
        professional_id: &str,
        range: &DayRange,
    ) -> Result<Vec<DateTime<Utc>>> {
        debug!("Fetching booked appointments for professional {} on {}", professional_id, range.date);

        let path = format!(
            "{}?select=date_time,status&professional_user_id=eq.{}&status=not.ilike.canceled*&date_time=gte.{}&date_time=lte.{}",
            APPOINTMENTS_TABLE,
            encode(professional_id),
            postgrest_timestamp(range.start),
            postgrest_timestamp(range.end)
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;
        let appointments: Vec<BookedAppointment> = decode_rows(rows)?;

        Ok(appointments
            .into_iter()
            .filter(BookedAppointment::occupies_slot)
            .map(|appointment| appointment.date_time)
            .collect())
    }

    async fn time_blocks(
        &self,
        professional_id: &str,
        range: &DayRange,
    ) -> Result<Vec<TimeBlock>> {
        debug!("Fetching time blocks for professional {} on {}", professional_id, range.date);

        let path = format!(
            "{}?professional_user_id=eq.{}&start_date_time=lte.{}&end_date_time=gte.{}&order=start_date_time.asc",
            TIME_BLOCKS_TABLE,
            encode(professional_id),
            postgrest_timestamp(range.end),
            postgrest_timestamp(range.start)
        );
        let rows: Vec<Value> = self.supabase.request(Method::GET, &path, None, None).await?;

        decode_rows(rows)
    }
}
