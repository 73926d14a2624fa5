use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use shared_config::AppConfig;

use crate::models::{AvailabilityError, AvailabilityQuery, RecurringWindow, SlotRequest, TimeBlock};
use crate::services::calendar;
use crate::services::store::{ExclusionSource, ScheduleRepository};
use crate::services::supabase_store::SupabaseScheduleStore;

/// Derives the bookable slot start times of one calendar day from the
/// weekly schedule, existing appointments and time blocks.
pub struct SlotGenerator {
    schedules: Arc<dyn ScheduleRepository>,
    exclusions: Arc<dyn ExclusionSource>,
    time_zone: Tz,
}

impl SlotGenerator {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        exclusions: Arc<dyn ExclusionSource>,
        time_zone: Tz,
    ) -> Self {
        Self {
            schedules,
            exclusions,
            time_zone,
        }
    }

    /// Generator backed by Supabase, in the configured practice timezone.
    pub fn from_config(config: &AppConfig) -> Result<Self, AvailabilityError> {
        let time_zone = calendar::parse_time_zone(&config.practice_timezone)?;
        let store = Arc::new(SupabaseScheduleStore::new(config));
        Ok(Self::new(store.clone(), store, time_zone))
    }

    /// Available `HH:mm` slots for the queried day, as of now.
    pub async fn compute_availability(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<Vec<String>, AvailabilityError> {
        self.compute_availability_at(query, Utc::now()).await
    }

    /// Same as [`compute_availability`](Self::compute_availability) with an
    /// explicit `now`. Slots starting before `now` are never offered.
    pub async fn compute_availability_at(
        &self,
        query: &AvailabilityQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, AvailabilityError> {
        let request = SlotRequest::try_from(query)?;
        let day_of_week = calendar::iso_weekday(request.date);

        debug!(
            "Computing availability for professional {} at location {} on {} (weekday {})",
            request.professional_id, request.location_id, request.date, day_of_week
        );

        let windows = self
            .schedules
            .recurring_windows(&request.professional_id, day_of_week, request.location_id)
            .await?;

        if windows.is_empty() {
            debug!("No recurring windows configured for weekday {}", day_of_week);
            return Ok(vec![]);
        }

        let range = calendar::local_day_range(&self.time_zone, request.date)?;

        // Occupancy is professional-wide, so location is not part of either query
        let (booked, blocks) = tokio::try_join!(
            self.exclusions.booked_instants(&request.professional_id, &range),
            self.exclusions.time_blocks(&request.professional_id, &range),
        )?;

        debug!(
            "Found {} windows, {} booked appointments and {} time blocks",
            windows.len(),
            booked.len(),
            blocks.len()
        );

        let booked: HashSet<DateTime<Utc>> = booked.into_iter().collect();
        let slots = generate_slots(&self.time_zone, request.date, &windows, &booked, &blocks, now);

        Ok(slots
            .into_iter()
            .map(|slot| calendar::format_slot(&self.time_zone, slot))
            .collect())
    }
}

/// Steps through every window and keeps the instants that are not in the
/// past, not booked and not inside a block. The result is sorted and
/// deduplicated across windows.
pub fn generate_slots(
    tz: &Tz,
    date: NaiveDate,
    windows: &[RecurringWindow],
    booked: &HashSet<DateTime<Utc>>,
    blocks: &[TimeBlock],
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    let mut slots = Vec::new();

    for window in windows {
        let step = Duration::minutes(i64::from(window.slot_duration_minutes.get()));
        let mut cursor = calendar::local_instant(tz, date, window.start_time);
        let window_end = calendar::local_instant(tz, date, window.end_time);

        while cursor < window_end {
            if cursor < now {
                cursor += step;
                continue;
            }

            let is_booked = booked.contains(&cursor);
            let is_blocked = blocks.iter().any(|block| block.covers(cursor));

            if !is_booked && !is_blocked {
                slots.push(cursor);
            }

            cursor += step;
        }
    }

    slots.sort();
    slots.dedup();
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    use assert_matches::assert_matches;
    use chrono::{NaiveTime, TimeZone};
    use chrono_tz::America::{Argentina::Buenos_Aires, New_York};
    use mockall::predicate::eq;

    use crate::services::store::{MockExclusionSource, MockScheduleRepository};

    const PRO: &str = "pro-1";
    const LOCATION: i64 = 3;

    // 2030-01-07 is a Monday; Buenos Aires is UTC-3 all year.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
    }

    fn query_for(date: &str) -> AvailabilityQuery {
        AvailabilityQuery {
            date: Some(date.to_string()),
            professional_id: Some(PRO.to_string()),
            location_id: Some(LOCATION.to_string()),
        }
    }

    fn monday_query() -> AvailabilityQuery {
        query_for("2030-01-07")
    }

    fn window(id: i64, start: (u32, u32), end: (u32, u32), minutes: u32) -> RecurringWindow {
        RecurringWindow {
            id,
            day_of_week: 1,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            slot_duration_minutes: NonZeroU32::new(minutes).unwrap(),
            location_id: LOCATION,
        }
    }

    fn local(tz: &Tz, date: NaiveDate, h: u32, m: u32) -> DateTime<Utc> {
        tz.from_local_datetime(&date.and_hms_opt(h, m, 0).unwrap())
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn block(id: i64, start: DateTime<Utc>, end: DateTime<Utc>, all_day: bool) -> TimeBlock {
        TimeBlock {
            id,
            start_date_time: start,
            end_date_time: end,
            reason: None,
            is_all_day: all_day,
        }
    }

    fn before_opening() -> DateTime<Utc> {
        local(&Buenos_Aires, monday(), 7, 0)
    }

    fn repository_with(windows: Vec<RecurringWindow>) -> MockScheduleRepository {
        let mut repository = MockScheduleRepository::new();
        repository
            .expect_recurring_windows()
            .with(eq(PRO), eq(1u8), eq(LOCATION))
            .times(1)
            .returning(move |_, _, _| Ok(windows.clone()));
        repository
    }

    fn exclusions_with(booked: Vec<DateTime<Utc>>, blocks: Vec<TimeBlock>) -> MockExclusionSource {
        let mut exclusions = MockExclusionSource::new();
        exclusions
            .expect_booked_instants()
            .times(1)
            .returning(move |_, _| Ok(booked.clone()));
        exclusions
            .expect_time_blocks()
            .times(1)
            .returning(move |_, _| Ok(blocks.clone()));
        exclusions
    }

    fn generator(
        repository: MockScheduleRepository,
        exclusions: MockExclusionSource,
    ) -> SlotGenerator {
        SlotGenerator::new(Arc::new(repository), Arc::new(exclusions), Buenos_Aires)
    }

    fn morning() -> Vec<RecurringWindow> {
        vec![window(1, (9, 0), (12, 0), 30)]
    }

    #[tokio::test]
    async fn test_full_morning_without_exclusions() {
        let generator = generator(repository_with(morning()), exclusions_with(vec![], vec![]));

        let slots = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert_eq!(slots, vec!["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"]);
    }

    #[tokio::test]
    async fn test_booked_instant_removes_exact_slot_only() {
        let booked = vec![local(&Buenos_Aires, monday(), 10, 0)];
        let generator = generator(repository_with(morning()), exclusions_with(booked, vec![]));

        let slots = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert_eq!(slots, vec!["09:00", "09:30", "10:30", "11:00", "11:30"]);
    }

    #[tokio::test]
    async fn test_booking_off_the_grid_blocks_nothing() {
        let booked = vec![local(&Buenos_Aires, monday(), 10, 15)];
        let generator = generator(repository_with(morning()), exclusions_with(booked, vec![]));

        let slots = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert_eq!(slots.len(), 6);
    }

    #[tokio::test]
    async fn test_time_block_is_half_open() {
        let blocks = vec![block(
            1,
            local(&Buenos_Aires, monday(), 10, 0),
            local(&Buenos_Aires, monday(), 10, 30),
            false,
        )];
        let generator = generator(repository_with(morning()), exclusions_with(vec![], blocks));

        let slots = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert!(!slots.contains(&"10:00".to_string()));
        assert!(slots.contains(&"10:30".to_string()));
        assert_eq!(slots.len(), 5);
    }

    #[tokio::test]
    async fn test_block_spanning_several_slots() {
        let blocks = vec![block(
            1,
            local(&Buenos_Aires, monday(), 9, 15),
            local(&Buenos_Aires, monday(), 10, 45),
            false,
        )];
        let generator = generator(repository_with(morning()), exclusions_with(vec![], blocks));

        let slots = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert_eq!(slots, vec!["09:00", "11:00", "11:30"]);
    }

    #[tokio::test]
    async fn test_past_slots_are_skipped() {
        let now = local(&Buenos_Aires, monday(), 9, 45);
        let generator = generator(repository_with(morning()), exclusions_with(vec![], vec![]));

        let slots = generator.compute_availability_at(&monday_query(), now).await.unwrap();

        assert_eq!(slots, vec!["10:00", "10:30", "11:00", "11:30"]);
    }

    #[tokio::test]
    async fn test_slot_starting_exactly_now_is_offered() {
        let now = local(&Buenos_Aires, monday(), 10, 0);
        let generator = generator(repository_with(morning()), exclusions_with(vec![], vec![]));

        let slots = generator.compute_availability_at(&monday_query(), now).await.unwrap();

        assert_eq!(slots.first().map(String::as_str), Some("10:00"));
    }

    #[tokio::test]
    async fn test_all_day_block_empties_the_day() {
        let (start, end) = calendar::all_day_bounds(&Buenos_Aires, monday());
        let windows = vec![window(1, (0, 0), (12, 0), 60), window(2, (14, 0), (23, 59), 15)];
        let generator = generator(
            repository_with(windows),
            exclusions_with(vec![], vec![block(1, start, end, true)]),
        );

        let slots = generator
            .compute_availability_at(&monday_query(), before_opening() - Duration::hours(8))
            .await
            .unwrap();

        assert!(slots.is_empty());
    }

    #[tokio::test]
    async fn test_no_windows_short_circuits() {
        let mut repository = MockScheduleRepository::new();
        repository.expect_recurring_windows().times(1).returning(|_, _, _| Ok(vec![]));

        let mut exclusions = MockExclusionSource::new();
        exclusions.expect_booked_instants().never();
        exclusions.expect_time_blocks().never();

        let slots = generator(repository, exclusions)
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert!(slots.is_empty());
    }

    #[tokio::test]
    async fn test_weekday_is_iso_numbered() {
        // 2030-01-13 is a Sunday
        let mut repository = MockScheduleRepository::new();
        repository
            .expect_recurring_windows()
            .with(eq(PRO), eq(7u8), eq(LOCATION))
            .times(1)
            .returning(|_, _, _| Ok(vec![]));
        let mut exclusions = MockExclusionSource::new();
        exclusions.expect_booked_instants().never();
        exclusions.expect_time_blocks().never();

        let slots = generator(repository, exclusions)
            .compute_availability_at(&query_for("2030-01-13"), before_opening())
            .await
            .unwrap();

        assert!(slots.is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_query() {
        let mut repository = MockScheduleRepository::new();
        repository.expect_recurring_windows().never();
        let mut exclusions = MockExclusionSource::new();
        exclusions.expect_booked_instants().never();
        exclusions.expect_time_blocks().never();
        let generator = generator(repository, exclusions);

        let missing_location = AvailabilityQuery {
            location_id: None,
            ..monday_query()
        };
        assert_matches!(
            generator.compute_availability_at(&missing_location, before_opening()).await,
            Err(AvailabilityError::Validation(_))
        );
        assert_matches!(
            generator
                .compute_availability_at(&AvailabilityQuery::default(), before_opening())
                .await,
            Err(AvailabilityError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_exclusion_queries_use_local_day_range() {
        let expected_start = Utc.with_ymd_and_hms(2030, 1, 7, 3, 0, 0).unwrap();
        let mut exclusions = MockExclusionSource::new();
        exclusions
            .expect_booked_instants()
            .withf(move |professional, range| {
                professional.to_string() == PRO && range.start == expected_start
            })
            .times(1)
            .returning(|_, _| Ok(vec![]));
        exclusions
            .expect_time_blocks()
            .withf(move |professional, range| {
                professional.to_string() == PRO && range.date == monday()
            })
            .times(1)
            .returning(|_, _| Ok(vec![]));

        let slots = generator(repository_with(morning()), exclusions)
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert_eq!(slots.len(), 6);
    }

    #[tokio::test]
    async fn test_repository_failure_propagates() {
        let mut repository = MockScheduleRepository::new();
        repository
            .expect_recurring_windows()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));
        let mut exclusions = MockExclusionSource::new();
        exclusions.expect_booked_instants().never();
        exclusions.expect_time_blocks().never();

        let result = generator(repository, exclusions)
            .compute_availability_at(&monday_query(), before_opening())
            .await;

        assert_matches!(
            result,
            Err(AvailabilityError::Dependency(e)) if e.to_string() == "connection refused"
        );
    }

    #[tokio::test]
    async fn test_exclusion_failure_aborts_whole_request() {
        let mut exclusions = MockExclusionSource::new();
        exclusions.expect_booked_instants().returning(|_, _| Ok(vec![]));
        exclusions
            .expect_time_blocks()
            .returning(|_, _| Err(anyhow::anyhow!("timeout")));

        let result = generator(repository_with(morning()), exclusions)
            .compute_availability_at(&monday_query(), before_opening())
            .await;

        assert_matches!(result, Err(AvailabilityError::Dependency(_)));
    }

    #[tokio::test]
    async fn test_repeated_calls_are_identical() {
        let mut repository = MockScheduleRepository::new();
        repository.expect_recurring_windows().times(2).returning(|_, _, _| Ok(morning()));
        let booked = vec![local(&Buenos_Aires, monday(), 11, 0)];
        let mut exclusions = MockExclusionSource::new();
        exclusions.expect_booked_instants().times(2).returning(move |_, _| Ok(booked.clone()));
        exclusions.expect_time_blocks().times(2).returning(|_, _| Ok(vec![]));
        let generator = generator(repository, exclusions);

        let first = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();
        let second = generator
            .compute_availability_at(&monday_query(), before_opening())
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_unordered_overlapping_windows_are_sorted_and_deduplicated() {
        let windows = vec![
            window(2, (14, 0), (15, 0), 30),
            window(1, (9, 0), (10, 0), 30),
            window(3, (9, 30), (10, 30), 30),
        ];

        let slots = generate_slots(
            &Buenos_Aires,
            monday(),
            &windows,
            &HashSet::new(),
            &[],
            before_opening(),
        );
        let formatted: Vec<String> = slots
            .iter()
            .map(|s| calendar::format_slot(&Buenos_Aires, *s))
            .collect();

        assert_eq!(formatted, vec!["09:00", "09:30", "10:00", "14:00", "14:30"]);
    }

    #[test]
    fn test_last_slot_may_overrun_window_end() {
        // 09:00-10:00 stepped by 45 minutes yields 09:00 and 09:45
        let windows = vec![window(1, (9, 0), (10, 0), 45)];

        let slots = generate_slots(
            &Buenos_Aires,
            monday(),
            &windows,
            &HashSet::new(),
            &[],
            before_opening(),
        );

        assert_eq!(slots, vec![
            local(&Buenos_Aires, monday(), 9, 0),
            local(&Buenos_Aires, monday(), 9, 45),
        ]);
    }

    #[test]
    fn test_every_slot_lies_on_its_window_grid() {
        let windows = vec![window(1, (8, 10), (13, 0), 25), window(2, (15, 0), (18, 0), 40)];
        let booked: HashSet<_> = [local(&Buenos_Aires, monday(), 9, 0)].into_iter().collect();
        let now = local(&Buenos_Aires, monday(), 9, 1);

        let slots = generate_slots(&Buenos_Aires, monday(), &windows, &booked, &[], now);

        assert!(!slots.is_empty());
        for slot in &slots {
            assert!(*slot >= now);
            assert!(!booked.contains(slot));
            let on_grid = windows.iter().any(|w| {
                let start = calendar::local_instant(&Buenos_Aires, monday(), w.start_time);
                let end = calendar::local_instant(&Buenos_Aires, monday(), w.end_time);
                let offset = (*slot - start).num_minutes();
                *slot >= start
                    && *slot < end
                    && offset % i64::from(w.slot_duration_minutes.get()) == 0
            });
            assert!(on_grid, "slot {} is off every window grid", slot);
        }
    }

    #[test]
    fn test_spring_forward_keeps_fixed_spacing() {
        // New York skips 02:00-03:00 on 2030-03-10
        let sunday = NaiveDate::from_ymd_opt(2030, 3, 10).unwrap();
        let windows = vec![window(1, (1, 0), (4, 0), 60)];
        let now = Utc.with_ymd_and_hms(2030, 3, 9, 0, 0, 0).unwrap();

        let slots = generate_slots(&New_York, sunday, &windows, &HashSet::new(), &[], now);
        let formatted: Vec<String> = slots
            .iter()
            .map(|s| calendar::format_slot(&New_York, *s))
            .collect();

        assert_eq!(formatted, vec!["01:00", "03:00"]);
    }
}
