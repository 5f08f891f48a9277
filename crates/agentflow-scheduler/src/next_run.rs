//! Next-run computation for task schedules.

use chrono::{DateTime, Days, Duration, NaiveTime, TimeZone, Utc};

use agentflow_types::{ScheduleInterval, TaskSchedule};

/// Period used when a `minutes` schedule carries no usable `minute_interval`.
pub const DEFAULT_MINUTE_INTERVAL: u32 = 5;

/// Parse an "HH:MM" time of day.
pub fn parse_time_of_day(time: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M").ok()
}

/// Compute the next trigger instant for `schedule` as seen from `now`.
///
/// Time-of-day schedules are evaluated in the time zone of `now`:
/// - `daily`: today at `time`, or tomorrow if that is not strictly after `now`.
/// - `weekly`: today at `time`, plus seven days, whether or not today's slot
///   is still ahead.
///
/// A missing or unparseable `time` falls back to `now` plus one day (daily)
/// or seven days (weekly).
pub fn calculate_next_run<Tz: TimeZone>(schedule: &TaskSchedule, now: &DateTime<Tz>) -> DateTime<Utc> {
    let now_utc = now.with_timezone(&Utc);
    let time = schedule.time.as_deref().and_then(parse_time_of_day);

    match schedule.interval {
        ScheduleInterval::ThirtySeconds => now_utc + Duration::seconds(30),
        ScheduleInterval::Minute => now_utc + Duration::minutes(1),
        ScheduleInterval::Minutes => {
            let minutes = schedule
                .minute_interval
                .filter(|m| (1..=59).contains(m))
                .unwrap_or(DEFAULT_MINUTE_INTERVAL);
            now_utc + Duration::minutes(i64::from(minutes))
        }
        ScheduleInterval::Hourly => now_utc + Duration::hours(1),
        ScheduleInterval::Daily => {
            let Some(time) = time else {
                return now_utc + Duration::days(1);
            };
            match at_time_of_day(now, time, 0) {
                Some(today) if today > now_utc => today,
                _ => at_time_of_day(now, time, 1).unwrap_or(now_utc + Duration::days(1)),
            }
        }
        ScheduleInterval::Weekly => time
            .and_then(|time| at_time_of_day(now, time, 7))
            .unwrap_or(now_utc + Duration::days(7)),
    }
}

/// Wall-clock `time` on the local date of `now`, shifted by `days_ahead`.
/// `None` when that local time does not exist (DST gap).
fn at_time_of_day<Tz: TimeZone>(
    now: &DateTime<Tz>,
    time: NaiveTime,
    days_ahead: u64,
) -> Option<DateTime<Utc>> {
    let date = now.date_naive().checked_add_days(Days::new(days_ahead))?;
    now.timezone()
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    fn schedule(interval: ScheduleInterval) -> TaskSchedule {
        TaskSchedule::new(interval)
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_fixed_periods() {
        let now = at(2024, 3, 10, 12, 0, 0);
        assert_eq!(
            calculate_next_run(&schedule(ScheduleInterval::ThirtySeconds), &now),
            now + Duration::seconds(30)
        );
        assert_eq!(
            calculate_next_run(&schedule(ScheduleInterval::Minute), &now),
            now + Duration::minutes(1)
        );
        assert_eq!(
            calculate_next_run(&schedule(ScheduleInterval::Hourly), &now),
            now + Duration::hours(1)
        );
    }

    #[test]
    fn test_minutes_exact_for_every_valid_period() {
        let now = at(2024, 3, 10, 12, 0, 7);
        for n in 1..=59 {
            let mut s = schedule(ScheduleInterval::Minutes);
            s.minute_interval = Some(n);
            assert_eq!(
                calculate_next_run(&s, &now),
                now + Duration::minutes(i64::from(n))
            );
        }
    }

    #[test]
    fn test_minutes_default() {
        let now = at(2024, 3, 10, 12, 0, 0);
        let s = schedule(ScheduleInterval::Minutes);
        assert_eq!(calculate_next_run(&s, &now), now + Duration::minutes(5));

        let mut zero = schedule(ScheduleInterval::Minutes);
        zero.minute_interval = Some(0);
        assert_eq!(calculate_next_run(&zero, &now), now + Duration::minutes(5));
    }

    #[test]
    fn test_daily_later_today() {
        let mut s = schedule(ScheduleInterval::Daily);
        s.time = Some("09:00".into());
        let now = at(2024, 3, 10, 8, 0, 0);
        assert_eq!(calculate_next_run(&s, &now), at(2024, 3, 10, 9, 0, 0));
    }

    #[test]
    fn test_daily_exactly_now_rolls_over() {
        let mut s = schedule(ScheduleInterval::Daily);
        s.time = Some("09:00".into());
        let now = at(2024, 3, 10, 9, 0, 0);
        assert_eq!(calculate_next_run(&s, &now), at(2024, 3, 11, 9, 0, 0));
    }

    #[test]
    fn test_daily_already_passed() {
        let mut s = schedule(ScheduleInterval::Daily);
        s.time = Some("09:00".into());
        let now = at(2024, 12, 31, 17, 30, 0);
        assert_eq!(calculate_next_run(&s, &now), at(2025, 1, 1, 9, 0, 0));
    }

    #[test]
    fn test_daily_missing_time_adds_one_day() {
        let now = at(2024, 3, 10, 8, 15, 0);
        let s = schedule(ScheduleInterval::Daily);
        assert_eq!(calculate_next_run(&s, &now), now + Duration::days(1));

        let mut bad = schedule(ScheduleInterval::Daily);
        bad.time = Some("nine".into());
        assert_eq!(calculate_next_run(&bad, &now), now + Duration::days(1));
    }

    #[test]
    fn test_weekly_adds_seven_days_unconditionally() {
        let mut s = schedule(ScheduleInterval::Weekly);
        s.time = Some("09:00".into());

        let before = at(2024, 3, 10, 8, 0, 0);
        assert_eq!(calculate_next_run(&s, &before), at(2024, 3, 17, 9, 0, 0));

        let after = at(2024, 3, 10, 10, 0, 0);
        assert_eq!(calculate_next_run(&s, &after), at(2024, 3, 17, 9, 0, 0));
    }

    #[test]
    fn test_time_of_day_uses_zone_of_now() {
        let mut s = schedule(ScheduleInterval::Daily);
        s.time = Some("09:00".into());
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        // 06:00 UTC is 08:00 local, so 09:00 local (07:00 UTC) is still ahead.
        let now = tz.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        assert_eq!(calculate_next_run(&s, &now), at(2024, 3, 10, 7, 0, 0));
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            parse_time_of_day("23:59"),
            NaiveTime::from_hms_opt(23, 59, 0)
        );
        assert!(parse_time_of_day("24:00").is_none());
        assert!(parse_time_of_day("12:60").is_none());
        assert!(parse_time_of_day("").is_none());
    }
}
