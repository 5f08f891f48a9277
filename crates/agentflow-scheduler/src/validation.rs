//! Save-time validation of tasks and schedules.

use agentflow_types::{ScheduleInterval, ScheduledTask, TaskSchedule};

use crate::error::{Result, SchedulerError};
use crate::next_run::parse_time_of_day;

/// Reject schedules the next-run calculator cannot honour exactly.
pub fn validate_schedule(schedule: &TaskSchedule) -> Result<()> {
    if schedule.interval == ScheduleInterval::Minutes {
        match schedule.minute_interval {
            Some(m) if (1..=59).contains(&m) => {}
            Some(m) => {
                return Err(SchedulerError::Validation(format!(
                    "minute interval must be between 1 and 59, got {m}"
                )));
            }
            None => {
                return Err(SchedulerError::Validation(
                    "minute interval is required for the 'minutes' schedule".into(),
                ));
            }
        }
    }

    if schedule.interval.requires_time() {
        let Some(time) = schedule.time.as_deref() else {
            return Err(SchedulerError::Validation(format!(
                "time of day is required for the '{}' schedule",
                schedule.interval
            )));
        };
        if parse_time_of_day(time).is_none() {
            return Err(SchedulerError::Validation(format!(
                "time must be HH:MM, got '{time}'"
            )));
        }
    }

    Ok(())
}

pub fn validate_task(task: &ScheduledTask) -> Result<()> {
    if task.agent_flow_id.trim().is_empty() {
        return Err(SchedulerError::Validation("agent flow id is empty".into()));
    }
    validate_schedule(&task.schedule)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_range() {
        let mut s = TaskSchedule::new(ScheduleInterval::Minutes);
        assert!(validate_schedule(&s).is_err());

        for bad in [0, 60, 120] {
            s.minute_interval = Some(bad);
            assert!(matches!(
                validate_schedule(&s),
                Err(SchedulerError::Validation(_))
            ));
        }
        for good in [1, 30, 59] {
            s.minute_interval = Some(good);
            assert!(validate_schedule(&s).is_ok());
        }
    }

    #[test]
    fn test_time_required_for_daily_and_weekly() {
        for interval in [ScheduleInterval::Daily, ScheduleInterval::Weekly] {
            let mut s = TaskSchedule::new(interval);
            assert!(validate_schedule(&s).is_err());
            s.time = Some("25:00".into());
            assert!(validate_schedule(&s).is_err());
            s.time = Some("07:45".into());
            assert!(validate_schedule(&s).is_ok());
        }
    }

    #[test]
    fn test_simple_intervals_need_nothing() {
        for interval in [
            ScheduleInterval::ThirtySeconds,
            ScheduleInterval::Minute,
            ScheduleInterval::Hourly,
        ] {
            assert!(validate_schedule(&TaskSchedule::new(interval)).is_ok());
        }
    }

    #[test]
    fn test_empty_flow_id() {
        let task = ScheduledTask::new(
            " ",
            TaskSchedule::new(ScheduleInterval::Hourly),
            vec![],
            "tester",
        );
        assert!(validate_task(&task).is_err());
    }
}
