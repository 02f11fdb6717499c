use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule` starting *after* `from`.
///
/// Returns `None` when the schedule is exhausted (a `Once` job whose time has
/// already passed) or when a `Cron` expression fails to parse.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Once { at } => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }

        Schedule::Cron { expression } => {
            // Tasks are authored as standard five-field cron (minute hour day
            // month weekday); the `cron` crate additionally wants a leading
            // seconds field, which is always zero here.
            let with_seconds = format!("0 {expression}");
            match cron::Schedule::from_str(&with_seconds) {
                Ok(parsed) => parsed.after(&from).next(),
                Err(e) => {
                    warn!(%expression, error = %e, "invalid cron expression");
                    None
                }
            }
        }
    }
}

/// Backoff delay for the `n`th consecutive failure (1-indexed):
/// `retry_delay_ms * 2^(n - 1)`.
pub fn backoff_delay_ms(retry_delay_ms: u64, consecutive_failures: u32) -> u64 {
    retry_delay_ms.saturating_mul(1u64 << consecutive_failures.saturating_sub(1).min(32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn once_schedule_fires_only_while_in_the_future() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap();

        assert_eq!(
            compute_next_run(&Schedule::Once { at: future }, from),
            Some(future)
        );
        assert_eq!(compute_next_run(&Schedule::Once { at: past }, from), None);
    }

    #[test]
    fn cron_schedule_computes_the_next_tick() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        // Every hour at minute 30.
        let schedule = Schedule::Cron {
            expression: "30 * * * *".to_string(),
        };
        let next = compute_next_run(&schedule, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn malformed_cron_expression_yields_none() {
        let schedule = Schedule::Cron {
            expression: "not a cron expression".to_string(),
        };
        assert!(compute_next_run(&schedule, Utc::now()).is_none());
    }

    #[test]
    fn backoff_delay_doubles_per_consecutive_failure() {
        assert_eq!(backoff_delay_ms(1000, 1), 1000);
        assert_eq!(backoff_delay_ms(1000, 2), 2000);
        assert_eq!(backoff_delay_ms(1000, 3), 4000);
    }
}
