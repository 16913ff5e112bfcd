use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use ingest_core::Trigger;

/// Longest accepted interval (ten years); longer values are clamped.
pub const MAX_INTERVAL_SECS: u64 = 10 * 366 * 24 * 60 * 60;

/// Whether a job with `trigger` should run at `now`, given its last run.
///
/// Daily and weekly jobs are due only once today's `time` has been reached
/// (UTC) and no run happened since that crossing. A job that missed several
/// windows while the process was down is due once, at the next crossing, not
/// once per missed window.
pub fn is_due(trigger: &Trigger, last_run_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match trigger {
        Trigger::Interval { seconds } => match last_run_at {
            None => true,
            Some(last) => (now - last).num_seconds() >= clamp_interval(*seconds),
        },

        Trigger::Daily { time } => {
            now.time() >= *time && ran_before(last_run_at, at_time(now.date_naive(), *time))
        }

        Trigger::Weekly { weekday, time } => {
            now.weekday() == *weekday
                && now.time() >= *time
                && ran_before(last_run_at, at_time(now.date_naive(), *time))
        }
    }
}

/// Earliest instant after `last_run_at` at which the job can be due again.
///
/// For `Interval` the window is anchored on the actual run time, not on a
/// fixed grid. For `Weekly` the returned instant is on `weekday`; a job that
/// is past it on another weekday still waits for the weekday gate.
pub fn next_eligible(trigger: &Trigger, last_run_at: DateTime<Utc>) -> DateTime<Utc> {
    match trigger {
        Trigger::Interval { seconds } => last_run_at + Duration::seconds(clamp_interval(*seconds)),

        Trigger::Daily { time } => {
            let candidate = at_time(last_run_at.date_naive(), *time);
            if candidate > last_run_at {
                candidate
            } else {
                candidate + Duration::days(1)
            }
        }

        Trigger::Weekly { weekday, time } => {
            let days_ahead = days_between(last_run_at.weekday(), *weekday);
            let candidate = at_time(
                last_run_at.date_naive() + Duration::days(days_ahead),
                *time,
            );
            if candidate > last_run_at {
                candidate
            } else {
                // Same weekday, time already passed.
                candidate + Duration::days(7)
            }
        }
    }
}

// --- private helpers -------------------------------------------------------

fn clamp_interval(seconds: u64) -> i64 {
    seconds.min(MAX_INTERVAL_SECS) as i64
}

fn ran_before(last_run_at: Option<DateTime<Utc>>, crossing: DateTime<Utc>) -> bool {
    last_run_at.map_or(true, |last| last < crossing)
}

fn at_time(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}

/// Days to go forward from `from` to reach `to` (0..=6).
fn days_between(from: Weekday, to: Weekday) -> i64 {
    let from = from.num_days_from_monday() as i64;
    let to = to.num_days_from_monday() as i64;
    (to - from).rem_euclid(7)
}
