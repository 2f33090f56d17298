//! Calendar math for the daily trigger.
//!
//! The trigger is a local wall-clock time. On days where that time does not
//! exist (a DST gap) the trigger falls forward to the first valid local
//! minute after it; where it occurs twice the earlier instant wins.

use chrono::{DateTime, Days, LocalResult, NaiveDateTime, NaiveTime, TimeZone};

/// Local time of the daily sync.
pub const DAILY_TRIGGER: NaiveTime = NaiveTime::MIN;

// Real-world DST gaps are at most a couple of hours.
const MAX_GAP_MINUTES: i64 = 3 * 60;

/// First trigger strictly after `now`, in `now`'s time zone.
///
/// `None` only at the end of the representable calendar.
pub fn next_trigger_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    next_trigger_with(now, at, |naive| tz.from_local_datetime(naive))
}

fn next_trigger_with<Tz, F>(now: &DateTime<Tz>, at: NaiveTime, resolve: F) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    F: Fn(&NaiveDateTime) -> LocalResult<DateTime<Tz>>,
{
    let today = now.date_naive();
    (0..=2)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|day| first_valid_instant(day.and_time(at), &resolve))
        .find(|candidate| candidate > now)
}

fn first_valid_instant<Tz, F>(naive: NaiveDateTime, resolve: &F) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    F: Fn(&NaiveDateTime) -> LocalResult<DateTime<Tz>>,
{
    for minutes in 0..=MAX_GAP_MINUTES {
        let probe = naive.checked_add_signed(chrono::Duration::minutes(minutes))?;
        match resolve(&probe) {
            LocalResult::Single(instant) => return Some(instant),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => continue,
        }
    }
    None
}
