//! Turns classifier-resolved delays into trigger instants in the deployment
//! timezone and renders timestamps for people.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

const DAY_ONLY_ANCHOR_HOUR: i64 = 12;
const OFFSET_SEARCH_STEP_MINUTES: i64 = 15;
const OFFSET_SEARCH_RANGE_MINUTES: i64 = 14 * 60;

/// Classifier delays are clamped to this many minutes either side of now.
pub const MAX_DELAY_MINUTES: i64 = 5 * 366 * 24 * 60;

pub fn clamp_delay_minutes(minutes: i64) -> i64 {
    minutes.clamp(-MAX_DELAY_MINUTES, MAX_DELAY_MINUTES)
}

/// `now` shifted by a clamped delay.
pub fn instant_after(now: DateTime<Utc>, delay_minutes: i64) -> DateTime<Utc> {
    now.checked_add_signed(Duration::minutes(clamp_delay_minutes(delay_minutes)))
        .unwrap_or(now)
}

/// Local noon of the day that `now + rough_delay_minutes` falls on in `timezone`.
pub fn normalize_day_only(rough_delay_minutes: i64, timezone: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let target = instant_after(now, rough_delay_minutes);
    let local_day = target.with_timezone(&timezone).date_naive();
    local_noon(local_day, timezone)
}

pub fn local_noon(day: NaiveDate, timezone: Tz) -> DateTime<Utc> {
    let noon = day.and_time(NaiveTime::default()) + Duration::hours(DAY_ONLY_ANCHOR_HOUR);
    resolve_local(noon, timezone)
}

/// Instant at which the wall clock in `timezone` reads `local`.
///
/// Walks every candidate UTC offset in a +/-14h window so the answer follows
/// whatever offset the zone actually uses on that date.
pub fn resolve_local(local: NaiveDateTime, timezone: Tz) -> DateTime<Utc> {
    let utc_guess = Utc.from_utc_datetime(&local);
    let mut offset = -OFFSET_SEARCH_RANGE_MINUTES;
    while offset <= OFFSET_SEARCH_RANGE_MINUTES {
        let candidate = utc_guess - Duration::minutes(offset);
        if candidate.with_timezone(&timezone).naive_local() == local {
            return candidate;
        }
        offset += OFFSET_SEARCH_STEP_MINUTES;
    }
    // The wall-clock time was skipped by a transition; take the first instant after the gap.
    timezone
        .from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            timezone
                .from_local_datetime(&(local + Duration::hours(1)))
                .earliest()
        })
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or(utc_guess)
}

/// Start and end (exclusive) of the local calendar day containing `now`.
pub fn local_day_bounds(now: DateTime<Utc>, timezone: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.with_timezone(&timezone).date_naive();
    let start = resolve_local(today.and_time(NaiveTime::default()), timezone);
    let end = match today.succ_opt() {
        Some(tomorrow) => resolve_local(tomorrow.and_time(NaiveTime::default()), timezone),
        None => start + Duration::hours(24),
    };
    (start, end)
}

/// `YYYY-MM-DD` of `at` in `timezone`; used for per-day record keys.
pub fn local_day_key(at: DateTime<Utc>, timezone: Tz) -> String {
    at.with_timezone(&timezone).format("%Y-%m-%d").to_string()
}

pub fn format_relative_duration(minutes: i64) -> String {
    if minutes <= 0 {
        return "any moment now".to_string();
    }
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    let hours = minutes / 60;
    let rest = minutes % 60;
    if rest == 0 {
        format!("{}h", hours)
    } else {
        format!("{}h {}m", hours, rest)
    }
}

pub fn format_day_label(at: DateTime<Utc>, timezone: Tz, now: DateTime<Utc>) -> String {
    let day = at.with_timezone(&timezone).date_naive();
    if day == now.with_timezone(&timezone).date_naive() {
        return "today".to_string();
    }
    if day == (now + Duration::hours(24)).with_timezone(&timezone).date_naive() {
        return "tomorrow".to_string();
    }
    at.with_timezone(&timezone).format("%A").to_string()
}

/// "in 2 hours" for future instants, "2 hours ago" for past ones.
pub fn format_elapsed_or_future(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta_minutes = (at - now).num_minutes();
    if delta_minutes == 0 {
        return if at >= now {
            "any moment now".to_string()
        } else {
            "just now".to_string()
        };
    }
    let magnitude = describe_magnitude(delta_minutes.abs());
    if delta_minutes > 0 {
        format!("in {}", magnitude)
    } else {
        format!("{} ago", magnitude)
    }
}

/// "3:00 PM" in `timezone`.
pub fn format_clock_time(at: DateTime<Utc>, timezone: Tz) -> String {
    at.with_timezone(&timezone).format("%-I:%M %p").to_string()
}

/// Short due annotation for listings: "today", "tomorrow 3:00 PM", "Friday 9:30 AM".
pub fn format_due(at: DateTime<Utc>, is_day_only: bool, timezone: Tz, now: DateTime<Utc>) -> String {
    let day = format_day_label(at, timezone, now);
    if is_day_only {
        day
    } else {
        format!("{} {}", day, format_clock_time(at, timezone))
    }
}

fn describe_magnitude(minutes: i64) -> String {
    let (value, unit) = if minutes < 60 {
        (minutes, "minute")
    } else if minutes < 24 * 60 {
        (minutes / 60, "hour")
    } else {
        (minutes / (24 * 60), "day")
    };
    if value == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", value, unit)
    }
}
