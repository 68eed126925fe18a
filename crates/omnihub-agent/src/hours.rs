//! Working-hours gate, evaluated in the bot's configured timezone.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use tracing::warn;

use omnihub_core::types::WorkingHours;

fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Whether the bot should answer at `now`.
///
/// A disabled schedule is always open. An unknown timezone or a
/// malformed window fails open with a warning.
pub fn within_working_hours(hours: &WorkingHours, now: DateTime<Utc>) -> bool {
    if !hours.enabled {
        return true;
    }
    let tz: Tz = match hours.timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %hours.timezone, "unknown timezone, working-hours gate open");
            return true;
        }
    };
    let local = now.with_timezone(&tz);
    let Some(window) = hours.schedule.get(weekday_key(local.weekday())) else {
        // No window for the day means closed.
        return false;
    };
    let (Some(start), Some(end)) = (parse_hhmm(&window.start), parse_hhmm(&window.end)) else {
        warn!(start = %window.start, end = %window.end, "malformed working-hours window, gate open");
        return true;
    };
    let time = local.time();
    time >= start && time < end
}

fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use omnihub_core::types::DayWindow;

    fn business_hours(tz: &str) -> WorkingHours {
        let mut schedule = HashMap::new();
        for day in ["mon", "tue", "wed", "thu", "fri"] {
            schedule.insert(
                day.to_string(),
                DayWindow {
                    start: "09:00".to_string(),
                    end: "18:00".to_string(),
                },
            );
        }
        WorkingHours {
            enabled: true,
            timezone: tz.to_string(),
            schedule,
        }
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn disabled_schedule_is_always_open() {
        let mut h = business_hours("UTC");
        h.enabled = false;
        assert!(within_working_hours(&h, at("2026-08-02T03:00:00Z")));
    }

    #[test]
    fn weekday_window_in_utc() {
        let h = business_hours("UTC");
        // Monday 2026-08-03.
        assert!(within_working_hours(&h, at("2026-08-03T09:00:00Z")));
        assert!(within_working_hours(&h, at("2026-08-03T17:59:00Z")));
        assert!(!within_working_hours(&h, at("2026-08-03T18:00:00Z")));
        assert!(!within_working_hours(&h, at("2026-08-03T08:59:00Z")));
    }

    #[test]
    fn weekend_without_window_is_closed() {
        let h = business_hours("UTC");
        // Sunday 2026-08-02.
        assert!(!within_working_hours(&h, at("2026-08-02T12:00:00Z")));
    }

    #[test]
    fn timezone_shifts_the_window() {
        let h = business_hours("America/Sao_Paulo"); // UTC-3
        // 11:00 UTC Monday is 08:00 local — still closed.
        assert!(!within_working_hours(&h, at("2026-08-03T11:00:00Z")));
        // 12:30 UTC Monday is 09:30 local — open.
        assert!(within_working_hours(&h, at("2026-08-03T12:30:00Z")));
    }

    #[test]
    fn bad_timezone_fails_open() {
        let mut h = business_hours("UTC");
        h.timezone = "Mars/Olympus_Mons".to_string();
        assert!(within_working_hours(&h, at("2026-08-02T03:00:00Z")));
    }
}
