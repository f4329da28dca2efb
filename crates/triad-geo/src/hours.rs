//! §4.H step 3 — derive `is_open_now` from Google's weekday opening-hours
//! descriptions in the snapshot's timezone.
//!
//! Descriptions look like `"Monday: 9:00 AM – 5:00 PM"`, `"Tuesday: Closed"`,
//! `"Wednesday: Open 24 hours"`, or an overnight range like
//! `"Friday: 6:00 PM – 2:00 AM"` (close before open means the close time
//! rolls into the next day).

use chrono::{NaiveTime, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayStatus {
    Closed,
    Open24Hours,
    Range { open: NaiveTime, close: NaiveTime },
}

/// Parses one weekday's description line into a status, ignoring the
/// leading `"<Weekday>: "` label.
pub fn parse_day_status(description: &str) -> Option<DayStatus> {
    let body = description.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or(description.trim());

    if body.eq_ignore_ascii_case("closed") {
        return Some(DayStatus::Closed);
    }
    if body.eq_ignore_ascii_case("open 24 hours") {
        return Some(DayStatus::Open24Hours);
    }

    let (open_str, close_str) = body.split_once('\u{2013}').or_else(|| body.split_once('-'))?;
    let open = parse_clock_time(open_str.trim())?;
    let close = parse_clock_time(close_str.trim())?;
    Some(DayStatus::Range { open, close })
}

fn parse_clock_time(raw: &str) -> Option<NaiveTime> {
    for fmt in ["%I:%M %p", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, fmt) {
            return Some(time);
        }
    }
    None
}

/// Given the full week of descriptions (any order, Google labels each
/// line), the weekday `now` falls on, and the time of day, determines
/// whether the venue is open. Handles overnight wrap by also consulting
/// the previous day's range when `now` falls before that day's close.
pub fn is_open_now(descriptions: &[String], weekday: Weekday, now: NaiveTime) -> bool {
    let Some(today) = find_for_weekday(descriptions, weekday) else { return false };

    match today {
        DayStatus::Open24Hours => return true,
        DayStatus::Closed => {}
        DayStatus::Range { open, close } => {
            if close >= open {
                if open <= now && now < close {
                    return true;
                }
            } else if now >= open {
                // Opens today, closes after midnight; still before midnight.
                return true;
            }
        }
    }

    // Check yesterday's overnight range spilling into today before `now`.
    if let Some(DayStatus::Range { open, close }) = find_for_weekday(descriptions, weekday.pred()) {
        if close < open && now < close {
            return true;
        }
    }

    false
}

fn find_for_weekday(descriptions: &[String], weekday: Weekday) -> Option<DayStatus> {
    let name = weekday_name(weekday);
    descriptions.iter().find(|d| d.starts_with(name)).and_then(|d| parse_day_status(d))
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn closed_day_parses() {
        assert_eq!(parse_day_status("Tuesday: Closed"), Some(DayStatus::Closed));
    }

    #[test]
    fn open_24_hours_parses() {
        assert_eq!(parse_day_status("Wednesday: Open 24 hours"), Some(DayStatus::Open24Hours));
    }

    #[test]
    fn twelve_hour_range_parses() {
        let status = parse_day_status("Monday: 9:00 AM \u{2013} 5:00 PM").unwrap();
        assert_eq!(status, DayStatus::Range { open: t(9, 0), close: t(17, 0) });
    }

    #[test]
    fn within_normal_hours_is_open() {
        let descriptions = vec!["Monday: 9:00 AM \u{2013} 5:00 PM".to_string()];
        assert!(is_open_now(&descriptions, Weekday::Mon, t(12, 0)));
        assert!(!is_open_now(&descriptions, Weekday::Mon, t(20, 0)));
    }

    #[test]
    fn overnight_wrap_is_open_past_midnight() {
        let descriptions = vec!["Friday: 6:00 PM \u{2013} 2:00 AM".to_string(), "Saturday: Closed".to_string()];
        assert!(is_open_now(&descriptions, Weekday::Fri, t(23, 30)));
        assert!(is_open_now(&descriptions, Weekday::Sat, t(1, 0)));
        assert!(!is_open_now(&descriptions, Weekday::Sat, t(3, 0)));
    }

    #[test]
    fn missing_day_is_treated_as_closed() {
        assert!(!is_open_now(&[], Weekday::Mon, t(12, 0)));
    }
}
