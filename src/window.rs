use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// A session's validity window, derived from its stored date/time fields.
/// Never persisted; recomputed on every attempt so "now" is always fresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Window {
    /// No duration: valid for the whole calendar date, UTC.
    AllDay(NaiveDate),
    /// Explicit duration: valid on [start, end], both ends inclusive.
    /// A zero duration is a real zero-length window, not "no duration".
    Timed {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    NotStarted { starts_at: NaiveDateTime },
    Expired { expired_at: NaiveDateTime },
    WrongDate { session_date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

fn field_err(field: &'static str, message: impl Into<String>) -> FieldError {
    FieldError {
        field,
        message: message.into(),
    }
}

pub fn parse_session_date(raw: &str) -> Result<NaiveDate, FieldError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| field_err("sessionDate", "sessionDate must be YYYY-MM-DD"))
}

pub fn parse_session_time(raw: &str) -> Result<NaiveTime, FieldError> {
    let t = raw.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .map_err(|_| field_err("sessionTime", "sessionTime must be HH:MM or HH:MM:SS"))
}

pub fn session_window(
    date: &str,
    time: &str,
    duration_minutes: Option<i64>,
) -> Result<Window, FieldError> {
    let date = parse_session_date(date)?;
    let time = parse_session_time(time)?;
    let Some(minutes) = duration_minutes else {
        return Ok(Window::AllDay(date));
    };
    if minutes < 0 {
        return Err(field_err("durationMinutes", "durationMinutes must be >= 0"));
    }
    let start = date.and_time(time);
    let delta = Duration::try_minutes(minutes)
        .ok_or_else(|| field_err("durationMinutes", "durationMinutes out of range"))?;
    let end = start
        .checked_add_signed(delta)
        .ok_or_else(|| field_err("durationMinutes", "durationMinutes out of range"))?;
    Ok(Window::Timed { start, end })
}

/// Expired is checked before not-started, matching the order callers see the
/// failures in.
pub fn check(window: &Window, now: DateTime<Utc>) -> Result<(), Rejection> {
    match window {
        Window::AllDay(date) => {
            if now.date_naive() == *date {
                Ok(())
            } else {
                Err(Rejection::WrongDate {
                    session_date: *date,
                })
            }
        }
        Window::Timed { start, end } => {
            let now = now.naive_utc();
            if now > *end {
                Err(Rejection::Expired { expired_at: *end })
            } else if now < *start {
                Err(Rejection::NotStarted { starts_at: *start })
            } else {
                Ok(())
            }
        }
    }
}

pub fn format_instant(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn format_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(date: &str, time: &str) -> DateTime<Utc> {
        let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("date");
        let t = NaiveTime::parse_from_str(time, "%H:%M:%S").expect("time");
        Utc.from_utc_datetime(&d.and_time(t))
    }

    #[test]
    fn timed_window_boundaries_are_inclusive() {
        let w = session_window("2025-03-10", "10:00:00", Some(90)).expect("window");

        assert_eq!(
            check(&w, utc("2025-03-10", "09:59:59")),
            Err(Rejection::NotStarted {
                starts_at: NaiveDate::from_ymd_opt(2025, 3, 10)
                    .unwrap()
                    .and_hms_opt(10, 0, 0)
                    .unwrap()
            })
        );
        assert_eq!(check(&w, utc("2025-03-10", "10:00:00")), Ok(()));
        assert_eq!(check(&w, utc("2025-03-10", "11:30:00")), Ok(()));
        assert_eq!(
            check(&w, utc("2025-03-10", "11:30:01")),
            Err(Rejection::Expired {
                expired_at: NaiveDate::from_ymd_opt(2025, 3, 10)
                    .unwrap()
                    .and_hms_opt(11, 30, 0)
                    .unwrap()
            })
        );
    }

    #[test]
    fn zero_duration_is_a_zero_length_window() {
        let w = session_window("2025-03-10", "10:00:00", Some(0)).expect("window");
        assert!(matches!(w, Window::Timed { start, end } if start == end));
        assert_eq!(check(&w, utc("2025-03-10", "10:00:00")), Ok(()));
        assert!(matches!(
            check(&w, utc("2025-03-10", "10:00:01")),
            Err(Rejection::Expired { .. })
        ));
        assert!(matches!(
            check(&w, utc("2025-03-10", "09:59:59")),
            Err(Rejection::NotStarted { .. })
        ));
    }

    #[test]
    fn all_day_window_rejects_every_other_date() {
        let w = session_window("2025-03-10", "10:00:00", None).expect("window");
        assert_eq!(w, Window::AllDay(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()));

        assert_eq!(check(&w, utc("2025-03-10", "00:00:00")), Ok(()));
        assert_eq!(check(&w, utc("2025-03-10", "23:59:59")), Ok(()));
        let wrong = Err(Rejection::WrongDate {
            session_date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        });
        // Both earlier and later dates are invalid, future included.
        assert_eq!(check(&w, utc("2025-03-09", "23:59:59")), wrong.clone());
        assert_eq!(check(&w, utc("2025-03-11", "00:00:00")), wrong.clone());
        assert_eq!(check(&w, utc("2026-01-01", "12:00:00")), wrong);
    }

    #[test]
    fn window_spanning_midnight_stays_valid_past_the_date() {
        let w = session_window("2025-03-10", "23:30:00", Some(60)).expect("window");
        assert_eq!(check(&w, utc("2025-03-11", "00:15:00")), Ok(()));
        assert!(matches!(
            check(&w, utc("2025-03-11", "00:30:01")),
            Err(Rejection::Expired { .. })
        ));
    }

    #[test]
    fn time_accepts_minutes_only_form() {
        let w = session_window("2025-03-10", "10:00", Some(30)).expect("window");
        assert_eq!(check(&w, utc("2025-03-10", "10:15:00")), Ok(()));
    }

    #[test]
    fn malformed_fields_are_rejected() {
        assert_eq!(
            session_window("10/03/2025", "10:00:00", None)
                .unwrap_err()
                .field,
            "sessionDate"
        );
        assert_eq!(
            session_window("2025-03-10", "10am", None).unwrap_err().field,
            "sessionTime"
        );
        assert_eq!(
            session_window("2025-03-10", "10:00:00", Some(-5))
                .unwrap_err()
                .field,
            "durationMinutes"
        );
    }
}
