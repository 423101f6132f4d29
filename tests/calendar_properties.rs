//! Property-based tests for calendar stepping.
//!
//! Every calendar point must map to a step and back unchanged, and stepping
//! must be monotone, for every supported frequency.

use anofox_panel::core::{Calendar, Frequency, OffCalendarPolicy};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use proptest::prelude::*;

fn anchor() -> DateTime<Utc> {
    // A Monday, so weekly and business-day calendars start on a valid point.
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn calendar(code: &str) -> Calendar {
    let frequency: Frequency = code.parse().unwrap();
    Calendar::new(frequency, anchor(), OffCalendarPolicy::Reject).unwrap()
}

fn frequency_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "15min", "H", "6H", "D", "B", "W", "W-MON", "M", "3M", "Q", "A",
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn step_round_trip(code in frequency_strategy(), step in -2_000i64..2_000) {
        let cal = calendar(code);
        let ts = cal.to_timestamp(step).unwrap();
        prop_assert!(cal.is_point(ts));
        prop_assert_eq!(cal.to_step(ts).unwrap(), step);
        prop_assert_eq!(cal.to_timestamp(cal.to_step(ts).unwrap()).unwrap(), ts);
    }

    #[test]
    fn steps_are_strictly_increasing(code in frequency_strategy(), step in -1_000i64..1_000) {
        let cal = calendar(code);
        prop_assert!(cal.to_timestamp(step).unwrap() < cal.to_timestamp(step + 1).unwrap());
    }

    #[test]
    fn business_days_skip_weekends(step in -500i64..500) {
        let cal = calendar("B");
        let weekday = cal.to_timestamp(step).unwrap().weekday();
        prop_assert!(weekday != Weekday::Sat && weekday != Weekday::Sun);
    }

    #[test]
    fn timestamps_are_consecutive_steps(code in frequency_strategy(), start in -100i64..100, count in 0usize..30) {
        let cal = calendar(code);
        let ts = cal.timestamps(start, count).unwrap();
        prop_assert_eq!(ts.len(), count);
        for (i, t) in ts.iter().enumerate() {
            prop_assert_eq!(*t, cal.to_timestamp(start + i as i64).unwrap());
        }
    }
}

#[test]
fn off_calendar_timestamps_follow_the_policy() {
    let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap();
    let strict = calendar("B");
    assert!(strict.to_step(saturday).is_err());

    let lenient = Calendar::new("B".parse().unwrap(), anchor(), OffCalendarPolicy::RollForward)
        .unwrap();
    let monday = saturday + Duration::days(2);
    assert_eq!(lenient.to_step(saturday).unwrap(), lenient.to_step(monday).unwrap());
}

#[test]
fn month_ends_stay_month_ends() {
    let jan31 = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
    let cal = Calendar::new("M".parse().unwrap(), jan31, OffCalendarPolicy::Reject).unwrap();
    assert_eq!(
        cal.to_timestamp(1).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
    );
    assert_eq!(
        cal.to_timestamp(2).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap()
    );
}

#[test]
fn unsupported_frequency_is_an_error() {
    assert!("5X".parse::<Frequency>().is_err());
    assert!("W-FOO".parse::<Frequency>().is_err());
}
