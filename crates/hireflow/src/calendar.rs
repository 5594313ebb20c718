//! Business-day arithmetic for federal compliance timelines.
//!
//! Only Saturdays and Sundays are skipped; federal holidays are not modelled.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Walk forward from `start` one calendar day at a time and return the date on which
/// the `business_days`-th weekday is reached. `start` itself is never counted.
pub fn deadline(start: NaiveDate, business_days: u32) -> NaiveDate {
    let mut date = start;
    let mut counted = 0;

    while counted < business_days {
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
        if is_business_day(date) {
            counted += 1;
        }
    }

    date
}

/// Last second of `date` in UTC; stored deadlines are inclusive of the whole day.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(23, 59, 59).unwrap_or_default();
    Utc.from_utc_datetime(&naive)
}

/// Convenience for hooks: the end-of-day deadline counted from an instant.
pub fn deadline_at(start: DateTime<Utc>, business_days: u32) -> DateTime<Utc> {
    end_of_day(deadline(start.date_naive(), business_days))
}

/// Whole hours between two instants, floored, never negative.
pub fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).max(Duration::zero()).num_hours()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn monday_plus_three_is_thursday() {
        let monday = date(2025, 1, 6);
        assert_eq!(deadline(monday, 3), date(2025, 1, 9));
        assert_eq!(deadline(monday, 3).weekday(), Weekday::Thu);
    }

    #[test]
    fn friday_plus_three_skips_weekend() {
        let friday = date(2025, 1, 10);
        assert_eq!(deadline(friday, 3), date(2025, 1, 15));
        assert_eq!(deadline(friday, 3).weekday(), Weekday::Wed);
    }

    #[test]
    fn weekend_start_counts_from_monday() {
        let saturday = date(2025, 1, 11);
        assert_eq!(deadline(saturday, 1), date(2025, 1, 13));
        let sunday = date(2025, 1, 12);
        assert_eq!(deadline(sunday, 3), date(2025, 1, 15));
    }

    #[test]
    fn fcra_default_waiting_period_from_monday() {
        assert_eq!(deadline(date(2025, 1, 6), 5), date(2025, 1, 13));
    }

    #[test]
    fn tnc_window_spans_two_weekends() {
        // Wednesday + 8 business days lands on the second Monday.
        assert_eq!(deadline(date(2025, 1, 8), 8), date(2025, 1, 20));
    }

    #[test]
    fn zero_days_returns_start() {
        let start = date(2025, 3, 15);
        assert_eq!(deadline(start, 0), start);
    }

    #[test]
    fn end_of_day_is_last_second() {
        let eod = end_of_day(date(2025, 1, 13));
        assert_eq!(eod.to_rfc3339(), "2025-01-13T23:59:59+00:00");
    }

    #[test]
    fn elapsed_hours_never_negative() {
        let earlier = end_of_day(date(2025, 1, 6));
        let later = earlier + Duration::hours(49);
        assert_eq!(elapsed_hours(earlier, later), 49);
        assert_eq!(elapsed_hours(later, earlier), 0);
    }
}
