//! Parking cost over day/night tariff boundaries.
//!
//! The day window is [06:00, 22:00) on the virtual clock's calendar; the
//! night window is its complement. Cost integrates piecewise: each segment
//! runs from the current instant to the next boundary (or departure,
//! whichever is earlier) and is billed at the rate of the hour the segment
//! starts in.

use chrono::{DateTime, Days, Timelike, Utc};

const DAY_START_HOUR: u32 = 6;
const NIGHT_START_HOUR: u32 = 22;

/// Errors from pricing a stay.
#[derive(Debug, thiserror::Error)]
pub enum TariffError {
    #[error("timestamp {0} is outside the representable calendar range")]
    OutOfRange(i64),
}

/// Total cost for parking from `entered` to `left` (virtual unix seconds),
/// in fractional currency units (hours x rate).
pub fn parking_cost(
    entered: i64,
    left: i64,
    day_rate: f64,
    night_rate: f64,
) -> Result<f64, TariffError> {
    let mut total = 0.0;
    let mut t = entered;

    while t < left {
        let boundary = next_boundary(t)?;
        let end = left.min(boundary);
        let hours = (end - t) as f64 / 3600.0;
        total += hours * rate_at(t, day_rate, night_rate)?;
        t = end;
    }

    Ok(total)
}

fn rate_at(secs: i64, day_rate: f64, night_rate: f64) -> Result<f64, TariffError> {
    let hour = timestamp(secs)?.hour();
    if hour >= NIGHT_START_HOUR || hour < DAY_START_HOUR {
        Ok(night_rate)
    } else {
        Ok(day_rate)
    }
}

/// The next tariff boundary strictly after the start of `secs`' hour:
/// 06:00 for night hours (next day when past 22:00, same day before dawn),
/// 22:00 for day hours.
fn next_boundary(secs: i64) -> Result<i64, TariffError> {
    let t = timestamp(secs)?;
    let hour = t.hour();

    let (date, boundary_hour) = if hour >= NIGHT_START_HOUR {
        let next_day = t
            .date_naive()
            .checked_add_days(Days::new(1))
            .ok_or(TariffError::OutOfRange(secs))?;
        (next_day, DAY_START_HOUR)
    } else if hour < DAY_START_HOUR {
        (t.date_naive(), DAY_START_HOUR)
    } else {
        (t.date_naive(), NIGHT_START_HOUR)
    };

    date.and_hms_opt(boundary_hour, 0, 0)
        .map(|boundary| boundary.and_utc().timestamp())
        .ok_or(TariffError::OutOfRange(secs))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, TariffError> {
    DateTime::from_timestamp(secs, 0).ok_or(TariffError::OutOfRange(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, min: u32) -> i64 {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(hour, min, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    }

    fn cost(entered: i64, left: i64, day_rate: f64, night_rate: f64) -> f64 {
        parking_cost(entered, left, day_rate, night_rate).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn zero_duration_costs_nothing() {
        assert_eq!(cost(at(10, 0), at(10, 0), 10.0, 5.0), 0.0);
    }

    #[test]
    fn day_only_interval_uses_day_rate() {
        // Two hours entirely inside [06:00, 22:00).
        assert!(close(cost(at(9, 0), at(11, 0), 10.0, 5.0), 20.0));
    }

    #[test]
    fn night_only_interval_uses_night_rate() {
        assert!(close(cost(at(23, 0), at(23, 30), 10.0, 5.0), 2.5));
    }

    #[test]
    fn pre_dawn_interval_uses_night_rate() {
        assert!(close(cost(at(2, 0), at(5, 0), 10.0, 5.0), 15.0));
    }

    #[test]
    fn splits_at_the_morning_boundary() {
        // 05:30 -> 07:30: half an hour of night, an hour and a half of day.
        assert!(close(
            cost(at(5, 30), at(7, 30), 10.0, 5.0),
            0.5 * 5.0 + 1.5 * 10.0
        ));
    }

    #[test]
    fn splits_at_the_evening_boundary() {
        // 21:45 -> 23:45: quarter hour of day, then night.
        let day = 8.0;
        let night = 3.0;
        assert!(close(
            cost(at(21, 45), at(23, 45), day, night),
            0.25 * day + 1.75 * night
        ));
    }

    #[test]
    fn spans_multiple_days() {
        // 21:00 today -> 07:00 two days later:
        // 1h day + 8h night + 16h day + 8h night + 1h day.
        let start = at(21, 0);
        let end = start + 34 * 3600;
        assert!(close(
            cost(start, end, 10.0, 5.0),
            (1.0 + 16.0 + 1.0) * 10.0 + (8.0 + 8.0) * 5.0
        ));
    }

    #[test]
    fn cost_is_additive_over_split_points() {
        let (t0, t1, t2) = (at(5, 0), at(13, 37), at(23, 59));
        let whole = cost(t0, t2, 12.5, 4.5);
        let split = cost(t0, t1, 12.5, 4.5) + cost(t1, t2, 12.5, 4.5);
        assert!(close(whole, split));
    }

    #[test]
    fn boundary_instant_starts_the_new_rate() {
        // Entering exactly at 06:00 is day; exactly at 22:00 is night.
        assert!(close(cost(at(6, 0), at(7, 0), 10.0, 5.0), 10.0));
        assert!(close(cost(at(22, 0), at(23, 0), 10.0, 5.0), 5.0));
    }

    #[test]
    fn unrepresentable_timestamps_error_instead_of_panicking() {
        let err = parking_cost(i64::MAX - 1, i64::MAX, 10.0, 5.0);
        assert!(matches!(err, Err(TariffError::OutOfRange(_))));
    }
}
