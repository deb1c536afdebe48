//! ISO-8601 duration parsing and calendar-aware arithmetic.
//!
//! Two shapes are accepted: `P[nY][nM][nD][T[nH][nM][nS]]` and the
//! weeks-only `PnW`. The two cannot be mixed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DurationError;

/// A parsed ISO-8601 duration, kept as calendar components rather than a
/// fixed number of seconds so that `Add` can apply the last-day-of-month
/// clamping rule for year/month arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IsoDuration {
    pub years: i64,
    pub months: i64,
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl IsoDuration {
    pub fn is_zero(&self) -> bool {
        *self == IsoDuration::default()
    }

    pub fn parse(s: &str) -> Result<Self, DurationError> {
        let orig = s.to_string();
        let rest = s
            .strip_prefix('P')
            .ok_or_else(|| DurationError::MissingPPrefix(orig.clone()))?;

        if rest.is_empty() {
            return Err(DurationError::Empty(orig));
        }

        if let Some(week_digits) = rest.strip_suffix('W') {
            if week_digits.is_empty() || !week_digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(DurationError::Malformed(orig));
            }
            let weeks = parse_int(week_digits, &orig)?;
            return Ok(IsoDuration { weeks, ..Default::default() });
        }
        if rest.contains('W') {
            return Err(DurationError::MixedWeeks(orig));
        }

        let (date_part, time_part) = match rest.find('T') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };

        if let Some(tp) = time_part {
            if tp.is_empty() {
                return Err(DurationError::EmptyTimeSection(orig));
            }
        }

        let date_re = Regex::new(r"^(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)D)?$")
            .expect("static regex is valid");
        let caps = date_re
            .captures(date_part)
            .ok_or_else(|| DurationError::Malformed(orig.clone()))?;

        let mut out = IsoDuration::default();
        let mut any = false;
        if let Some(m) = caps.get(1) {
            out.years = parse_int(m.as_str(), &orig)?;
            any = true;
        }
        if let Some(m) = caps.get(2) {
            out.months = parse_int(m.as_str(), &orig)?;
            any = true;
        }
        if let Some(m) = caps.get(3) {
            out.days = parse_int(m.as_str(), &orig)?;
            any = true;
        }

        if let Some(tp) = time_part {
            let time_re = Regex::new(r"^(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$")
                .expect("static regex is valid");
            let caps = time_re
                .captures(tp)
                .ok_or_else(|| DurationError::Malformed(orig.clone()))?;
            if let Some(m) = caps.get(1) {
                out.hours = parse_int(m.as_str(), &orig)?;
                any = true;
            }
            if let Some(m) = caps.get(2) {
                out.minutes = parse_int(m.as_str(), &orig)?;
                any = true;
            }
            if let Some(m) = caps.get(3) {
                out.seconds = parse_int(m.as_str(), &orig)?;
                any = true;
            }
        }

        if !any {
            return Err(DurationError::Empty(orig));
        }

        Ok(out)
    }

    /// Add this duration to `t`, applying year/month arithmetic first with
    /// last-day-of-month clamping, then days + weeks, then hours/minutes/seconds.
    pub fn add(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let total_months = (t.month0() as i64) + self.months + self.years * 12;
        let year = t.year() as i64 + total_months.div_euclid(12);
        let month0 = total_months.rem_euclid(12);
        let month = (month0 + 1) as u32;

        let last_day = last_day_of_month(year as i32, month);
        let day = t.day().min(last_day);

        let base = Utc
            .with_ymd_and_hms(year as i32, month, day, t.hour(), t.minute(), t.second())
            .single()
            .expect("clamped date is always valid");
        let base = base + chrono::Duration::nanoseconds(t.nanosecond() as i64);

        base + chrono::Duration::days(self.days + self.weeks * 7)
            + chrono::Duration::hours(self.hours)
            + chrono::Duration::minutes(self.minutes)
            + chrono::Duration::seconds(self.seconds)
    }

    /// The absolute duration corresponding to this calendar offset, anchored at `t`.
    pub fn relative_to(&self, t: DateTime<Utc>) -> chrono::Duration {
        self.add(t) - t
    }
}

fn parse_int(s: &str, orig: &str) -> Result<i64, DurationError> {
    s.parse::<i64>()
        .map_err(|_| DurationError::InvalidNumber(s.to_string(), orig.to_string()))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("valid date");
    (first_of_next - chrono::Duration::days(1)).day()
}

impl fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weeks != 0
            && self.years == 0
            && self.months == 0
            && self.days == 0
            && self.hours == 0
            && self.minutes == 0
            && self.seconds == 0
        {
            return write!(f, "P{}W", self.weeks);
        }

        if self.is_zero() {
            return write!(f, "PT0S");
        }

        write!(f, "P")?;
        if self.years != 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months != 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.days != 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.hours != 0 || self.minutes != 0 || self.seconds != 0 {
            write!(f, "T")?;
            if self.hours != 0 {
                write!(f, "{}H", self.hours)?;
            }
            if self.minutes != 0 {
                write!(f, "{}M", self.minutes)?;
            }
            if self.seconds != 0 {
                write!(f, "{}S", self.seconds)?;
            }
        }
        Ok(())
    }
}

impl FromStr for IsoDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IsoDuration::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_p_prefix() {
        assert_eq!(
            IsoDuration::parse("1Y"),
            Err(DurationError::MissingPPrefix("1Y".to_string()))
        );
    }

    #[test]
    fn rejects_empty_after_p() {
        assert!(matches!(IsoDuration::parse("P"), Err(DurationError::Empty(_))));
    }

    #[test]
    fn rejects_t_with_no_time_components() {
        assert!(matches!(
            IsoDuration::parse("P1DT"),
            Err(DurationError::EmptyTimeSection(_))
        ));
    }

    #[test]
    fn rejects_non_integer_component() {
        assert!(IsoDuration::parse("P1.5Y").is_err());
    }

    #[test]
    fn parses_date_only() {
        let d = IsoDuration::parse("P1Y2M3D").unwrap();
        assert_eq!(d, IsoDuration { years: 1, months: 2, days: 3, ..Default::default() });
    }

    #[test]
    fn parses_full_shape() {
        let d = IsoDuration::parse("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!(
            d,
            IsoDuration { years: 1, months: 2, days: 3, hours: 4, minutes: 5, seconds: 6, ..Default::default() }
        );
    }

    #[test]
    fn parses_zero_seconds() {
        let d = IsoDuration::parse("PT0S").unwrap();
        assert!(d.is_zero());
    }

    #[test]
    fn parses_weeks_only() {
        let d = IsoDuration::parse("P2W").unwrap();
        assert_eq!(d, IsoDuration { weeks: 2, ..Default::default() });
    }

    #[test]
    fn rejects_mixed_weeks() {
        assert!(IsoDuration::parse("P2WT1H").is_err());
    }

    #[test]
    fn round_trip_canonical_forms() {
        for s in ["P1Y2M3DT4H5M6S", "PT0S", "P2W", "P1DT10M10S", "PT30S"] {
            let d = IsoDuration::parse(s).unwrap();
            assert_eq!(d.to_string(), s, "round trip failed for {s}");
        }
    }

    #[test]
    fn calendar_clamp_jan_31_plus_one_month() {
        let d = IsoDuration::parse("P1M").unwrap();
        let t = Utc.with_ymd_and_hms(2016, 1, 31, 0, 0, 0).unwrap();
        let next = d.add(t);
        assert_eq!(next, Utc.with_ymd_and_hms(2016, 2, 29, 0, 0, 0).unwrap());
    }

    #[test]
    fn calendar_clamp_non_leap_year() {
        let d = IsoDuration::parse("P1M").unwrap();
        let t = Utc.with_ymd_and_hms(2015, 1, 31, 0, 0, 0).unwrap();
        let next = d.add(t);
        assert_eq!(next, Utc.with_ymd_and_hms(2015, 2, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn year_rollover() {
        let d = IsoDuration::parse("P2M").unwrap();
        let t = Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap();
        let next = d.add(t);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn relative_to_matches_add_minus_t() {
        let d = IsoDuration::parse("P1DT10M10S").unwrap();
        let t = Utc::now();
        assert_eq!(d.relative_to(t), d.add(t) - t);
    }
}
