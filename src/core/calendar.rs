//! Stepped calendars.
//!
//! A [`Calendar`] maps timestamps to integer step offsets from an anchor and
//! back. Business-day calendars skip weekends entirely, so consecutive steps
//! may be several days apart. Month-based calendars clamp to the end of short
//! months (an anchor on the 31st steps to Feb 28/29).

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Base unit of a calendar frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyUnit {
    Minute,
    Hour,
    Day,
    BusinessDay,
    Week,
    Month,
    Quarter,
    Year,
}

impl FrequencyUnit {
    /// Approximate length of one unit in seconds, used to order frequencies.
    fn nominal_seconds(self) -> f64 {
        match self {
            FrequencyUnit::Minute => 60.0,
            FrequencyUnit::Hour => 3_600.0,
            FrequencyUnit::Day => 86_400.0,
            FrequencyUnit::BusinessDay => 86_400.0 * 7.0 / 5.0,
            FrequencyUnit::Week => 7.0 * 86_400.0,
            FrequencyUnit::Month => 30.436_875 * 86_400.0,
            FrequencyUnit::Quarter => 3.0 * 30.436_875 * 86_400.0,
            FrequencyUnit::Year => 365.242_5 * 86_400.0,
        }
    }

    fn code(self) -> &'static str {
        match self {
            FrequencyUnit::Minute => "min",
            FrequencyUnit::Hour => "H",
            FrequencyUnit::Day => "D",
            FrequencyUnit::BusinessDay => "B",
            FrequencyUnit::Week => "W",
            FrequencyUnit::Month => "M",
            FrequencyUnit::Quarter => "Q",
            FrequencyUnit::Year => "Y",
        }
    }
}

/// A calendar frequency such as `D`, `3M`, `15min` or `W-MON`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Frequency {
    unit: FrequencyUnit,
    multiple: u32,
    week_anchor: Option<Weekday>,
}

impl Frequency {
    /// Create a frequency of `multiple` units.
    pub fn new(unit: FrequencyUnit, multiple: u32) -> Result<Self> {
        if multiple == 0 {
            return Err(ForecastError::UnsupportedFrequency(format!(
                "0{}",
                unit.code()
            )));
        }
        Ok(Self {
            unit,
            multiple,
            week_anchor: None,
        })
    }

    /// Weekly frequency whose points fall on the given weekday.
    pub fn weekly_on(weekday: Weekday, multiple: u32) -> Result<Self> {
        let mut freq = Self::new(FrequencyUnit::Week, multiple)?;
        freq.week_anchor = Some(weekday);
        Ok(freq)
    }

    pub fn unit(&self) -> FrequencyUnit {
        self.unit
    }

    pub fn multiple(&self) -> u32 {
        self.multiple
    }

    pub fn week_anchor(&self) -> Option<Weekday> {
        self.week_anchor
    }

    /// Approximate step length in seconds.
    pub fn nominal_seconds(&self) -> f64 {
        self.unit.nominal_seconds() * self.multiple as f64
    }

    /// Conventional seasonal period for this frequency.
    ///
    /// Minute data cycles daily (1440), hourly data daily (24), business days
    /// weekly (5), months yearly (12) and quarters yearly (4). Other units have
    /// no default season. Multiples divide the base season when they can.
    pub fn default_season_length(&self) -> usize {
        let base = match self.unit {
            FrequencyUnit::Minute => 1440,
            FrequencyUnit::Hour => 24,
            FrequencyUnit::BusinessDay => 5,
            FrequencyUnit::Month => 12,
            FrequencyUnit::Quarter => 4,
            FrequencyUnit::Day | FrequencyUnit::Week | FrequencyUnit::Year => 1,
        };
        let m = self.multiple as usize;
        if base % m == 0 {
            base / m
        } else {
            1
        }
    }

    fn rule(&self) -> StepRule {
        let m = self.multiple as i64;
        match self.unit {
            FrequencyUnit::Minute => StepRule::Fixed(60 * m),
            FrequencyUnit::Hour => StepRule::Fixed(3_600 * m),
            FrequencyUnit::Day => StepRule::Days(m),
            FrequencyUnit::Week => StepRule::Days(7 * m),
            FrequencyUnit::BusinessDay => StepRule::BusinessDays(m),
            FrequencyUnit::Month => StepRule::Months(m),
            FrequencyUnit::Quarter => StepRule::Months(3 * m),
            FrequencyUnit::Year => StepRule::Months(12 * m),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.multiple > 1 {
            write!(f, "{}", self.multiple)?;
        }
        write!(f, "{}", self.unit.code())?;
        if let Some(day) = self.week_anchor {
            write!(f, "-{}", weekday_code(day))?;
        }
        Ok(())
    }
}

impl FromStr for Frequency {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits_end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, code) = trimmed.split_at(digits_end);
        let multiple = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .map_err(|_| ForecastError::UnsupportedFrequency(s.to_string()))?
        };

        let unsupported = || ForecastError::UnsupportedFrequency(s.to_string());
        let freq = match code {
            "min" | "T" => Self::new(FrequencyUnit::Minute, multiple),
            "H" | "h" => Self::new(FrequencyUnit::Hour, multiple),
            "D" => Self::new(FrequencyUnit::Day, multiple),
            "B" => Self::new(FrequencyUnit::BusinessDay, multiple),
            "W" => Self::new(FrequencyUnit::Week, multiple),
            "M" => Self::new(FrequencyUnit::Month, multiple),
            "Q" => Self::new(FrequencyUnit::Quarter, multiple),
            "A" | "Y" => Self::new(FrequencyUnit::Year, multiple),
            other => match other.strip_prefix("W-") {
                Some(day) => {
                    let weekday = parse_weekday_code(day).ok_or_else(unsupported)?;
                    Self::weekly_on(weekday, multiple)
                }
                None => return Err(unsupported()),
            },
        };
        freq.map_err(|_| unsupported())
    }
}

impl TryFrom<String> for Frequency {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Frequency> for String {
    fn from(freq: Frequency) -> Self {
        freq.to_string()
    }
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MON",
        Weekday::Tue => "TUE",
        Weekday::Wed => "WED",
        Weekday::Thu => "THU",
        Weekday::Fri => "FRI",
        Weekday::Sat => "SAT",
        Weekday::Sun => "SUN",
    }
}

fn parse_weekday_code(code: &str) -> Option<Weekday> {
    match code {
        "MON" => Some(Weekday::Mon),
        "TUE" => Some(Weekday::Tue),
        "WED" => Some(Weekday::Wed),
        "THU" => Some(Weekday::Thu),
        "FRI" => Some(Weekday::Fri),
        "SAT" => Some(Weekday::Sat),
        "SUN" => Some(Weekday::Sun),
        _ => None,
    }
}

/// What to do with a timestamp that is not a calendar point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffCalendarPolicy {
    /// Move to the next calendar point (weekend -> Monday for business days).
    #[default]
    RollForward,
    /// Fail with a timestamp error.
    Reject,
}

#[derive(Debug, Clone, Copy)]
enum StepRule {
    /// Fixed number of seconds per step.
    Fixed(i64),
    /// Whole days per step, evaluated on wall-clock dates.
    Days(i64),
    BusinessDays(i64),
    Months(i64),
}

/// Timestamps this close to a daily point's wall-clock time snap onto it.
const DST_TOLERANCE_SECONDS: i64 = 3_600;

/// Monday used as origin for business-day ordinals.
fn business_origin() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 5).unwrap_or_default()
}

/// Ordinal of a date among business days. Weekend dates return the ordinal of
/// the following Monday and `true`.
fn business_ordinal(date: NaiveDate) -> (i64, bool) {
    let days = (date - business_origin()).num_days();
    let week = days.div_euclid(7);
    let day = days.rem_euclid(7);
    if day >= 5 {
        (week * 5 + 5, true)
    } else {
        (week * 5 + day, false)
    }
}

fn business_date(ordinal: i64) -> Option<NaiveDate> {
    let week = ordinal.div_euclid(5);
    let day = ordinal.rem_euclid(5);
    business_origin().checked_add_signed(Duration::days(week * 7 + day))
}

/// A stepped calendar: frequency, anchor point and off-calendar policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    frequency: Frequency,
    anchor: DateTime<Utc>,
    policy: OffCalendarPolicy,
}

impl Calendar {
    /// Create a calendar whose step 0 is `anchor`.
    ///
    /// An anchor that is itself off-calendar (a weekend for business days, the
    /// wrong weekday for `W-XXX`) is handled by `policy`.
    pub fn new(
        frequency: Frequency,
        anchor: DateTime<Utc>,
        policy: OffCalendarPolicy,
    ) -> Result<Self> {
        let date = anchor.date_naive();
        let valid_date = match (frequency.unit, frequency.week_anchor) {
            (FrequencyUnit::BusinessDay, _) => {
                let (ordinal, weekend) = business_ordinal(date);
                if weekend {
                    business_date(ordinal)
                } else {
                    Some(date)
                }
            }
            (FrequencyUnit::Week, Some(weekday)) => {
                let ahead = (7 + weekday.num_days_from_monday() as i64
                    - date.weekday().num_days_from_monday() as i64)
                    % 7;
                date.checked_add_signed(Duration::days(ahead))
            }
            _ => Some(date),
        }
        .ok_or_else(|| ForecastError::TimestampError(format!("anchor {anchor} out of range")))?;

        let anchor = if valid_date == date {
            anchor
        } else {
            match policy {
                OffCalendarPolicy::Reject => {
                    return Err(ForecastError::TimestampError(format!(
                        "anchor {anchor} is not a point of the {frequency} calendar"
                    )))
                }
                OffCalendarPolicy::RollForward => {
                    Utc.from_utc_datetime(&valid_date.and_time(anchor.time()))
                }
            }
        };

        Ok(Self {
            frequency,
            anchor,
            policy,
        })
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    pub fn policy(&self) -> OffCalendarPolicy {
        self.policy
    }

    /// Step index of a timestamp.
    ///
    /// Calendar points map to their exact step. Other timestamps roll forward
    /// to the next point or fail, depending on the calendar's policy.
    pub fn to_step(&self, timestamp: DateTime<Utc>) -> Result<i64> {
        let (floor, exact) = self.locate(timestamp)?;
        if exact {
            return Ok(floor);
        }
        match self.policy {
            OffCalendarPolicy::RollForward => Ok(floor + 1),
            OffCalendarPolicy::Reject => Err(ForecastError::TimestampError(format!(
                "{timestamp} is not a point of the {} calendar",
                self.frequency
            ))),
        }
    }

    /// Last step at or before `timestamp`.
    pub fn floor_step(&self, timestamp: DateTime<Utc>) -> Result<i64> {
        Ok(self.locate(timestamp)?.0)
    }

    /// First step at or after `timestamp`, regardless of policy.
    pub fn ceil_step(&self, timestamp: DateTime<Utc>) -> Result<i64> {
        let (floor, exact) = self.locate(timestamp)?;
        Ok(if exact { floor } else { floor + 1 })
    }

    /// Whether `timestamp` is exactly a calendar point.
    pub fn is_point(&self, timestamp: DateTime<Utc>) -> bool {
        matches!(self.locate(timestamp), Ok((step, true)) if self.to_timestamp(step) == Ok(timestamp))
    }

    /// Timestamp of a step index.
    pub fn to_timestamp(&self, step: i64) -> Result<DateTime<Utc>> {
        let out_of_range =
            || ForecastError::TimestampError(format!("step {step} is outside the representable range"));
        match self.frequency.rule() {
            StepRule::Fixed(seconds) => {
                let offset = step.checked_mul(seconds).ok_or_else(out_of_range)?;
                self.anchor
                    .checked_add_signed(Duration::seconds(offset))
                    .ok_or_else(out_of_range)
            }
            _ => {
                let date = self.date_at(step).ok_or_else(out_of_range)?;
                Ok(Utc.from_utc_datetime(&date.and_time(self.anchor.time())))
            }
        }
    }

    /// Snap a timestamp onto the calendar using the calendar's policy.
    pub fn normalize(&self, timestamp: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.to_timestamp(self.to_step(timestamp)?)
    }

    /// Timestamps of `count` consecutive steps starting at `start`.
    pub fn timestamps(&self, start: i64, count: usize) -> Result<Vec<DateTime<Utc>>> {
        (0..count as i64)
            .map(|i| self.to_timestamp(start + i))
            .collect()
    }

    /// Floor step and whether the timestamp is exactly on that step.
    fn locate(&self, timestamp: DateTime<Utc>) -> Result<(i64, bool)> {
        match self.frequency.rule() {
            StepRule::Fixed(seconds) => {
                let diff = (timestamp.timestamp() as i128 - self.anchor.timestamp() as i128)
                    * 1_000_000_000
                    + (timestamp.timestamp_subsec_nanos() as i128
                        - self.anchor.timestamp_subsec_nanos() as i128);
                let step = seconds as i128 * 1_000_000_000;
                let floor = i64::try_from(diff.div_euclid(step)).map_err(|_| {
                    ForecastError::TimestampError(format!("{timestamp} is too far from the anchor"))
                })?;
                Ok((floor, diff.rem_euclid(step) == 0))
            }
            _ => {
                let (date, time_exact) = self.effective_date(timestamp);
                let (floor, date_exact) = self.date_floor(date)?;
                Ok((floor, time_exact && date_exact))
            }
        }
    }

    /// Date whose point is the latest one at or before `timestamp`, snapping
    /// timestamps within the DST tolerance of a point onto it.
    fn effective_date(&self, timestamp: DateTime<Utc>) -> (NaiveDate, bool) {
        let time: NaiveTime = self.anchor.time();
        let date = timestamp.date_naive();
        let point = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(time));

        let candidates = [date.pred_opt(), Some(date), date.succ_opt()];
        let nearest = candidates
            .iter()
            .flatten()
            .map(|d| (*d, (timestamp - point(*d)).num_seconds().abs()))
            .min_by_key(|(_, distance)| *distance);

        if let Some((d, distance)) = nearest {
            if distance <= DST_TOLERANCE_SECONDS {
                return (d, true);
            }
        }

        if timestamp >= point(date) {
            (date, false)
        } else {
            (date.pred_opt().unwrap_or(date), false)
        }
    }

    fn date_floor(&self, date: NaiveDate) -> Result<(i64, bool)> {
        let anchor_date = self.anchor.date_naive();
        match self.frequency.rule() {
            StepRule::Days(n) => {
                let days = (date - anchor_date).num_days();
                Ok((days.div_euclid(n), days.rem_euclid(n) == 0))
            }
            StepRule::BusinessDays(n) => {
                let (ordinal, weekend) = business_ordinal(date);
                let floor_ordinal = if weekend { ordinal - 1 } else { ordinal };
                let diff = floor_ordinal - business_ordinal(anchor_date).0;
                Ok((diff.div_euclid(n), !weekend && diff.rem_euclid(n) == 0))
            }
            StepRule::Months(n) => {
                let months = (date.year() as i64 - anchor_date.year() as i64) * 12
                    + date.month0() as i64
                    - anchor_date.month0() as i64;
                let mut step = months.div_euclid(n);
                let mut point = self.date_at(step).ok_or_else(|| {
                    ForecastError::TimestampError(format!("{date} is outside the calendar range"))
                })?;
                if point > date {
                    step -= 1;
                    point = self.date_at(step).ok_or_else(|| {
                        ForecastError::TimestampError(format!(
                            "{date} is outside the calendar range"
                        ))
                    })?;
                }
                Ok((step, point == date))
            }
            StepRule::Fixed(_) => Err(ForecastError::UnsupportedFrequency(
                self.frequency.to_string(),
            )),
        }
    }

    fn date_at(&self, step: i64) -> Option<NaiveDate> {
        let anchor_date = self.anchor.date_naive();
        match self.frequency.rule() {
            StepRule::Days(n) => {
                anchor_date.checked_add_signed(Duration::days(step.checked_mul(n)?))
            }
            StepRule::BusinessDays(n) => {
                business_date(business_ordinal(anchor_date).0 + step.checked_mul(n)?)
            }
            StepRule::Months(n) => {
                let months = step.checked_mul(n)?;
                let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
                if months >= 0 {
                    anchor_date.checked_add_months(Months::new(magnitude))
                } else {
                    anchor_date.checked_sub_months(Months::new(magnitude))
                }
            }
            StepRule::Fixed(_) => None,
        }
    }
}
