//! Time column handling and the offsets used to step dates forward.
//!
//! Time values are kept as `i64` in the native unit of the time column: plain steps for integer
//! columns, the Arrow timestamp unit for timestamp columns.

use std::fmt;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, anyhow};
use arrow::array::timezone::Tz;
use arrow::array::{Array, ArrayRef, AsArray, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::Int64Type;
use arrow_schema::{DataType, TimeUnit};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use regex::Regex;

use crate::error::{ForecastError, Result};

/// Type of the time column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeKind {
    /// Integer steps, stored with the original integer type.
    Int(DataType),
    Timestamp(TimeUnit, Option<Arc<str>>),
}

impl TimeKind {
    pub fn from_data_type(data_type: &DataType) -> Result<Self> {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Ok(TimeKind::Int(data_type.clone())),
            DataType::Timestamp(unit, tz) => Ok(TimeKind::Timestamp(*unit, tz.clone())),
            other => Err(ForecastError::UnsupportedTimeType(other.to_string())),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TimeKind::Int(dt) => dt.clone(),
            TimeKind::Timestamp(unit, tz) => DataType::Timestamp(*unit, tz.clone()),
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, TimeKind::Int(_))
    }

    fn timezone(&self) -> anyhow::Result<Option<Tz>> {
        match self {
            TimeKind::Timestamp(_, Some(tz)) => Ok(Some(
                tz.parse::<Tz>()
                    .with_context(|| format!("invalid timezone {tz}"))?,
            )),
            _ => Ok(None),
        }
    }

    /// Wall clock time of `value` in the column's timezone, `None` for integer columns.
    pub fn to_naive(&self, value: i64) -> anyhow::Result<Option<NaiveDateTime>> {
        let TimeKind::Timestamp(unit, _) = self else {
            return Ok(None);
        };
        let utc = match unit {
            TimeUnit::Second => DateTime::<Utc>::from_timestamp(value, 0),
            TimeUnit::Millisecond => DateTime::<Utc>::from_timestamp_millis(value),
            TimeUnit::Microsecond => DateTime::<Utc>::from_timestamp_micros(value),
            TimeUnit::Nanosecond => Some(DateTime::<Utc>::from_timestamp_nanos(value)),
        }
        .ok_or_else(|| anyhow!("timestamp {value} out of range"))?;
        Ok(Some(match self.timezone()? {
            Some(tz) => utc.with_timezone(&tz).naive_local(),
            None => utc.naive_utc(),
        }))
    }

    /// Inverse of [`TimeKind::to_naive`].
    pub fn from_naive(&self, naive: NaiveDateTime) -> anyhow::Result<i64> {
        let TimeKind::Timestamp(unit, _) = self else {
            return Err(anyhow!("integer time columns have no calendar"));
        };
        let utc = match self.timezone()? {
            Some(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| anyhow!("{naive} doesn't exist in the column timezone"))?
                .with_timezone(&Utc),
            None => naive.and_utc(),
        };
        Ok(match unit {
            TimeUnit::Second => utc.timestamp(),
            TimeUnit::Millisecond => utc.timestamp_millis(),
            TimeUnit::Microsecond => utc.timestamp_micros(),
            TimeUnit::Nanosecond => utc
                .timestamp_nanos_opt()
                .ok_or_else(|| anyhow!("{utc} out of nanosecond range"))?,
        })
    }

    /// Number of native units in `delta`.
    fn units(&self, delta: TimeDelta) -> anyhow::Result<i64> {
        let TimeKind::Timestamp(unit, _) = self else {
            return Err(anyhow!("durations need a timestamp time column"));
        };
        match unit {
            TimeUnit::Second => Ok(delta.num_seconds()),
            TimeUnit::Millisecond => Ok(delta.num_milliseconds()),
            TimeUnit::Microsecond => delta
                .num_microseconds()
                .ok_or_else(|| anyhow!("{delta} overflows microseconds")),
            TimeUnit::Nanosecond => delta
                .num_nanoseconds()
                .ok_or_else(|| anyhow!("{delta} overflows nanoseconds")),
        }
    }
}

/// Read a time column as native `i64` values.
pub fn time_values(array: &ArrayRef, name: &str) -> Result<Vec<i64>> {
    if array.null_count() > 0 {
        return Err(ForecastError::NullTime(name.to_string()));
    }
    let casted = cast(array, &DataType::Int64)?;
    Ok(casted.as_primitive::<Int64Type>().values().to_vec())
}

/// Build a time column of `kind` from native values.
pub fn time_array(values: Vec<i64>, kind: &TimeKind) -> Result<ArrayRef> {
    let raw: ArrayRef = Arc::new(Int64Array::from(values));
    Ok(cast(&raw, &kind.data_type())?)
}

/// Externally supplied calendar arithmetic.
pub trait DateOffset: Send + Sync + fmt::Debug {
    /// Move `value` forward by `n` offsets.
    fn advance(&self, value: i64, n: i64, kind: &TimeKind) -> anyhow::Result<i64>;
}

#[derive(Debug, Clone)]
pub enum Frequency {
    /// Integer steps.
    Int(i64),
    /// A fixed duration.
    Fixed(TimeDelta),
    /// First day of the month, every `n` months.
    MonthStart(u32),
    /// Last day of the month, every `n` months.
    MonthEnd(u32),
    Custom(Arc<dyn DateOffset>),
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Int(1)
    }
}

impl PartialEq for Frequency {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Frequency::Int(a), Frequency::Int(b)) => a == b,
            (Frequency::Fixed(a), Frequency::Fixed(b)) => a == b,
            (Frequency::MonthStart(a), Frequency::MonthStart(b)) => a == b,
            (Frequency::MonthEnd(a), Frequency::MonthEnd(b)) => a == b,
            (Frequency::Custom(a), Frequency::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Int(n) => write!(f, "{n}"),
            Frequency::Fixed(d) => write!(f, "{d}"),
            Frequency::MonthStart(n) => write!(f, "{n}MS"),
            Frequency::MonthEnd(n) => write!(f, "{n}M"),
            Frequency::Custom(o) => write!(f, "{o:?}"),
        }
    }
}

static FREQ_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d*)\s*([A-Za-z]*)\s*$").expect("frequency regex is valid")
});

impl std::str::FromStr for Frequency {
    type Err = ForecastError;

    /// Parse `"1"`, `"7"`, `"D"`, `"15min"`, `"2h"`, `"W"`, `"MS"`, `"M"`, ...
    fn from_str(s: &str) -> Result<Self> {
        let unknown = || ForecastError::UnknownFrequency(s.to_string());
        let caps = FREQ_REGEX.captures(s).ok_or_else(unknown)?;
        let digits = &caps[1];
        let alias = &caps[2];
        let n: i64 = if digits.is_empty() {
            1
        } else {
            digits.parse().map_err(|_| unknown())?
        };
        if n <= 0 {
            return Err(unknown());
        }
        let freq = match alias {
            "" if !digits.is_empty() => Frequency::Int(n),
            "s" | "S" => Frequency::Fixed(TimeDelta::seconds(n)),
            "min" | "T" => Frequency::Fixed(TimeDelta::minutes(n)),
            "h" | "H" => Frequency::Fixed(TimeDelta::hours(n)),
            "D" | "d" => Frequency::Fixed(TimeDelta::days(n)),
            "W" | "w" => Frequency::Fixed(TimeDelta::weeks(n)),
            "MS" => Frequency::MonthStart(u32::try_from(n).map_err(|_| unknown())?),
            "M" | "ME" => Frequency::MonthEnd(u32::try_from(n).map_err(|_| unknown())?),
            _ => return Err(unknown()),
        };
        Ok(freq)
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map_or(28, |d| d.day())
}

pub(crate) fn month_days(date: NaiveDate) -> u32 {
    days_in_month(date.year(), date.month())
}

fn add_months(naive: NaiveDateTime, months: i64) -> anyhow::Result<NaiveDateTime> {
    let months = u32::try_from(months).context("offset must move forward")?;
    naive
        .checked_add_months(Months::new(months))
        .ok_or_else(|| anyhow!("{naive} + {months} months out of range"))
}

fn first_of_month(naive: NaiveDateTime) -> NaiveDateTime {
    naive
        .date()
        .with_day(1)
        .unwrap_or(naive.date())
        .and_time(naive.time())
}

fn last_of_month(naive: NaiveDateTime) -> NaiveDateTime {
    let date = naive.date();
    date.with_day(month_days(date))
        .unwrap_or(date)
        .and_time(naive.time())
}

impl Frequency {
    pub fn is_int(&self) -> bool {
        matches!(self, Frequency::Int(_))
    }

    /// `value` moved forward by `n` periods.
    pub fn advance(&self, value: i64, n: i64, kind: &TimeKind) -> anyhow::Result<i64> {
        if n == 0 {
            return Ok(value);
        }
        match self {
            Frequency::Int(step) => {
                anyhow::ensure!(kind.is_int(), "integer frequency on a timestamp column");
                Ok(value + n * step)
            }
            Frequency::Fixed(delta) => Ok(value + n * kind.units(*delta)?),
            Frequency::MonthStart(k) => {
                let naive = kind
                    .to_naive(value)?
                    .ok_or_else(|| anyhow!("month offsets need a timestamp column"))?;
                kind.from_naive(add_months(first_of_month(naive), n * i64::from(*k))?)
            }
            Frequency::MonthEnd(k) => {
                let naive = kind
                    .to_naive(value)?
                    .ok_or_else(|| anyhow!("month offsets need a timestamp column"))?;
                let on_end = naive.date().day() == month_days(naive.date());
                let months = n * i64::from(*k) - if on_end { 0 } else { 1 };
                kind.from_naive(last_of_month(add_months(first_of_month(naive), months)?))
            }
            Frequency::Custom(offset) => offset.advance(value, n, kind),
        }
    }
}
