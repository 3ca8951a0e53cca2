use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, UInt8Array, UInt16Array};
use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::error::{ForecastError, Result};
use crate::frequency::{TimeKind, month_days};

/// Calendar attributes that can be extracted from a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarFeature {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    DayOfYear,
    Week,
    DayOfWeek,
    Quarter,
    DaysInMonth,
    IsMonthStart,
    IsMonthEnd,
    IsQuarterStart,
    IsQuarterEnd,
    IsYearStart,
    IsYearEnd,
}

impl FromStr for CalendarFeature {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        use CalendarFeature as F;
        Ok(match s {
            "year" => F::Year,
            "month" => F::Month,
            "day" => F::Day,
            "hour" => F::Hour,
            "minute" => F::Minute,
            "second" => F::Second,
            "dayofyear" | "day_of_year" => F::DayOfYear,
            "weekofyear" | "week" => F::Week,
            "dayofweek" | "day_of_week" | "weekday" => F::DayOfWeek,
            "quarter" => F::Quarter,
            "daysinmonth" => F::DaysInMonth,
            "is_month_start" => F::IsMonthStart,
            "is_month_end" => F::IsMonthEnd,
            "is_quarter_start" => F::IsQuarterStart,
            "is_quarter_end" => F::IsQuarterEnd,
            "is_year_start" => F::IsYearStart,
            "is_year_end" => F::IsYearEnd,
            other => return Err(ForecastError::UnknownDateFeature(other.to_string())),
        })
    }
}

impl CalendarFeature {
    /// Year and day of year need 16 bits, everything else fits in 8.
    fn is_wide(self) -> bool {
        matches!(self, CalendarFeature::Year | CalendarFeature::DayOfYear)
    }

    fn extract(self, dt: &NaiveDateTime) -> u16 {
        use CalendarFeature as F;
        let date = dt.date();
        let quarter_start = matches!(date.month(), 1 | 4 | 7 | 10);
        let quarter_end = matches!(date.month(), 3 | 6 | 9 | 12);
        let month_end = date.day() == month_days(date);
        let value = match self {
            F::Year => date.year() as u32,
            F::Month => date.month(),
            F::Day => date.day(),
            F::Hour => dt.hour(),
            F::Minute => dt.minute(),
            F::Second => dt.second(),
            F::DayOfYear => date.ordinal(),
            F::Week => date.iso_week().week(),
            F::DayOfWeek => date.weekday().num_days_from_monday(),
            F::Quarter => (date.month() - 1) / 3 + 1,
            F::DaysInMonth => month_days(date),
            F::IsMonthStart => u32::from(date.day() == 1),
            F::IsMonthEnd => u32::from(month_end),
            F::IsQuarterStart => u32::from(quarter_start && date.day() == 1),
            F::IsQuarterEnd => u32::from(quarter_end && month_end),
            F::IsYearStart => u32::from(date.ordinal() == 1),
            F::IsYearEnd => u32::from(date.month() == 12 && date.day() == 31),
        };
        value as u16
    }
}

type DateFeatureFn = dyn Fn(&[i64], &TimeKind) -> anyhow::Result<Vec<f64>> + Send + Sync;

/// A feature derived from the time column of every row.
#[derive(Clone)]
pub enum DateFeature {
    Calendar {
        name: String,
        feature: CalendarFeature,
    },
    /// User function over the native time values, its name becomes the column name.
    Custom {
        name: String,
        func: Arc<DateFeatureFn>,
    },
}

impl fmt::Debug for DateFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFeature::Calendar { name, .. } => write!(f, "Calendar({name})"),
            DateFeature::Custom { name, .. } => write!(f, "Custom({name})"),
        }
    }
}

impl DateFeature {
    pub fn calendar(name: &str) -> Result<Self> {
        Ok(DateFeature::Calendar {
            name: name.to_string(),
            feature: name.parse()?,
        })
    }

    /// Named custom feature, unnamed functions are rejected.
    pub fn custom<F>(name: impl Into<String>, func: F) -> Result<Self>
    where
        F: Fn(&[i64], &TimeKind) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() || name.contains("{{closure}}") {
            return Err(ForecastError::AnonymousDateFeature);
        }
        Ok(DateFeature::Custom {
            name,
            func: Arc::new(func),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            DateFeature::Calendar { name, .. } | DateFeature::Custom { name, .. } => name,
        }
    }

    pub fn compute(&self, times: &[i64], kind: &TimeKind) -> Result<ArrayRef> {
        match self {
            DateFeature::Calendar { name, feature } => {
                if kind.is_int() {
                    return Err(ForecastError::DateFeatureOnIntegerTime(name.clone()));
                }
                let mut values = Vec::with_capacity(times.len());
                for &t in times {
                    let dt = kind
                        .to_naive(t)
                        .map_err(|e| ForecastError::transform(name.clone(), e))?
                        .ok_or_else(|| ForecastError::DateFeatureOnIntegerTime(name.clone()))?;
                    values.push(feature.extract(&dt));
                }
                if feature.is_wide() {
                    Ok(Arc::new(UInt16Array::from(values)))
                } else {
                    Ok(Arc::new(UInt8Array::from(
                        values.into_iter().map(|v| v as u8).collect::<Vec<_>>(),
                    )))
                }
            }
            DateFeature::Custom { name, func } => {
                let values = func(times, kind).map_err(|e| ForecastError::transform(name.clone(), e))?;
                if values.len() != times.len() {
                    return Err(ForecastError::ShapeError {
                        expected: times.len(),
                        actual: values.len(),
                    });
                }
                Ok(Arc::new(Float64Array::from(values)))
            }
        }
    }
}
