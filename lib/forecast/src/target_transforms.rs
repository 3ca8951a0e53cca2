//! Invertible transformations of the target applied before computing features.
//!
//! Transforms receive tables holding the id, time and target columns sorted by id then time, and
//! keep their per series state keyed by id.

use std::collections::HashMap;

use anyhow::Context;
use arrow::array::RecordBatch;

use crate::table::{column, f64_values, group_ranges, series_keys, with_f64_column};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnNames {
    pub id_col: String,
    pub time_col: String,
    pub target_col: String,
}

pub trait TargetTransform: Send + Sync {
    fn name(&self) -> &str;

    fn set_column_names(&mut self, id_col: &str, time_col: &str, target_col: &str);

    /// Learn the per series state and transform the target column.
    fn fit_transform(&mut self, df: &RecordBatch) -> anyhow::Result<RecordBatch>;

    /// Restore every prediction column (all columns except id and time).
    fn inverse_transform(&self, df: &RecordBatch) -> anyhow::Result<RecordBatch>;

    /// Transform newly observed values and fold them into the state.
    fn update(&mut self, df: &RecordBatch) -> anyhow::Result<RecordBatch>;

    fn boxed_clone(&self) -> Box<dyn TargetTransform>;
}

impl Clone for Box<dyn TargetTransform> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

fn prediction_columns(df: &RecordBatch, names: &ColumnNames) -> Vec<String> {
    df.schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|n| *n != names.id_col && *n != names.time_col)
        .collect()
}

/// Apply `f` to every series of `column_name`, series are consecutive runs of the same id.
fn map_series<F>(
    df: &RecordBatch,
    names: &ColumnNames,
    column_name: &str,
    mut f: F,
) -> anyhow::Result<RecordBatch>
where
    F: FnMut(&str, &[f64]) -> anyhow::Result<Vec<f64>>,
{
    let keys = series_keys(column(df, &names.id_col)?)?;
    let values = f64_values(column(df, column_name)?)?;
    let mut out = Vec::with_capacity(values.len());
    for (key, range) in group_ranges(&keys) {
        out.extend(f(&key, &values[range])?);
    }
    Ok(with_f64_column(df, column_name, out)?)
}

/// Subtract the value `d` steps back, once per order.
#[derive(Debug, Clone, Default)]
pub struct Differences {
    orders: Vec<usize>,
    names: ColumnNames,
    /// Last `d` values of every series before applying each order.
    tails: HashMap<String, Vec<Vec<f64>>>,
}

impl Differences {
    pub fn new(orders: Vec<usize>) -> Self {
        Differences {
            orders,
            ..Default::default()
        }
    }

    /// Difference `x` continuing from `tail`, return the new tail.
    fn diff(x: &[f64], tail: &[f64], d: usize) -> (Vec<f64>, Vec<f64>) {
        let full: Vec<f64> = tail.iter().chain(x).copied().collect();
        let offset = tail.len();
        let out = (0..x.len())
            .map(|t| {
                let pos = offset + t;
                if pos >= d { full[pos] - full[pos - d] } else { f64::NAN }
            })
            .collect();
        let new_tail = full[full.len().saturating_sub(d)..].to_vec();
        (out, new_tail)
    }

    fn apply(&self, x: &[f64], tails: &mut Vec<Vec<f64>>) -> Vec<f64> {
        tails.resize(self.orders.len(), Vec::new());
        let mut current = x.to_vec();
        for (k, &d) in self.orders.iter().enumerate() {
            let (diffed, tail) = Self::diff(&current, &tails[k], d);
            tails[k] = tail;
            current = diffed;
        }
        current
    }
}

impl TargetTransform for Differences {
    fn name(&self) -> &str {
        "differences"
    }

    fn set_column_names(&mut self, id_col: &str, time_col: &str, target_col: &str) {
        self.names = ColumnNames {
            id_col: id_col.to_string(),
            time_col: time_col.to_string(),
            target_col: target_col.to_string(),
        };
    }

    fn fit_transform(&mut self, df: &RecordBatch) -> anyhow::Result<RecordBatch> {
        anyhow::ensure!(self.orders.iter().all(|&d| d > 0), "difference orders must be positive");
        self.tails.clear();
        let names = self.names.clone();
        let mut tails = HashMap::new();
        let out = map_series(df, &names, &names.target_col, |key, x| {
            let mut series_tails = Vec::new();
            let diffed = self.apply(x, &mut series_tails);
            tails.insert(key.to_string(), series_tails);
            Ok(diffed)
        })?;
        self.tails = tails;
        Ok(out)
    }

    fn inverse_transform(&self, df: &RecordBatch) -> anyhow::Result<RecordBatch> {
        let mut out = df.clone();
        for name in prediction_columns(df, &self.names) {
            out = map_series(&out, &self.names, &name, |key, preds| {
                let tails = self
                    .tails
                    .get(key)
                    .with_context(|| format!("no differences state for series {key}"))?;
                let mut restored = preds.to_vec();
                for (k, &d) in self.orders.iter().enumerate().rev() {
                    let tail = &tails[k];
                    let mut full = tail.clone();
                    for (t, value) in restored.iter_mut().enumerate() {
                        let pos = tail.len() + t;
                        let prev = if pos >= d { full[pos - d] } else { f64::NAN };
                        *value += prev;
                        full.push(*value);
                    }
                }
                Ok(restored)
            })?;
        }
        Ok(out)
    }

    fn update(&mut self, df: &RecordBatch) -> anyhow::Result<RecordBatch> {
        let names = self.names.clone();
        let mut tails = std::mem::take(&mut self.tails);
        let out = map_series(df, &names, &names.target_col, |key, x| {
            let series_tails = tails.entry(key.to_string()).or_default();
            Ok(self.apply(x, series_tails))
        });
        self.tails = tails;
        out
    }

    fn boxed_clone(&self) -> Box<dyn TargetTransform> {
        Box::new(self.clone())
    }
}

/// Standardize every series with its own mean and standard deviation.
#[derive(Debug, Clone, Default)]
pub struct LocalStandardScaler {
    names: ColumnNames,
    stats: HashMap<String, (f64, f64)>,
}

impl LocalStandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats(x: &[f64]) -> (f64, f64) {
        let observed: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
        if observed.is_empty() {
            return (0.0, 1.0);
        }
        let n = observed.len() as f64;
        let mean = observed.iter().sum::<f64>() / n;
        let var = observed.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        (mean, if std > 0.0 { std } else { 1.0 })
    }
}

impl TargetTransform for LocalStandardScaler {
    fn name(&self) -> &str {
        "local_standard_scaler"
    }

    fn set_column_names(&mut self, id_col: &str, time_col: &str, target_col: &str) {
        self.names = ColumnNames {
            id_col: id_col.to_string(),
            time_col: time_col.to_string(),
            target_col: target_col.to_string(),
        };
    }

    fn fit_transform(&mut self, df: &RecordBatch) -> anyhow::Result<RecordBatch> {
        let names = self.names.clone();
        let mut stats = HashMap::new();
        let out = map_series(df, &names, &names.target_col, |key, x| {
            let (mean, std) = Self::stats(x);
            stats.insert(key.to_string(), (mean, std));
            Ok(x.iter().map(|v| (v - mean) / std).collect())
        })?;
        self.stats = stats;
        Ok(out)
    }

    fn inverse_transform(&self, df: &RecordBatch) -> anyhow::Result<RecordBatch> {
        let mut out = df.clone();
        for name in prediction_columns(df, &self.names) {
            out = map_series(&out, &self.names, &name, |key, preds| {
                let (mean, std) = self
                    .stats
                    .get(key)
                    .with_context(|| format!("no scaler state for series {key}"))?;
                Ok(preds.iter().map(|p| p * std + mean).collect())
            })?;
        }
        Ok(out)
    }

    fn update(&mut self, df: &RecordBatch) -> anyhow::Result<RecordBatch> {
        let names = self.names.clone();
        let mut stats = std::mem::take(&mut self.stats);
        let out = map_series(df, &names, &names.target_col, |key, x| {
            let (mean, std) = *stats
                .entry(key.to_string())
                .or_insert_with(|| Self::stats(x));
            Ok(x.iter().map(|v| (v - mean) / std).collect())
        });
        self.stats = stats;
        out
    }

    fn boxed_clone(&self) -> Box<dyn TargetTransform> {
        Box::new(self.clone())
    }
}
