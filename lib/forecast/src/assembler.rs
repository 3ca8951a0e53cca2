//! Turns computed feature buffers into training tables.

use arrow::array::{ArrayRef, BooleanArray, RecordBatch};
use arrow::compute::filter;

use crate::date_features::DateFeature;
use crate::engine::FeatureBuffers;
use crate::error::{ForecastError, Result};
use crate::frequency::TimeKind;
use crate::table::{batch_with_rows, f64_array, gather_f64};

/// Row major training target, one column per horizon step.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBuffer {
    values: Vec<f64>,
    width: usize,
    direct: bool,
}

impl TargetBuffer {
    /// A target of `width` columns, direct whenever there is more than one.
    pub fn new(values: Vec<f64>, width: usize) -> Result<Self> {
        Self::build(values, width, width > 1)
    }

    /// The target of a `max_horizon` fit, direct even with a single horizon step.
    pub fn horizons(values: Vec<f64>, max_horizon: usize) -> Result<Self> {
        Self::build(values, max_horizon, true)
    }

    fn build(values: Vec<f64>, width: usize, direct: bool) -> Result<Self> {
        if width == 0 || values.len() % width != 0 {
            return Err(ForecastError::ShapeError {
                expected: values.len().next_multiple_of(width.max(1)),
                actual: values.len(),
            });
        }
        Ok(TargetBuffer {
            values,
            width,
            direct,
        })
    }

    /// Whether this target was built for one model per horizon step.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn n_rows(&self) -> usize {
        self.values.len() / self.width
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.width..(i + 1) * self.width]
    }

    /// Target values of horizon step `h`.
    pub fn column(&self, h: usize) -> Vec<f64> {
        self.values
            .iter()
            .skip(h)
            .step_by(self.width)
            .copied()
            .collect()
    }

    /// A row only counts as missing when every horizon is.
    fn is_missing(&self, i: usize) -> bool {
        self.row(i).iter().all(|v| v.is_nan())
    }

    fn gather(&self, idxs: &[usize]) -> TargetBuffer {
        let mut values = Vec::with_capacity(idxs.len() * self.width);
        for &i in idxs {
            values.extend_from_slice(self.row(i));
        }
        TargetBuffer {
            values,
            width: self.width,
            direct: self.direct,
        }
    }

    fn filter(&self, keep: &[bool]) -> TargetBuffer {
        let idxs: Vec<usize> = (0..self.n_rows()).filter(|&i| keep[i]).collect();
        self.gather(&idxs)
    }
}

/// Inputs of [`assemble`], everything aligned with the rows of `df` except the sorted buffers.
pub(crate) struct TrainingInput<'a> {
    pub df: &'a RecordBatch,
    pub target_col: &'a str,
    pub time_kind: &'a TimeKind,
    pub times: &'a [i64],
    /// Position of every row of `df` in the sorted layout.
    pub restore_idxs: &'a [usize],
    pub dropna: bool,
}

fn put(columns: &mut Vec<(String, ArrayRef)>, name: &str, array: ArrayRef) {
    match columns.iter_mut().find(|(n, _)| n == name) {
        Some((_, existing)) => *existing = array,
        None => columns.push((name.to_string(), array)),
    }
}

/// Build the feature table in the caller's row order.
///
/// The result holds every input column except the target, then the lag features, then the date
/// features. Rows with a missing feature or a fully missing target are dropped with `dropna`.
pub(crate) fn assemble(
    input: TrainingInput<'_>,
    features: FeatureBuffers,
    sorted_target: &TargetBuffer,
    date_features: &[DateFeature],
) -> Result<(RecordBatch, TargetBuffer)> {
    let n = input.df.num_rows();
    let features: Vec<(String, Vec<f64>)> = features
        .into_inner()
        .into_iter()
        .map(|(name, values)| (name, gather_f64(&values, input.restore_idxs)))
        .collect();
    let target = sorted_target.gather(input.restore_idxs);

    let keep: Vec<bool> = if input.dropna {
        (0..n)
            .map(|i| !target.is_missing(i) && features.iter().all(|(_, v)| !v[i].is_nan()))
            .collect()
    } else {
        vec![true; n]
    };
    let all_kept = keep.iter().all(|k| *k);
    let mask = BooleanArray::from(keep.clone());
    let filter_array = |array: &ArrayRef| -> Result<ArrayRef> {
        if all_kept {
            Ok(array.clone())
        } else {
            Ok(filter(array.as_ref(), &mask)?)
        }
    };

    let mut columns: Vec<(String, ArrayRef)> = Vec::new();
    let schema = input.df.schema();
    for (field, array) in schema.fields().iter().zip(input.df.columns()) {
        if field.name() != input.target_col {
            columns.push((field.name().clone(), filter_array(array)?));
        }
    }
    for (name, values) in &features {
        let values = values
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(v, _)| *v)
            .collect();
        put(&mut columns, name, f64_array(values));
    }
    if !date_features.is_empty() {
        let times: Vec<i64> = input
            .times
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(t, _)| *t)
            .collect();
        for feature in date_features {
            put(&mut columns, feature.name(), feature.compute(&times, input.time_kind)?);
        }
    }
    let target = if all_kept { target } else { target.filter(&keep) };
    let batch = batch_with_rows(columns, target.n_rows())?;
    Ok((batch, target))
}

/// Append the target: a single column named `target_col`, or `{target_col}{i}` per horizon in
/// direct mode.
pub(crate) fn with_target(
    batch: &RecordBatch,
    target_col: &str,
    target: &TargetBuffer,
) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut columns: Vec<(String, ArrayRef)> = schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .zip(batch.columns().iter().cloned())
        .collect();
    if !target.is_direct() {
        put(&mut columns, target_col, f64_array(target.values().to_vec()));
    } else {
        for h in 0..target.width() {
            put(
                &mut columns,
                &format!("{target_col}{h}"),
                f64_array(target.column(h)),
            );
        }
    }
    batch_with_rows(columns, batch.num_rows())
}
