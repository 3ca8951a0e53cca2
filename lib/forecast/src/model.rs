//! Model capability used by the forecast loop.
//!
//! Training happens outside of this crate, an [`Estimator`] only has to turn a feature table and a
//! target into something that can [`Model::predict`].

use std::fmt;

use arrow::array::{BooleanArray, RecordBatch};
use arrow::compute::filter_record_batch;

use crate::assembler::TargetBuffer;
use crate::error::{ForecastError, Result};

pub trait Model: Send + Sync {
    /// One prediction per row of `x`.
    fn predict(&self, x: &RecordBatch) -> anyhow::Result<Vec<f64>>;
}

impl<F> Model for F
where
    F: Fn(&RecordBatch) -> anyhow::Result<Vec<f64>> + Send + Sync,
{
    fn predict(&self, x: &RecordBatch) -> anyhow::Result<Vec<f64>> {
        self(x)
    }
}

pub trait Estimator {
    fn fit(&self, x: &RecordBatch, y: &[f64]) -> anyhow::Result<Box<dyn Model>>;
}

/// A recursive model predicts one step and is fed its own output, a direct one has a model per
/// horizon step.
pub enum FittedModel {
    Recursive(Box<dyn Model>),
    Direct(Vec<Box<dyn Model>>),
}

impl fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FittedModel::Recursive(_) => write!(f, "Recursive"),
            FittedModel::Direct(models) => write!(f, "Direct({})", models.len()),
        }
    }
}

impl FittedModel {
    /// Wrap a prediction function as a recursive model.
    pub fn recursive<F>(predict: F) -> Self
    where
        F: Fn(&RecordBatch) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
    {
        FittedModel::Recursive(Box::new(predict))
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, FittedModel::Direct(_))
    }

    /// Fit `estimator` on a training table, one model per target column in multi horizon mode.
    ///
    /// Rows whose target is missing for a given horizon are left out of that horizon's fit.
    pub fn fit(
        name: &str,
        estimator: &dyn Estimator,
        x: &RecordBatch,
        y: &TargetBuffer,
    ) -> Result<Self> {
        if y.n_rows() != x.num_rows() {
            return Err(ForecastError::ShapeError {
                expected: x.num_rows(),
                actual: y.n_rows(),
            });
        }
        if !y.is_direct() {
            let model = estimator
                .fit(x, y.values())
                .map_err(|e| ForecastError::model(name, e))?;
            return Ok(FittedModel::Recursive(model));
        }
        let mut models = Vec::with_capacity(y.width());
        for h in 0..y.width() {
            let target = y.column(h);
            let keep = BooleanArray::from(target.iter().map(|v| !v.is_nan()).collect::<Vec<_>>());
            let x_h = filter_record_batch(x, &keep)?;
            let y_h: Vec<f64> = target.into_iter().filter(|v| !v.is_nan()).collect();
            let model = estimator
                .fit(&x_h, &y_h)
                .map_err(|e| ForecastError::model(format!("{name}[{h}]"), e))?;
            models.push(model);
        }
        Ok(FittedModel::Direct(models))
    }
}
