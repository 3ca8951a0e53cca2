use anyhow::{Context, Result, anyhow};
use arrow::array::{Array, AsArray, RecordBatch};
use arrow::compute::{CastOptions, cast_with_options};
use arrow::datatypes::{DataType, Float64Type};
use forecast::{Estimator, Model};

/// Feature columns of `x` as `f64`, nulls become NaN.
fn design_columns(x: &RecordBatch) -> Result<Vec<Vec<f64>>> {
    let schema = x.schema();
    schema
        .fields()
        .iter()
        .zip(x.columns())
        .map(|(field, array)| {
            let options = CastOptions {
                safe: false,
                ..Default::default()
            };
            let array = cast_with_options(array, &DataType::Float64, &options)
                .with_context(|| format!("Feature {} is not numeric", field.name()))?;
            let values = array.as_primitive::<Float64Type>();
            Ok((0..values.len())
                .map(|i| {
                    if values.is_valid(i) {
                        values.value(i)
                    } else {
                        f64::NAN
                    }
                })
                .collect())
        })
        .collect()
}

/// Solve `a * x = b` for a dense `n x n` system with Gauss-Jordan elimination and partial
/// pivoting. Columns with a vanishing pivot get a zero coefficient.
fn solve(mut a: Vec<f64>, mut b: Vec<f64>, n: usize) -> Vec<f64> {
    let mut singular = vec![false; n];
    for i in 0..n {
        let mut max_row = i;
        for k in (i + 1)..n {
            if a[k * n + i].abs() > a[max_row * n + i].abs() {
                max_row = k;
            }
        }
        if max_row != i {
            for j in 0..n {
                a.swap(i * n + j, max_row * n + j);
            }
            b.swap(i, max_row);
        }

        let pivot = a[i * n + i];
        if pivot.abs() < 1e-12 {
            singular[i] = true;
            continue;
        }
        for j in 0..n {
            a[i * n + j] /= pivot;
        }
        b[i] /= pivot;

        for k in 0..n {
            if k != i {
                let factor = a[k * n + i];
                if factor != 0.0 {
                    for j in 0..n {
                        a[k * n + j] -= factor * a[i * n + j];
                    }
                    b[k] -= factor * b[i];
                }
            }
        }
    }
    b.into_iter()
        .zip(singular)
        .map(|(v, s)| if s { 0.0 } else { v })
        .collect()
}

/// Ordinary least squares with an intercept and a small ridge penalty on the coefficients.
///
/// Rows with a missing feature or target are left out of the fit.
#[derive(Debug, Clone, Copy)]
pub struct LinearRegression {
    pub l2: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        LinearRegression { l2: 1e-8 }
    }
}

#[derive(Debug, Clone)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn predict_rows(&self, columns: &[Vec<f64>], num_rows: usize) -> Vec<f64> {
        (0..num_rows)
            .map(|i| {
                columns
                    .iter()
                    .zip(&self.coefficients)
                    .fold(self.intercept, |acc, (col, coef)| acc + coef * col[i])
            })
            .collect()
    }
}

impl Model for LinearModel {
    fn predict(&self, x: &RecordBatch) -> Result<Vec<f64>> {
        let columns = design_columns(x)?;
        if columns.len() != self.coefficients.len() {
            return Err(anyhow!(
                "Expected {} features, got {}",
                self.coefficients.len(),
                columns.len()
            ));
        }
        Ok(self.predict_rows(&columns, x.num_rows()))
    }
}

impl LinearRegression {
    pub fn fit_columns(&self, columns: &[Vec<f64>], y: &[f64]) -> Result<LinearModel> {
        let n_features = columns.len();
        let k = n_features + 1;
        let complete: Vec<usize> = (0..y.len())
            .filter(|&i| !y[i].is_nan() && columns.iter().all(|c| !c[i].is_nan()))
            .collect();
        if complete.is_empty() {
            return Err(anyhow!("No complete rows to fit a linear model"));
        }

        // the intercept is the last unknown
        let mut xtx = vec![0.0; k * k];
        let mut xty = vec![0.0; k];
        let mut row = vec![0.0; k];
        for &i in &complete {
            for (j, col) in columns.iter().enumerate() {
                row[j] = col[i];
            }
            row[n_features] = 1.0;
            for a in 0..k {
                xty[a] += row[a] * y[i];
                for b in 0..k {
                    xtx[a * k + b] += row[a] * row[b];
                }
            }
        }
        for j in 0..n_features {
            xtx[j * k + j] += self.l2 * complete.len() as f64;
        }

        let mut solution = solve(xtx, xty, k);
        let intercept = solution.pop().unwrap_or_default();
        Ok(LinearModel {
            intercept,
            coefficients: solution,
        })
    }
}

impl Estimator for LinearRegression {
    fn fit(&self, x: &RecordBatch, y: &[f64]) -> Result<Box<dyn Model>> {
        let columns = design_columns(x)?;
        Ok(Box::new(self.fit_columns(&columns, y)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-4, "{actual:?} vs {expected:?}");
        }
    }

    fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
        let fields: Vec<Field> = columns
            .iter()
            .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
            .collect();
        RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            columns.into_iter().map(|(_, a)| a).collect(),
        )
        .expect("valid batch")
    }

    #[test]
    fn test_recovers_linear_relation() -> Result<()> {
        let x = batch(vec![
            (
                "a",
                Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0, 5.0])) as ArrayRef,
            ),
            ("b", Arc::new(Int64Array::from(vec![0, 1, 0, 1, 1])) as ArrayRef),
        ]);
        let y = vec![5.0, 4.0, 9.0, 8.0, 10.0];
        // y = 2a - 3b + 3
        let model = LinearRegression::default().fit(&x, &y)?;
        assert_close(&model.predict(&x)?, &y);
        Ok(())
    }

    #[test]
    fn test_skips_incomplete_rows() -> Result<()> {
        let columns = vec![vec![1.0, f64::NAN, 2.0, 3.0]];
        let y = vec![2.0, 100.0, 4.0, f64::NAN];
        let model = LinearRegression { l2: 0.0 }.fit_columns(&columns, &y)?;
        assert!((model.coefficients[0] - 2.0).abs() < 1e-9);
        assert!(model.intercept.abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_constant_feature_is_ignored() -> Result<()> {
        let columns = vec![vec![1.0, 1.0, 1.0]];
        let model = LinearRegression { l2: 0.0 }.fit_columns(&columns, &[3.0, 4.0, 5.0])?;
        assert_close(&model.predict_rows(&columns, 3), &[4.0, 4.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_errors() {
        let text = batch(vec![(
            "store",
            Arc::new(StringArray::from(vec!["north", "south"])) as ArrayRef,
        )]);
        assert!(LinearRegression::default().fit(&text, &[1.0, 2.0]).is_err());
        let empty = LinearRegression::default().fit_columns(&[vec![f64::NAN]], &[1.0]);
        assert!(empty.is_err());
    }
}
