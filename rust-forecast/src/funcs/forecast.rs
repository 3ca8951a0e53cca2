use anyhow::{Context, Result, anyhow};
use arrow::record_batch::RecordBatch;
use forecast::{FittedModel, PredictOptions};
use rust_forecast_api::TableFunction;
use rust_forecast_api::arg::{Arg, Args};
use tracing::debug;

use super::lag_features::take_input;
use super::linear::LinearRegression;
use super::params::{SeriesParams, reject_positional, string_arg, usize_arg};

/// Fits a linear model on the lag features of the input and forecasts every series.
///
/// With `max_horizon` one model is trained per step, otherwise the model is applied recursively.
#[derive(Debug)]
pub struct Forecast {
    params: SeriesParams,
    horizon: usize,
    model_name: String,
    estimator: LinearRegression,
    ids: Option<Vec<String>>,
    data_buffer: Vec<RecordBatch>,
}

impl Forecast {
    pub fn new(params: Option<Args>, named_arguments: Vec<(String, Arg)>) -> Result<Self> {
        reject_positional(params)?;
        let mut series_params = SeriesParams::default();
        let mut horizon = 1;
        let mut model_name = "linear".to_string();
        let mut estimator = LinearRegression::default();
        let mut ids = None;

        for (name, arg) in named_arguments {
            match name.as_str() {
                "horizon" => {
                    horizon = usize_arg(&name, arg)?;
                    if horizon == 0 {
                        return Err(anyhow!("horizon must be a positive integer"));
                    }
                }
                "model_name" => model_name = string_arg(&name, arg)?,
                "l2" => {
                    estimator.l2 = match arg {
                        Arg::Float(f) if f >= 0.0 => f,
                        Arg::Int(i) if i >= 0 => i as f64,
                        Arg::String(s) => s.trim().parse().context("l2 must be a number")?,
                        _ => return Err(anyhow!("l2 must be a non-negative number")),
                    };
                }
                "ids" => {
                    let s = string_arg(&name, arg)?;
                    ids = Some(
                        s.split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(str::to_string)
                            .collect(),
                    );
                }
                _ => series_params.apply(&name, arg)?,
            }
        }
        if let Some(max_horizon) = series_params.fit.max_horizon {
            if horizon > max_horizon {
                return Err(anyhow!(
                    "horizon ({}) must not exceed max_horizon ({})",
                    horizon,
                    max_horizon
                ));
            }
        }
        series_params.time_series()?;

        Ok(Forecast {
            params: series_params,
            horizon,
            model_name,
            estimator,
            ids,
            data_buffer: Vec::new(),
        })
    }
}

impl TableFunction for Forecast {
    fn process(&mut self, input: RecordBatch) -> Result<Option<RecordBatch>> {
        if input.num_rows() > 0 {
            self.data_buffer.push(input);
        }
        Ok(None)
    }

    fn finalize(&mut self) -> Result<Option<RecordBatch>> {
        let Some(df) = take_input(&mut self.data_buffer)? else {
            return Ok(None);
        };
        let mut ts = self.params.time_series()?;
        let (x, y) = ts
            .fit_transform_xy(&df, &self.params.fit)
            .context("Failed to compute training features")?;
        let model = FittedModel::fit(&self.model_name, &self.estimator, &x, &y)
            .context("Failed to fit model")?;
        debug!(
            rows = x.num_rows(),
            features = x.num_columns(),
            direct = model.is_direct(),
            "fitted model"
        );

        let mut options = PredictOptions::new(self.horizon);
        options.ids = self.ids.clone();
        let out = ts
            .predict(&[(self.model_name.clone(), model)], &options)
            .context("Failed to forecast")?;
        Ok(Some(out))
    }
}
