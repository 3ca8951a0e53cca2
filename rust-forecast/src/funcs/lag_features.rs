use anyhow::{Context, Result};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use rust_forecast_api::TableFunction;
use rust_forecast_api::arg::{Arg, Args};
use tracing::debug;

use super::params::{SeriesParams, reject_positional};

/// Collects the input and emits it with the lag, lag transform and date features added.
#[derive(Debug)]
pub struct LagFeatures {
    params: SeriesParams,
    data_buffer: Vec<RecordBatch>,
}

impl LagFeatures {
    pub fn new(params: Option<Args>, named_arguments: Vec<(String, Arg)>) -> Result<Self> {
        reject_positional(params)?;
        let mut series_params = SeriesParams::default();
        for (name, arg) in named_arguments {
            series_params.apply(&name, arg)?;
        }
        // fail on bad configurations before any data arrives
        series_params.time_series()?;
        Ok(LagFeatures {
            params: series_params,
            data_buffer: Vec::new(),
        })
    }
}

/// Concatenate the buffered batches, `None` when nothing was received.
pub(crate) fn take_input(buffer: &mut Vec<RecordBatch>) -> Result<Option<RecordBatch>> {
    let batches = std::mem::take(buffer);
    let Some(first) = batches.first() else {
        return Ok(None);
    };
    let batch = concat_batches(&first.schema(), &batches).context("Failed to concat input")?;
    Ok(Some(batch))
}

impl TableFunction for LagFeatures {
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
        let out = ts
            .fit_transform(&df, &self.params.fit)
            .context("Failed to compute lag features")?;
        debug!(rows_in = df.num_rows(), rows_out = out.num_rows(), "computed lag features");
        Ok(Some(out))
    }
}
