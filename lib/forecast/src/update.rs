use std::collections::{HashMap, HashSet};

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::{cast, concat, interleave};
use tracing::debug;

use crate::error::{ForecastError, Result};
use crate::frequency::time_values;
use crate::series::TimeSeries;
use crate::table::{
    batch_from_columns, column, f64_values, group_ranges, has_missing, series_keys,
    sort_indices, take_array,
};

impl TimeSeries {
    /// Append newly observed rows to the stored series.
    ///
    /// Known ids are extended, unknown ids become new series after the existing ones, and the
    /// static features of every id with new rows are refreshed from its latest row. The stored
    /// state is only replaced once every step succeeded.
    pub fn update(&mut self, df: &RecordBatch) -> Result<()> {
        let state = self.fitted()?;
        let (id_col, time_col, target_col) = (&state.id_col, &state.time_col, &state.target_col);
        let ids = column(df, id_col)?;
        let time = column(df, time_col)?;
        let target = column(df, target_col)?;
        if has_missing(target) {
            return Err(ForecastError::NullTarget(target_col.clone()));
        }
        let static_cols = state.static_columns();
        for name in &static_cols {
            column(df, name)?;
        }
        let times = time_values(&cast(time, &state.time_kind.data_type())?, time_col)?;

        let sort_idxs = sort_indices(df, id_col, time_col)?;
        let sorted_ids = take_array(ids, &sort_idxs)?;
        let ranges = group_ranges(&series_keys(&sorted_ids)?);

        let mut target_frame = batch_from_columns(vec![
            (id_col.clone(), sorted_ids),
            (time_col.clone(), take_array(time, &sort_idxs)?),
            (target_col.clone(), take_array(target, &sort_idxs)?),
        ])?;
        let mut target_transforms = self.target_transforms.clone();
        for tfm in target_transforms.iter_mut() {
            target_frame = tfm.update(&target_frame).map_err(|source| {
                ForecastError::TargetTransformFailure {
                    transform: tfm.name().to_string(),
                    source,
                }
            })?;
        }
        let values = f64_values(column(&target_frame, target_col)?)?;

        let new_rows: HashMap<&str, &std::ops::Range<usize>> = ranges
            .iter()
            .map(|(key, range)| (key.as_str(), range))
            .collect();
        let known: HashSet<&str> = state.uid_keys.iter().map(String::as_str).collect();

        let n_total = state.uid_keys.len() + ranges.iter().filter(|(k, _)| !known.contains(k.as_str())).count();
        let mut sizes = Vec::with_capacity(n_total);
        let mut new_groups = Vec::with_capacity(n_total);
        let mut new_values = Vec::with_capacity(values.len());
        let mut last_dates = state.last_dates.clone();
        // (0, series) keeps the stored static row, (1, row) takes it from `df`
        let mut static_rows: Vec<(usize, usize)> = Vec::with_capacity(n_total);
        for (i, key) in state.uid_keys.iter().enumerate() {
            match new_rows.get(key.as_str()) {
                Some(range) => {
                    let last_row = sort_idxs[range.end - 1];
                    sizes.push(range.len());
                    new_values.extend_from_slice(&values[(*range).clone()]);
                    last_dates[i] = times[last_row];
                    static_rows.push((1, last_row));
                }
                None => {
                    sizes.push(0);
                    static_rows.push((0, i));
                }
            }
            new_groups.push(false);
        }
        let mut uid_keys = state.uid_keys.clone();
        let mut first_seen = Vec::new();
        for (key, range) in &ranges {
            if known.contains(key.as_str()) {
                continue;
            }
            let last_row = sort_idxs[range.end - 1];
            sizes.push(range.len());
            new_groups.push(true);
            new_values.extend_from_slice(&values[range.clone()]);
            last_dates.push(times[last_row]);
            static_rows.push((1, last_row));
            uid_keys.push(key.clone());
            first_seen.push(last_row);
        }

        let ga = state.ga.append_several(&sizes, &new_values, &new_groups)?;
        let added = cast(&take_array(ids, &first_seen)?, state.uids.data_type())?;
        let uids = concat(&[state.uids.as_ref(), added.as_ref()])?;

        let mut static_columns: Vec<(String, ArrayRef)> = vec![(id_col.clone(), uids.clone())];
        for name in static_cols {
            let stored = column(&state.static_features, &name)?;
            let incoming = cast(column(df, &name)?, stored.data_type())?;
            let merged = interleave(&[stored.as_ref(), incoming.as_ref()], &static_rows)?;
            static_columns.push((name, merged));
        }
        let static_features = batch_from_columns(static_columns)?;

        debug!(
            rows = df.num_rows(),
            new_series = first_seen.len(),
            series = uid_keys.len(),
            "updated series"
        );
        if let Some(state) = self.state.as_mut() {
            state.ga = ga;
            state.uids = uids;
            state.uid_keys = uid_keys;
            state.last_dates = last_dates;
            state.static_features = static_features;
        }
        self.target_transforms = target_transforms;
        Ok(())
    }
}
