//! The forecast loop.
//!
//! Every model gets its own simulation: the ground truth series are copied, restricted to the
//! requested ids and truncated to `keep_last_n`, then features are recomputed from the copy after
//! each appended prediction. The ground truth itself is never touched.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::cast;
use derive_builder::Builder;
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::frequency::{time_array, time_values};
use crate::grouped_array::{GroupSlice, GroupedArray};
use crate::model::{FittedModel, Model};
use crate::series::{FittedState, TimeSeries, Warning};
use crate::table::{
    batch_from_columns, batch_with_rows, column, f64_array, has_column, has_missing,
    series_keys, take_array, take_batch,
};

/// Receives the feature table of a step and returns the one given to the model.
pub type BeforePredictFn = Arc<dyn Fn(RecordBatch) -> anyhow::Result<RecordBatch> + Send + Sync>;

/// Receives the ids of the forecasted series and their predictions for one step.
pub type AfterPredictFn = Arc<dyn Fn(&[String], Vec<f64>) -> anyhow::Result<Vec<f64>> + Send + Sync>;

#[derive(Clone, Builder)]
#[builder(pattern = "owned")]
pub struct PredictOptions {
    pub horizon: usize,
    /// Forecast only these series.
    #[builder(default, setter(strip_option))]
    pub ids: Option<Vec<String>>,
    /// Future values of the dynamic features, one row per id and step.
    #[builder(default, setter(strip_option))]
    pub x_df: Option<RecordBatch>,
    #[builder(default, setter(strip_option))]
    pub before_predict: Option<BeforePredictFn>,
    /// Only used by recursive models.
    #[builder(default, setter(strip_option))]
    pub after_predict: Option<AfterPredictFn>,
}

impl PredictOptions {
    pub fn new(horizon: usize) -> Self {
        PredictOptions {
            horizon,
            ids: None,
            x_df: None,
            before_predict: None,
            after_predict: None,
        }
    }

    pub fn builder() -> PredictOptionsBuilder {
        PredictOptionsBuilder::default()
    }
}

/// The series a predict call works on.
struct Selection {
    idxs: Vec<usize>,
    keys: Vec<String>,
    uids: ArrayRef,
    statics: RecordBatch,
    /// `dates[step][series]`
    dates: Vec<Vec<i64>>,
}

impl Selection {
    fn new(state: &FittedState, ids: Option<&[String]>, horizon: usize) -> Result<Self> {
        let idxs: Vec<usize> = match ids {
            Some(ids) => {
                let positions: HashMap<&str, usize> = state
                    .uid_keys
                    .iter()
                    .enumerate()
                    .map(|(i, key)| (key.as_str(), i))
                    .collect();
                let mut unseen: Vec<String> = ids
                    .iter()
                    .filter(|id| !positions.contains_key(id.as_str()))
                    .cloned()
                    .collect();
                if !unseen.is_empty() {
                    unseen.sort();
                    unseen.dedup();
                    return Err(ForecastError::UnseenIds(unseen));
                }
                let mut idxs: Vec<usize> = ids.iter().map(|id| positions[id.as_str()]).collect();
                idxs.sort_unstable();
                idxs.dedup();
                idxs
            }
            None => (0..state.uid_keys.len()).collect(),
        };
        let mut dates = Vec::with_capacity(horizon);
        for step in 1..=horizon {
            let step_dates = idxs
                .iter()
                .map(|&i| {
                    state
                        .freq
                        .advance(state.last_dates[i], step as i64, &state.time_kind)
                        .map_err(|e| ForecastError::InvalidParameter {
                            name: "freq".to_string(),
                            value: state.freq.to_string(),
                            reason: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            dates.push(step_dates);
        }
        Ok(Selection {
            keys: idxs.iter().map(|&i| state.uid_keys[i].clone()).collect(),
            uids: take_array(&state.uids, &idxs)?,
            statics: take_batch(&state.static_features, &idxs)?,
            dates,
            idxs,
        })
    }

    fn len(&self) -> usize {
        self.idxs.len()
    }
}

/// Rows of `X_df` matched to every (step, series) pair.
struct ExogenousRows {
    frame: RecordBatch,
    /// `rows[step * n_series + series]`
    rows: Vec<usize>,
    n_series: usize,
}

impl ExogenousRows {
    fn new(state: &FittedState, selection: &Selection, x_df: &RecordBatch) -> Result<Self> {
        let (id_col, time_col) = (&state.id_col, &state.time_col);
        if !has_column(x_df, id_col) || !has_column(x_df, time_col) {
            return Err(ForecastError::ExogenousColumns(format!(
                "X_df must have '{id_col}' and '{time_col}' columns"
            )));
        }
        let dynamic: Vec<String> = x_df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|n| n != id_col && n != time_col)
            .collect();
        if dynamic.is_empty() {
            return Err(ForecastError::ExogenousColumns(
                "Found no exogenous features in X_df".to_string(),
            ));
        }
        let statics = state.static_columns();
        let common: Vec<String> = dynamic
            .iter()
            .filter(|c| statics.contains(*c))
            .cloned()
            .collect();
        if !common.is_empty() {
            return Err(ForecastError::StaticDynamicConflict(common));
        }

        let keys = series_keys(column(x_df, id_col)?)?;
        let times = cast(column(x_df, time_col)?, &state.time_kind.data_type())?;
        let times = time_values(&times, time_col)?;
        let positions: HashMap<&str, usize> = selection
            .keys
            .iter()
            .enumerate()
            .map(|(s, key)| (key.as_str(), s))
            .collect();
        let mut wanted: HashMap<(usize, i64), usize> = HashMap::new();
        for (step, step_dates) in selection.dates.iter().enumerate() {
            for (s, &date) in step_dates.iter().enumerate() {
                wanted.insert((s, date), step * selection.len() + s);
            }
        }

        let expected = selection.len() * selection.dates.len();
        let mut rows: Vec<Option<usize>> = vec![None; expected];
        let mut actual = 0;
        for (row, (key, time)) in keys.iter().zip(times).enumerate() {
            let Some(&s) = positions.get(key.as_str()) else {
                continue;
            };
            if let Some(&slot) = wanted.get(&(s, time)) {
                actual += 1;
                rows[slot] = Some(row);
            }
        }
        let rows: Option<Vec<usize>> = rows.into_iter().collect();
        match rows {
            Some(rows) if actual == expected => Ok(ExogenousRows {
                frame: x_df.clone(),
                rows,
                n_series: selection.len(),
            }),
            _ => Err(ForecastError::MissingExogenousRows { expected, actual }),
        }
    }

    fn column(&self, name: &str, step: usize) -> Result<Option<ArrayRef>> {
        let Some(values) = self.frame.column_by_name(name) else {
            return Ok(None);
        };
        let rows = &self.rows[step * self.n_series..(step + 1) * self.n_series];
        Ok(Some(take_array(values, rows)?))
    }
}

/// One model's pass over the horizon.
struct Simulation<'a> {
    ts: &'a TimeSeries,
    state: &'a FittedState,
    selection: &'a Selection,
    exog: Option<&'a ExogenousRows>,
    ga: GroupedArray,
    y_pred: Vec<Vec<f64>>,
    warnings: Vec<Warning>,
}

impl<'a> Simulation<'a> {
    fn setup(
        ts: &'a TimeSeries,
        state: &'a FittedState,
        selection: &'a Selection,
        exog: Option<&'a ExogenousRows>,
    ) -> Result<Self> {
        let mut ga = if selection.len() == state.ga.n_groups() {
            state.ga.clone()
        } else {
            state.ga.take(&selection.idxs)?
        };
        if let Some(n) = state.keep_last_n {
            ga = ga.take_from_groups(GroupSlice::Last(n));
        }
        Ok(Simulation {
            ts,
            state,
            selection,
            exog,
            ga,
            y_pred: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Feature table for `step`, in the fitted feature order.
    fn features(&mut self, model: &str, step: usize) -> Result<RecordBatch> {
        let updates = self.ts.engine.compute(&self.ga, true)?;
        let dates = &self.selection.dates[step];
        let mut columns = Vec::with_capacity(self.state.features_order.len());
        for name in &self.state.features_order {
            let array = if let Some(values) = updates.get(name) {
                f64_array(values.to_vec())
            } else if let Some(feature) = self.ts.date_features.iter().find(|f| f.name() == name)
            {
                feature.compute(dates, &self.state.time_kind)?
            } else if let Some(values) = self.selection.statics.column_by_name(name) {
                values.clone()
            } else if let Some(values) = self.exog.map(|e| e.column(name, step)).transpose()?.flatten() {
                values
            } else {
                return Err(ForecastError::ExogenousColumns(format!(
                    "no values for dynamic feature {name}"
                )));
            };
            columns.push((name.clone(), array));
        }
        let x = batch_with_rows(columns, self.selection.len())?;

        let nulls: Vec<String> = x
            .schema()
            .fields()
            .iter()
            .zip(x.columns())
            .filter(|(_, array)| has_missing(array))
            .map(|(field, _)| field.name().clone())
            .collect();
        if !nulls.is_empty() {
            warn!(model, step, columns = ?nulls, "Found null values in features");
            self.warnings.push(Warning::NullFeatures {
                model: model.to_string(),
                step,
                columns: nulls,
            });
        }
        Ok(x)
    }

    fn check_len(&self, preds: &[f64]) -> Result<()> {
        if preds.len() != self.selection.len() {
            return Err(ForecastError::ShapeError {
                expected: self.selection.len(),
                actual: preds.len(),
            });
        }
        Ok(())
    }

    fn before_predict(&self, name: &str, x: RecordBatch, options: &PredictOptions) -> Result<RecordBatch> {
        match &options.before_predict {
            Some(hook) => hook(x).map_err(|e| ForecastError::model(name, e.context("before_predict callback"))),
            None => Ok(x),
        }
    }

    fn run_recursive(mut self, name: &str, model: &dyn Model, options: &PredictOptions) -> Result<Self> {
        for step in 0..options.horizon {
            let x = self.features(name, step)?;
            let x = self.before_predict(name, x, options)?;
            let mut preds = model
                .predict(&x)
                .map_err(|e| ForecastError::model(name, e))?;
            self.check_len(&preds)?;
            if let Some(hook) = &options.after_predict {
                preds = hook(&self.selection.keys, preds).map_err(|e| {
                    ForecastError::model(name, e.context("after_predict callback"))
                })?;
                self.check_len(&preds)?;
            }
            self.ga = self.ga.append(&preds)?;
            self.y_pred.push(preds);
        }
        Ok(self)
    }

    fn run_direct(
        mut self,
        name: &str,
        models: &[Box<dyn Model>],
        options: &PredictOptions,
    ) -> Result<Self> {
        let x = self.features(name, 0)?;
        let x = self.before_predict(name, x, options)?;
        for (h, model) in models.iter().take(options.horizon).enumerate() {
            let preds = model
                .predict(&x)
                .map_err(|e| ForecastError::model(format!("{name}[{h}]"), e))?;
            self.check_len(&preds)?;
            self.y_pred.push(preds);
        }
        Ok(self)
    }

    /// Predictions in series then step order.
    fn series_major(&self) -> Vec<f64> {
        let horizon = self.y_pred.len();
        let mut out = Vec::with_capacity(horizon * self.selection.len());
        for s in 0..self.selection.len() {
            out.extend(self.y_pred.iter().map(|step| step[s]));
        }
        out
    }
}

impl TimeSeries {
    /// Forecast the next `horizon` steps of every series with each model.
    ///
    /// The result has the id and time columns followed by one column per model, with the rows of
    /// every series together and in step order. Target transforms are inverted in reverse order.
    pub fn predict(
        &mut self,
        models: &[(String, FittedModel)],
        options: &PredictOptions,
    ) -> Result<RecordBatch> {
        let state = self.fitted()?;
        let horizon = options.horizon;
        if horizon == 0 {
            return Err(ForecastError::InvalidParameter {
                name: "horizon".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let selection = Selection::new(state, options.ids.as_deref(), horizon)?;
        let exog = options
            .x_df
            .as_ref()
            .map(|x_df| ExogenousRows::new(state, &selection, x_df))
            .transpose()?;
        let features = self.features();
        let statics = state.static_columns();
        let missing: Vec<&String> = state
            .features_order
            .iter()
            .filter(|name| {
                !features.contains(*name)
                    && !statics.contains(*name)
                    && **name != state.id_col
                    && !exog.as_ref().is_some_and(|e| has_column(&e.frame, name))
            })
            .collect();
        if !missing.is_empty() {
            return Err(ForecastError::ExogenousColumns(format!(
                "X_df must provide the dynamic features {missing:?}"
            )));
        }

        let mut columns: Vec<(String, ArrayRef)> = Vec::with_capacity(models.len() + 2);
        let repeated: Vec<usize> = (0..selection.len())
            .flat_map(|s| std::iter::repeat_n(s, horizon))
            .collect();
        columns.push((state.id_col.clone(), take_array(&selection.uids, &repeated)?));
        let times: Vec<i64> = (0..selection.len())
            .flat_map(|s| selection.dates.iter().map(move |step| step[s]))
            .collect();
        columns.push((state.time_col.clone(), time_array(times, &state.time_kind)?));

        let mut warnings = Vec::new();
        for (name, model) in models {
            let sim = Simulation::setup(self, state, &selection, exog.as_ref())?;
            let sim = match (model, state.max_horizon) {
                (FittedModel::Recursive(model), None) => {
                    sim.run_recursive(name, model.as_ref(), options)?
                }
                (FittedModel::Direct(models), Some(max_horizon)) => {
                    let max = max_horizon.min(models.len());
                    if horizon > max {
                        return Err(ForecastError::HorizonTooLarge { horizon, max });
                    }
                    sim.run_direct(name, models, options)?
                }
                (FittedModel::Recursive(_), Some(_)) => {
                    return Err(ForecastError::ModelKindMismatch {
                        model: name.clone(),
                        reason: "series were fitted with max_horizon, expected one model per step"
                            .to_string(),
                    });
                }
                (FittedModel::Direct(_), None) => {
                    return Err(ForecastError::ModelKindMismatch {
                        model: name.clone(),
                        reason: "series were fitted without max_horizon, expected a recursive model"
                            .to_string(),
                    });
                }
            };
            debug!(model = %name, horizon, series = selection.len(), "forecast done");
            columns.push((name.clone(), f64_array(sim.series_major())));
            warnings.extend(sim.warnings);
        }

        let mut out = batch_from_columns(columns)?;
        for tfm in self.target_transforms.iter().rev() {
            out = tfm
                .inverse_transform(&out)
                .map_err(|source| ForecastError::TargetTransformFailure {
                    transform: tfm.name().to_string(),
                    source,
                })?;
        }
        for warning in warnings {
            self.record(warning);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Estimator;
    use crate::series::tests::{lag1_series, two_series};
    use crate::series::{FitOptions, TimeSeriesConfig};
    use crate::date_features::DateFeature;
    use crate::frequency::{DateOffset, Frequency, TimeKind};
    use crate::table::f64_values;
    use crate::target_transforms::{Differences, LocalStandardScaler};
    use arrow::array::{AsArray, Int64Array, StringArray, TimestampSecondArray};
    use arrow::datatypes::{Int64Type, TimestampSecondType};
    use std::sync::Mutex;

    fn zero() -> FittedModel {
        FittedModel::recursive(|x: &RecordBatch| Ok(vec![0.0; x.num_rows()]))
    }

    /// Returns lag1 + 1.
    fn next_value() -> FittedModel {
        FittedModel::recursive(|x: &RecordBatch| {
            Ok(f64_values(column(x, "lag1")?)?.iter().map(|v| v + 1.0).collect())
        })
    }

    fn fitted() -> TimeSeries {
        let mut ts = lag1_series();
        ts.fit_transform(&two_series(), &FitOptions::default())
            .expect("fit");
        ts
    }

    fn ids(batch: &RecordBatch) -> Vec<String> {
        series_keys(batch.column(0)).expect("ids")
    }

    fn times(batch: &RecordBatch) -> Vec<i64> {
        batch.column(1).as_primitive::<Int64Type>().values().to_vec()
    }

    #[test]
    fn test_constant_model_two_steps() -> anyhow::Result<()> {
        let mut ts = fitted();
        let before = ts.ground_truth().cloned();
        let out = ts.predict(&[("zero".to_string(), zero())], &PredictOptions::new(2))?;
        assert_eq!(out.num_rows(), 4);
        assert_eq!(ids(&out), vec!["A", "A", "B", "B"]);
        assert_eq!(times(&out), vec![5, 6, 4, 5]);
        assert_eq!(f64_values(column(&out, "zero")?)?, vec![0.0; 4]);
        assert_eq!(ts.ground_truth().cloned(), before);
        Ok(())
    }

    #[test]
    fn test_recursive_feeds_predictions_back() -> anyhow::Result<()> {
        let mut ts = fitted();
        let models = vec![
            ("next".to_string(), next_value()),
            ("zero".to_string(), zero()),
        ];
        let out = ts.predict(&models, &PredictOptions::new(3))?;
        assert_eq!(f64_values(column(&out, "next")?)?, vec![5.0, 6.0, 7.0, 31.0, 32.0, 33.0]);
        assert_eq!(f64_values(column(&out, "zero")?)?, vec![0.0; 6]);
        Ok(())
    }

    #[test]
    fn test_simulation_appends_horizon_values() -> anyhow::Result<()> {
        let ts = fitted();
        let state = ts.fitted()?;
        let selection = Selection::new(state, None, 3)?;
        let sim = Simulation::setup(&ts, state, &selection, None)?;
        let FittedModel::Recursive(model) = next_value() else {
            unreachable!()
        };
        let sim = sim.run_recursive("next", model.as_ref(), &PredictOptions::new(3))?;
        assert_eq!(sim.ga.sizes(), vec![7, 6]);
        assert_eq!(&sim.ga.slice(1)[3..], &[31.0, 32.0, 33.0]);
        assert_eq!(state.ga.sizes(), vec![4, 3]);
        Ok(())
    }

    #[test]
    fn test_ids_subset_and_unseen() -> anyhow::Result<()> {
        let mut ts = fitted();
        let options = PredictOptions::builder()
            .horizon(1)
            .ids(vec!["B".to_string()])
            .build()?;
        let out = ts.predict(&[("next".to_string(), next_value())], &options)?;
        assert_eq!(ids(&out), vec!["B"]);
        assert_eq!(f64_values(column(&out, "next")?)?, vec![31.0]);

        // requested order and repeats do not change the series order
        let options = PredictOptions::builder()
            .horizon(1)
            .ids(vec!["B".to_string(), "A".to_string(), "B".to_string()])
            .build()?;
        let out = ts.predict(&[("next".to_string(), next_value())], &options)?;
        assert_eq!(ids(&out), vec!["A", "B"]);
        assert_eq!(f64_values(column(&out, "next")?)?, vec![5.0, 31.0]);

        let options = PredictOptions::builder()
            .horizon(1)
            .ids(vec!["C".to_string(), "A".to_string()])
            .build()?;
        assert!(matches!(
            ts.predict(&[("next".to_string(), next_value())], &options),
            Err(ForecastError::UnseenIds(ids)) if ids == vec!["C".to_string()]
        ));
        Ok(())
    }

    #[test]
    fn test_keep_last_n() -> anyhow::Result<()> {
        let config = TimeSeriesConfig::builder().lag(1).lag(3).build()?;
        let mut ts = TimeSeries::new(config)?;
        let options = FitOptions::builder().keep_last_n(2usize).build()?;
        ts.fit_transform(&two_series(), &options)?;
        let out = ts.predict(&[("zero".to_string(), zero())], &PredictOptions::new(1))?;
        assert_eq!(out.num_rows(), 2);
        // lag3 is undefined with two observations left
        assert!(matches!(
            ts.warnings(),
            [Warning::NullFeatures { columns, .. }] if columns == &["lag3".to_string()]
        ));
        Ok(())
    }

    #[test]
    fn test_callbacks() -> anyhow::Result<()> {
        let mut ts = fitted();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let options = PredictOptions::builder()
            .horizon(2)
            .before_predict(Arc::new(move |x: RecordBatch| -> anyhow::Result<RecordBatch> {
                recorder
                    .lock()
                    .map_err(|_| anyhow::anyhow!("poisoned"))?
                    .push(x.num_rows());
                Ok(x)
            }) as BeforePredictFn)
            .after_predict(Arc::new(|_: &[String], preds: Vec<f64>| -> anyhow::Result<Vec<f64>> {
                Ok(preds.into_iter().map(|p| p * 2.0).collect())
            }) as AfterPredictFn)
            .build()?;
        let out = ts.predict(&[("next".to_string(), next_value())], &options)?;
        // A: (4 + 1) * 2 = 10, then (10 + 1) * 2 = 22
        assert_eq!(f64_values(column(&out, "next")?)?, vec![10.0, 22.0, 62.0, 126.0]);
        assert_eq!(*seen.lock().expect("lock"), vec![2, 2]);
        Ok(())
    }

    #[test]
    fn test_model_failure_is_named() {
        let mut ts = fitted();
        let failing = FittedModel::recursive(|_: &RecordBatch| anyhow::bail!("no weights"));
        match ts.predict(&[("broken".to_string(), failing)], &PredictOptions::new(1)) {
            Err(ForecastError::ModelFailure { model, .. }) => assert_eq!(model, "broken"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_not_fitted() {
        let mut ts = lag1_series();
        assert!(matches!(
            ts.predict(&[("zero".to_string(), zero())], &PredictOptions::new(1)),
            Err(ForecastError::NotFitted)
        ));
    }

    struct LastLag;

    impl Estimator for LastLag {
        fn fit(&self, _x: &RecordBatch, y: &[f64]) -> anyhow::Result<Box<dyn Model>> {
            let last = y.last().copied().unwrap_or_default();
            Ok(Box::new(move |x: &RecordBatch| -> anyhow::Result<Vec<f64>> {
                Ok(vec![last; x.num_rows()])
            }))
        }
    }

    #[test]
    fn test_direct_models() -> anyhow::Result<()> {
        let mut ts = lag1_series();
        let options = FitOptions::builder().max_horizon(2usize).build()?;
        let (x, y) = ts.fit_transform_xy(&two_series(), &options)?;
        let model = FittedModel::fit("last", &LastLag, &x, &y)?;
        assert!(model.is_direct());
        let models = vec![("last".to_string(), model)];
        let out = ts.predict(&models, &PredictOptions::new(2))?;
        assert_eq!(out.num_rows(), 4);
        assert_eq!(times(&out), vec![5, 6, 4, 5]);

        assert!(matches!(
            ts.predict(&models, &PredictOptions::new(3)),
            Err(ForecastError::HorizonTooLarge { horizon: 3, max: 2 })
        ));
        assert!(matches!(
            ts.predict(&[("zero".to_string(), zero())], &PredictOptions::new(1)),
            Err(ForecastError::ModelKindMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_direct_single_horizon() -> anyhow::Result<()> {
        let mut ts = lag1_series();
        let options = FitOptions::builder().max_horizon(1usize).build()?;
        let (x, y) = ts.fit_transform_xy(&two_series(), &options)?;
        assert!(y.is_direct());
        let model = FittedModel::fit("last", &LastLag, &x, &y)?;
        assert!(model.is_direct());
        let out = ts.predict(&[("last".to_string(), model)], &PredictOptions::new(1))?;
        assert_eq!(ids(&out), vec!["A", "B"]);
        assert_eq!(times(&out), vec![5, 4]);

        let mut ts = lag1_series();
        let out = ts.fit_transform(&two_series(), &options)?;
        assert!(out.column_by_name("y0").is_some());
        assert!(out.column_by_name("y").is_none());
        Ok(())
    }

    #[derive(Debug)]
    struct EveryOtherDay;

    impl DateOffset for EveryOtherDay {
        fn advance(&self, value: i64, n: i64, _kind: &TimeKind) -> anyhow::Result<i64> {
            Ok(value + 2 * 86_400 * n)
        }
    }

    #[test]
    fn test_custom_frequency() -> anyhow::Result<()> {
        let day = 86_400;
        let df = batch_from_columns(vec![
            (
                "unique_id".to_string(),
                Arc::new(StringArray::from(vec!["A", "A", "A"])) as ArrayRef,
            ),
            (
                "ds".to_string(),
                Arc::new(TimestampSecondArray::from(vec![0, 2 * day, 4 * day])) as ArrayRef,
            ),
            ("y".to_string(), f64_array(vec![1.0, 2.0, 3.0])),
        ])?;
        let config = TimeSeriesConfig::builder()
            .freq(Frequency::Custom(Arc::new(EveryOtherDay)))
            .lag(1)
            .build()?;
        let mut ts = TimeSeries::new(config)?;
        let out = ts.fit_transform(&df, &FitOptions::default())?;
        assert_eq!(f64_values(column(&out, "lag1")?)?, vec![1.0, 2.0]);
        assert!(ts.warnings().is_empty());

        let out = ts.predict(&[("next".to_string(), next_value())], &PredictOptions::new(2))?;
        assert_eq!(
            out.column(1).as_primitive::<TimestampSecondType>().values().to_vec(),
            vec![6 * day, 8 * day]
        );
        assert_eq!(f64_values(column(&out, "next")?)?, vec![4.0, 5.0]);
        Ok(())
    }

    fn with_price(df: &RecordBatch) -> RecordBatch {
        let mut columns: Vec<(String, ArrayRef)> = ["unique_id", "ds", "y"]
            .iter()
            .map(|name| (name.to_string(), column(df, name).expect("column").clone()))
            .collect();
        columns.push(("price".to_string(), f64_array(vec![1.0; df.num_rows()])));
        batch_from_columns(columns).expect("valid frame")
    }

    fn future_prices(rows: Vec<(&str, i64, f64)>) -> RecordBatch {
        batch_from_columns(vec![
            (
                "unique_id".to_string(),
                Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>()))
                    as ArrayRef,
            ),
            (
                "ds".to_string(),
                Arc::new(Int64Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>()))
                    as ArrayRef,
            ),
            (
                "price".to_string(),
                f64_array(rows.iter().map(|r| r.2).collect()),
            ),
        ])
        .expect("valid frame")
    }

    fn price_model() -> FittedModel {
        FittedModel::recursive(|x: &RecordBatch| f64_values(column(x, "price")?).map_err(Into::into))
    }

    #[test]
    fn test_exogenous_features() -> anyhow::Result<()> {
        let mut ts = lag1_series();
        let options = FitOptions::builder()
            .static_features(Vec::new())
            .build()?;
        ts.fit_transform(&with_price(&two_series()), &options)?;
        assert_eq!(ts.features_order(), &["price".to_string(), "lag1".to_string()]);

        // rows out of order and one row outside the horizon
        let x_df = future_prices(vec![
            ("B", 5, 50.0),
            ("A", 6, 6.0),
            ("A", 5, 5.0),
            ("B", 4, 40.0),
            ("A", 9, 9.0),
        ]);
        let predict = PredictOptions::builder().horizon(2).x_df(x_df).build()?;
        let out = ts.predict(&[("price".to_string(), price_model())], &predict)?;
        assert_eq!(f64_values(column(&out, "price")?)?, vec![5.0, 6.0, 40.0, 50.0]);

        assert!(matches!(
            ts.predict(&[("price".to_string(), price_model())], &PredictOptions::new(1)),
            Err(ForecastError::ExogenousColumns(_))
        ));
        Ok(())
    }

    #[test]
    fn test_exogenous_validation() -> anyhow::Result<()> {
        let mut ts = lag1_series();
        ts.fit_transform(&with_price(&two_series()), &FitOptions::default())?;

        let conflict = future_prices(vec![("A", 5, 1.0), ("B", 4, 1.0)]);
        let predict = PredictOptions::builder().horizon(1).x_df(conflict).build()?;
        assert!(matches!(
            ts.predict(&[("zero".to_string(), zero())], &predict),
            Err(ForecastError::StaticDynamicConflict(cols)) if cols == vec!["price".to_string()]
        ));

        let mut ts = lag1_series();
        let options = FitOptions::builder().static_features(Vec::new()).build()?;
        ts.fit_transform(&with_price(&two_series()), &options)?;
        let incomplete = future_prices(vec![("A", 5, 1.0), ("B", 4, 1.0), ("A", 6, 1.0)]);
        let predict = PredictOptions::builder().horizon(2).x_df(incomplete).build()?;
        assert!(matches!(
            ts.predict(&[("zero".to_string(), zero())], &predict),
            Err(ForecastError::MissingExogenousRows { expected: 4, actual: 3 })
        ));

        let no_time = batch_from_columns(vec![(
            "unique_id".to_string(),
            Arc::new(StringArray::from(vec!["A"])) as ArrayRef,
        )])?;
        let predict = PredictOptions::builder().horizon(1).x_df(no_time).build()?;
        assert!(matches!(
            ts.predict(&[("zero".to_string(), zero())], &predict),
            Err(ForecastError::ExogenousColumns(_))
        ));
        Ok(())
    }

    #[test]
    fn test_target_transforms_inverted() -> anyhow::Result<()> {
        let config = TimeSeriesConfig::builder()
            .lag(1)
            .target_transform(Differences::new(vec![1]))
            .target_transform(LocalStandardScaler::new())
            .build()?;
        let mut ts = TimeSeries::new(config)?;
        ts.fit_transform(&two_series(), &FitOptions::default())?;
        let out = ts.predict(&[("zero".to_string(), zero())], &PredictOptions::new(2))?;
        // zero on the scaled differences is the mean difference, added to the last value
        assert_eq!(f64_values(column(&out, "zero")?)?, vec![5.0, 6.0, 40.0, 50.0]);
        Ok(())
    }

    #[test]
    fn test_timestamp_dates_and_date_features() -> anyhow::Result<()> {
        let day = 86_400;
        let df = batch_from_columns(vec![
            (
                "unique_id".to_string(),
                Arc::new(StringArray::from(vec!["A", "A", "A"])) as ArrayRef,
            ),
            (
                "ds".to_string(),
                Arc::new(TimestampSecondArray::from(vec![0, day, 2 * day])) as ArrayRef,
            ),
            ("y".to_string(), f64_array(vec![1.0, 2.0, 3.0])),
        ])?;
        let config = TimeSeriesConfig::builder()
            .freq("D".parse()?)
            .lag(1)
            .date_feature(DateFeature::calendar("day")?)
            .build()?;
        let mut ts = TimeSeries::new(config)?;
        let out = ts.fit_transform(&df, &FitOptions::default())?;
        assert_eq!(out.num_rows(), 2);
        let model = FittedModel::recursive(|x: &RecordBatch| {
            let day = cast(column(x, "day")?, &arrow::datatypes::DataType::Float64)?;
            f64_values(&day).map_err(Into::into)
        });
        let out = ts.predict(&[("day".to_string(), model)], &PredictOptions::new(2))?;
        assert_eq!(
            out.column(1).as_primitive::<TimestampSecondType>().values().to_vec(),
            vec![3 * day, 4 * day]
        );
        assert_eq!(f64_values(column(&out, "day")?)?, vec![4.0, 5.0]);
        Ok(())
    }
}
