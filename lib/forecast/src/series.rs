//! The [`TimeSeries`] entry point: fitting, feature computation and the state kept for forecasting.

use std::fmt;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use derive_builder::Builder;
use tracing::{debug, warn};

use crate::assembler::{self, TargetBuffer, TrainingInput};
use crate::date_features::DateFeature;
use crate::engine::{TransformEngine, sanitize_num_threads};
use crate::error::{ForecastError, Result};
use crate::frequency::{Frequency, TimeKind, time_values};
use crate::grouped_array::GroupedArray;
use crate::table::{
    batch_from_columns, column, f64_values, group_ranges, has_missing, select_columns,
    series_keys, sort_indices, take_array,
};
use crate::target_transforms::TargetTransform;
use crate::transforms::{SeriesTransform, TransformRegistry};

/// Feature configuration of a [`TimeSeries`].
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct TimeSeriesConfig {
    #[builder(default)]
    freq: Frequency,
    #[builder(default, setter(each(name = "lag")))]
    lags: Vec<usize>,
    #[builder(default, setter(custom))]
    lag_transforms: Vec<(usize, Arc<dyn SeriesTransform>)>,
    #[builder(default, setter(each(name = "date_feature")))]
    date_features: Vec<DateFeature>,
    #[builder(default = "1")]
    num_threads: usize,
    #[builder(default, setter(custom))]
    target_transforms: Vec<Box<dyn TargetTransform>>,
}

impl TimeSeriesConfig {
    pub fn builder() -> TimeSeriesConfigBuilder {
        TimeSeriesConfigBuilder::default()
    }
}

impl TimeSeriesConfigBuilder {
    /// Apply `transform` to the series lagged by `lag`.
    pub fn lag_transform(mut self, lag: usize, transform: Arc<dyn SeriesTransform>) -> Self {
        self.lag_transforms
            .get_or_insert_with(Vec::new)
            .push((lag, transform));
        self
    }

    pub fn target_transform(mut self, transform: impl TargetTransform + 'static) -> Self {
        self.target_transforms
            .get_or_insert_with(Vec::new)
            .push(Box::new(transform));
        self
    }
}

/// How the input table is read by [`TimeSeries::fit_transform`].
#[derive(Debug, Clone, Builder)]
pub struct FitOptions {
    #[builder(default = "\"unique_id\".to_string()", setter(into))]
    pub id_col: String,
    #[builder(default = "\"ds\".to_string()", setter(into))]
    pub time_col: String,
    #[builder(default = "\"y\".to_string()", setter(into))]
    pub target_col: String,
    /// Columns constant per series. Defaults to every column except time and target.
    #[builder(default, setter(strip_option))]
    pub static_features: Option<Vec<String>>,
    #[builder(default = "true")]
    pub dropna: bool,
    /// Observations kept per series when forecasting.
    #[builder(default, setter(strip_option))]
    pub keep_last_n: Option<usize>,
    /// Train one model per horizon step up to this horizon.
    #[builder(default, setter(strip_option))]
    pub max_horizon: Option<usize>,
}

impl FitOptions {
    pub fn builder() -> FitOptionsBuilder {
        FitOptionsBuilder::default()
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            id_col: "unique_id".to_string(),
            time_col: "ds".to_string(),
            target_col: "y".to_string(),
            static_features: None,
            dropna: true,
            keep_last_n: None,
            max_horizon: None,
        }
    }
}

/// Conditions that were handled without failing the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    NumThreadsCorrected { requested: usize },
    FrequencyReset { requested: String },
    NullFeatures {
        model: String,
        step: usize,
        columns: Vec<String>,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NumThreadsCorrected { requested } => {
                write!(f, "num_threads={requested} is invalid, using 1 thread")
            }
            Warning::FrequencyReset { requested } => {
                write!(f, "Setting freq=1 since time col is int (was {requested})")
            }
            Warning::NullFeatures {
                model,
                step,
                columns,
            } => write!(
                f,
                "Found null values in {} ({model}, step {step})",
                columns.join(", ")
            ),
        }
    }
}

/// Everything learned from the training table.
#[derive(Debug, Clone)]
pub(crate) struct FittedState {
    pub(crate) id_col: String,
    pub(crate) time_col: String,
    pub(crate) target_col: String,
    pub(crate) freq: Frequency,
    pub(crate) time_kind: TimeKind,
    /// Unique ids in the series order, with the id column's type.
    pub(crate) uids: ArrayRef,
    pub(crate) uid_keys: Vec<String>,
    pub(crate) last_dates: Vec<i64>,
    /// Ground truth series, on the transformed scale.
    pub(crate) ga: GroupedArray,
    /// The id column followed by the static columns, one row per series.
    pub(crate) static_features: RecordBatch,
    pub(crate) features_order: Vec<String>,
    pub(crate) keep_last_n: Option<usize>,
    pub(crate) max_horizon: Option<usize>,
}

impl FittedState {
    /// Static columns other than the id.
    pub(crate) fn static_columns(&self) -> Vec<String> {
        self.static_features
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|name| *name != self.id_col)
            .collect()
    }
}

struct Prepared {
    state: FittedState,
    target_transforms: Vec<Box<dyn TargetTransform>>,
    times: Vec<i64>,
    restore_idxs: Vec<usize>,
    /// Recorded once the fit is stored.
    frequency_reset: Option<Warning>,
}

/// Many series sharing one feature configuration.
pub struct TimeSeries {
    freq: Frequency,
    pub(crate) engine: TransformEngine,
    pub(crate) date_features: Vec<DateFeature>,
    pub(crate) target_transforms: Vec<Box<dyn TargetTransform>>,
    warnings: Vec<Warning>,
    pub(crate) state: Option<FittedState>,
}

impl fmt::Debug for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeSeries")
            .field("freq", &self.freq.to_string())
            .field("transforms", &self.engine)
            .field("date_features", &self.date_features)
            .field(
                "target_transforms",
                &self
                    .target_transforms
                    .iter()
                    .map(|t| t.name())
                    .collect::<Vec<_>>(),
            )
            .field("fitted", &self.state.is_some())
            .finish()
    }
}

impl TimeSeries {
    pub fn new(config: TimeSeriesConfig) -> Result<Self> {
        let mut warnings = Vec::new();
        let (num_threads, corrected) = sanitize_num_threads(config.num_threads);
        if corrected {
            warnings.push(Warning::NumThreadsCorrected {
                requested: config.num_threads,
            });
        }
        let registry = TransformRegistry::from_lags(&config.lags, config.lag_transforms)?;
        let engine = TransformEngine::new(registry, num_threads)?;
        Ok(TimeSeries {
            freq: config.freq,
            engine,
            date_features: config.date_features,
            target_transforms: config.target_transforms,
            warnings,
            state: None,
        })
    }

    pub fn freq(&self) -> &Frequency {
        self.state.as_ref().map_or(&self.freq, |s| &s.freq)
    }

    pub fn num_threads(&self) -> usize {
        self.engine.num_threads()
    }

    /// Names of the computed features: lag features then date features.
    pub fn features(&self) -> Vec<String> {
        self.engine
            .registry()
            .names()
            .map(str::to_string)
            .chain(self.date_features.iter().map(|f| f.name().to_string()))
            .collect()
    }

    /// Column order of the feature tables handed to models, empty before fitting.
    pub fn features_order(&self) -> &[String] {
        self.state.as_ref().map_or(&[], |s| &s.features_order)
    }

    pub fn static_features(&self) -> Option<&RecordBatch> {
        self.state.as_ref().map(|s| &s.static_features)
    }

    pub fn uids(&self) -> Option<&ArrayRef> {
        self.state.as_ref().map(|s| &s.uids)
    }

    pub fn last_dates(&self) -> Option<&[i64]> {
        self.state.as_ref().map(|s| s.last_dates.as_slice())
    }

    /// The stored series, on the target transforms' scale.
    pub fn ground_truth(&self) -> Option<&GroupedArray> {
        self.state.as_ref().map(|s| &s.ga)
    }

    /// Warnings recorded since construction or the last [`TimeSeries::take_warnings`].
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn record(&mut self, warning: Warning) {
        self.warnings.push(warning);
    }

    pub(crate) fn fitted(&self) -> Result<&FittedState> {
        self.state.as_ref().ok_or(ForecastError::NotFitted)
    }

    fn resolve_frequency(&self, kind: &TimeKind) -> Result<(Frequency, Option<Warning>)> {
        match kind {
            TimeKind::Timestamp(..) if self.freq.is_int() => Err(ForecastError::MissingFrequency),
            TimeKind::Int(_) if self.freq != Frequency::Int(1) => {
                let requested = self.freq.to_string();
                Ok((Frequency::Int(1), Some(Warning::FrequencyReset { requested })))
            }
            _ => Ok((self.freq.clone(), None)),
        }
    }

    /// Sort the series, fit the target transforms and capture the state. Nothing is stored yet.
    fn prepare(&self, df: &RecordBatch, options: &FitOptions) -> Result<Prepared> {
        let FitOptions {
            id_col,
            time_col,
            target_col,
            ..
        } = options;
        let ids = column(df, id_col)?;
        let time = column(df, time_col)?;
        let target = column(df, target_col)?;
        if has_missing(target) {
            return Err(ForecastError::NullTarget(target_col.clone()));
        }
        if options.max_horizon == Some(0) {
            return Err(ForecastError::InvalidParameter {
                name: "max_horizon".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let time_kind = TimeKind::from_data_type(time.data_type())?;
        let (freq, frequency_reset) = self.resolve_frequency(&time_kind)?;
        let times = time_values(time, time_col)?;

        let sort_idxs = sort_indices(df, id_col, time_col)?;
        let mut restore_idxs = vec![0; sort_idxs.len()];
        for (pos, &row) in sort_idxs.iter().enumerate() {
            restore_idxs[row] = pos;
        }
        let sorted_ids = take_array(ids, &sort_idxs)?;
        let ranges = group_ranges(&series_keys(&sorted_ids)?);

        let mut target_frame = batch_from_columns(vec![
            (id_col.clone(), sorted_ids),
            (time_col.clone(), take_array(time, &sort_idxs)?),
            (target_col.clone(), take_array(target, &sort_idxs)?),
        ])?;
        let mut target_transforms = self.target_transforms.clone();
        for tfm in target_transforms.iter_mut() {
            tfm.set_column_names(id_col, time_col, target_col);
            target_frame = tfm.fit_transform(&target_frame).map_err(|source| {
                ForecastError::TargetTransformFailure {
                    transform: tfm.name().to_string(),
                    source,
                }
            })?;
        }
        let data = f64_values(column(&target_frame, target_col)?)?;
        let sizes: Vec<usize> = ranges.iter().map(|(_, r)| r.len()).collect();
        let ga = GroupedArray::from_sizes(data, &sizes)?;

        let last_rows: Vec<usize> = ranges.iter().map(|(_, r)| sort_idxs[r.end - 1]).collect();
        let uids = take_array(ids, &last_rows)?;
        let uid_keys = ranges.into_iter().map(|(key, _)| key).collect();
        let last_dates = last_rows.iter().map(|&row| times[row]).collect();

        let schema = df.schema();
        let (static_cols, id_is_feature) = match &options.static_features {
            Some(cols) => (
                cols.iter().filter(|c| *c != id_col).cloned().collect(),
                cols.contains(id_col),
            ),
            None => (
                schema
                    .fields()
                    .iter()
                    .map(|f| f.name().clone())
                    .filter(|n| n != id_col && n != time_col && n != target_col)
                    .collect::<Vec<_>>(),
                false,
            ),
        };
        let mut static_columns = vec![(id_col.clone(), uids.clone())];
        for name in static_cols {
            let values = take_array(column(df, &name)?, &last_rows)?;
            static_columns.push((name, values));
        }
        let static_features = batch_from_columns(static_columns)?;

        let mut features_order: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .filter(|n| n != time_col && n != target_col && (n != id_col || id_is_feature))
            .collect();
        features_order.extend(self.features());

        debug!(
            series = ga.n_groups(),
            rows = ga.len(),
            freq = %freq,
            "fitted series"
        );
        Ok(Prepared {
            state: FittedState {
                id_col: id_col.clone(),
                time_col: time_col.clone(),
                target_col: target_col.clone(),
                freq,
                time_kind,
                uids,
                uid_keys,
                last_dates,
                ga,
                static_features,
                features_order,
                keep_last_n: options.keep_last_n,
                max_horizon: options.max_horizon,
            },
            target_transforms,
            times,
            restore_idxs,
            frequency_reset,
        })
    }

    fn fit_features(
        &mut self,
        df: &RecordBatch,
        options: &FitOptions,
    ) -> Result<(RecordBatch, TargetBuffer)> {
        let prepared = self.prepare(df, options)?;
        let ga = &prepared.state.ga;
        let buffers = self.engine.compute(ga, false)?;
        let target = match options.max_horizon {
            Some(h) => TargetBuffer::horizons(ga.expand_target(h), h)?,
            None => TargetBuffer::new(ga.data().to_vec(), 1)?,
        };
        let out = assembler::assemble(
            TrainingInput {
                df,
                target_col: &options.target_col,
                time_kind: &prepared.state.time_kind,
                times: &prepared.times,
                restore_idxs: &prepared.restore_idxs,
                dropna: options.dropna,
            },
            buffers,
            &target,
            &self.date_features,
        )?;
        self.state = Some(prepared.state);
        self.target_transforms = prepared.target_transforms;
        if let Some(warning) = prepared.frequency_reset {
            warn!(freq = %self.freq, "Setting freq=1 since time col is int");
            self.record(warning);
        }
        Ok(out)
    }

    /// Fit the series and return `df` with the features added.
    ///
    /// The target column is replaced by its transformed values, or by `{target}{i}` columns when
    /// `max_horizon` is set.
    pub fn fit_transform(&mut self, df: &RecordBatch, options: &FitOptions) -> Result<RecordBatch> {
        let (features, target) = self.fit_features(df, options)?;
        assembler::with_target(&features, &options.target_col, &target)
    }

    /// Like [`TimeSeries::fit_transform`] but split into the model inputs (in
    /// [`TimeSeries::features_order`]) and the target.
    pub fn fit_transform_xy(
        &mut self,
        df: &RecordBatch,
        options: &FitOptions,
    ) -> Result<(RecordBatch, TargetBuffer)> {
        let (features, target) = self.fit_features(df, options)?;
        let x = select_columns(&features, self.features_order())?;
        Ok((x, target))
    }
}
