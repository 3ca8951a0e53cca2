//! Lag features and recursive forecasting for many time series at once
//!
//! Series are stored back to back in a [`GroupedArray`], features are computed per series on a
//! rayon pool and models are fed their own predictions one step at a time.
//!
//! # Module Structure
//!
//! - `grouped_array`: Contiguous storage of many series
//! - `transforms`: Lag transforms (rolling, expanding, exponentially weighted, custom functions)
//! - `engine`: Computes every registered transform, optionally in parallel
//! - `target_transforms`: Invertible target transforms (differences, local scaling)
//! - `frequency` / `date_features`: Time arithmetic and calendar features
//! - `series`: The [`TimeSeries`] entry point and fitting
//! - `driver`: The forecast loop
//! - `update`: Appending new observations after fitting

pub mod assembler;
pub mod date_features;
pub mod driver;
pub mod engine;
pub mod error;
pub mod frequency;
pub mod grouped_array;
pub mod model;
pub mod series;
pub mod table;
pub mod target_transforms;
pub mod transforms;
mod update;

pub use crate::assembler::TargetBuffer;
pub use crate::date_features::{CalendarFeature, DateFeature};
pub use crate::driver::{AfterPredictFn, BeforePredictFn, PredictOptions, PredictOptionsBuilder};
pub use crate::engine::{FeatureBuffers, TransformEngine};
pub use crate::error::{ForecastError, Result};
pub use crate::frequency::{DateOffset, Frequency, TimeKind};
pub use crate::grouped_array::{GroupSlice, GroupedArray};
pub use crate::model::{Estimator, FittedModel, Model};
pub use crate::series::{
    FitOptions, FitOptionsBuilder, TimeSeries, TimeSeriesConfig, TimeSeriesConfigBuilder, Warning,
};
pub use crate::target_transforms::{Differences, LocalStandardScaler, TargetTransform};
pub use crate::transforms::{FnTransform, ParamValue, SeriesTransform, TransformRegistry};
