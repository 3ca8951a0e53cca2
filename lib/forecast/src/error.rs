//! Error types for the forecast engine

use thiserror::Error;

/// Result type alias for forecast operations
pub type Result<T> = std::result::Result<T, ForecastError>;

/// Errors raised by the grouped array, the transform engine and the forecast driver.
///
/// Nothing here is retried: every variant aborts the call that produced it and leaves
/// the fitted (ground truth) state as it was before the call.
#[derive(Error, Debug)]
pub enum ForecastError {
    // configuration
    #[error("Unknown frequency: {0}")]
    UnknownFrequency(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    // validation
    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("{0} column contains null values")]
    NullTarget(String),

    #[error("Time column {0} contains null values")]
    NullTime(String),

    #[error("Must set frequency when using a timestamp type column")]
    MissingFrequency,

    #[error("Unsupported time column type: {0}")]
    UnsupportedTimeType(String),

    #[error("Unknown date feature: {0}")]
    UnknownDateFeature(String),

    #[error("Can't use an unnamed function as a date feature because its name is used as the feature name")]
    AnonymousDateFeature,

    #[error("Calendar date feature {0} requires a timestamp time column")]
    DateFeatureOnIntegerTime(String),

    #[error("Invalid lag {lag} for {name}: lags must be at least 1")]
    InvalidLag { name: String, lag: usize },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    // consistency
    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: usize, actual: usize },

    #[error("Sizes add up to {sizes} but {values} values were provided")]
    InconsistentSize { sizes: usize, values: usize },

    #[error("horizon must be at most {max} ({horizon} requested)")]
    HorizonTooLarge { horizon: usize, max: usize },

    #[error(
        "The following ids weren't seen during training and thus can't be forecasted: {0:?}"
    )]
    UnseenIds(Vec<String>),

    #[error("Series have not been fitted, call fit_transform first")]
    NotFitted,

    #[error("Model {model} doesn't match the fitted mode: {reason}")]
    ModelKindMismatch { model: String, reason: String },

    // exogenous data
    #[error("Invalid exogenous frame: {0}")]
    ExogenousColumns(String),

    #[error(
        "The following features were provided through X_df but were considered as static during fit: {0:?}. \
         Re-run the fit step listing the static features explicitly, \
         or pass an empty list if all features are dynamic"
    )]
    StaticDynamicConflict(Vec<String>),

    #[error(
        "Found missing inputs in X_df: expected {expected} rows (one per id and date for the complete horizon), got {actual}"
    )]
    MissingExogenousRows { expected: usize, actual: usize },

    // user supplied callbacks
    #[error("Transform {feature} failed: {source}")]
    TransformFailure {
        feature: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Model {model} failed: {source}")]
    ModelFailure {
        model: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Target transform {transform} failed: {source}")]
    TargetTransformFailure {
        transform: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl ForecastError {
    pub(crate) fn transform(feature: impl Into<String>, source: anyhow::Error) -> Self {
        ForecastError::TransformFailure {
            feature: feature.into(),
            source,
        }
    }

    pub(crate) fn model(model: impl Into<String>, source: anyhow::Error) -> Self {
        ForecastError::ModelFailure {
            model: model.into(),
            source,
        }
    }
}
