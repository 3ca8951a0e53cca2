//! Lag transforms and their registry
//!
//! Every feature is a `(lag, transform)` pair. The identity transform produces plain lags
//! (`lag7`), every other transform is named after itself, its lag and the parameters that differ
//! from their declared defaults (`rolling_mean_lag1_window_size7`).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{ForecastError, Result};

pub mod window;

pub use window::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            ParamValue::None => write!(f, "None"),
        }
    }
}

/// One argument of a transform, with the default it was declared with.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformParam {
    pub name: &'static str,
    pub value: ParamValue,
    /// `None` when the parameter is required.
    pub default: Option<ParamValue>,
}

impl TransformParam {
    pub fn required(name: &'static str, value: ParamValue) -> Self {
        TransformParam {
            name,
            value,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, value: ParamValue, default: ParamValue) -> Self {
        TransformParam {
            name,
            value,
            default: Some(default),
        }
    }

    fn is_changed(&self) -> bool {
        self.default != Some(self.value)
    }
}

pub type TransformParams = SmallVec<[TransformParam; 2]>;

/// A function applied to one (already lagged) series.
///
/// The output must have the same length as the input.
pub trait SeriesTransform: Send + Sync {
    fn name(&self) -> &str;

    /// Declared parameters in declaration order.
    fn params(&self) -> TransformParams {
        TransformParams::new()
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>>;
}

type SeriesFn = dyn Fn(&[f64]) -> anyhow::Result<Vec<f64>> + Send + Sync;

/// A user supplied transform with an explicit display name.
pub struct FnTransform {
    name: String,
    params: TransformParams,
    func: Arc<SeriesFn>,
}

impl FnTransform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64]) -> anyhow::Result<Vec<f64>> + Send + Sync + 'static,
    {
        FnTransform {
            name: name.into(),
            params: TransformParams::new(),
            func: Arc::new(func),
        }
    }

    pub fn with_param(mut self, param: TransformParam) -> Self {
        self.params.push(param);
        self
    }
}

impl SeriesTransform for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> TransformParams {
        self.params.clone()
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        (self.func)(x)
    }
}

#[derive(Clone)]
pub enum TransformKind {
    Identity,
    Function(Arc<dyn SeriesTransform>),
}

impl fmt::Debug for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformKind::Identity => write!(f, "Identity"),
            TransformKind::Function(t) => write!(f, "Function({})", t.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LagTransformSpec {
    pub lag: usize,
    pub kind: TransformKind,
}

impl LagTransformSpec {
    pub fn lag(lag: usize) -> Self {
        LagTransformSpec {
            lag,
            kind: TransformKind::Identity,
        }
    }

    pub fn function(lag: usize, transform: impl SeriesTransform + 'static) -> Self {
        LagTransformSpec {
            lag,
            kind: TransformKind::Function(Arc::new(transform)),
        }
    }

    /// Name before collisions are resolved.
    pub fn base_name(&self) -> String {
        match &self.kind {
            TransformKind::Identity => format!("lag{}", self.lag),
            TransformKind::Function(t) => {
                let mut name = format!("{}_lag{}", t.name(), self.lag);
                let changed: Vec<String> = t
                    .params()
                    .iter()
                    .filter(|p| p.is_changed())
                    .map(|p| format!("{}{}", p.name, p.value))
                    .collect();
                if !changed.is_empty() {
                    name.push('_');
                    name.push_str(&changed.join("_"));
                }
                name
            }
        }
    }

    pub fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        match &self.kind {
            TransformKind::Identity => Ok(x.to_vec()),
            TransformKind::Function(t) => t.apply(x),
        }
    }
}

/// Disambiguate repeated names.
///
/// Counts are assigned walking from the end, so the earliest occurrence keeps the bare name and
/// later ones get `_2`, `_3`, ...
pub fn dedup_names(names: &[String]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in names {
        *counts.entry(name.as_str()).or_default() += 1;
    }
    let mut out = names.to_vec();
    for (i, name) in names.iter().enumerate().rev() {
        let Some(count) = counts.get_mut(name.as_str()) else {
            continue;
        };
        if *count > 1 {
            out[i] = format!("{name}_{count}");
        }
        *count -= 1;
    }
    out
}

/// Ordered `name -> (lag, transform)` mapping.
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    entries: Vec<(String, LagTransformSpec)>,
}

impl TransformRegistry {
    pub fn new(specs: Vec<LagTransformSpec>) -> Result<Self> {
        for spec in &specs {
            if spec.lag == 0 {
                return Err(ForecastError::InvalidLag {
                    name: spec.base_name(),
                    lag: spec.lag,
                });
            }
        }
        let base: Vec<String> = specs.iter().map(LagTransformSpec::base_name).collect();
        let names = dedup_names(&base);
        Ok(TransformRegistry {
            entries: names.into_iter().zip(specs).collect(),
        })
    }

    /// Plain lags first, then the lag transforms in the order given.
    pub fn from_lags(
        lags: &[usize],
        lag_transforms: Vec<(usize, Arc<dyn SeriesTransform>)>,
    ) -> Result<Self> {
        let specs = lags
            .iter()
            .map(|&lag| LagTransformSpec::lag(lag))
            .chain(
                lag_transforms
                    .into_iter()
                    .map(|(lag, t)| LagTransformSpec {
                        lag,
                        kind: TransformKind::Function(t),
                    }),
            )
            .collect();
        Self::new(specs)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LagTransformSpec)> + '_ {
        self.entries.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(registry: &TransformRegistry) -> Vec<&str> {
        registry.names().collect()
    }

    #[test]
    fn test_identity_names() -> anyhow::Result<()> {
        let registry = TransformRegistry::from_lags(&[1, 7], vec![])?;
        assert_eq!(names(&registry), vec!["lag1", "lag7"]);
        Ok(())
    }

    #[test]
    fn test_changed_params_in_name() -> anyhow::Result<()> {
        let registry = TransformRegistry::new(vec![
            LagTransformSpec::function(1, RollingMean::new(7)),
            LagTransformSpec::function(1, RollingMean::new(7).min_samples(1)),
            LagTransformSpec::function(2, ExpandingMean),
            LagTransformSpec::function(1, EwmMean::new(0.5)),
        ])?;
        assert_eq!(
            names(&registry),
            vec![
                "rolling_mean_lag1_window_size7",
                "rolling_mean_lag1_window_size7_min_samples1",
                "expanding_mean_lag2",
                "ewm_mean_lag1_alpha0.5",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_collisions_keep_earliest_bare() -> anyhow::Result<()> {
        let f = || FnTransform::new("f", |x: &[f64]| Ok(x.to_vec()));
        let registry = TransformRegistry::new(vec![
            LagTransformSpec::function(1, f()),
            LagTransformSpec::function(1, f()),
            LagTransformSpec::function(2, f()),
            LagTransformSpec::function(1, f()),
        ])?;
        assert_eq!(
            names(&registry),
            vec!["f_lag1", "f_lag1_2", "f_lag2", "f_lag1_3"]
        );
        Ok(())
    }

    #[test]
    fn test_fn_transform_params() -> anyhow::Result<()> {
        let t = FnTransform::new("scaled", |x: &[f64]| Ok(x.iter().map(|v| v * 2.0).collect()))
            .with_param(TransformParam::with_default(
                "factor",
                ParamValue::Int(2),
                ParamValue::Int(1),
            ))
            .with_param(TransformParam::with_default(
                "center",
                ParamValue::Bool(false),
                ParamValue::Bool(false),
            ));
        let spec = LagTransformSpec::function(3, t);
        assert_eq!(spec.base_name(), "scaled_lag3_factor2");
        assert_eq!(spec.apply(&[1.0, 2.0])?, vec![2.0, 4.0]);
        Ok(())
    }

    #[test]
    fn test_zero_lag_rejected() {
        let err = TransformRegistry::from_lags(&[0], vec![]).expect_err("lag 0");
        assert!(matches!(err, ForecastError::InvalidLag { lag: 0, .. }));
    }
}
