//! Window transforms commonly used as lag features.
//!
//! Every function skips the leading NaNs produced by the lag shift and starts computing from
//! the first observed value, positions before that are NaN.

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::smallvec;

use super::{ParamValue, SeriesTransform, TransformParam, TransformParams};
use crate::error::{ForecastError, Result};

fn first_not_na(x: &[f64]) -> usize {
    x.iter().position(|v| !v.is_nan()).unwrap_or(x.len())
}

fn min_samples_param(min_samples: Option<usize>) -> TransformParam {
    TransformParam::with_default(
        "min_samples",
        min_samples.map_or(ParamValue::None, |m| ParamValue::Int(m as i64)),
        ParamValue::None,
    )
}

/// Apply `stat` over trailing windows of `window_size` once at least `min_samples` values are
/// available.
fn rolling<F>(x: &[f64], window_size: usize, min_samples: usize, stat: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![f64::NAN; x.len()];
    let start = first_not_na(x);
    for i in start..x.len() {
        let lo = (i + 1).saturating_sub(window_size).max(start);
        let window = &x[lo..=i];
        if window.len() >= min_samples {
            out[i] = stat(window);
        }
    }
    out
}

fn mean(w: &[f64]) -> f64 {
    w.iter().sum::<f64>() / w.len() as f64
}

fn sample_std(w: &[f64]) -> f64 {
    if w.len() < 2 {
        return f64::NAN;
    }
    let m = mean(w);
    let ss: f64 = w.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (w.len() - 1) as f64).sqrt()
}

fn min(w: &[f64]) -> f64 {
    w.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(w: &[f64]) -> f64 {
    w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RollingStat {
    Mean,
    Std,
    Min,
    Max,
}

impl RollingStat {
    fn name(self) -> &'static str {
        match self {
            RollingStat::Mean => "rolling_mean",
            RollingStat::Std => "rolling_std",
            RollingStat::Min => "rolling_min",
            RollingStat::Max => "rolling_max",
        }
    }

    fn func(self) -> fn(&[f64]) -> f64 {
        match self {
            RollingStat::Mean => mean,
            RollingStat::Std => sample_std,
            RollingStat::Min => min,
            RollingStat::Max => max,
        }
    }
}

macro_rules! rolling_transform {
    ($ty:ident, $stat:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $ty {
            window_size: usize,
            min_samples: Option<usize>,
        }

        impl $ty {
            pub fn new(window_size: usize) -> Self {
                $ty {
                    window_size,
                    min_samples: None,
                }
            }

            pub fn min_samples(mut self, min_samples: usize) -> Self {
                self.min_samples = Some(min_samples);
                self
            }
        }

        impl SeriesTransform for $ty {
            fn name(&self) -> &str {
                $stat.name()
            }

            fn params(&self) -> TransformParams {
                smallvec![
                    TransformParam::required(
                        "window_size",
                        ParamValue::Int(self.window_size as i64)
                    ),
                    min_samples_param(self.min_samples),
                ]
            }

            fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
                let min_samples = self.min_samples.unwrap_or(self.window_size);
                Ok(rolling(x, self.window_size, min_samples, $stat.func()))
            }
        }
    };
}

rolling_transform!(RollingMean, RollingStat::Mean);
rolling_transform!(RollingStd, RollingStat::Std);
rolling_transform!(RollingMin, RollingStat::Min);
rolling_transform!(RollingMax, RollingStat::Max);

/// Rolling mean over values one season apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeasonalRollingMean {
    season_length: usize,
    window_size: usize,
    min_samples: Option<usize>,
}

impl SeasonalRollingMean {
    pub fn new(season_length: usize, window_size: usize) -> Self {
        SeasonalRollingMean {
            season_length,
            window_size,
            min_samples: None,
        }
    }

    pub fn min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }
}

impl SeriesTransform for SeasonalRollingMean {
    fn name(&self) -> &str {
        "seasonal_rolling_mean"
    }

    fn params(&self) -> TransformParams {
        smallvec![
            TransformParam::required("season_length", ParamValue::Int(self.season_length as i64)),
            TransformParam::required("window_size", ParamValue::Int(self.window_size as i64)),
            min_samples_param(self.min_samples),
        ]
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        anyhow::ensure!(self.season_length > 0, "season_length must be positive");
        let min_samples = self.min_samples.unwrap_or(self.window_size);
        let mut out = vec![f64::NAN; x.len()];
        for season in 0..self.season_length.min(x.len()) {
            let idxs: Vec<usize> = (season..x.len()).step_by(self.season_length).collect();
            let values: Vec<f64> = idxs.iter().map(|&i| x[i]).collect();
            let rolled = rolling(&values, self.window_size, min_samples, mean);
            for (i, v) in idxs.into_iter().zip(rolled) {
                out[i] = v;
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandingMean;

impl SeriesTransform for ExpandingMean {
    fn name(&self) -> &str {
        "expanding_mean"
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        Ok(rolling(x, usize::MAX, 1, mean))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandingStd;

impl SeriesTransform for ExpandingStd {
    fn name(&self) -> &str {
        "expanding_std"
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        Ok(rolling(x, usize::MAX, 2, sample_std))
    }
}

/// Exponentially weighted mean, `out[i] = alpha * x[i] + (1 - alpha) * out[i - 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EwmMean {
    alpha: f64,
}

impl EwmMean {
    pub fn new(alpha: f64) -> Self {
        EwmMean { alpha }
    }
}

impl SeriesTransform for EwmMean {
    fn name(&self) -> &str {
        "ewm_mean"
    }

    fn params(&self) -> TransformParams {
        smallvec![TransformParam::required("alpha", ParamValue::Float(self.alpha))]
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        anyhow::ensure!(
            self.alpha > 0.0 && self.alpha <= 1.0,
            "alpha must be in (0, 1], got {}",
            self.alpha
        );
        let mut out = vec![f64::NAN; x.len()];
        let start = first_not_na(x);
        if start < x.len() {
            out[start] = x[start];
            for i in start + 1..x.len() {
                out[i] = self.alpha * x[i] + (1.0 - self.alpha) * out[i - 1];
            }
        }
        Ok(out)
    }
}

/// `x[i] - x[i - n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diff {
    n: usize,
}

impl Diff {
    pub fn new(n: usize) -> Self {
        Diff { n }
    }
}

impl Default for Diff {
    fn default() -> Self {
        Diff { n: 1 }
    }
}

impl SeriesTransform for Diff {
    fn name(&self) -> &str {
        "diff"
    }

    fn params(&self) -> TransformParams {
        smallvec![TransformParam::with_default(
            "n",
            ParamValue::Int(self.n as i64),
            ParamValue::Int(1)
        )]
    }

    fn apply(&self, x: &[f64]) -> anyhow::Result<Vec<f64>> {
        let mut out = vec![f64::NAN; x.len()];
        for i in self.n..x.len() {
            out[i] = x[i] - x[i - self.n];
        }
        Ok(out)
    }
}

fn usize_param(params: &HashMap<String, ParamValue>, name: &str) -> Result<Option<usize>> {
    match params.get(name) {
        None | Some(ParamValue::None) => Ok(None),
        Some(ParamValue::Int(i)) if *i > 0 => Ok(Some(*i as usize)),
        Some(other) => Err(ForecastError::InvalidParameter {
            name: name.to_string(),
            value: other.to_string(),
            reason: "must be a positive integer".to_string(),
        }),
    }
}

fn required_usize(params: &HashMap<String, ParamValue>, name: &str) -> Result<usize> {
    usize_param(params, name)?.ok_or_else(|| ForecastError::InvalidParameter {
        name: name.to_string(),
        value: "None".to_string(),
        reason: "is required".to_string(),
    })
}

/// Look up a built-in transform by name.
pub fn builtin_transform(
    name: &str,
    params: &HashMap<String, ParamValue>,
) -> Result<Arc<dyn SeriesTransform>> {
    let min_samples = usize_param(params, "min_samples")?;
    macro_rules! with_min_samples {
        ($t:expr) => {
            match min_samples {
                Some(m) => Arc::new($t.min_samples(m)) as Arc<dyn SeriesTransform>,
                None => Arc::new($t) as Arc<dyn SeriesTransform>,
            }
        };
    }
    let transform = match name {
        "rolling_mean" => with_min_samples!(RollingMean::new(required_usize(params, "window_size")?)),
        "rolling_std" => with_min_samples!(RollingStd::new(required_usize(params, "window_size")?)),
        "rolling_min" => with_min_samples!(RollingMin::new(required_usize(params, "window_size")?)),
        "rolling_max" => with_min_samples!(RollingMax::new(required_usize(params, "window_size")?)),
        "seasonal_rolling_mean" => with_min_samples!(SeasonalRollingMean::new(
            required_usize(params, "season_length")?,
            required_usize(params, "window_size")?
        )),
        "expanding_mean" => Arc::new(ExpandingMean),
        "expanding_std" => Arc::new(ExpandingStd),
        "ewm_mean" => {
            let alpha = match params.get("alpha") {
                Some(ParamValue::Float(a)) => *a,
                Some(ParamValue::Int(a)) => *a as f64,
                other => {
                    return Err(ForecastError::InvalidParameter {
                        name: "alpha".to_string(),
                        value: other.map_or("None".to_string(), ToString::to_string),
                        reason: "must be a number".to_string(),
                    });
                }
            };
            Arc::new(EwmMean::new(alpha))
        }
        "diff" => Arc::new(Diff::new(usize_param(params, "n")?.unwrap_or(1))),
        other => {
            return Err(ForecastError::InvalidParameter {
                name: "transform".to_string(),
                value: other.to_string(),
                reason: "unknown transform".to_string(),
            });
        }
    };
    Ok(transform)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
        for (a, e) in actual.iter().zip(expected) {
            if e.is_nan() {
                assert!(a.is_nan(), "{actual:?} vs {expected:?}");
            } else {
                assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
            }
        }
    }

    const NAN: f64 = f64::NAN;

    #[test]
    fn test_rolling_mean() -> anyhow::Result<()> {
        let x = [NAN, 1.0, 2.0, 3.0, 4.0];
        assert_close(&RollingMean::new(2).apply(&x)?, &[NAN, NAN, 1.5, 2.5, 3.5]);
        assert_close(
            &RollingMean::new(2).min_samples(1).apply(&x)?,
            &[NAN, 1.0, 1.5, 2.5, 3.5],
        );
        Ok(())
    }

    #[test]
    fn test_rolling_std_min_max() -> anyhow::Result<()> {
        let x = [1.0, 3.0, 2.0, 5.0];
        assert_close(
            &RollingStd::new(2).apply(&x)?,
            &[NAN, 2f64.sqrt(), 0.5f64.sqrt(), 4.5f64.sqrt()],
        );
        assert_close(&RollingMin::new(3).apply(&x)?, &[NAN, NAN, 1.0, 2.0]);
        assert_close(&RollingMax::new(3).apply(&x)?, &[NAN, NAN, 3.0, 5.0]);
        Ok(())
    }

    #[test]
    fn test_expanding() -> anyhow::Result<()> {
        let x = [NAN, 2.0, 4.0, 6.0];
        assert_close(&ExpandingMean.apply(&x)?, &[NAN, 2.0, 3.0, 4.0]);
        assert_close(&ExpandingStd.apply(&x)?, &[NAN, NAN, 2f64.sqrt(), 2.0]);
        Ok(())
    }

    #[test]
    fn test_ewm_mean() -> anyhow::Result<()> {
        let x = [NAN, 1.0, 3.0];
        assert_close(&EwmMean::new(0.5).apply(&x)?, &[NAN, 1.0, 2.0]);
        assert!(EwmMean::new(0.0).apply(&x).is_err());
        Ok(())
    }

    #[test]
    fn test_seasonal_rolling_mean() -> anyhow::Result<()> {
        let x = [1.0, 10.0, 3.0, 30.0, 5.0, 50.0];
        assert_close(
            &SeasonalRollingMean::new(2, 2).apply(&x)?,
            &[NAN, NAN, 2.0, 20.0, 4.0, 40.0],
        );
        Ok(())
    }

    #[test]
    fn test_diff() -> anyhow::Result<()> {
        assert_close(&Diff::default().apply(&[1.0, 4.0, 9.0])?, &[NAN, 3.0, 5.0]);
        assert_close(&Diff::new(2).apply(&[1.0, 4.0, 9.0])?, &[NAN, NAN, 8.0]);
        Ok(())
    }

    #[test]
    fn test_builtin_lookup() -> anyhow::Result<()> {
        let params = HashMap::from([("window_size".to_string(), ParamValue::Int(3))]);
        let t = builtin_transform("rolling_mean", &params)?;
        assert_eq!(t.name(), "rolling_mean");
        assert!(builtin_transform("rolling_std", &HashMap::new()).is_err());
        assert!(builtin_transform("no_such", &HashMap::new()).is_err());
        let ewm = builtin_transform(
            "ewm_mean",
            &HashMap::from([("alpha".to_string(), ParamValue::Float(0.3))]),
        )?;
        assert_eq!(ewm.params()[0].value, ParamValue::Float(0.3));
        Ok(())
    }
}
