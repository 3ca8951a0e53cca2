//! Applies every registered transform to a [`GroupedArray`].
//!
//! With more than one thread, every transform becomes one task on a fixed size `rayon` pool.
//! Tasks only read the grouped array and each one owns its output buffer.

use std::fmt;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::error::{ForecastError, Result};
use crate::grouped_array::GroupedArray;
use crate::transforms::{LagTransformSpec, TransformRegistry};

/// Computed feature buffers in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureBuffers {
    columns: Vec<(String, Vec<f64>)>,
}

impl FeatureBuffers {
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> + '_ {
        self.columns.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, Vec<f64>)> {
        self.columns
    }
}

pub struct TransformEngine {
    registry: TransformRegistry,
    num_threads: usize,
    pool: Option<ThreadPool>,
}

impl fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEngine")
            .field("transforms", &self.registry.names().collect::<Vec<_>>())
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

/// Clamp an invalid thread count to 1, returning whether it was corrected.
pub fn sanitize_num_threads(num_threads: usize) -> (usize, bool) {
    if num_threads < 1 {
        warn!(num_threads, "Setting num_threads to 1");
        (1, true)
    } else {
        (num_threads, false)
    }
}

fn run_one(
    ga: &GroupedArray,
    name: &str,
    spec: &LagTransformSpec,
    updates_only: bool,
) -> Result<Vec<f64>> {
    let lag = if updates_only { spec.lag - 1 } else { spec.lag };
    ga.transform_series(updates_only, lag, |x| spec.apply(x))
        .map_err(|e| ForecastError::transform(name, e))
}

impl TransformEngine {
    pub fn new(registry: TransformRegistry, num_threads: usize) -> Result<Self> {
        let (num_threads, _) = sanitize_num_threads(num_threads);
        let pool = if num_threads > 1 && registry.len() > 1 {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .thread_name(|i| format!("forecast-transform-{i}"))
                    .build()
                    .map_err(|e| ForecastError::ThreadPool(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(TransformEngine {
            registry,
            num_threads,
            pool,
        })
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Compute every feature over the full history, or only its newest value per series.
    pub fn compute(&self, ga: &GroupedArray, updates_only: bool) -> Result<FeatureBuffers> {
        match &self.pool {
            Some(pool) => self.compute_parallel(pool, ga, updates_only),
            None => self.compute_sequential(ga, updates_only),
        }
    }

    pub fn compute_sequential(&self, ga: &GroupedArray, updates_only: bool) -> Result<FeatureBuffers> {
        let mut columns = Vec::with_capacity(self.registry.len());
        for (name, spec) in self.registry.iter() {
            columns.push((name.to_string(), run_one(ga, name, spec, updates_only)?));
        }
        Ok(FeatureBuffers { columns })
    }

    fn compute_parallel(
        &self,
        pool: &ThreadPool,
        ga: &GroupedArray,
        updates_only: bool,
    ) -> Result<FeatureBuffers> {
        debug!(
            transforms = self.registry.len(),
            threads = self.num_threads,
            updates_only,
            "computing transforms in parallel"
        );
        let specs: Vec<(&str, &LagTransformSpec)> = self.registry.iter().collect();
        let columns = pool.install(|| {
            specs
                .par_iter()
                .map(|(name, spec)| {
                    run_one(ga, name, spec, updates_only).map(|values| (name.to_string(), values))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(FeatureBuffers { columns })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::{
        EwmMean, ExpandingMean, FnTransform, RollingMean, RollingStd, SeasonalRollingMean,
    };

    fn sample() -> GroupedArray {
        let data: Vec<f64> = (0..300).map(|i| ((i * 37) % 101) as f64 / 7.0).collect();
        GroupedArray::from_sizes(data, &[120, 1, 0, 79, 100]).expect("valid layout")
    }

    fn registry() -> TransformRegistry {
        TransformRegistry::new(vec![
            LagTransformSpec::lag(1),
            LagTransformSpec::lag(7),
            LagTransformSpec::function(1, RollingMean::new(7)),
            LagTransformSpec::function(2, RollingStd::new(3).min_samples(2)),
            LagTransformSpec::function(1, ExpandingMean),
            LagTransformSpec::function(3, EwmMean::new(0.3)),
            LagTransformSpec::function(1, SeasonalRollingMean::new(7, 2)),
        ])
        .expect("valid registry")
    }

    fn bits(buffers: &FeatureBuffers) -> Vec<(String, Vec<u64>)> {
        buffers
            .iter()
            .map(|(n, v)| (n.to_string(), v.iter().map(|x| x.to_bits()).collect()))
            .collect()
    }

    #[test]
    fn test_sequential_matches_parallel() -> anyhow::Result<()> {
        let ga = sample();
        let sequential = TransformEngine::new(registry(), 1)?;
        let parallel = TransformEngine::new(registry(), 4)?;
        for updates_only in [false, true] {
            let a = sequential.compute(&ga, updates_only)?;
            let b = parallel.compute(&ga, updates_only)?;
            assert_eq!(bits(&a), bits(&b));
        }
        Ok(())
    }

    #[test]
    fn test_output_keyed_in_registration_order() -> anyhow::Result<()> {
        let engine = TransformEngine::new(registry(), 3)?;
        let out = engine.compute(&sample(), false)?;
        let names: Vec<&str> = out.names().collect();
        let expected: Vec<&str> = engine.registry().names().collect();
        assert_eq!(names, expected);
        assert_eq!(out.get("lag1").map(<[f64]>::len), Some(300));
        Ok(())
    }

    #[test]
    fn test_updates_only_lags_one_less() -> anyhow::Result<()> {
        let ga = GroupedArray::new(vec![1.0, 2.0, 3.0, 10.0, 20.0], vec![0, 3, 5])?;
        let registry = TransformRegistry::from_lags(&[1, 2], vec![])?;
        let engine = TransformEngine::new(registry, 1)?;
        let out = engine.compute(&ga, true)?;
        assert_eq!(out.get("lag1"), Some(&[3.0, 20.0][..]));
        assert_eq!(out.get("lag2"), Some(&[2.0, 10.0][..]));
        Ok(())
    }

    #[test]
    fn test_failure_reports_feature_name() -> anyhow::Result<()> {
        let failing = FnTransform::new("boom", |_: &[f64]| anyhow::bail!("exploded"));
        let registry = TransformRegistry::new(vec![
            LagTransformSpec::lag(1),
            LagTransformSpec::function(2, failing),
            LagTransformSpec::function(1, ExpandingMean),
        ])?;
        for threads in [1, 2] {
            let engine = TransformEngine::new(registry.clone(), threads)?;
            let err = engine.compute(&sample(), false).expect_err("must fail");
            match err {
                ForecastError::TransformFailure { feature, source } => {
                    assert_eq!(feature, "boom_lag2");
                    assert_eq!(source.to_string(), "exploded");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        Ok(())
    }

    #[test]
    fn test_zero_threads_fall_back_to_one() -> anyhow::Result<()> {
        assert_eq!(sanitize_num_threads(0), (1, true));
        let engine = TransformEngine::new(registry(), 0)?;
        assert_eq!(engine.num_threads(), 1);
        Ok(())
    }
}
