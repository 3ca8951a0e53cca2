//! Flat storage for many series
//!
//! All observations live in one `data` buffer, series after series, and `indptr`
//! marks where every series (group) starts and ends: group `i` is
//! `data[indptr[i]..indptr[i + 1]]`, oldest observation first.

use anyhow::bail;

use crate::error::{ForecastError, Result};

/// Which observations of every group to keep in [`GroupedArray::take_from_groups`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSlice {
    /// The oldest `n` observations.
    First(usize),
    /// The newest `n` observations.
    Last(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupedArray {
    data: Vec<f64>,
    indptr: Vec<usize>,
}

impl Default for GroupedArray {
    fn default() -> Self {
        GroupedArray {
            data: Vec::new(),
            indptr: vec![0],
        }
    }
}

/// Shift `x` forward by `offset` positions, filling the front with NaN.
pub(crate) fn shift_array(x: &[f64], offset: usize) -> Vec<f64> {
    if offset == 0 {
        return x.to_vec();
    }
    let n = x.len();
    let mut out = vec![f64::NAN; n];
    if offset < n {
        out[offset..].copy_from_slice(&x[..n - offset]);
    }
    out
}

impl GroupedArray {
    pub fn new(data: Vec<f64>, indptr: Vec<usize>) -> Result<Self> {
        if indptr.first() != Some(&0) {
            return Err(ForecastError::ShapeError {
                expected: 0,
                actual: indptr.first().copied().unwrap_or(usize::MAX),
            });
        }
        if indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(ForecastError::InvalidParameter {
                name: "indptr".to_string(),
                value: format!("{indptr:?}"),
                reason: "must be non-decreasing".to_string(),
            });
        }
        let end = indptr[indptr.len() - 1];
        if end != data.len() {
            return Err(ForecastError::ShapeError {
                expected: data.len(),
                actual: end,
            });
        }
        Ok(GroupedArray { data, indptr })
    }

    /// Build from per group sizes.
    pub fn from_sizes(data: Vec<f64>, sizes: &[usize]) -> Result<Self> {
        let mut indptr = Vec::with_capacity(sizes.len() + 1);
        indptr.push(0);
        let mut acc = 0;
        for size in sizes {
            acc += size;
            indptr.push(acc);
        }
        Self::new(data, indptr)
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn n_groups(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.indptr.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Observations of group `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i >= self.n_groups()`.
    pub fn slice(&self, i: usize) -> &[f64] {
        &self.data[self.indptr[i]..self.indptr[i + 1]]
    }

    pub fn groups(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.indptr.windows(2).map(|w| &self.data[w[0]..w[1]])
    }

    /// Apply `f` to every group shifted by `lag`.
    ///
    /// Returns a buffer aligned with `data`, or with `updates_only` one value per group: the last
    /// value of the transformed group.
    pub fn transform_series<F>(&self, updates_only: bool, lag: usize, f: F) -> anyhow::Result<Vec<f64>>
    where
        F: Fn(&[f64]) -> anyhow::Result<Vec<f64>>,
    {
        if updates_only {
            let mut out = Vec::with_capacity(self.n_groups());
            for group in self.groups() {
                let lagged = shift_array(group, lag);
                let transformed = f(&lagged)?;
                check_output_len(lagged.len(), transformed.len())?;
                out.push(transformed.last().copied().unwrap_or(f64::NAN));
            }
            Ok(out)
        } else {
            let mut out = Vec::with_capacity(self.data.len());
            for group in self.groups() {
                let lagged = shift_array(group, lag);
                let transformed = f(&lagged)?;
                check_output_len(lagged.len(), transformed.len())?;
                out.extend_from_slice(&transformed);
            }
            Ok(out)
        }
    }

    /// Row-major `len() x max_horizon` matrix where row `j` holds the next `max_horizon` values of
    /// the series starting at observation `j`, NaN past the end of the series.
    pub fn expand_target(&self, max_horizon: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.data.len() * max_horizon);
        for group in self.groups() {
            for j in 0..group.len() {
                let upper = (group.len() - j).min(max_horizon);
                out.extend_from_slice(&group[j..j + upper]);
                out.extend(std::iter::repeat_n(f64::NAN, max_horizon - upper));
            }
        }
        out
    }

    /// Append one value to the end of every group.
    pub fn append(&self, values: &[f64]) -> Result<GroupedArray> {
        let n_groups = self.n_groups();
        if values.len() != n_groups {
            return Err(ForecastError::ShapeError {
                expected: n_groups,
                actual: values.len(),
            });
        }
        let mut data = Vec::with_capacity(self.data.len() + n_groups);
        let mut indptr = Vec::with_capacity(self.indptr.len());
        indptr.push(0);
        for (group, value) in self.groups().zip(values) {
            data.extend_from_slice(group);
            data.push(*value);
            indptr.push(data.len());
        }
        Ok(GroupedArray { data, indptr })
    }

    /// Merge new observations into the groups.
    ///
    /// `new_sizes[i]` is the number of new values for group `i` of the result. Entries flagged in
    /// `new_groups` start a new group, the others extend the existing groups in order. `new_values`
    /// holds the new observations group after group.
    pub fn append_several(
        &self,
        new_sizes: &[usize],
        new_values: &[f64],
        new_groups: &[bool],
    ) -> Result<GroupedArray> {
        if new_sizes.len() != new_groups.len() {
            return Err(ForecastError::ShapeError {
                expected: new_sizes.len(),
                actual: new_groups.len(),
            });
        }
        let total_new: usize = new_sizes.iter().sum();
        if total_new != new_values.len() {
            return Err(ForecastError::InconsistentSize {
                sizes: total_new,
                values: new_values.len(),
            });
        }
        let existing = new_groups.iter().filter(|is_new| !**is_new).count();
        if existing != self.n_groups() {
            return Err(ForecastError::ShapeError {
                expected: self.n_groups(),
                actual: existing,
            });
        }

        let mut data = Vec::with_capacity(self.data.len() + new_values.len());
        let mut indptr = Vec::with_capacity(new_sizes.len() + 1);
        indptr.push(0);
        let mut old_groups = self.groups();
        let mut values_start = 0;
        for (&size, &is_new) in new_sizes.iter().zip(new_groups) {
            if !is_new {
                if let Some(old) = old_groups.next() {
                    data.extend_from_slice(old);
                }
            }
            data.extend_from_slice(&new_values[values_start..values_start + size]);
            values_start += size;
            indptr.push(data.len());
        }
        Ok(GroupedArray { data, indptr })
    }

    /// Keep only the groups at `idxs`, in that order.
    pub fn take(&self, idxs: &[usize]) -> Result<GroupedArray> {
        let mut data = Vec::new();
        let mut indptr = Vec::with_capacity(idxs.len() + 1);
        indptr.push(0);
        for &i in idxs {
            if i >= self.n_groups() {
                return Err(ForecastError::ShapeError {
                    expected: self.n_groups(),
                    actual: i,
                });
            }
            data.extend_from_slice(self.slice(i));
            indptr.push(data.len());
        }
        Ok(GroupedArray { data, indptr })
    }

    /// Keep the first or last `n` observations of every group.
    pub fn take_from_groups(&self, range: GroupSlice) -> GroupedArray {
        let mut data = Vec::new();
        let mut indptr = Vec::with_capacity(self.indptr.len());
        indptr.push(0);
        for group in self.groups() {
            let kept = match range {
                GroupSlice::First(n) => &group[..n.min(group.len())],
                GroupSlice::Last(n) => &group[group.len().saturating_sub(n)..],
            };
            data.extend_from_slice(kept);
            indptr.push(data.len());
        }
        GroupedArray { data, indptr }
    }
}

fn check_output_len(expected: usize, actual: usize) -> anyhow::Result<()> {
    if expected != actual {
        bail!("transform returned {actual} values for a series of length {expected}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(x: &[f64]) -> anyhow::Result<Vec<f64>> {
        Ok(x.to_vec())
    }

    fn sample() -> GroupedArray {
        GroupedArray::new(
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0],
            vec![0, 4, 7],
        )
        .expect("valid grouped array")
    }

    fn assert_same(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!(
                (a.is_nan() && e.is_nan()) || a == e,
                "{actual:?} != {expected:?}"
            );
        }
    }

    #[test]
    fn test_new_validates_indptr() {
        assert!(GroupedArray::new(vec![1.0, 2.0], vec![0, 3]).is_err());
        assert!(GroupedArray::new(vec![1.0, 2.0], vec![1, 2]).is_err());
        assert!(GroupedArray::new(vec![1.0, 2.0], vec![0, 2, 1, 2]).is_err());
        let ga = GroupedArray::new(vec![1.0, 2.0], vec![0, 0, 2]).expect("empty group allowed");
        assert_eq!(ga.n_groups(), 2);
        assert!(ga.slice(0).is_empty());
    }

    #[test]
    fn test_slice() {
        let ga = sample();
        assert_eq!(ga.slice(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ga.slice(1), &[10.0, 20.0, 30.0]);
        assert_eq!(ga.sizes(), vec![4, 3]);
    }

    #[test]
    fn test_take_keeps_groups() {
        let ga = sample();
        let taken = ga.take(&[1, 0]).expect("take failed");
        assert_eq!(taken.slice(0), ga.slice(1));
        assert_eq!(taken.slice(1), ga.slice(0));
        assert!(ga.take(&[2]).is_err());
    }

    #[test]
    fn test_take_from_groups() {
        let ga = sample();
        let last = ga.take_from_groups(GroupSlice::Last(2));
        assert_eq!(last.slice(0), &[3.0, 4.0]);
        assert_eq!(last.slice(1), &[20.0, 30.0]);
        let first = ga.take_from_groups(GroupSlice::First(3));
        assert_eq!(first.slice(0), &[1.0, 2.0, 3.0]);
        assert_eq!(first.slice(1), &[10.0, 20.0, 30.0]);
        let everything = ga.take_from_groups(GroupSlice::Last(100));
        assert_eq!(everything, ga);
    }

    #[test]
    fn test_transform_series_lag() {
        let ga = sample();
        let out = ga.transform_series(false, 1, identity).expect("transform");
        assert_same(&out, &[f64::NAN, 1.0, 2.0, 3.0, f64::NAN, 10.0, 20.0]);

        let out = ga.transform_series(false, 5, identity).expect("transform");
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_transform_series_updates_only() {
        let ga = sample();
        let out = ga.transform_series(true, 0, identity).expect("transform");
        assert_eq!(out, vec![4.0, 30.0]);
        let out = ga.transform_series(true, 1, identity).expect("transform");
        assert_eq!(out, vec![3.0, 20.0]);
    }

    #[test]
    fn test_transform_series_rejects_bad_output() {
        let ga = sample();
        let err = ga
            .transform_series(false, 1, |x| Ok(x[1..].to_vec()))
            .expect_err("short output must fail");
        assert!(err.to_string().contains("transform returned"));
    }

    #[test]
    fn test_append_then_updates_only_identity() {
        let ga = sample();
        let appended = ga.append(&[5.0, 40.0]).expect("append");
        assert_eq!(appended.slice(0), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(appended.slice(1), &[10.0, 20.0, 30.0, 40.0]);
        let out = appended
            .transform_series(true, 1 - 1, identity)
            .expect("transform");
        assert_eq!(out, vec![5.0, 40.0]);
    }

    #[test]
    fn test_append_shape_error() {
        let ga = sample();
        let err = ga.append(&[1.0]).expect_err("wrong size");
        assert!(matches!(
            err,
            ForecastError::ShapeError {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_expand_target() {
        let ga = sample();
        let out = ga.expand_target(2);
        assert_same(
            &out,
            &[
                1.0, 2.0, //
                2.0, 3.0, //
                3.0, 4.0, //
                4.0, f64::NAN, //
                10.0, 20.0, //
                20.0, 30.0, //
                30.0, f64::NAN,
            ],
        );
        assert_eq!(ga.expand_target(1), ga.data().to_vec());
    }

    #[test]
    fn test_append_several() {
        let ga = sample();
        let out = ga
            .append_several(&[1, 2, 2], &[5.0, 40.0, 50.0, 7.0, 8.0], &[false, false, true])
            .expect("append several");
        assert_eq!(out.n_groups(), 3);
        assert_eq!(out.slice(0), &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(out.slice(1), &[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(out.slice(2), &[7.0, 8.0]);
        // original untouched
        assert_eq!(ga.n_groups(), 2);
    }

    #[test]
    fn test_append_several_new_group_in_between() {
        let ga = sample();
        let out = ga
            .append_several(&[0, 1, 1], &[9.0, 40.0], &[false, true, false])
            .expect("append several");
        assert_eq!(out.slice(0), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.slice(1), &[9.0]);
        assert_eq!(out.slice(2), &[10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_append_several_errors() {
        let ga = sample();
        let err = ga
            .append_several(&[1, 1], &[1.0], &[false, false])
            .expect_err("inconsistent sizes");
        assert!(matches!(
            err,
            ForecastError::InconsistentSize {
                sizes: 2,
                values: 1
            }
        ));
        let err = ga
            .append_several(&[1], &[1.0], &[false])
            .expect_err("missing existing group");
        assert!(matches!(err, ForecastError::ShapeError { .. }));
    }
}
