//! Split-aware reductions: sum, mean, variance, min/max and arg-extrema.
//!
//! A reduction along an axis other than the split axis is purely local and
//! keeps the result partitioned. A reduction along the split axis computes a
//! local partial per process and merges the partials with a collective, so
//! the result is replicated and identical everywhere.

use crate::darray::{check_axis, DArray};
use crate::error::DArrayError;
use ndarray::{ArrayView1, ArrayViewD, Axis, NdFloat, Zip};
use std::cmp::Ordering;
use std::sync::Arc;

pub(crate) fn from_count<A: NdFloat>(n: usize) -> A {
    num_traits::cast(n).unwrap_or_else(A::nan)
}

/// Running count, mean and sum of squared deviations of a set of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Moments<A> {
    pub count: usize,
    pub mean: A,
    pub m2: A,
}

impl<A: NdFloat> Moments<A> {
    fn empty() -> Self {
        Self {
            count: 0,
            mean: A::zero(),
            m2: A::zero(),
        }
    }

    /// Welford accumulation over a sequence.
    fn from_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a A>,
    {
        values.into_iter().fold(Self::empty(), |mut acc, &value| {
            acc.count += 1;
            let delta = value - acc.mean;
            acc.mean += delta / from_count(acc.count);
            acc.m2 += delta * (value - acc.mean);
            acc
        })
    }

    /// Pairwise merge of two partial results (Chan, Golub and LeVeque).
    pub fn merge(&self, other: &Self) -> Self {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        let count = self.count + other.count;
        let (na, nb, n) = (
            from_count::<A>(self.count),
            from_count::<A>(other.count),
            from_count::<A>(count),
        );
        let delta = other.mean - self.mean;
        Self {
            count,
            mean: self.mean + delta * nb / n,
            m2: self.m2 + other.m2 + delta * delta * na * nb / n,
        }
    }

    pub fn variance(&self, ddof: usize) -> A {
        if self.count <= ddof {
            return A::nan();
        }
        self.m2 / from_count(self.count - ddof)
    }
}

/// Keep the preferred of two `(value, global index)` candidates; ties go to
/// the lower index.
fn pick<A: NdFloat>(current: (A, i64), candidate: (A, i64), want: Ordering) -> (A, i64) {
    match candidate.0.partial_cmp(&current.0) {
        Some(order) if order == want => candidate,
        Some(Ordering::Equal) if candidate.1 < current.1 => candidate,
        _ => current,
    }
}

impl<A> DArray<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Reduce along `axis`: `local` folds one lane of this process's shard,
    /// `combine` merges partials from different processes when `axis` is the
    /// split axis.
    pub(crate) fn reduce_axis<B, L, C>(
        &self,
        axis: usize,
        keepdims: bool,
        mut local: L,
        combine: C,
    ) -> Result<DArray<B>, DArrayError>
    where
        B: Clone + Send + Sync + 'static,
        L: FnMut(ArrayView1<'_, A>) -> B,
        C: Fn(&B, &B) -> B,
    {
        check_axis(axis, self.ndim())?;

        let shard: ArrayViewD<'_, A> = self.local();
        let partial = shard.map_axis(Axis(axis), |lane| local(lane));
        let (reduced, split, counts) = if self.split() == Some(axis) {
            let reduced = self.comm().all_reduce(partial, |a, b| {
                Zip::from(&a).and(&b).map_collect(|x, y| combine(x, y))
            })?;
            (reduced, None, Vec::new())
        } else {
            let split = self
                .split()
                .map(|s| if s > axis && !keepdims { s - 1 } else { s });
            (partial, split, self.counts().to_vec())
        };

        let mut gshape = self.gshape().to_vec();
        let reduced = if keepdims {
            gshape[axis] = 1;
            reduced.insert_axis(Axis(axis))
        } else {
            gshape.remove(axis);
            reduced
        };
        Ok(DArray::from_parts(
            reduced,
            gshape,
            split,
            counts,
            Arc::clone(self.comm()),
        ))
    }

    /// Fold every local element into one value and merge across processes
    /// when the array is partitioned.
    pub(crate) fn reduce_all<B, L, C>(&self, local: L, combine: C) -> Result<B, DArrayError>
    where
        B: Clone + Send + Sync + 'static,
        L: FnOnce(ArrayViewD<'_, A>) -> B,
        C: Fn(B, B) -> B,
    {
        let partial = local(self.local());
        match self.split() {
            Some(_) => self.comm().all_reduce(partial, combine),
            None => Ok(partial),
        }
    }
}

impl<A: NdFloat> DArray<A> {
    /// Sum of all elements.
    pub fn sum(&self) -> Result<A, DArrayError> {
        self.reduce_all(|shard| shard.sum(), |a, b| a + b)
    }

    /// Sum along `axis`.
    pub fn sum_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<A>, DArrayError> {
        self.reduce_axis(axis, keepdims, |lane| lane.sum(), |a, b| *a + *b)
    }

    /// Mean of all elements.
    pub fn mean(&self) -> Result<A, DArrayError> {
        if self.size() == 0 {
            return Err(DArrayError::EmptyReduction("mean"));
        }
        Ok(self.sum()? / from_count(self.size()))
    }

    /// Mean along `axis`.
    pub fn mean_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<A>, DArrayError> {
        check_axis(axis, self.ndim())?;
        let n = self.gshape()[axis];
        if n == 0 {
            return Err(DArrayError::EmptyReduction("mean"));
        }
        let count: A = from_count(n);
        Ok(self.sum_axis(axis, keepdims)?.map(|&s| s / count))
    }

    /// Variance of all elements with `ddof` delta degrees of freedom.
    pub fn var(&self, ddof: usize) -> Result<A, DArrayError> {
        if self.size() == 0 {
            return Err(DArrayError::EmptyReduction("variance"));
        }
        let moments = self.reduce_all(|shard| Moments::from_values(shard.iter()), |a, b| {
            a.merge(&b)
        })?;
        Ok(moments.variance(ddof))
    }

    /// Variance along `axis`.
    ///
    /// Partials from different processes are merged with the pairwise
    /// count/mean/squared-deviation update, not by re-averaging.
    pub fn var_axis(
        &self,
        axis: usize,
        ddof: usize,
        keepdims: bool,
    ) -> Result<DArray<A>, DArrayError> {
        check_axis(axis, self.ndim())?;
        if self.gshape()[axis] == 0 {
            return Err(DArrayError::EmptyReduction("variance"));
        }
        let moments = self.reduce_axis(
            axis,
            keepdims,
            |lane| Moments::from_values(lane.iter()),
            |a, b| a.merge(b),
        )?;
        Ok(moments.map(|m| m.variance(ddof)))
    }

    /// Smallest element.
    pub fn min(&self) -> Result<A, DArrayError> {
        self.extremum_all("min", Ordering::Less)
    }

    /// Largest element.
    pub fn max(&self) -> Result<A, DArrayError> {
        self.extremum_all("max", Ordering::Greater)
    }

    pub fn min_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<A>, DArrayError> {
        Ok(self
            .extremum_axis(axis, keepdims, Ordering::Less)?
            .map(|&(value, _)| value))
    }

    pub fn max_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<A>, DArrayError> {
        Ok(self
            .extremum_axis(axis, keepdims, Ordering::Greater)?
            .map(|&(value, _)| value))
    }

    /// Global index of the smallest element along `axis`; ties go to the
    /// lowest global index.
    pub fn argmin_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<i64>, DArrayError> {
        Ok(self
            .extremum_axis(axis, keepdims, Ordering::Less)?
            .map(|&(_, index)| index))
    }

    /// Global index of the largest element along `axis`.
    pub fn argmax_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<i64>, DArrayError> {
        Ok(self
            .extremum_axis(axis, keepdims, Ordering::Greater)?
            .map(|&(_, index)| index))
    }

    fn extremum_all(&self, what: &'static str, want: Ordering) -> Result<A, DArrayError> {
        if self.size() == 0 {
            return Err(DArrayError::EmptyReduction(what));
        }
        let first = self.local().iter().next().copied();
        let best = self.reduce_all(
            |shard| {
                shard.iter().fold(first, |best, &value| match best {
                    Some(current) if value.partial_cmp(&current) != Some(want) => Some(current),
                    _ => Some(value),
                })
            },
            |a, b| match (a, b) {
                (Some(x), Some(y)) if y.partial_cmp(&x) == Some(want) => Some(y),
                (Some(x), _) => Some(x),
                (None, other) => other,
            },
        )?;
        best.ok_or(DArrayError::EmptyReduction(what))
    }

    fn extremum_axis(
        &self,
        axis: usize,
        keepdims: bool,
        want: Ordering,
    ) -> Result<DArray<(A, i64)>, DArrayError> {
        check_axis(axis, self.ndim())?;
        if self.gshape()[axis] == 0 {
            return Err(DArrayError::EmptyReduction("arg-extremum"));
        }

        let offset = if self.split() == Some(axis) {
            self.global_offset() as i64
        } else {
            0
        };
        let identity = match want {
            Ordering::Greater => A::neg_infinity(),
            _ => A::infinity(),
        };

        self.reduce_axis(
            axis,
            keepdims,
            |lane| {
                lane.iter()
                    .enumerate()
                    .fold((identity, i64::MAX), |best, (i, &value)| {
                        pick(best, (value, offset + i as i64), want)
                    })
            },
            |a, b| pick(*a, *b, want),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_spmd, SelfComm};
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn data() -> Array2<f64> {
        array![
            [1.0, 5.0, -2.0],
            [4.0, 0.5, 7.0],
            [-3.0, 9.0, 2.0],
            [8.0, 1.0, 1.0],
            [2.0, 2.0, 6.0]
        ]
    }

    #[test]
    fn test_moments_merge_matches_direct() {
        let values = [1.0f64, 2.0, 4.0, 7.0, 11.0, 16.0];
        let direct = Moments::from_values(values.iter());
        let merged = Moments::from_values(values[..2].iter())
            .merge(&Moments::from_values(values[2..].iter()));
        assert_eq!(merged.count, direct.count);
        assert_relative_eq!(merged.mean, direct.mean, epsilon = 1e-12);
        assert_relative_eq!(merged.m2, direct.m2, epsilon = 1e-9);
        assert_relative_eq!(direct.variance(0), 27.805555555555557, epsilon = 1e-9);
    }

    #[test]
    fn test_sum_along_split_axis_is_replicated() {
        let results = run_spmd(3, |comm| {
            let x = DArray::from_array(data(), Some(0), comm).unwrap();
            let s = x.sum_axis(0, false).unwrap();
            (s.split(), s.into_local(), x.sum().unwrap())
        });
        for (split, sums, total) in results {
            assert_eq!(split, None);
            assert_eq!(sums, array![12.0, 17.5, 14.0].into_dyn());
            assert_relative_eq!(total, 43.5);
        }
    }

    #[test]
    fn test_sum_orthogonal_to_split_stays_split() {
        let results = run_spmd(2, |comm| {
            let x = DArray::from_array(data(), Some(0), comm).unwrap();
            let s = x.sum_axis(1, true).unwrap();
            (s.split(), s.gshape().to_vec(), s.gather().unwrap())
        });
        for (split, gshape, sums) in results {
            assert_eq!(split, Some(0));
            assert_eq!(gshape, vec![5, 1]);
            assert_eq!(sums, array![[4.0], [11.5], [8.0], [10.0], [10.0]].into_dyn());
        }
    }

    #[test]
    fn test_mean_and_var_independent_of_layout() {
        let reference = DArray::from_array(data(), None, SelfComm::shared()).unwrap();
        let mean_ref = reference.mean_axis(0, false).unwrap().into_local();
        let var_ref = reference.var_axis(0, 0, false).unwrap().into_local();
        let var_all_ref = reference.var(1).unwrap();

        for world in 1..=4 {
            let results = run_spmd(world, |comm| {
                let x = DArray::from_array(data(), Some(0), comm).unwrap();
                (
                    x.mean_axis(0, false).unwrap().into_local(),
                    x.var_axis(0, 0, false).unwrap().into_local(),
                    x.var(1).unwrap(),
                )
            });
            for (mean, var, var_all) in results {
                for (a, b) in mean.iter().zip(mean_ref.iter()) {
                    assert_relative_eq!(*a, *b, epsilon = 1e-12);
                }
                for (a, b) in var.iter().zip(var_ref.iter()) {
                    assert_relative_eq!(*a, *b, epsilon = 1e-9);
                }
                assert_relative_eq!(var_all, var_all_ref, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_argmin_along_split_axis_uses_global_index() {
        let results = run_spmd(3, |comm| {
            let x = DArray::from_array(data(), Some(0), comm).unwrap();
            (
                x.argmin_axis(0, false).unwrap().into_local(),
                x.min_axis(0, false).unwrap().into_local(),
                x.argmax_axis(0, false).unwrap().into_local(),
            )
        });
        for (argmin, min, argmax) in results {
            assert_eq!(argmin, array![2i64, 1, 0].into_dyn());
            assert_eq!(min, array![-3.0, 0.5, -2.0].into_dyn());
            assert_eq!(argmax, array![3i64, 2, 1].into_dyn());
        }
    }

    #[test]
    fn test_argmin_ties_prefer_lowest_global_index() {
        let tied = array![[3.0], [1.0], [4.0], [1.0], [1.0]];
        for world in 1..=5 {
            let results = run_spmd(world, |comm| {
                let x = DArray::from_array(tied.clone(), Some(0), comm).unwrap();
                x.argmin_axis(0, false).unwrap().into_local()
            });
            for argmin in results {
                assert_eq!(argmin, array![1i64].into_dyn());
            }
        }
    }

    #[test]
    fn test_argmin_across_columns_with_split_rows() {
        let results = run_spmd(2, |comm| {
            let x = DArray::from_array(data(), Some(0), comm).unwrap();
            let labels = x.argmin_axis(1, false).unwrap();
            (labels.split(), labels.gather().unwrap())
        });
        for (split, labels) in results {
            assert_eq!(split, Some(0));
            assert_eq!(labels, array![2i64, 1, 0, 1, 0].into_dyn());
        }
    }

    #[test]
    fn test_min_max_full() {
        let results = run_spmd(4, |comm| {
            let x = DArray::from_array(data(), Some(1), comm).unwrap();
            (x.min().unwrap(), x.max().unwrap())
        });
        for (min, max) in results {
            assert_eq!(min, -3.0);
            assert_eq!(max, 9.0);
        }
    }

    #[test]
    fn test_empty_reductions_are_errors() {
        let x = DArray::<f64>::zeros(&[0, 3], Some(0), SelfComm::shared()).unwrap();
        assert_eq!(x.sum().unwrap(), 0.0);
        assert!(matches!(x.mean(), Err(DArrayError::EmptyReduction(_))));
        assert!(matches!(
            x.argmin_axis(0, false),
            Err(DArrayError::EmptyReduction(_))
        ));
        assert!(matches!(
            x.sum_axis(2, false),
            Err(DArrayError::InvalidAxis { axis: 2, ndim: 2 })
        ));
    }
}
