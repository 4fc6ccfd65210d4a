use crate::darray::DArray;
use crate::error::DArrayError;
use ndarray::{s, Array1, Array2, ArrayView2, NdFloat};
use rayon::prelude::*;
use std::sync::Arc;

/// Pairwise distance between the rows of two arrays.
///
/// Implementors provide a feature-decomposable kernel: `partial` may be
/// called on a subset of the feature columns, and partials over disjoint
/// column sets are summed before `finalize` turns them into distances.
/// That is what lets [`PairwiseMetric::pairwise`] work on data split along
/// either the sample or the feature axis.
pub trait PairwiseMetric<A: NdFloat>: Send + Sync {
    /// Accumulated contribution of the given feature columns, shape (n, k).
    fn partial(
        &self,
        points: &ArrayView2<A>,
        centers: &ArrayView2<A>,
    ) -> Result<Array2<A>, DArrayError>;

    /// Map fully accumulated partials to distances.
    fn finalize(&self, accumulated: Array2<A>) -> Array2<A> {
        accumulated
    }

    /// Distances between every row of `points` (n, d) and every row of
    /// `centers` (k, d), as an (n, k) array.
    ///
    /// The result is partitioned like the sample axis of `points`: split
    /// along axis 0 when `points` is, replicated otherwise.
    ///
    /// When `points` is split along the feature axis, each process sums its
    /// band of features and the partial sums are added across processes.
    /// This matches an unsplit run exactly only when those sums are exact
    /// (e.g. integer-valued data). Otherwise distances may differ in the last
    /// bits, and near-ties between centers can resolve differently.
    fn pairwise(
        &self,
        points: &DArray<A>,
        centers: &DArray<A>,
    ) -> Result<DArray<A>, DArrayError> {
        if points.ndim() != 2 || centers.ndim() != 2 {
            return Err(DArrayError::InvalidShape(format!(
                "pairwise distances need 2-D operands, got {:?} and {:?}",
                points.gshape(),
                centers.gshape()
            )));
        }
        if points.gshape()[1] != centers.gshape()[1] {
            return Err(DArrayError::ShapeMismatch {
                left: points.gshape().to_vec(),
                right: centers.gshape().to_vec(),
            });
        }

        let centers = centers.to_replicated()?;
        let center_view = centers.local_2d()?;
        let point_view = points.local_2d()?;
        let comm = Arc::clone(points.comm());
        let gshape = vec![points.gshape()[0], centers.gshape()[0]];

        match points.split() {
            Some(1) => {
                // Each process holds a band of feature columns.
                let start = points.global_offset();
                let end = start + point_view.ncols();
                let center_band = center_view.slice(s![.., start..end]);
                let partial = self.partial(&point_view, &center_band)?;
                let accumulated = comm.all_reduce(partial, |a, b| a + b)?;
                Ok(DArray::replicated(self.finalize(accumulated), comm))
            }
            split => {
                let local = self.finalize(self.partial(&point_view, &center_view)?);
                Ok(DArray::from_parts(
                    local.into_dyn(),
                    gshape,
                    split,
                    points.counts().to_vec(),
                    comm,
                ))
            }
        }
    }
}

/// Fill an (n, k) matrix row by row in parallel.
fn fill_rows<A, F>(n: usize, k: usize, row_kernel: F) -> Result<Array2<A>, DArrayError>
where
    A: NdFloat,
    F: Fn(usize, &mut [A]) + Sync + Send,
{
    let mut values = vec![A::zero(); n * k];
    if k > 0 {
        values
            .par_chunks_mut(k)
            .enumerate()
            .for_each(|(i, row)| row_kernel(i, row));
    }
    Array2::from_shape_vec((n, k), values).map_err(|err| DArrayError::InvalidShape(err.to_string()))
}

/// Manhattan (L1) distance: sum over features of |x - c|.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Manhattan {
    /// Broadcast each point against all centers at once instead of looping
    /// over center rows. Both kernels give identical results.
    pub expand: bool,
}

impl Default for Manhattan {
    fn default() -> Self {
        Self { expand: true }
    }
}

impl<A: NdFloat> PairwiseMetric<A> for Manhattan {
    fn partial(
        &self,
        points: &ArrayView2<A>,
        centers: &ArrayView2<A>,
    ) -> Result<Array2<A>, DArrayError> {
        let k = centers.nrows();
        if self.expand {
            fill_rows(points.nrows(), k, |i, row| {
                // (k, d) block for a single point, never (n, k, d)
                let diff = centers - &points.row(i);
                let sums = diff.mapv(A::abs).sum_axis(ndarray::Axis(1));
                row.iter_mut().zip(sums.iter()).for_each(|(out, &v)| *out = v);
            })
        } else {
            fill_rows(points.nrows(), k, |i, row| {
                let x = points.row(i);
                for (j, out) in row.iter_mut().enumerate() {
                    *out = x
                        .iter()
                        .zip(centers.row(j).iter())
                        .fold(A::zero(), |acc, (&a, &b)| acc + (a - b).abs());
                }
            })
        }
    }
}

/// Compute squared L2 norms for each row of a 2D array
pub fn compute_squared_norms<A: NdFloat>(data: &ArrayView2<A>) -> Array1<A> {
    (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let row = data.row(i);
            row.dot(&row)
        })
        .collect::<Vec<A>>()
        .into()
}

/// Euclidean (L2) distance.
///
/// Uses the identity ||x - c||^2 = ||x||^2 + ||c||^2 - 2*x.c, which sums
/// cleanly over disjoint feature bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Euclidean;

impl<A: NdFloat> PairwiseMetric<A> for Euclidean {
    fn partial(
        &self,
        points: &ArrayView2<A>,
        centers: &ArrayView2<A>,
    ) -> Result<Array2<A>, DArrayError> {
        let point_norms = compute_squared_norms(points);
        let center_norms = compute_squared_norms(centers);
        let dot_products = points.dot(&centers.t());
        let two = A::one() + A::one();

        fill_rows(points.nrows(), centers.nrows(), |i, row| {
            let x_norm = point_norms[i];
            for (j, out) in row.iter_mut().enumerate() {
                *out = x_norm + center_norms[j] - two * dot_products[[i, j]];
            }
        })
    }

    fn finalize(&self, accumulated: Array2<A>) -> Array2<A> {
        // Cancellation can leave tiny negatives where the distance is zero.
        accumulated.mapv(|squared| squared.max(A::zero()).sqrt())
    }
}
