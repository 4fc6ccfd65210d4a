//! Order statistics that need a globally sorted view: median, sort, unique.
//!
//! None of these decompose into per-process partials, so whenever the axis
//! of interest is the split axis the data along it is gathered first.

use crate::darray::{check_axis, DArray};
use crate::error::DArrayError;
use ndarray::{Array1, ArrayD, ArrayView1, Axis, NdFloat};
use std::cmp::Ordering;
use std::sync::Arc;

fn total_order<A: PartialOrd>(a: &A, b: &A) -> Ordering {
    a.partial_cmp(b).unwrap_or(Ordering::Equal)
}

/// Median of one lane; even-length lanes average the two middle values.
fn lane_median<A: NdFloat>(lane: ArrayView1<'_, A>) -> A {
    let mut values = lane.to_vec();
    if values.is_empty() {
        return A::nan();
    }
    values.sort_unstable_by(total_order);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / (A::one() + A::one())
    }
}

impl<A: NdFloat> DArray<A> {
    /// Median along `axis`.
    ///
    /// An empty axis is an error; callers are expected to exclude empty
    /// selections beforehand.
    pub fn median_axis(&self, axis: usize, keepdims: bool) -> Result<DArray<A>, DArrayError> {
        check_axis(axis, self.ndim())?;
        if self.gshape()[axis] == 0 {
            return Err(DArrayError::EmptyReduction("median"));
        }

        let gathered;
        let source = if self.split() == Some(axis) {
            gathered = self.to_replicated()?;
            &gathered
        } else {
            self
        };
        // The axis is never split here, so the merge step is unused.
        source.reduce_axis(axis, keepdims, lane_median, |a, _| *a)
    }

    /// Median of all elements.
    pub fn median(&self) -> Result<A, DArrayError> {
        if self.size() == 0 {
            return Err(DArrayError::EmptyReduction("median"));
        }
        let global = self.gather()?;
        let flat: Array1<A> = global.iter().copied().collect();
        Ok(lane_median(flat.view()))
    }

    /// Sort along `axis`, returning the sorted values and the global indices
    /// they came from. Equal values keep their original order.
    ///
    /// The result keeps the input's split axis; sorting along the split axis
    /// rebalances the shards.
    pub fn sort_axis(
        &self,
        axis: usize,
        descending: bool,
    ) -> Result<(DArray<A>, DArray<i64>), DArrayError> {
        check_axis(axis, self.ndim())?;

        let along_split = self.split() == Some(axis);
        let mut values: ArrayD<A> = if along_split {
            self.gather()?
        } else {
            self.local().to_owned()
        };
        let mut indices = ArrayD::<i64>::zeros(values.raw_dim());

        for (mut value_lane, mut index_lane) in values
            .lanes_mut(Axis(axis))
            .into_iter()
            .zip(indices.lanes_mut(Axis(axis)))
        {
            let mut pairs: Vec<(A, i64)> = value_lane.iter().copied().zip(0..).collect();
            pairs.sort_by(|a, b| {
                let order = total_order(&a.0, &b.0);
                if descending {
                    order.reverse()
                } else {
                    order
                }
            });
            for ((value, index), (value_slot, index_slot)) in pairs
                .into_iter()
                .zip(value_lane.iter_mut().zip(index_lane.iter_mut()))
            {
                *value_slot = value;
                *index_slot = index;
            }
        }

        let comm = Arc::clone(self.comm());
        if along_split {
            Ok((
                DArray::from_array(values, self.split(), Arc::clone(&comm))?,
                DArray::from_array(indices, self.split(), comm)?,
            ))
        } else {
            let gshape = self.gshape().to_vec();
            let counts = self.counts().to_vec();
            Ok((
                DArray::from_parts(
                    values,
                    gshape.clone(),
                    self.split(),
                    counts.clone(),
                    Arc::clone(&comm),
                ),
                DArray::from_parts(indices, gshape, self.split(), counts, comm),
            ))
        }
    }

    /// Sorted distinct values of the whole array, replicated on every process.
    pub fn unique(&self) -> Result<DArray<A>, DArrayError> {
        let mut local: Vec<A> = self.local().iter().copied().collect();
        local.sort_unstable_by(total_order);
        local.dedup();

        let mut values = match self.split() {
            Some(_) => self
                .comm()
                .all_gather(local)?
                .into_iter()
                .flatten()
                .collect::<Vec<A>>(),
            None => local,
        };
        values.sort_unstable_by(total_order);
        values.dedup();

        Ok(DArray::replicated(
            Array1::from(values),
            Arc::clone(self.comm()),
        ))
    }

    /// Distinct values of a 1-D array plus, for every element, the position
    /// of its value among them. The inverse keeps the input's layout.
    pub fn unique_inverse(&self) -> Result<(DArray<A>, DArray<i64>), DArrayError> {
        if self.ndim() != 1 {
            return Err(DArrayError::InvalidShape(format!(
                "unique_inverse expects a 1-D array, got {:?}",
                self.gshape()
            )));
        }
        let uniques = self.unique()?;
        let sorted: Vec<A> = uniques.local().iter().copied().collect();
        let inverse = self.map(|value| {
            sorted
                .binary_search_by(|candidate| total_order(candidate, value))
                .map_or(-1, |position| position as i64)
        });
        Ok((uniques, inverse))
    }
}
