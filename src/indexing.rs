//! Comparisons, row selection and boolean indexing.

use crate::darray::DArray;
use crate::error::DArrayError;
use ndarray::{Array1, Array2, ArrayD, Axis, Dimension, Ix1, IxDyn, Slice};
use num_traits::Zero;
use std::sync::Arc;

impl<A> DArray<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Whether two arrays hold the same values. Collective.
    ///
    /// Each process compares its own shards (stopping at the first
    /// difference), then all processes agree on a single answer. Operands
    /// with different layouts are realigned first.
    pub fn equal(&self, other: &DArray<A>) -> Result<bool, DArrayError>
    where
        A: PartialEq,
    {
        if self.gshape() != other.gshape() {
            return Err(DArrayError::ShapeMismatch {
                left: self.gshape().to_vec(),
                right: other.gshape().to_vec(),
            });
        }

        let realigned;
        let other = if self.split() != other.split() || self.counts() != other.counts() {
            realigned = other.redistribute_like(self)?;
            &realigned
        } else {
            other
        };

        let local_equal = self
            .local()
            .iter()
            .zip(other.local().iter())
            .all(|(a, b)| a == b);
        let votes = self.comm().all_gather(local_equal)?;
        Ok(votes.into_iter().all(|vote| vote))
    }

    /// Rows at the given global indices, replicated on every process.
    /// Collective when the array is split.
    pub fn take_rows(&self, indices: &[usize]) -> Result<DArray<A>, DArrayError> {
        if self.ndim() == 0 {
            return Err(DArrayError::InvalidShape(
                "cannot take rows of a 0-d array".to_string(),
            ));
        }
        let n_rows = self.gshape()[0];
        if let Some(&index) = indices.iter().find(|&&index| index >= n_rows) {
            return Err(DArrayError::IndexOutOfBounds {
                index,
                len: n_rows,
            });
        }

        let mut gshape = self.gshape().to_vec();
        gshape[0] = indices.len();
        let comm = Arc::clone(self.comm());

        if self.split() != Some(0) {
            let local = self.local().select(Axis(0), indices);
            let taken =
                DArray::from_parts(local, gshape, self.split(), self.counts().to_vec(), comm);
            return taken.to_replicated();
        }

        // Each row has exactly one owner, which contributes it by position.
        let offset = self.global_offset();
        let owned_end = offset + self.lshape()[0];
        let shard = self.local();
        let owned: Vec<(usize, Vec<A>)> = indices
            .iter()
            .enumerate()
            .filter(|(_, &index)| (offset..owned_end).contains(&index))
            .map(|(position, &index)| {
                let row = shard.index_axis(Axis(0), index - offset);
                (position, row.iter().cloned().collect())
            })
            .collect();

        let mut rows: Vec<Option<Vec<A>>> = vec![None; indices.len()];
        for contribution in comm.all_gather(owned)? {
            for (position, row) in contribution {
                rows[position] = Some(row);
            }
        }
        let flat: Vec<A> = rows.into_iter().flatten().flatten().collect();
        let local = ArrayD::from_shape_vec(IxDyn(&gshape), flat)
            .map_err(|err| DArrayError::InvalidShape(err.to_string()))?;
        Ok(DArray::from_parts(local, gshape, None, Vec::new(), comm))
    }

    /// This process's slice of a row mask, aligned with its local rows.
    fn local_row_mask(&self, mask: &DArray<bool>) -> Result<Array1<bool>, DArrayError> {
        if self.ndim() == 0 || mask.ndim() != 1 || mask.gshape()[0] != self.gshape()[0] {
            return Err(DArrayError::ShapeMismatch {
                left: self.gshape().to_vec(),
                right: mask.gshape().to_vec(),
            });
        }

        let local = match (self.split(), mask.split()) {
            (Some(0), Some(0)) if mask.counts() == self.counts() => mask.local().to_owned(),
            (Some(0), _) => {
                let start = self.global_offset();
                let end = start + self.lshape()[0];
                mask.gather()?
                    .slice_axis(Axis(0), Slice::from(start..end))
                    .to_owned()
            }
            (_, None) => mask.local().to_owned(),
            (_, Some(_)) => mask.gather()?,
        };
        local
            .into_dimensionality::<Ix1>()
            .map_err(|err| DArrayError::InvalidShape(err.to_string()))
    }

    /// Keep only the rows where `mask` is true.
    ///
    /// The split axis is preserved; when rows are split the shards may
    /// become uneven. Collective.
    pub fn compress_rows(&self, mask: &DArray<bool>) -> Result<DArray<A>, DArrayError> {
        let keep = self.local_row_mask(mask)?;
        let selected: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag)
            .map(|(row, _)| row)
            .collect();
        let local = self.local().select(Axis(0), &selected);

        let mut gshape = self.gshape().to_vec();
        let counts = if self.split() == Some(0) {
            let counts = self.comm().all_gather(selected.len())?;
            gshape[0] = counts.iter().sum();
            counts
        } else {
            gshape[0] = selected.len();
            self.counts().to_vec()
        };
        Ok(DArray::from_parts(
            local,
            gshape,
            self.split(),
            counts,
            Arc::clone(self.comm()),
        ))
    }

    /// Choose elementwise from `if_true` where `cond` holds, else from
    /// `if_false`. All three operands must share shape and split axis.
    pub fn where_(
        cond: &DArray<bool>,
        if_true: &DArray<A>,
        if_false: &DArray<A>,
    ) -> Result<DArray<A>, DArrayError> {
        let picked = cond.zip_with(if_true, |&flag, value| (flag, value.clone()))?;
        picked.zip_with(if_false, |(flag, value), other| {
            if *flag {
                value.clone()
            } else {
                other.clone()
            }
        })
    }
}

impl<A> DArray<A>
where
    A: Clone + Zero + Send + Sync + 'static,
{
    /// Zero out every row where `mask` is false, keeping the shape.
    pub fn mask_rows(&self, mask: &DArray<bool>) -> Result<DArray<A>, DArrayError> {
        let keep = self.local_row_mask(mask)?;
        let mut local = self.local().to_owned();
        for (mut row, &flag) in local.axis_iter_mut(Axis(0)).zip(keep.iter()) {
            if !flag {
                row.fill(A::zero());
            }
        }
        Ok(DArray::from_parts(
            local,
            self.gshape().to_vec(),
            self.split(),
            self.counts().to_vec(),
            Arc::clone(self.comm()),
        ))
    }
}

impl DArray<bool> {
    /// Global coordinates of every true element, one row per element.
    ///
    /// The result is split along its first axis when the input is split
    /// (collective), replicated otherwise.
    pub fn nonzero(&self) -> Result<DArray<i64>, DArrayError> {
        let ndim = self.ndim();
        let offset = self.global_offset();
        let split = self.split();

        let mut coords = Vec::new();
        let mut count = 0;
        for (index, &flag) in self.local().indexed_iter() {
            if !flag {
                continue;
            }
            for (dim, &i) in index.slice().iter().enumerate() {
                let global = if split == Some(dim) { i + offset } else { i };
                coords.push(global as i64);
            }
            count += 1;
        }

        let local = Array2::from_shape_vec((count, ndim), coords)
            .map_err(|err| DArrayError::InvalidShape(err.to_string()))?;
        let comm = Arc::clone(self.comm());
        match split {
            Some(_) => DArray::from_local(local, Some(0), comm),
            None => Ok(DArray::replicated(local, comm)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_spmd, SelfComm};
    use ndarray::array;

    fn points() -> Array2<f64> {
        array![[1.0, 2.0], [1.0, 3.0], [8.0, 8.0], [9.0, 9.0], [0.0, 0.0]]
    }

    #[test]
    fn test_equal_across_layouts() {
        let results = run_spmd(3, |comm| {
            let a = DArray::from_array(points(), Some(0), Arc::clone(&comm)).unwrap();
            let b = DArray::from_array(points(), Some(1), Arc::clone(&comm)).unwrap();
            let mut changed = points();
            changed[[4, 1]] = 0.5;
            let c = DArray::from_array(changed, Some(0), comm).unwrap();
            (a.equal(&b).unwrap(), a.equal(&c).unwrap())
        });
        for (same, different) in results {
            assert!(same);
            assert!(!different);
        }
    }

    #[test]
    fn test_equal_shape_mismatch() {
        let comm = SelfComm::shared();
        let a = DArray::from_array(points(), None, Arc::clone(&comm)).unwrap();
        let b = DArray::from_array(array![[1.0, 2.0]], None, comm).unwrap();
        assert!(matches!(
            a.equal(&b),
            Err(DArrayError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_take_rows_from_any_layout() {
        for split in [None, Some(0), Some(1)] {
            let results = run_spmd(3, |comm| {
                let x = DArray::from_array(points(), split, comm).unwrap();
                let rows = x.take_rows(&[3, 0, 3]).unwrap();
                (rows.split(), rows.into_local())
            });
            for (row_split, rows) in results {
                assert_eq!(row_split, None);
                assert_eq!(
                    rows,
                    array![[9.0, 9.0], [1.0, 2.0], [9.0, 9.0]].into_dyn()
                );
            }
        }
    }

    #[test]
    fn test_take_rows_out_of_bounds() {
        let x = DArray::from_array(points(), Some(0), SelfComm::shared()).unwrap();
        assert_eq!(
            x.take_rows(&[5]).unwrap_err(),
            DArrayError::IndexOutOfBounds { index: 5, len: 5 }
        );
    }

    #[test]
    fn test_mask_then_compress_rows() {
        let results = run_spmd(2, |comm| {
            let x = DArray::from_array(points(), Some(0), Arc::clone(&comm)).unwrap();
            let mask = DArray::from_array(
                array![true, false, true, false, true],
                Some(0),
                comm,
            )
            .unwrap();
            let masked = x.mask_rows(&mask).unwrap();
            let compressed = x.compress_rows(&mask).unwrap();
            (
                masked.gather().unwrap(),
                compressed.gshape().to_vec(),
                compressed.counts().to_vec(),
                compressed.gather().unwrap(),
            )
        });
        for (masked, gshape, counts, compressed) in results {
            assert_eq!(
                masked,
                array![[1.0, 2.0], [0.0, 0.0], [8.0, 8.0], [0.0, 0.0], [0.0, 0.0]].into_dyn()
            );
            assert_eq!(gshape, vec![3, 2]);
            assert_eq!(counts, vec![2, 1]);
            assert_eq!(
                compressed,
                array![[1.0, 2.0], [8.0, 8.0], [0.0, 0.0]].into_dyn()
            );
        }
    }

    #[test]
    fn test_compress_rows_with_replicated_mask_on_column_split() {
        let results = run_spmd(2, |comm| {
            let x = DArray::from_array(points(), Some(1), Arc::clone(&comm)).unwrap();
            let mask =
                DArray::from_array(array![false, true, true, false, false], None, comm).unwrap();
            let compressed = x.compress_rows(&mask).unwrap();
            (compressed.split(), compressed.gather().unwrap())
        });
        for (split, compressed) in results {
            assert_eq!(split, Some(1));
            assert_eq!(compressed, array![[1.0, 3.0], [8.0, 8.0]].into_dyn());
        }
    }

    #[test]
    fn test_nonzero_global_coordinates() {
        let flags = array![[false, true, false], [true, true, false], [false, false, true]];
        let results = run_spmd(2, |comm| {
            let x = DArray::from_array(flags.clone(), Some(0), comm).unwrap();
            let nz = x.nonzero().unwrap();
            (nz.split(), nz.gshape().to_vec(), nz.gather().unwrap())
        });
        for (split, gshape, coords) in results {
            assert_eq!(split, Some(0));
            assert_eq!(gshape, vec![4, 2]);
            assert_eq!(
                coords,
                array![[0i64, 1], [1, 0], [1, 1], [2, 2]].into_dyn()
            );
        }

        let replicated = DArray::from_array(flags, None, SelfComm::shared()).unwrap();
        let nz = replicated.nonzero().unwrap();
        assert_eq!(nz.split(), None);
        assert_eq!(nz.gshape(), &[4, 2]);
    }

    #[test]
    fn test_where_selects_elementwise() {
        let results = run_spmd(2, |comm| {
            let a = DArray::from_array(
                array![[0.0, 1.0, 2.0], [0.0, 2.0, 4.0], [0.0, 3.0, 6.0]],
                Some(0),
                Arc::clone(&comm),
            )
            .unwrap();
            let fallback = a.map(|_| -1.0);
            let cond = a.map(|&v| v < 4.0);
            let picked = DArray::where_(&cond, &a, &fallback).unwrap();

            let other_split = fallback.resplit(Some(1)).unwrap();
            let mismatch = DArray::where_(&cond, &a, &other_split).map(|_| ());
            (picked.gather().unwrap(), mismatch)
        });
        for (picked, mismatch) in results {
            assert_eq!(
                picked,
                array![[0.0, 1.0, 2.0], [0.0, 2.0, -1.0], [0.0, 3.0, -1.0]].into_dyn()
            );
            assert!(matches!(mismatch, Err(DArrayError::SplitMismatch { .. })));
        }
    }
}
