//! Split-aware n-dimensional arrays.
//!
//! A [`DArray`] is a logical array whose data is partitioned along at most
//! one axis (the *split* axis) across the processes of a group. Each process
//! only stores its own contiguous block; arrays with no split axis are fully
//! replicated and identical on every process.

use crate::comm::{chunk_counts, displacements, Communicator};
use crate::error::DArrayError;
use ndarray::{
    concatenate, Array, ArrayD, ArrayView2, ArrayViewD, Axis, Dimension, Ix2, IxDyn, Slice, Zip,
};
use num_traits::Zero;
use std::fmt;
use std::sync::Arc;

/// Compute device holding the local shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
}

/// A distributed n-dimensional array.
///
/// Invariant: concatenating the local shards of all processes along the
/// split axis, in rank order, yields an array of shape `gshape`.
#[derive(Clone)]
pub struct DArray<A> {
    local: ArrayD<A>,
    gshape: Vec<usize>,
    split: Option<usize>,
    /// Extent of every rank's shard along the split axis (empty when replicated).
    counts: Vec<usize>,
    device: Device,
    comm: Arc<dyn Communicator>,
}

pub(crate) fn check_axis(axis: usize, ndim: usize) -> Result<(), DArrayError> {
    if axis >= ndim {
        return Err(DArrayError::InvalidAxis { axis, ndim });
    }
    Ok(())
}

impl<A> DArray<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_parts(
        local: ArrayD<A>,
        gshape: Vec<usize>,
        split: Option<usize>,
        counts: Vec<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Self {
        Self {
            local,
            gshape,
            split,
            counts,
            device: Device::Cpu,
            comm,
        }
    }

    /// Distribute an array that every process holds in full.
    ///
    /// Each process keeps the block of `array` it owns along `split`;
    /// with `split = None` the array is replicated.
    pub fn from_array<D: Dimension>(
        array: Array<A, D>,
        split: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, DArrayError> {
        let global = array.into_dyn();
        let counts = match split {
            Some(axis) => {
                check_axis(axis, global.ndim())?;
                chunk_counts(global.len_of(Axis(axis)), comm.size())
            }
            None => Vec::new(),
        };
        Self::from_global_with_counts(global, split, counts, comm)
    }

    /// Replicate `array` on every process.
    pub fn replicated<D: Dimension>(array: Array<A, D>, comm: Arc<dyn Communicator>) -> Self {
        let local = array.into_dyn();
        let gshape = local.shape().to_vec();
        Self::from_parts(local, gshape, None, Vec::new(), comm)
    }

    /// Assemble a distributed array from the shard each process already holds.
    ///
    /// This is a collective call when `split` is set: the global shape is
    /// inferred from every process's local shape, which must agree on all
    /// axes except `split`.
    pub fn from_local<D: Dimension>(
        local: Array<A, D>,
        split: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, DArrayError> {
        let local = local.into_dyn();
        let Some(axis) = split else {
            return Ok(Self::replicated(local, comm));
        };
        check_axis(axis, local.ndim())?;

        let shapes = comm.all_gather(local.shape().to_vec())?;
        let reference = local.shape();
        for shape in &shapes {
            let compatible = shape.len() == reference.len()
                && shape
                    .iter()
                    .zip(reference)
                    .enumerate()
                    .all(|(dim, (a, b))| dim == axis || a == b);
            if !compatible {
                return Err(DArrayError::InvalidShape(format!(
                    "local shards {:?} cannot be joined along axis {}",
                    shapes, axis
                )));
            }
        }

        let counts: Vec<usize> = shapes.iter().map(|shape| shape[axis]).collect();
        let mut gshape = reference.to_vec();
        gshape[axis] = counts.iter().sum();
        Ok(Self::from_parts(local, gshape, split, counts, comm))
    }

    /// Slice this process's block out of a global array using explicit counts.
    pub(crate) fn from_global_with_counts(
        global: ArrayD<A>,
        split: Option<usize>,
        counts: Vec<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, DArrayError> {
        let gshape = global.shape().to_vec();
        let Some(axis) = split else {
            return Ok(Self::from_parts(global, gshape, None, Vec::new(), comm));
        };
        check_axis(axis, gshape.len())?;
        if counts.len() != comm.size() || counts.iter().sum::<usize>() != gshape[axis] {
            return Err(DArrayError::InvalidShape(format!(
                "counts {:?} do not partition axis {} of length {}",
                counts, axis, gshape[axis]
            )));
        }

        let start = displacements(&counts)[comm.rank()];
        let end = start + counts[comm.rank()];
        let local = global
            .slice_axis(Axis(axis), Slice::from(start..end))
            .to_owned();
        Ok(Self::from_parts(local, gshape, split, counts, comm))
    }

    /// Global shape.
    pub fn gshape(&self) -> &[usize] {
        &self.gshape
    }

    /// Shape of this process's shard.
    pub fn lshape(&self) -> &[usize] {
        self.local.shape()
    }

    /// Partitioned axis, or `None` when replicated.
    pub fn split(&self) -> Option<usize> {
        self.split
    }

    pub fn ndim(&self) -> usize {
        self.gshape.len()
    }

    /// Total number of elements across all processes.
    pub fn size(&self) -> usize {
        self.gshape.iter().product()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn dtype(&self) -> &'static str {
        std::any::type_name::<A>()
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    /// This process's shard.
    pub fn local(&self) -> ArrayViewD<'_, A> {
        self.local.view()
    }

    pub fn into_local(self) -> ArrayD<A> {
        self.local
    }

    /// Whether the data is actually spread over more than one process.
    pub fn is_distributed(&self) -> bool {
        self.split.is_some() && self.comm.size() > 1
    }

    /// Per-rank extents along the split axis (empty when replicated).
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Per-rank extents and offsets along the split axis, `None` when replicated.
    pub fn counts_displs(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        self.split
            .map(|_| (self.counts.clone(), displacements(&self.counts)))
    }

    /// Global offset of this process's shard along the split axis.
    pub fn global_offset(&self) -> usize {
        match self.split {
            Some(_) => displacements(&self.counts)[self.comm.rank()],
            None => 0,
        }
    }

    /// Whether shards follow the default chunking of the split axis.
    pub fn is_balanced(&self) -> bool {
        match self.split {
            Some(axis) => self.counts == chunk_counts(self.gshape[axis], self.comm.size()),
            None => true,
        }
    }

    pub(crate) fn local_2d(&self) -> Result<ArrayView2<'_, A>, DArrayError> {
        self.local
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| {
                DArrayError::InvalidShape(format!("expected a 2-D array, got {:?}", self.gshape))
            })
    }

    /// Apply `f` to every element, keeping the layout.
    pub fn map<B, F>(&self, f: F) -> DArray<B>
    where
        B: Clone + Send + Sync + 'static,
        F: FnMut(&A) -> B,
    {
        DArray::from_parts(
            self.local.map(f),
            self.gshape.clone(),
            self.split,
            self.counts.clone(),
            Arc::clone(&self.comm),
        )
    }

    /// Combine two arrays elementwise.
    ///
    /// Both operands must have the same global shape and split axis. If only
    /// the per-rank extents differ, `other` is redistributed to match.
    pub fn zip_with<B, C, F>(&self, other: &DArray<B>, mut f: F) -> Result<DArray<C>, DArrayError>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        F: FnMut(&A, &B) -> C,
    {
        if self.gshape != other.gshape {
            return Err(DArrayError::ShapeMismatch {
                left: self.gshape.clone(),
                right: other.gshape.clone(),
            });
        }
        if self.split != other.split {
            return Err(DArrayError::SplitMismatch {
                left: self.split,
                right: other.split,
            });
        }

        let realigned;
        let other = if self.counts != other.counts {
            realigned = other.redistribute_like(self)?;
            &realigned
        } else {
            other
        };

        let local = Zip::from(&self.local)
            .and(&other.local)
            .map_collect(|a, b| f(a, b));
        Ok(DArray::from_parts(
            local,
            self.gshape.clone(),
            self.split,
            self.counts.clone(),
            Arc::clone(&self.comm),
        ))
    }

    /// Materialize the global array on every process. Collective.
    pub fn gather(&self) -> Result<ArrayD<A>, DArrayError> {
        let Some(axis) = self.split else {
            return Ok(self.local.clone());
        };
        let parts = self.comm.all_gather(self.local.clone())?;
        let views: Vec<ArrayViewD<'_, A>> = parts.iter().map(|part| part.view()).collect();
        concatenate(Axis(axis), &views).map_err(|err| DArrayError::InvalidShape(err.to_string()))
    }

    /// Repartition along `split` with balanced chunks. Collective.
    pub fn resplit(&self, split: Option<usize>) -> Result<Self, DArrayError> {
        if let Some(axis) = split {
            check_axis(axis, self.ndim())?;
        }
        if split == self.split && self.is_balanced() {
            return Ok(self.clone());
        }
        let global = self.gather()?;
        Self::from_array(global, split, Arc::clone(&self.comm))
    }

    /// Replicate the full array on every process. Collective.
    pub fn to_replicated(&self) -> Result<Self, DArrayError> {
        self.resplit(None)
    }

    /// Copy of `self` laid out exactly like `template`. Collective.
    pub(crate) fn redistribute_like<T>(&self, template: &DArray<T>) -> Result<Self, DArrayError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let global = self.gather()?;
        Self::from_global_with_counts(
            global,
            template.split,
            template.counts.clone(),
            Arc::clone(&self.comm),
        )
    }
}

impl<A> DArray<A>
where
    A: Clone + Zero + Send + Sync + 'static,
{
    /// Zero-filled array; each process only allocates its own shard.
    pub fn zeros(
        shape: &[usize],
        split: Option<usize>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, DArrayError> {
        let mut lshape = shape.to_vec();
        let counts = match split {
            Some(axis) => {
                check_axis(axis, shape.len())?;
                let counts = chunk_counts(shape[axis], comm.size());
                lshape[axis] = counts[comm.rank()];
                counts
            }
            None => Vec::new(),
        };
        Ok(Self::from_parts(
            ArrayD::zeros(IxDyn(&lshape)),
            shape.to_vec(),
            split,
            counts,
            comm,
        ))
    }
}

impl<A: fmt::Debug> fmt::Debug for DArray<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DArray")
            .field("gshape", &self.gshape)
            .field("split", &self.split)
            .field("rank", &self.comm.rank())
            .field("local", &self.local)
            .finish()
    }
}
