//! Random draws that every process agrees on.
//!
//! All processes seed the same generator and consume it in the same order,
//! so "random" choices (sample indices, initial centers) are identical
//! everywhere without extra communication.

use crate::comm::Communicator;
use crate::darray::DArray;
use crate::error::DArrayError;
use ndarray::{ArrayD, IxDyn, NdFloat};
use ndarray_rand::RandomExt;
use rand::distributions::uniform::SampleUniform;
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Generator seeded identically on every process of `comm`.
///
/// Without an explicit seed, rank 0 draws one from OS entropy and
/// broadcasts it. Collective in that case.
pub fn consistent_rng(
    comm: &Arc<dyn Communicator>,
    seed: Option<u64>,
) -> Result<ChaCha8Rng, DArrayError> {
    let seed = match seed {
        Some(seed) => seed,
        None => {
            let drawn = (comm.rank() == 0).then(rand::random::<u64>);
            comm.broadcast(0, drawn)?
        }
    };
    Ok(ChaCha8Rng::seed_from_u64(seed))
}

impl<A> DArray<A>
where
    A: NdFloat + SampleUniform,
{
    /// Uniformly distributed values in `[low, high)`.
    ///
    /// Every process must pass a generator in the same state; each one
    /// draws the full array and keeps its own block.
    pub fn random_uniform<R: Rng>(
        shape: &[usize],
        low: A,
        high: A,
        split: Option<usize>,
        rng: &mut R,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self, DArrayError> {
        let global = ArrayD::random_using(IxDyn(shape), Uniform::new(low, high), rng);
        DArray::from_array(global, split, comm)
    }
}

/// Draw a global index of a 1-D weight array with probability proportional
/// to its weight. Returns `None` when all weights are zero.
///
/// Split weights are searched without gathering them: each process locates
/// the target inside its own block using the prefix of the other blocks'
/// totals, then the owner's answer is shared.
pub(crate) fn weighted_index<A, R>(
    weights: &DArray<A>,
    rng: &mut R,
) -> Result<Option<usize>, DArrayError>
where
    A: NdFloat,
    R: Rng,
{
    if weights.ndim() != 1 {
        return Err(DArrayError::InvalidShape(format!(
            "weights must be 1-D, got {:?}",
            weights.gshape()
        )));
    }

    let total = weights.sum()?;
    let draw: f64 = rng.gen();
    if !(total > A::zero()) {
        return Ok(None);
    }
    let target = total * num_traits::cast::<f64, A>(draw).unwrap_or_else(A::zero);

    let local: Vec<A> = weights.local().iter().copied().collect();
    let before = match weights.split() {
        Some(_) => {
            let block_sums = weights
                .comm()
                .all_gather(local.iter().fold(A::zero(), |acc, &w| acc + w))?;
            block_sums[..weights.comm().rank()]
                .iter()
                .fold(A::zero(), |acc, &s| acc + s)
        }
        None => A::zero(),
    };

    let offset = weights.global_offset();
    let hit = locate_in_block(&local, before, target).map(|i| offset + i);
    let last_positive = local
        .iter()
        .rposition(|&w| w > A::zero())
        .map(|i| offset + i);

    let (hit, last_positive) = match weights.split() {
        Some(_) => {
            let answers = weights.comm().all_gather((hit, last_positive))?;
            (
                answers.iter().find_map(|&(hit, _)| hit),
                answers.iter().filter_map(|&(_, last)| last).max(),
            )
        }
        None => (hit, last_positive),
    };

    // Rounding can leave the target just past the accumulated total.
    Ok(hit.or(last_positive))
}

/// Position in `block` where the running total, starting at `before`,
/// first exceeds `target`.
///
/// Only positive weights can be hit: the prefix of the other blocks is
/// summed in a different order than a single running total would be, and
/// may overshoot `target` by a rounding error at a block boundary.
fn locate_in_block<A: NdFloat>(block: &[A], before: A, target: A) -> Option<usize> {
    let mut running = before;
    block.iter().position(|&w| {
        running += w;
        w > A::zero() && running > target
    })
}
