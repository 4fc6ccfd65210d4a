//! Process groups and the collective exchange primitive.
//!
//! Every distributed operation in this crate is built from a single
//! primitive, [`Communicator::exchange`], an all-gather of type-erased
//! payloads. All processes of a group must call collectives in the same
//! order; each call blocks until every process has reached it.

use crate::error::DArrayError;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Type-erased value contributed to a collective.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A handle identifying one process inside a process group.
pub trait Communicator: Send + Sync {
    /// Rank of this process, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Contribute `payload` and receive every process's payload, in rank order.
    fn exchange(&self, payload: Payload) -> Result<Vec<Payload>, DArrayError>;
}

impl dyn Communicator {
    /// Gather one value from every process, in rank order.
    pub fn all_gather<T>(&self, value: T) -> Result<Vec<T>, DArrayError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.exchange(Arc::new(value))?
            .iter()
            .map(|payload| {
                payload
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or(DArrayError::CollectiveTypeMismatch)
            })
            .collect()
    }

    /// Combine one value from every process.
    ///
    /// The fold runs in rank order on every process, so all processes end
    /// up with a bit-identical result even for non-associative float math.
    pub fn all_reduce<T, F>(&self, value: T, combine: F) -> Result<T, DArrayError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(T, T) -> T,
    {
        let mut parts = self.all_gather(value)?.into_iter();
        let first = parts.next().ok_or(DArrayError::CollectiveAborted)?;
        Ok(parts.fold(first, combine))
    }

    /// Replicate the value held by `root` to every process.
    ///
    /// Only the root's `value` is used; other processes may pass `None`.
    pub fn broadcast<T>(&self, root: usize, value: Option<T>) -> Result<T, DArrayError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if root >= self.size() {
            return Err(DArrayError::IndexOutOfBounds {
                index: root,
                len: self.size(),
            });
        }
        let value = if self.rank() == root { value } else { None };
        self.all_gather(value)?
            .into_iter()
            .nth(root)
            .flatten()
            .ok_or(DArrayError::MissingBroadcastValue(root))
    }

    /// Block until every process reaches this point.
    pub fn barrier(&self) -> Result<(), DArrayError> {
        self.exchange(Arc::new(()))?;
        Ok(())
    }
}

/// The trivial group containing only the calling process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelfComm;

impl SelfComm {
    /// Shared handle, ready to pass to array constructors.
    pub fn shared() -> Arc<dyn Communicator> {
        Arc::new(SelfComm)
    }
}

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(&self, payload: Payload) -> Result<Vec<Payload>, DArrayError> {
        Ok(vec![payload])
    }
}

struct RendezvousState {
    slots: Vec<Option<Payload>>,
    arrived: usize,
    generation: u64,
    departed: usize,
}

/// Shared meeting point of a [`ThreadComm`] group.
struct Rendezvous {
    size: usize,
    state: Mutex<RendezvousState>,
    turn: Condvar,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(RendezvousState {
                slots: vec![None; size],
                arrived: 0,
                generation: 0,
                departed: 0,
            }),
            turn: Condvar::new(),
        }
    }

    /// Reusable barrier. Fails instead of blocking forever once a member left.
    fn arrive(&self, state: &mut MutexGuard<'_, RendezvousState>) -> Result<(), DArrayError> {
        if state.departed > 0 {
            return Err(DArrayError::CollectiveAborted);
        }

        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.turn.notify_all();
            return Ok(());
        }

        while state.generation == generation {
            if state.departed > 0 {
                return Err(DArrayError::CollectiveAborted);
            }
            self.turn.wait(state);
        }
        Ok(())
    }

    fn depart(&self) {
        let mut state = self.state.lock();
        state.departed += 1;
        self.turn.notify_all();
    }
}

/// A process group whose members are threads of the current process.
///
/// Each member plays the role of one worker process: it owns its shards
/// and only ever sees its peers' data through collectives.
pub struct ThreadComm {
    rank: usize,
    group: Arc<Rendezvous>,
}

impl ThreadComm {
    /// Create the `size` member handles of a new group, in rank order.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        let group = Arc::new(Rendezvous::new(size));
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                group: Arc::clone(&group),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn exchange(&self, payload: Payload) -> Result<Vec<Payload>, DArrayError> {
        let mut state = self.group.state.lock();
        state.slots[self.rank] = Some(payload);
        self.group.arrive(&mut state)?;

        let gathered = state
            .slots
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(DArrayError::CollectiveAborted)?;

        // Nobody may deposit the next round before everyone has read this one.
        self.group.arrive(&mut state)?;
        Ok(gathered)
    }
}

/// Run `f` once per rank on a fresh [`ThreadComm`] group of `world_size`
/// members and return the per-rank results in rank order.
///
/// A rank that finishes early (or panics) releases peers still blocked in a
/// collective with [`DArrayError::CollectiveAborted`]. Panics are re-raised
/// once every rank has been joined.
///
/// # Panics
///
/// Panics if `world_size` is 0, or if any rank panicked.
pub fn run_spmd<F, R>(world_size: usize, f: F) -> Vec<R>
where
    F: Fn(Arc<dyn Communicator>) -> R + Sync,
    R: Send,
{
    assert!(world_size > 0, "world_size must be greater than 0");

    let members = ThreadComm::group(world_size);
    let outcomes: Vec<std::thread::Result<R>> = std::thread::scope(|scope| {
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                let f = &f;
                scope.spawn(move || {
                    let group = Arc::clone(&member.group);
                    let comm: Arc<dyn Communicator> = Arc::new(member);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(comm)));
                    group.depart();
                    outcome
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(Err))
            .collect()
    });

    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|payload| panic::resume_unwind(payload)))
        .collect()
}

/// Extent owned by each of `size` processes when `len` items are split
/// along one axis: contiguous blocks, the first `len % size` ranks get one
/// extra item.
pub fn chunk_counts(len: usize, size: usize) -> Vec<usize> {
    (0..size)
        .map(|rank| len / size + usize::from(rank < len % size))
        .collect()
}

/// Exclusive prefix sums of `counts`: the global offset of each rank's block.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0, |offset, &count| {
            let start = *offset;
            *offset += count;
            Some(start)
        })
        .collect()
}
