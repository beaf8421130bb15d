//! Thin façade over intra-process or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte slices; receives carry no length up front,
//! the payload size is discovered on arrival. All handles are waitable and
//! non-blocking, the halo walker calls `.wait()` before it trusts a buffer.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Non-blocking point-to-point communication interface.
///
/// The collective helpers default to their single-rank identities so a
/// serial backend only implements the message pair.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    /// Global sum, reproducible for a fixed rank count.
    fn allreduce_sum(&self, value: f64) -> f64 {
        value
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for single-rank operation.
///
/// Every primitive neighbor is local under `NoComm`, so the halo walker
/// never addresses a peer; reaching `isend`/`irecv` is a partitioning bug.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, peer: usize, _tag: u16, _buf: &[u8]) {
        panic!("NoComm cannot message peer {peer}; the partition claims remote neighbors")
    }
    fn irecv(&self, peer: usize, _tag: u16) {
        panic!("NoComm cannot receive from peer {peer}; the partition claims remote neighbors")
    }
}

// (group, src, dst, tag) -> FIFO of payloads, matching MPI's per-channel
// ordering guarantee.
type MailKey = (u64, usize, usize, u16);

// Queues sit behind their own mutex so waiting receivers poll through the
// map's shared guard instead of write-locking a whole shard per probe.
static MAILBOX: Lazy<DashMap<MailKey, Mutex<VecDeque<Bytes>>>> = Lazy::new(DashMap::new);
// (group, round, rank) -> contribution
static REDUCE: Lazy<DashMap<(u64, u64, usize), f64>> = Lazy::new(DashMap::new);
// (group, round) -> arrival count
static ARRIVALS: Lazy<DashMap<(u64, u64), u64>> = Lazy::new(DashMap::new);
static GROUP_IDS: AtomicU64 = AtomicU64::new(0);

/// In-process multi-rank backend for tests: one `ThreadComm` per simulated
/// rank, all sharing a mailbox keyed by group id.
///
/// Collective bookkeeping entries are never reclaimed; the backend is meant
/// for short-lived test groups, not production runs.
#[derive(Debug)]
pub struct ThreadComm {
    group: u64,
    rank: usize,
    size: usize,
    round: AtomicU64,
}

impl ThreadComm {
    /// Creates one communicator per simulated rank.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0);
        let group = GROUP_IDS.fetch_add(1, Relaxed);
        (0..size)
            .map(|rank| ThreadComm {
                group,
                rank,
                size,
                round: AtomicU64::new(0),
            })
            .collect()
    }
}

/// Deferred receive: the matching payload is claimed inside `wait`.
pub struct MailboxHandle {
    key: MailKey,
}

impl Wait for MailboxHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(queue) = MAILBOX.get(&self.key) {
                if let Some(bytes) = queue.lock().pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = MailboxHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        MAILBOX
            .entry((self.group, self.rank, peer, tag))
            .or_default()
            .lock()
            .push_back(Bytes::from(buf.to_vec()));
    }

    fn irecv(&self, peer: usize, tag: u16) -> MailboxHandle {
        MailboxHandle {
            key: (self.group, peer, self.rank, tag),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        let round = self.round.fetch_add(1, Relaxed);
        *ARRIVALS.entry((self.group, round)).or_insert(0) += 1;
        loop {
            if ARRIVALS
                .get(&(self.group, round))
                .map(|c| *c >= self.size as u64)
                .unwrap_or(false)
            {
                return;
            }
            std::thread::yield_now();
        }
    }

    fn allreduce_sum(&self, value: f64) -> f64 {
        let round = self.round.fetch_add(1, Relaxed);
        REDUCE.insert((self.group, round, self.rank), value);
        // Summation in rank order keeps the result identical on all ranks.
        let mut total = 0.0;
        for rank in 0..self.size {
            loop {
                if let Some(v) = REDUCE.get(&(self.group, round, rank)) {
                    total += *v;
                    break;
                }
                std::thread::yield_now();
            }
        }
        total
    }
}

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::collective::SystemOperation;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// MPI world backend. Sends go out eagerly in standard mode; receives
    /// are deferred into `wait`, where the payload length is taken from the
    /// matched message.
    #[derive(Clone)]
    pub struct MpiComm {
        _universe: Arc<mpi::environment::Universe>,
        world: Arc<SimpleCommunicator>,
    }

    impl MpiComm {
        /// Initializes MPI (once per process).
        ///
        /// # Panics
        /// Panics if MPI was already initialized by other means.
        pub fn new() -> Self {
            let universe = mpi::initialize()
                .unwrap_or_else(|| panic!("MPI is already initialized in this process"));
            let world = universe.world();
            MpiComm {
                _universe: Arc::new(universe),
                world: Arc::new(world),
            }
        }
    }

    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: usize,
        tag: u16,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(self.tag as i32);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecvHandle {
            MpiRecvHandle {
                world: Arc::clone(&self.world),
                peer,
                tag,
            }
        }

        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn allreduce_sum(&self, value: f64) -> f64 {
            let mut out = 0.0;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::sum());
            out
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
