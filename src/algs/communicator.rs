//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are contiguous byte buffers. Sends and receives return waitable
//! handles; callers post every receive and send of a phase before waiting on
//! any of them. Messages between the same pair of ranks with the same tag are
//! delivered in order.
//!
//! The collectives provided on [`Communicator`] (`allgather`, `all_reduce_or`,
//! `all_reduce_max`, `barrier`) are built from point-to-point messages and
//! must be entered by every rank of the world.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use log::trace;

use crate::mesh_error::MeshAdaptError;

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

/// A 16-bit message tag. Phases derive their tags from a base with
/// [`CommTag::offset`] so concurrent phases never share one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(base: u16) -> Self {
        CommTag(base)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn offset(self, by: u16) -> Self {
        CommTag(self.0.wrapping_add(by))
    }
}

/// Tags used by the adaptation pipeline.
pub mod tags {
    use super::CommTag;

    pub const COLLECTIVE: CommTag = CommTag::new(0xA000);
    pub const TARGETS: CommTag = CommTag::new(0xA100);
    pub const MATCH: CommTag = CommTag::new(0xA200);
    pub const NUMBERING: CommTag = CommTag::new(0xA300);
    pub const GHOST_IDS: CommTag = CommTag::new(0xA400);
    pub const SIZE_REDUCE: CommTag = CommTag::new(0xA500);
    pub const SIZE_BCAST: CommTag = CommTag::new(0xA600);
}

/// Non-blocking point-to-point messaging plus collectives built on it.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive for the next message from `peer` with `tag`; its length
    /// is whatever the sender sent.
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Gather one buffer from every rank, indexed by rank.
    fn allgather(&self, tag: CommTag, mine: &[u8]) -> Result<Vec<Vec<u8>>, MeshAdaptError> {
        let me = self.rank();
        let n = self.size();
        let recvs: Vec<(usize, Self::RecvHandle)> = (0..n)
            .filter(|&r| r != me)
            .map(|r| (r, self.irecv(r, tag.as_u16())))
            .collect();
        let sends: Vec<Self::SendHandle> = (0..n)
            .filter(|&r| r != me)
            .map(|r| self.isend(r, tag.as_u16(), mine))
            .collect();

        let mut out = vec![Vec::new(); n];
        out[me] = mine.to_vec();
        let mut maybe_err = None;
        for (r, h) in recvs {
            match h.wait() {
                Some(data) => out[r] = data,
                None if maybe_err.is_none() => {
                    maybe_err = Some(MeshAdaptError::Comm {
                        neighbor: r,
                        reason: "allgather receive returned no data".into(),
                    });
                }
                None => {}
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Logical OR of `flag` over all ranks.
    fn all_reduce_or(&self, tag: CommTag, flag: bool) -> Result<bool, MeshAdaptError> {
        let all = self.allgather(tag, &[flag as u8])?;
        Ok(all.iter().any(|b| b.first().copied().unwrap_or(0) != 0))
    }

    /// Maximum of `value` over all ranks; NaN entries are ignored.
    fn all_reduce_max(&self, tag: CommTag, value: f64) -> Result<f64, MeshAdaptError> {
        let all = self.allgather(tag, &value.to_le_bytes())?;
        let mut max = f64::NEG_INFINITY;
        for (r, buf) in all.iter().enumerate() {
            let bytes: [u8; 8] = buf.as_slice().try_into().map_err(|_| MeshAdaptError::Comm {
                neighbor: r,
                reason: format!("expected 8 bytes for f64, got {}", buf.len()),
            })?;
            let v = f64::from_le_bytes(bytes);
            if v > max {
                max = v;
            }
        }
        Ok(max)
    }

    /// Sum of `value` over all ranks.
    fn all_reduce_sum(&self, tag: CommTag, value: u64) -> Result<u64, MeshAdaptError> {
        Ok(self.allgather_u64(tag, value)?.iter().sum())
    }

    /// Gather one `u64` from every rank.
    fn allgather_u64(&self, tag: CommTag, value: u64) -> Result<Vec<u64>, MeshAdaptError> {
        self.allgather(tag, &value.to_le_bytes())?
            .into_iter()
            .enumerate()
            .map(|(r, buf)| {
                let bytes: [u8; 8] = buf.as_slice().try_into().map_err(|_| MeshAdaptError::Comm {
                    neighbor: r,
                    reason: format!("expected 8 bytes for u64, got {}", buf.len()),
                })?;
                Ok(u64::from_le_bytes(bytes))
            })
            .collect()
    }

    fn barrier(&self, tag: CommTag) -> Result<(), MeshAdaptError> {
        self.allgather(tag, &[]).map(|_| ())
    }
}

/// Agree on the outcome of a phase across ranks.
///
/// Every rank must call this after a phase. If any rank failed, all fail:
/// ranks that failed keep their own error, the others get
/// [`MeshAdaptError::PeerAborted`].
pub fn agree<C, T>(
    comm: &C,
    phase: &'static str,
    result: Result<T, MeshAdaptError>,
) -> Result<T, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    if comm.size() <= 1 {
        return result;
    }
    let any_failed = comm.all_reduce_or(tags::COLLECTIVE, result.is_err())?;
    match result {
        Err(e) => Err(e),
        Ok(_) if any_failed => {
            trace!("[rank {}] peer failed during {phase}", comm.rank());
            Err(MeshAdaptError::PeerAborted { phase })
        }
        Ok(v) => Ok(v),
    }
}

/// Single-rank communicator; point-to-point calls are no-ops.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
}

// --- LocalComm: one world of ranks as threads in this process ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// In-process communicator: every rank of a world shares one FIFO mailbox.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Build the communicators of a world of `size` ranks; hand one to each thread.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }
}

pub struct LocalRecv {
    key: Key,
    mailbox: Arc<Mailbox>,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        self.mailbox
            .entry((self.rank, peer, tag))
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalRecv {
        LocalRecv {
            key: (peer, self.rank, tag),
            mailbox: self.mailbox.clone(),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::request::StaticScope;
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
        _universe: Option<Universe>,
    }

    impl MpiComm {
        /// Initialise MPI and wrap the world communicator.
        pub fn new() -> Result<Self, MeshAdaptError> {
            let universe = mpi::initialize()
                .ok_or_else(|| MeshAdaptError::Load("MPI is already initialised".into()))?;
            let world = universe.world();
            Ok(Self::wrap(world, Some(universe)))
        }

        /// Wrap an existing communicator (MPI initialised elsewhere).
        pub fn from_world(world: SimpleCommunicator) -> Self {
            Self::wrap(world, None)
        }

        fn wrap(world: SimpleCommunicator, universe: Option<Universe>) -> Self {
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                world,
                rank,
                size,
                _universe: universe,
            }
        }
    }

    /// Completes an immediate send and releases its buffer.
    pub struct MpiSend(Box<dyn FnOnce()>);

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            (self.0)();
            None
        }
    }

    pub struct MpiRecv<'a> {
        world: &'a SimpleCommunicator,
        peer: usize,
        tag: u16,
    }

    impl Wait for MpiRecv<'_> {
        fn wait(self) -> Option<Vec<u8>> {
            let (data, _status) = self
                .world
                .process_at_rank(self.peer as i32)
                .receive_vec_with_tag::<u8>(self.tag as i32);
            Some(data)
        }
    }

    impl<'c> Communicator for &'c MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv<'c>;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let raw: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the buffer stays alive until the request completes in `wait`.
            let data: &'static [u8] = unsafe { &*raw };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiSend(Box::new(move || {
                request.wait();
                // SAFETY: `raw` came from `Box::into_raw` and the send completed.
                drop(unsafe { Box::from_raw(raw) });
            }))
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv<'c> {
            MpiRecv {
                world: &self.world,
                peer,
                tag,
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn on_world<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(LocalComm) -> T + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = LocalComm::world(n)
            .into_iter()
            .map(|comm| {
                let f = f.clone();
                thread::spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn local_roundtrip_two_ranks() {
        let world = LocalComm::world(2);
        let recv = world[1].irecv(0, 7);
        world[0].isend(1, 7, &[1, 2, 3, 4]);
        assert_eq!(recv.wait().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn same_tag_messages_arrive_in_order() {
        let world = LocalComm::world(2);
        world[0].isend(1, 3, &[1]);
        world[0].isend(1, 3, &[2]);
        assert_eq!(world[1].irecv(0, 3).wait().unwrap(), vec![1]);
        assert_eq!(world[1].irecv(0, 3).wait().unwrap(), vec![2]);
    }

    #[test]
    fn worlds_do_not_share_mailboxes() {
        let a = LocalComm::world(2);
        let b = LocalComm::world(2);
        a[0].isend(1, 1, &[9]);
        b[0].isend(1, 1, &[5]);
        assert_eq!(b[1].irecv(0, 1).wait().unwrap(), vec![5]);
        assert_eq!(a[1].irecv(0, 1).wait().unwrap(), vec![9]);
    }

    #[test]
    fn allgather_and_reductions() {
        let out = on_world(3, |comm| {
            let r = comm.rank() as u64;
            let all = comm.allgather_u64(tags::COLLECTIVE, r * 10).unwrap();
            let any = comm.all_reduce_or(tags::COLLECTIVE, r == 2).unwrap();
            let max = comm.all_reduce_max(tags::COLLECTIVE, r as f64 * 0.5).unwrap();
            let sum = comm.all_reduce_sum(tags::COLLECTIVE, r + 1).unwrap();
            (all, any, max, sum)
        });
        for (all, any, max, sum) in out {
            assert_eq!(all, vec![0, 10, 20]);
            assert!(any);
            assert_eq!(max, 1.0);
            assert_eq!(sum, 6);
        }
    }

    #[test]
    fn agree_reports_peer_failure() {
        let out = on_world(2, |comm| {
            let local: Result<(), MeshAdaptError> = if comm.rank() == 1 {
                Err(MeshAdaptError::SizeField("bad".into()))
            } else {
                Ok(())
            };
            agree(&comm, "test", local)
        });
        assert_eq!(out[0], Err(MeshAdaptError::PeerAborted { phase: "test" }));
        assert_eq!(out[1], Err(MeshAdaptError::SizeField("bad".into())));
    }

    #[test]
    fn no_comm_collectives_are_local() {
        let comm = NoComm;
        assert_eq!(comm.allgather_u64(tags::COLLECTIVE, 4).unwrap(), vec![4]);
        assert!(!comm.all_reduce_or(tags::COLLECTIVE, false).unwrap());
        assert_eq!(agree(&comm, "x", Ok(3)), Ok(3));
    }
}
