//! Sparse neighbor exchange.
//!
//! Each rank names the peers it has something for. The target lists are
//! allgathered first, so every rank knows exactly which peers will send to it
//! and posts one receive per sender; a rank with nothing to say still takes
//! part in the allgather.

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::algs::communicator::{tags, CommTag, Communicator, Wait};
use crate::algs::wire;
use crate::mesh_error::MeshAdaptError;

/// Send `outgoing[peer]` to each listed peer and return what every sender sent
/// to this rank, keyed by sender.
pub fn neighbor_exchange<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<u8>>,
) -> Result<BTreeMap<usize, Vec<u8>>, MeshAdaptError>
where
    C: Communicator + ?Sized,
{
    let me = comm.rank();
    if let Some(&bad) = outgoing.keys().find(|&&p| p >= comm.size() || p == me) {
        return Err(MeshAdaptError::Comm {
            neighbor: bad,
            reason: format!("rank {me} cannot address peer {bad}"),
        });
    }
    if comm.size() <= 1 {
        return Ok(BTreeMap::new());
    }

    let targets: Vec<u64> = outgoing.keys().map(|&p| p as u64).collect();
    let all_targets = comm.allgather(tags::TARGETS, &wire::encode(&targets))?;
    let mut senders = Vec::new();
    for (r, buf) in all_targets.iter().enumerate() {
        let theirs: Vec<u64> = wire::decode(r, buf)?;
        if theirs.contains(&(me as u64)) {
            senders.push(r);
        }
    }

    let recvs: Vec<(usize, C::RecvHandle)> = senders
        .iter()
        .map(|&r| (r, comm.irecv(r, tag.as_u16())))
        .collect();
    let sends: Vec<C::SendHandle> = outgoing
        .iter()
        .map(|(&peer, buf)| comm.isend(peer, tag.as_u16(), buf))
        .collect();

    let mut incoming = BTreeMap::new();
    let mut maybe_err = None;
    for (r, h) in recvs {
        match h.wait() {
            Some(data) => {
                incoming.insert(r, data);
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshAdaptError::Comm {
                    neighbor: r,
                    reason: "no data received (wait returned None)".into(),
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
        None => Ok(incoming),
    }
}

/// [`neighbor_exchange`] over typed wire records.
pub fn exchange_records<C, T>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<T>>,
) -> Result<BTreeMap<usize, Vec<T>>, MeshAdaptError>
where
    C: Communicator + ?Sized,
    T: Pod,
{
    let bytes = outgoing
        .iter()
        .map(|(&peer, recs)| (peer, wire::encode(recs)))
        .collect();
    neighbor_exchange(comm, tag, &bytes)?
        .into_iter()
        .map(|(peer, buf)| Ok((peer, wire::decode(peer, &buf)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{LocalComm, NoComm};
    use crate::algs::wire::WireGid;
    use std::thread;

    #[test]
    fn ring_exchange_with_silent_rank() {
        // 0 -> 1, 1 -> 2, rank 2 sends nothing
        let handles: Vec<_> = LocalComm::world(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut out = BTreeMap::new();
                    if comm.rank() < 2 {
                        out.insert(comm.rank() + 1, vec![WireGid::new(comm.rank() as u64, 7)]);
                    }
                    exchange_records(&comm, tags::MATCH, &out).unwrap()
                })
            })
            .collect();
        let got: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(got[0].is_empty());
        assert_eq!(got[1][&0][0].handle(), 0);
        assert_eq!(got[2][&1][0].gid(), 7);
    }

    #[test]
    fn addressing_self_is_rejected() {
        let mut out = BTreeMap::new();
        out.insert(0, vec![1u8]);
        assert!(neighbor_exchange(&NoComm, tags::MATCH, &out).is_err());
    }
}
