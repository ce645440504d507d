//! Collectives routed through a communicator's SMP grouping.
//!
//! Each runs as a chain of flat collectives on the node-local and
//! per-node-representative communicators. Every step carries the caller's
//! tag with a step number in the bits from [`PHASE_SHIFT`] up, so caller
//! tags must stay below `1 << PHASE_SHIFT`.

use super::{Buffers, CollectiveEngine, OpContext};
use crate::comm::Communicator;
use crate::error::{CollexError, Result};
use crate::protocol::CollectiveDone;
use crate::reduce::ReduceFn;
use crate::transport::Transport;
use crate::types::{CollectiveKind, NodeId, Rank, Tag};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) const PHASE_SHIFT: u32 = 28;

fn phase_tag(phase: u32, tag: Tag) -> Tag {
    (phase << PHASE_SHIFT) | tag
}

/// Reorder blocks from node-major layout, where slot `i` holds the block of
/// comm rank `order[i]`, into comm-rank order.
fn to_rank_order(
    tport: &dyn Transport,
    all: &[u8],
    order: &[Rank],
    block: usize,
) -> Result<Vec<u8>> {
    let mut out = vec![0; all.len()];
    for (slot, &rank) in order.iter().enumerate() {
        let to = rank as usize * block;
        tport.memcopy(&mut out[to..to + block], &all[slot * block..(slot + 1) * block])?;
    }
    Ok(out)
}

impl<T: Transport> CollectiveEngine<T> {
    /// Comm ranks of `comm` grouped by node: nodes by their lowest global
    /// rank, members by global rank.
    fn node_major_order(&self, comm: &Communicator) -> Result<Vec<Rank>> {
        let mut by_node: BTreeMap<NodeId, Vec<Rank>> = BTreeMap::new();
        for g in comm.global_ranks()? {
            by_node.entry(self.tport.rank_to_node(g)).or_default().push(g);
        }
        let mut groups: Vec<Vec<Rank>> = by_node.into_values().collect();
        for members in &mut groups {
            members.sort_unstable();
        }
        groups.sort_unstable_by_key(|members| members.first().copied());
        groups
            .into_iter()
            .flatten()
            .map(|g| comm.global_to_comm_rank(g))
            .collect()
    }

    /// Allreduce within the node, across node representatives, then a
    /// broadcast from each representative to its node.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn smp_allreduce(
        &mut self,
        bufs: Buffers,
        nelems: usize,
        type_size: usize,
        fxn: ReduceFn,
        op: OpContext,
        comm: &Communicator,
        smp: Arc<Communicator>,
        owner: Option<Arc<Communicator>>,
    ) -> Result<Option<CollectiveDone>> {
        let tag = op.tag;
        let finish = CollectiveDone {
            kind: CollectiveKind::Allreduce,
            tag,
            cq_id: op.cq_id,
            comm_rank: comm.my_comm_rank(),
            result: None,
        };
        tracing::debug!(tag, smp_size = smp.nproc(), owner = owner.is_some(), "SMP allreduce");

        let node_comm = Arc::clone(&smp);
        let across_fxn = fxn.clone();
        self.chain(CollectiveKind::Allreduce, phase_tag(1, tag), move |eng, node_sum| {
            let down = move |eng: &mut Self, total: Option<Vec<u8>>| {
                eng.chain(CollectiveKind::Bcast, phase_tag(3, tag), move |_, result| {
                    Ok(Some(CollectiveDone { result, ..finish }))
                });
                let op = OpContext::new(phase_tag(3, tag)).on(node_comm);
                eng.bcast(total, 0, nelems, type_size, op)
            };
            match owner {
                Some(owner) => {
                    eng.chain(CollectiveKind::Allreduce, phase_tag(2, tag), down);
                    let bufs = Buffers {
                        dst: node_sum,
                        src: None,
                    };
                    let op = OpContext::new(phase_tag(2, tag)).on(owner);
                    eng.allreduce(bufs, nelems, type_size, across_fxn, op)
                }
                None => down(eng, node_sum),
            }
        });
        let op = OpContext::new(phase_tag(1, tag)).on(smp);
        self.allreduce(bufs, nelems, type_size, fxn, op)
    }

    /// Allgather within the node, then across node representatives with one
    /// node's worth of blocks each, then a broadcast of the full vector from
    /// each representative to its node.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn smp_allgather(
        &mut self,
        bufs: Buffers,
        nelems: usize,
        type_size: usize,
        op: OpContext,
        comm: &Communicator,
        smp: Arc<Communicator>,
        owner: Option<Arc<Communicator>>,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Allgather;
        let tag = op.tag;
        let block = nelems * type_size;
        let nproc = comm.nproc() as usize;
        let node_size = smp.nproc() as usize;
        let order = self.node_major_order(comm)?;

        let Buffers { dst, src } = bufs;
        let src = match (&dst, src) {
            (Some(dst), src) => {
                op.check_len(kind, comm, dst, block * nproc)?;
                match src {
                    Some(src) => Some(src),
                    None => {
                        let me = comm.my_comm_rank() as usize * block;
                        Some(dst[me..me + block].to_vec())
                    }
                }
            }
            (None, Some(_)) => {
                return Err(CollexError::MissingBuffer {
                    kind,
                    tag,
                    rank: comm.my_comm_rank(),
                    buffer: "destination",
                });
            }
            (None, None) => None,
        };
        let node_bufs = Buffers {
            dst: dst.as_ref().map(|_| vec![0; node_size * block]),
            src,
        };
        let finish = CollectiveDone {
            kind,
            tag,
            cq_id: op.cq_id,
            comm_rank: comm.my_comm_rank(),
            result: None,
        };
        tracing::debug!(tag, smp_size = node_size, owner = owner.is_some(), "SMP allgather");

        let node_comm = Arc::clone(&smp);
        self.chain(kind, phase_tag(4, tag), move |eng, node_blocks| {
            let down = move |eng: &mut Self, all: Option<Vec<u8>>| {
                eng.chain(CollectiveKind::Bcast, phase_tag(6, tag), move |eng, all| {
                    let result = match all {
                        Some(all) => Some(to_rank_order(&eng.tport, &all, &order, block)?),
                        None => None,
                    };
                    Ok(Some(CollectiveDone { result, ..finish }))
                });
                let op = OpContext::new(phase_tag(6, tag)).on(node_comm);
                eng.bcast(all, 0, nelems * nproc, type_size, op)
            };
            match owner {
                Some(owner) => {
                    eng.chain(kind, phase_tag(5, tag), down);
                    let bufs = match node_blocks {
                        Some(blocks) => Buffers::new(vec![0; nproc * block], blocks),
                        None => Buffers::skeleton(),
                    };
                    let op = OpContext::new(phase_tag(5, tag)).on(owner);
                    eng.allgather(bufs, nelems * node_size, type_size, op)
                }
                // The caller's destination receives the broadcast.
                None => down(eng, dst),
            }
        });
        let op = OpContext::new(phase_tag(4, tag)).on(smp);
        self.allgather(node_bufs, nelems, type_size, op)
    }
}
