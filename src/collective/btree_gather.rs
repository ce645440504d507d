//! Binary-tree gather to an arbitrary root.
//!
//! Ranks contract toward virtual root 0: at level `gap`, a rank with
//! `me % 2gap == gap` ships everything it holds to `me - gap` and is done,
//! while its partner appends it. Every rank keeps its own block at offset 0
//! and the blocks of `me+1, me+2, ...` after it, so a subtree's data is always
//! one contiguous run.
//!
//! When the root is not rank 0 the contraction stops one level early,
//! leaving two subtrees rooted at 0 and at the midpoint. Both then deliver
//! straight to the true root in a final correction level.

use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::{TreeShape, byte_range, compute_tree};
use crate::error::Result;
use crate::transport::{Transport, Workspace};
use crate::types::Rank;

#[derive(Debug)]
pub struct BtreeGather {
    root: Rank,
    nelems: usize,
    type_size: usize,
    /// Caller destination. Only the root writes into it.
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
    /// Non-root accumulation space.
    work: Option<Workspace>,
}

pub type BtreeGatherActor = DagActor<BtreeGather>;

impl BtreeGather {
    /// `nelems` elements per rank. At the root, `src == None` means its block
    /// already sits at slot `root` of `dst`.
    pub fn new(
        root: Rank,
        nelems: usize,
        type_size: usize,
        dst: Option<Vec<u8>>,
        src: Option<Vec<u8>>,
    ) -> Self {
        Self {
            root,
            nelems,
            type_size,
            dst,
            src,
            work: None,
        }
    }

    /// Largest contraction gap before the final level.
    fn top_gap(&self, tree: TreeShape) -> u32 {
        if self.root == 0 {
            tree.midpoint
        } else {
            tree.midpoint / 2
        }
    }

    /// Blocks this rank holds once its part of the contraction is over.
    fn subtree_blocks(&self, me: Rank, nproc: u32) -> u32 {
        let top = self.top_gap(compute_tree(nproc));
        let mut gap = 1;
        let mut blocks = 1;
        while gap <= top {
            if me % (2 * gap) != 0 {
                break;
            }
            if me + gap < nproc {
                blocks = (me + 2 * gap).min(nproc) - me;
            }
            gap *= 2;
        }
        blocks
    }

    fn buffer(&self) -> Option<&[u8]> {
        match &self.work {
            Some(w) => Some(&w[..]),
            None => self.dst.as_deref(),
        }
    }
}

impl DagAlgorithm for BtreeGather {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        if self.root >= ctx.nproc {
            return Err(ctx.invalid_root(self.root));
        }
        let block = self.nelems * self.type_size;
        let src = self.src.take();

        if ctx.me == self.root {
            let Some(dst) = self.dst.as_mut() else {
                if src.is_some() {
                    return Err(ctx.missing_buffer("destination"));
                }
                return Ok(());
            };
            ctx.check_len(dst, block * ctx.nproc as usize)?;
            match src {
                Some(src) => {
                    ctx.check_len(&src, block)?;
                    tport.memcopy(&mut dst[..block], &src)?;
                }
                None if self.root != 0 => {
                    let own = byte_range(self.root as usize * self.nelems, self.nelems, self.type_size);
                    dst.copy_within(own, 0);
                }
                None => {}
            }
            return Ok(());
        }

        let Some(src) = src else {
            if self.dst.is_some() {
                return Err(ctx.missing_buffer("source"));
            }
            return Ok(());
        };
        ctx.check_len(&src, block)?;
        let blocks = self.subtree_blocks(ctx.me, ctx.nproc) as usize;
        let mut work = tport.workspace().allocate(blocks * block);
        tport.memcopy(&mut work[..block], &src)?;
        self.work = Some(work);
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let me = ctx.me;
        let ne = self.nelems;
        let tree = compute_tree(n);
        let top = self.top_gap(tree);
        let mut prev: Vec<ActionId> = Vec::new();
        let mut blocks = 1u32;
        let mut gap = 1u32;
        let mut round = 0u32;

        while gap <= top {
            if me % (2 * gap) == 0 {
                let partner = me + gap;
                if partner < n {
                    let nrecv = (me + 2 * gap).min(n) - partner;
                    let r = dag.add(
                        Action::recv(round, partner, blocks as usize * ne, nrecv as usize * ne),
                        &prev,
                    );
                    prev = vec![r];
                    blocks += nrecv;
                }
            } else {
                let s = dag.add(
                    Action::send(round, me - gap, 0, blocks as usize * ne),
                    &prev,
                );
                prev = vec![s];
                break;
            }
            gap *= 2;
            round += 1;
        }

        if self.root == 0 {
            return Ok(());
        }

        // Senders leave the loop early; the correction level is numbered
        // after the last contraction level on every rank.
        let round = tree.log2nproc - 1;
        let mid = tree.midpoint;
        let root = self.root;
        if me == 0 {
            dag.add(Action::send(round, root, 0, mid as usize * ne), &prev);
        } else if me == mid && me != root {
            dag.add(Action::send(round, root, 0, (n - mid) as usize * ne), &prev);
        }
        if me == root {
            let upper = (n - mid) as usize * ne;
            let low_deps = if root == mid {
                // Move the upper subtree out of the way of the lower half.
                let s = dag.add(Action::shuffle(round, me, mid as usize * ne, upper), &prev);
                vec![s]
            } else {
                dag.add(Action::recv(round, mid, mid as usize * ne, upper), &prev);
                prev.clone()
            };
            dag.add(Action::recv(round, 0, 0, mid as usize * ne), &low_deps);
        }
        Ok(())
    }

    fn send_payload(&self, ctx: &ActorContext, action: &Action) -> Result<Option<Vec<u8>>> {
        let Some(buf) = self.buffer() else {
            return Ok(None);
        };
        buf.get(byte_range(action.offset, action.nelems, self.type_size))
            .map(|b| Some(b.to_vec()))
            .ok_or_else(|| ctx.consistency(format!("{action} outside the gather buffer")))
    }

    fn buffer_action(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        payload: &[u8],
        tport: &dyn Transport,
    ) -> Result<()> {
        let range = byte_range(action.offset, action.nelems, self.type_size);
        let buf: &mut [u8] = match (&mut self.work, &mut self.dst) {
            (Some(w), _) => &mut w[..],
            (None, Some(d)) if ctx.me == self.root => &mut d[..],
            _ => return Ok(()),
        };
        let slot = buf
            .get_mut(range)
            .ok_or_else(|| ctx.consistency(format!("{action} outside the gather buffer")))?;
        tport.memcopy(slot, payload)
    }

    fn shuffle(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        _tport: &dyn Transport,
    ) -> Result<()> {
        if ctx.me != self.root {
            return Err(ctx.invalid_dag(format!("{action} on a non-root rank")));
        }
        let Some(dst) = self.dst.as_mut() else {
            return Ok(());
        };
        let from = byte_range(0, action.nelems, self.type_size);
        let to = action.offset * self.type_size;
        if to + from.len() > dst.len() {
            return Err(ctx.consistency(format!("{action} outside the gather buffer")));
        }
        dst.copy_within(from, to);
        Ok(())
    }

    fn finalize(&mut self, _ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        self.work = None;
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
