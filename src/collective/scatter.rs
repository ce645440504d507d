//! Binomial-tree scatter from an arbitrary root.
//!
//! Virtual rank `v = (me - root) mod n` owns the run of blocks
//! `v .. min(v + lowbit(v), n)`. It receives that run from `v - lowbit(v)`,
//! keeps the first block and forwards the upper halves to `v + m` for each
//! `m` below its lowest set bit. The root holds every block and starts with
//! the largest `m`.

use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::byte_range;
use crate::error::Result;
use crate::transport::{Transport, Workspace};
use crate::types::Rank;

#[derive(Debug)]
pub struct BtreeScatter {
    root: Rank,
    nelems: usize,
    type_size: usize,
    dst: Option<Vec<u8>>,
    /// Root only: every block, rotated so that virtual rank 0 comes first.
    src: Option<Vec<u8>>,
    /// Relay space on a non-root rank that forwards to children.
    work: Option<Workspace>,
}

pub type BtreeScatterActor = DagActor<BtreeScatter>;

/// Blocks owned by virtual rank `v` whose parent link spans `span`.
fn run_len(v: u32, span: u32, n: u32) -> u32 {
    (v + span).min(n) - v
}

impl BtreeScatter {
    /// `nelems` elements per rank. On the root `src` holds `nproc` blocks in
    /// rank order; a root without `dst` keeps its block in `src`.
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

    fn vrank(&self, ctx: &ActorContext) -> u32 {
        (ctx.me + ctx.nproc - self.root) % ctx.nproc
    }

    fn buffer(&self) -> Option<&[u8]> {
        match (&self.src, &self.work) {
            (Some(s), _) => Some(&s[..]),
            (None, Some(w)) => Some(&w[..]),
            (None, None) => self.dst.as_deref(),
        }
    }
}

impl DagAlgorithm for BtreeScatter {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        if self.root >= ctx.nproc {
            return Err(ctx.invalid_root(self.root));
        }
        let block = self.nelems * self.type_size;
        if let Some(dst) = &self.dst {
            ctx.check_len(dst, block)?;
        }

        if ctx.me == self.root {
            let Some(src) = self.src.as_mut() else {
                if self.dst.is_some() {
                    return Err(ctx.missing_buffer("source"));
                }
                return Ok(());
            };
            ctx.check_len(src, block * ctx.nproc as usize)?;
            src.rotate_left(self.root as usize * block);
            if let Some(dst) = self.dst.as_mut() {
                tport.memcopy(dst, &src[..block])?;
            }
            return Ok(());
        }

        // Anything passed as src off the root is not read.
        self.src = None;
        let v = self.vrank(ctx);
        let blocks = run_len(v, 1 << v.trailing_zeros(), ctx.nproc) as usize;
        if self.dst.is_some() && blocks > 1 {
            self.work = Some(tport.workspace().allocate(blocks * block));
        }
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let v = self.vrank(ctx);
        let real = |v: u32| (v + self.root) % n;
        let ne = self.nelems;

        let mut deps: Vec<ActionId> = Vec::new();
        let top = if v == 0 {
            n.next_power_of_two()
        } else {
            let low = 1u32 << v.trailing_zeros();
            let count = run_len(v, low, n) as usize * ne;
            let r = dag.add(Action::recv(low.trailing_zeros(), real(v - low), 0, count), &[]);
            deps.push(r);
            low
        };

        let mut m = top >> 1;
        while m > 0 {
            let child = v + m;
            if child < n {
                let count = run_len(child, m, n) as usize * ne;
                dag.add(
                    Action::send(m.trailing_zeros(), real(child), m as usize * ne, count),
                    &deps,
                );
            }
            m >>= 1;
        }
        Ok(())
    }

    fn send_payload(&self, ctx: &ActorContext, action: &Action) -> Result<Option<Vec<u8>>> {
        let Some(buf) = self.buffer() else {
            return Ok(None);
        };
        buf.get(byte_range(action.offset, action.nelems, self.type_size))
            .map(|b| Some(b.to_vec()))
            .ok_or_else(|| ctx.consistency(format!("{action} outside the scatter buffer")))
    }

    fn buffer_action(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        payload: &[u8],
        tport: &dyn Transport,
    ) -> Result<()> {
        let buf: &mut [u8] = match (&mut self.work, &mut self.dst) {
            (Some(w), _) => &mut w[..],
            (None, Some(d)) => &mut d[..],
            (None, None) => return Ok(()),
        };
        let slot = buf
            .get_mut(byte_range(action.offset, action.nelems, self.type_size))
            .ok_or_else(|| ctx.consistency(format!("{action} outside the scatter buffer")))?;
        tport.memcopy(slot, payload)
    }

    fn finalize(&mut self, _ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        if let (Some(work), Some(dst)) = (self.work.take(), self.dst.as_mut()) {
            let block = dst.len();
            tport.memcopy(dst, &work[..block])?;
        }
        self.src = None;
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
