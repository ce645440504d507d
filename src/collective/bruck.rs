//! Bruck allgatherv.
//!
//! Every rank keeps its working data rotated so that its own block sits at
//! offset 0, followed by the blocks of ranks `me+1, me+2, ...`. Each round
//! doubles the number of blocks held by pulling the next run from
//! `me + gap`. A final partial round covers non-power-of-two sizes, and
//! `finalize` rotates the buffer back into rank order.

use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::byte_range;
use crate::error::Result;
use crate::transport::Transport;
use crate::types::Rank;

/// Variable-count allgather using Bruck's log-depth exchange.
#[derive(Debug)]
pub struct BruckAllgatherv {
    counts: Vec<usize>,
    displs: Vec<usize>,
    total: usize,
    type_size: usize,
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
}

pub type BruckAllgathervActor = DagActor<BruckAllgatherv>;

impl BruckAllgatherv {
    /// `counts[r]` elements come from rank `r`. `src == None` with a
    /// destination means the contribution already sits at its rank-ordered
    /// position in `dst`.
    pub fn new(
        counts: Vec<usize>,
        type_size: usize,
        dst: Option<Vec<u8>>,
        src: Option<Vec<u8>>,
    ) -> Self {
        let mut displs = Vec::with_capacity(counts.len());
        let mut total = 0;
        for &c in &counts {
            displs.push(total);
            total += c;
        }
        Self {
            counts,
            displs,
            total,
            type_size,
            dst,
            src,
        }
    }

    /// Elements held by `gap` consecutive ranks starting at `partner`.
    pub fn nelems_to_recv(&self, partner: Rank, gap: u32) -> usize {
        let n = self.counts.len();
        (0..gap as usize)
            .map(|k| self.counts[(partner as usize + k) % n])
            .sum()
    }
}

impl DagAlgorithm for BruckAllgatherv {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        let me = ctx.me as usize;
        let own = byte_range(self.displs[me], self.counts[me], self.type_size);
        let own_len = own.len();
        let src = self.src.take();
        let Some(dst) = self.dst.as_mut() else {
            if src.is_some() {
                return Err(ctx.missing_buffer("destination"));
            }
            return Ok(());
        };
        ctx.check_len(dst, self.total * self.type_size)?;
        match src {
            Some(src) => {
                ctx.check_len(&src, own_len)?;
                tport.memcopy(&mut dst[..own_len], &src)?;
            }
            // In place: the contribution is at its rank-ordered slot.
            None if own.start != 0 => dst.copy_within(own, 0),
            None => {}
        }
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let me = ctx.me;
        let mut have = self.counts[me as usize];
        let mut blocks = 1u32;
        let mut gap = 1u32;
        let mut round = 0u32;
        let mut prev: Vec<ActionId> = Vec::new();

        while gap * 2 <= n {
            let send_to = (me + n - gap) % n;
            let recv_from = (me + gap) % n;
            let nrecv = self.nelems_to_recv(recv_from, gap);
            let s = dag.add(Action::send(round, send_to, 0, have), &prev);
            let r = dag.add(Action::recv(round, recv_from, have, nrecv), &prev);
            prev = vec![s, r];
            have += nrecv;
            blocks += gap;
            gap *= 2;
            round += 1;
        }

        if blocks < n {
            let remaining = n - blocks;
            let send_to = (me + n - gap) % n;
            let recv_from = (me + gap) % n;
            let nsend = self.nelems_to_recv(me, remaining);
            let nrecv = self.nelems_to_recv(recv_from, remaining);
            dag.add(Action::send(round, send_to, 0, nsend), &prev);
            dag.add(Action::recv(round, recv_from, have, nrecv), &prev);
            have += nrecv;
        }

        if have != self.total {
            return Err(ctx.invalid_dag(format!(
                "rounds collect {have} of {} elements",
                self.total
            )));
        }
        Ok(())
    }

    fn send_payload(&self, ctx: &ActorContext, action: &Action) -> Result<Option<Vec<u8>>> {
        let Some(dst) = &self.dst else {
            return Ok(None);
        };
        dst.get(byte_range(action.offset, action.nelems, self.type_size))
            .map(|b| Some(b.to_vec()))
            .ok_or_else(|| ctx.consistency(format!("{action} outside the result buffer")))
    }

    fn buffer_action(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        payload: &[u8],
        tport: &dyn Transport,
    ) -> Result<()> {
        let Some(dst) = self.dst.as_mut() else {
            return Ok(());
        };
        let slot = dst
            .get_mut(byte_range(action.offset, action.nelems, self.type_size))
            .ok_or_else(|| ctx.consistency(format!("{action} outside the result buffer")))?;
        tport.memcopy(slot, payload)
    }

    fn finalize(&mut self, ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        let shift = self.displs[ctx.me as usize] * self.type_size;
        if let Some(dst) = self.dst.as_mut()
            && shift != 0
        {
            dst.rotate_right(shift);
        }
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
