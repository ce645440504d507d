use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::byte_range;
use crate::error::Result;
use crate::transport::Transport;

/// Ring allgatherv: N-1 rounds where each rank forwards the block it
/// received last round to its successor.
///
/// Blocks stay at their rank-ordered positions throughout, so no final
/// reordering is needed.
#[derive(Debug)]
pub struct RingAllgatherv {
    counts: Vec<usize>,
    displs: Vec<usize>,
    total: usize,
    type_size: usize,
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
}

pub type RingAllgathervActor = DagActor<RingAllgatherv>;

impl RingAllgatherv {
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

    fn block(&self, rank: usize) -> (usize, usize) {
        (self.displs[rank], self.counts[rank])
    }
}

impl DagAlgorithm for RingAllgatherv {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        let (offset, count) = self.block(ctx.me as usize);
        let src = self.src.take();
        let Some(dst) = self.dst.as_mut() else {
            if src.is_some() {
                return Err(ctx.missing_buffer("destination"));
            }
            return Ok(());
        };
        ctx.check_len(dst, self.total * self.type_size)?;
        if let Some(src) = src {
            let slot = &mut dst[byte_range(offset, count, self.type_size)];
            ctx.check_len(&src, slot.len())?;
            tport.memcopy(slot, &src)?;
        }
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc as usize;
        let me = ctx.me as usize;
        let next = ((me + 1) % n) as u32;
        let prev = ((me + n - 1) % n) as u32;
        let mut last: Vec<ActionId> = Vec::new();

        for step in 0..n.saturating_sub(1) {
            let send_idx = (me + n - step) % n;
            let recv_idx = (me + n - step - 1) % n;
            let (send_off, send_cnt) = self.block(send_idx);
            let (recv_off, recv_cnt) = self.block(recv_idx);
            let round = step as u32;
            let s = dag.add(Action::send(round, next, send_off, send_cnt), &last);
            let r = dag.add(Action::recv(round, prev, recv_off, recv_cnt), &last);
            last = vec![s, r];
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

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
