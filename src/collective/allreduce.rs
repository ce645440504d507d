//! Recursive halving-doubling allreduce.
//!
//! With `p2` the largest power of two not above `n`, ranks `p2..n` first fold
//! their whole vector into rank `me - p2` and sit out. The remaining `p2`
//! ranks run a reduce-scatter by recursive halving, where each exchange with
//! `me ^ 2^k` keeps one half of the current range and combines into it, then
//! an allgather by recursive doubling that retraces those steps in reverse.
//! The folded ranks finally get the full result back.

use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::byte_range;
use crate::error::Result;
use crate::reduce::ReduceFn;
use crate::transport::Transport;

pub struct HalvingAllreduce {
    nelems: usize,
    type_size: usize,
    fxn: ReduceFn,
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
    /// Receives in rounds from here on overwrite rather than combine.
    first_copy_round: u32,
}

pub type HalvingAllreduceActor = DagActor<HalvingAllreduce>;

/// Largest power of two `<= n`, for `n >= 1`.
pub(crate) fn pow2_floor(n: u32) -> u32 {
    1 << (u32::BITS - 1 - n.leading_zeros())
}

impl HalvingAllreduce {
    /// `src == None` with a destination reduces `dst` in place.
    pub fn new(
        nelems: usize,
        type_size: usize,
        fxn: ReduceFn,
        dst: Option<Vec<u8>>,
        src: Option<Vec<u8>>,
    ) -> Self {
        Self {
            nelems,
            type_size,
            fxn,
            dst,
            src,
            first_copy_round: 0,
        }
    }
}

impl std::fmt::Debug for HalvingAllreduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalvingAllreduce")
            .field("nelems", &self.nelems)
            .field("type_size", &self.type_size)
            .field("has_dst", &self.dst.is_some())
            .finish_non_exhaustive()
    }
}

impl DagAlgorithm for HalvingAllreduce {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        let bytes = self.nelems * self.type_size;
        let src = self.src.take();
        let Some(dst) = self.dst.as_mut() else {
            if src.is_some() {
                return Err(ctx.missing_buffer("destination"));
            }
            return Ok(());
        };
        ctx.check_len(dst, bytes)?;
        if let Some(src) = src {
            ctx.check_len(&src, bytes)?;
            tport.memcopy(dst, &src)?;
        }
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let me = ctx.me;
        let ne = self.nelems;
        let p2 = pow2_floor(n);
        let log2 = p2.trailing_zeros();
        let unfold_round = 2 * log2 + 1;
        self.first_copy_round = log2 + 1;

        if me >= p2 {
            let s = dag.add(Action::send(0, me - p2, 0, ne), &[]);
            dag.add(Action::recv(unfold_round, me - p2, 0, ne), &[s]);
            return Ok(());
        }

        let mut prev: Vec<ActionId> = Vec::new();
        if me + p2 < n {
            prev = vec![dag.add(Action::recv(0, me + p2, 0, ne), &[])];
        }

        // Ranges held before each halving step, replayed by the doubling.
        let mut ranges = Vec::with_capacity(log2 as usize);
        let (mut lo, mut len) = (0usize, ne);
        for k in 0..log2 {
            let partner = me ^ (1 << k);
            let half = len / 2;
            let (keep, give) = if me < partner {
                ((lo, half), (lo + half, len - half))
            } else {
                ((lo + half, len - half), (lo, half))
            };
            let round = 1 + k;
            let s = dag.add(Action::send(round, partner, give.0, give.1), &prev);
            let r = dag.add(Action::recv(round, partner, keep.0, keep.1), &prev);
            prev = vec![s, r];
            ranges.push((lo, len));
            (lo, len) = keep;
        }

        for k in (0..log2).rev() {
            let partner = me ^ (1 << k);
            let (outer_lo, outer_len) = ranges[k as usize];
            let missing = outer_len - len;
            let recv_at = if me < partner { lo + len } else { outer_lo };
            let round = self.first_copy_round + (log2 - 1 - k);
            let s = dag.add(Action::send(round, partner, lo, len), &prev);
            let r = dag.add(Action::recv(round, partner, recv_at, missing), &prev);
            prev = vec![s, r];
            (lo, len) = (outer_lo, outer_len);
        }

        if me + p2 < n {
            dag.add(Action::send(unfold_round, me + p2, 0, ne), &prev);
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
        if action.round >= self.first_copy_round {
            tport.memcopy(slot, payload)
        } else {
            ctx.check_len(payload, slot.len())?;
            (self.fxn)(slot, payload, action.nelems);
            Ok(())
        }
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
