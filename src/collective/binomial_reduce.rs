use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::byte_range;
use crate::error::Result;
use crate::reduce::ReduceFn;
use crate::transport::Transport;
use crate::types::Rank;

/// Binomial-tree reduce to an arbitrary root.
///
/// On virtual ranks `(me - root) mod n`, a rank folds in each child
/// `vrank + 2^k` for increasing `k` until its own lowest set bit, then sends
/// the partial to `vrank - 2^k`. Only the root's `dst` holds the result.
pub struct BinomialReduce {
    root: Rank,
    nelems: usize,
    type_size: usize,
    fxn: ReduceFn,
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
    /// Partial sum on a non-root rank.
    partial: Option<Vec<u8>>,
}

pub type BinomialReduceActor = DagActor<BinomialReduce>;

impl BinomialReduce {
    pub fn new(
        root: Rank,
        nelems: usize,
        type_size: usize,
        fxn: ReduceFn,
        dst: Option<Vec<u8>>,
        src: Option<Vec<u8>>,
    ) -> Self {
        Self {
            root,
            nelems,
            type_size,
            fxn,
            dst,
            src,
            partial: None,
        }
    }

    fn accumulator(&mut self, me: Rank) -> Option<&mut Vec<u8>> {
        if me == self.root {
            self.dst.as_mut()
        } else {
            self.partial.as_mut()
        }
    }
}

impl std::fmt::Debug for BinomialReduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinomialReduce")
            .field("root", &self.root)
            .field("nelems", &self.nelems)
            .field("has_dst", &self.dst.is_some())
            .finish_non_exhaustive()
    }
}

impl DagAlgorithm for BinomialReduce {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        if self.root >= ctx.nproc {
            return Err(ctx.invalid_root(self.root));
        }
        let bytes = self.nelems * self.type_size;
        let src = self.src.take();
        if let Some(src) = &src {
            ctx.check_len(src, bytes)?;
        }

        if ctx.me == self.root {
            match (self.dst.as_mut(), src) {
                (Some(dst), src) => {
                    ctx.check_len(dst, bytes)?;
                    if let Some(src) = src {
                        tport.memcopy(dst, &src)?;
                    }
                }
                (None, Some(_)) => return Err(ctx.missing_buffer("destination")),
                (None, None) => {}
            }
            return Ok(());
        }

        // A non-root contributes src, or dst when reducing in place. Its dst
        // is otherwise not read.
        self.partial = match src {
            Some(src) => Some(src),
            None => match &self.dst {
                Some(dst) => {
                    ctx.check_len(dst, bytes)?;
                    Some(dst.clone())
                }
                None => None,
            },
        };
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let vrank = (ctx.me + n - self.root) % n;
        let real = |v: u32| (v + self.root) % n;
        let ne = self.nelems;

        let mut prev: Vec<ActionId> = Vec::new();
        let mut mask = 1u32;
        while mask < n {
            let round = mask.trailing_zeros();
            if vrank & mask != 0 {
                dag.add(Action::send(round, real(vrank - mask), 0, ne), &prev);
                break;
            }
            if vrank + mask < n {
                prev = vec![dag.add(Action::recv(round, real(vrank + mask), 0, ne), &prev)];
            }
            mask <<= 1;
        }
        Ok(())
    }

    fn send_payload(&self, _ctx: &ActorContext, _action: &Action) -> Result<Option<Vec<u8>>> {
        Ok(self.partial.clone())
    }

    fn buffer_action(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        payload: &[u8],
        _tport: &dyn Transport,
    ) -> Result<()> {
        let range = byte_range(action.offset, action.nelems, self.type_size);
        let fxn = self.fxn.clone();
        let Some(acc) = self.accumulator(ctx.me) else {
            return Ok(());
        };
        let slot = acc
            .get_mut(range)
            .ok_or_else(|| ctx.consistency(format!("{action} outside the reduce buffer")))?;
        ctx.check_len(payload, slot.len())?;
        fxn(slot, payload, action.nelems);
        Ok(())
    }

    fn finalize(&mut self, _ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        self.partial = None;
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
