use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::error::Result;
use crate::transport::Transport;
use crate::types::Rank;

/// Binomial-tree broadcast from an arbitrary root.
///
/// Works on virtual ranks `(me - root) mod n`: a rank receives once from the
/// parent that clears its lowest set bit, then forwards to its children in
/// decreasing-distance order.
#[derive(Debug)]
pub struct BinaryTreeBcast {
    root: Rank,
    nelems: usize,
    type_size: usize,
    buf: Option<Vec<u8>>,
}

pub type BinaryTreeBcastActor = DagActor<BinaryTreeBcast>;

impl BinaryTreeBcast {
    pub fn new(root: Rank, nelems: usize, type_size: usize, buf: Option<Vec<u8>>) -> Self {
        Self {
            root,
            nelems,
            type_size,
            buf,
        }
    }
}

impl DagAlgorithm for BinaryTreeBcast {
    fn init_buffers(&mut self, ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        if self.root >= ctx.nproc {
            return Err(ctx.invalid_root(self.root));
        }
        if let Some(buf) = &self.buf {
            ctx.check_len(buf, self.nelems * self.type_size)?;
        }
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let vrank = (ctx.me + n - self.root) % n;
        let real = |v: u32| (v + self.root) % n;
        let ne = self.nelems;

        let mut mask = 1u32;
        let mut deps: Vec<ActionId> = Vec::new();
        while mask < n {
            if vrank & mask != 0 {
                let r = dag.add(
                    Action::recv(mask.trailing_zeros(), real(vrank - mask), 0, ne),
                    &[],
                );
                deps.push(r);
                break;
            }
            mask <<= 1;
        }

        mask >>= 1;
        while mask > 0 {
            if vrank + mask < n {
                dag.add(
                    Action::send(mask.trailing_zeros(), real(vrank + mask), 0, ne),
                    &deps,
                );
            }
            mask >>= 1;
        }
        Ok(())
    }

    fn send_payload(&self, _ctx: &ActorContext, _action: &Action) -> Result<Option<Vec<u8>>> {
        Ok(self.buf.clone())
    }

    fn buffer_action(
        &mut self,
        _ctx: &ActorContext,
        _action: &Action,
        payload: &[u8],
        tport: &dyn Transport,
    ) -> Result<()> {
        match self.buf.as_mut() {
            Some(buf) => tport.memcopy(buf, payload),
            None => Ok(()),
        }
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.buf.take()
    }
}
