use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::error::Result;
use crate::transport::Transport;

/// Dissemination barrier: ceil(log2 n) rounds of empty messages. In round
/// `k` each rank signals `me + 2^k` and waits for `me - 2^k`, so after the
/// last round every rank has transitively heard from every other.
#[derive(Debug, Default)]
pub struct BruckBarrier;

pub type BruckBarrierActor = DagActor<BruckBarrier>;

impl DagAlgorithm for BruckBarrier {
    fn init_buffers(&mut self, _ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let me = ctx.me;
        let mut prev: Vec<ActionId> = Vec::new();
        let mut gap = 1u32;
        let mut round = 0u32;
        while gap < n {
            let s = dag.add(Action::send(round, (me + gap) % n, 0, 0), &prev);
            let r = dag.add(Action::recv(round, (me + n - gap) % n, 0, 0), &prev);
            prev = vec![s, r];
            gap *= 2;
            round += 1;
        }
        Ok(())
    }

    fn send_payload(&self, _ctx: &ActorContext, _action: &Action) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn buffer_action(
        &mut self,
        _ctx: &ActorContext,
        _action: &Action,
        _payload: &[u8],
        _tport: &dyn Transport,
    ) -> Result<()> {
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        None
    }
}
