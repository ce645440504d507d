use crate::collective::action::{Action, ActionDag, ActionId};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::error::Result;
use crate::reduce::ReduceFn;
use crate::transport::{Transport, Workspace};

/// Inclusive prefix scan by recursive doubling.
///
/// In round `k` (gap `2^k`) each rank sends its running partial to
/// `me + gap` and folds the partial from `me - gap` into its result. The
/// outgoing partial lives in its own workspace and is refreshed from the
/// result by a shuffle that joins the round's send and receive, so a round
/// never ships data folded in the same round.
pub struct SimultaneousBtreeScan {
    nelems: usize,
    type_size: usize,
    fxn: ReduceFn,
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
    send_buf: Option<Workspace>,
    recv_buf: Option<Workspace>,
}

pub type SimultaneousBtreeScanActor = DagActor<SimultaneousBtreeScan>;

impl SimultaneousBtreeScan {
    /// `src == None` with a destination scans `dst` in place.
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
            send_buf: None,
            recv_buf: None,
        }
    }
}

impl std::fmt::Debug for SimultaneousBtreeScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimultaneousBtreeScan")
            .field("nelems", &self.nelems)
            .field("type_size", &self.type_size)
            .field("send_buf", &self.send_buf)
            .field("recv_buf", &self.recv_buf)
            .finish_non_exhaustive()
    }
}

impl DagAlgorithm for SimultaneousBtreeScan {
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

        let pool = tport.workspace();
        let mut send_buf = pool.allocate(bytes);
        tport.memcopy(&mut send_buf, dst)?;
        self.send_buf = Some(send_buf);
        self.recv_buf = Some(pool.allocate(bytes));
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let me = ctx.me;
        let ne = self.nelems;
        let mut last_shuffle: Option<ActionId> = None;
        let mut last_recv: Option<ActionId> = None;
        let mut gap = 1u32;
        let mut round = 0u32;

        while gap < n {
            let send = (me + gap < n).then(|| {
                let deps: Vec<ActionId> = last_shuffle.into_iter().collect();
                dag.add(Action::send(round, me + gap, 0, ne), &deps)
            });
            if me >= gap {
                let deps: Vec<ActionId> = last_recv.into_iter().chain(last_shuffle).collect();
                last_recv = Some(dag.add(Action::recv(round, me - gap, 0, ne), &deps));
            }
            if me + 2 * gap < n {
                let deps: Vec<ActionId> = send.into_iter().chain(last_recv).collect();
                last_shuffle = Some(dag.add(Action::shuffle(round, me, 0, ne), &deps));
            }
            gap *= 2;
            round += 1;
        }
        Ok(())
    }

    fn send_payload(&self, _ctx: &ActorContext, _action: &Action) -> Result<Option<Vec<u8>>> {
        Ok(self.send_buf.as_ref().map(|b| b.to_vec()))
    }

    fn buffer_action(
        &mut self,
        _ctx: &ActorContext,
        _action: &Action,
        payload: &[u8],
        tport: &dyn Transport,
    ) -> Result<()> {
        let (Some(dst), Some(recv_buf)) = (self.dst.as_mut(), self.recv_buf.as_mut()) else {
            return Ok(());
        };
        tport.memcopy(recv_buf, payload)?;
        (self.fxn)(dst, recv_buf, self.nelems);
        Ok(())
    }

    fn shuffle(
        &mut self,
        _ctx: &ActorContext,
        _action: &Action,
        tport: &dyn Transport,
    ) -> Result<()> {
        if let (Some(dst), Some(send_buf)) = (self.dst.as_ref(), self.send_buf.as_mut()) {
            tport.memcopy(send_buf, dst)?;
        }
        Ok(())
    }

    fn finalize(&mut self, _ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        self.send_buf = None;
        self.recv_buf = None;
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
