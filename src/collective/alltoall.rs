use crate::collective::action::{Action, ActionDag};
use crate::collective::actor::{ActorContext, DagActor, DagAlgorithm};
use crate::collective::helpers::byte_range;
use crate::error::Result;
use crate::transport::Transport;

/// Pairwise-exchange alltoall.
///
/// In round `k` a rank sends block `me + k` to rank `me + k` and receives
/// block `me - k` from rank `me - k`. Each receive waits for the send to the
/// same peer, which lets the exchange run in place: the slot a receive
/// overwrites has always been shipped already.
#[derive(Debug)]
pub struct DirectAlltoall {
    nelems: usize,
    type_size: usize,
    dst: Option<Vec<u8>>,
    src: Option<Vec<u8>>,
}

pub type DirectAlltoallActor = DagActor<DirectAlltoall>;

impl DirectAlltoall {
    /// `nelems` elements per peer. `src == None` with a destination exchanges
    /// `dst` in place.
    pub fn new(
        nelems: usize,
        type_size: usize,
        dst: Option<Vec<u8>>,
        src: Option<Vec<u8>>,
    ) -> Self {
        Self {
            nelems,
            type_size,
            dst,
            src,
        }
    }

    fn outgoing(&self) -> Option<&[u8]> {
        self.src.as_deref().or(self.dst.as_deref())
    }
}

impl DagAlgorithm for DirectAlltoall {
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()> {
        let bytes = self.nelems * self.type_size * ctx.nproc as usize;
        let Some(dst) = self.dst.as_mut() else {
            if self.src.is_some() {
                return Err(ctx.missing_buffer("destination"));
            }
            return Ok(());
        };
        ctx.check_len(dst, bytes)?;
        if let Some(src) = &self.src {
            ctx.check_len(src, bytes)?;
            let own = byte_range(ctx.me as usize * self.nelems, self.nelems, self.type_size);
            tport.memcopy(&mut dst[own.clone()], &src[own])?;
        }
        Ok(())
    }

    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()> {
        let n = ctx.nproc;
        let me = ctx.me;
        let ne = self.nelems;
        let sends: Vec<_> = (1..n)
            .map(|k| {
                let to = (me + k) % n;
                dag.add(Action::send(k, to, to as usize * ne, ne), &[])
            })
            .collect();
        for k in 1..n {
            let from = (me + n - k) % n;
            // The send to `from` went out in round n - k.
            let send = sends[(n - k - 1) as usize];
            dag.add(Action::recv(k, from, from as usize * ne, ne), &[send]);
        }
        Ok(())
    }

    fn send_payload(&self, ctx: &ActorContext, action: &Action) -> Result<Option<Vec<u8>>> {
        let Some(buf) = self.outgoing() else {
            return Ok(None);
        };
        buf.get(byte_range(action.offset, action.nelems, self.type_size))
            .map(|b| Some(b.to_vec()))
            .ok_or_else(|| ctx.consistency(format!("{action} outside the alltoall buffer")))
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
            .ok_or_else(|| ctx.consistency(format!("{action} outside the alltoall buffer")))?;
        tport.memcopy(slot, payload)
    }

    fn finalize(&mut self, _ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        self.src = None;
        Ok(())
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.dst.take()
    }
}
