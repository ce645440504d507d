use crate::collective::action::{Action, ActionDag, ActionId, ActionKind};
use crate::comm::Communicator;
use crate::error::{CollexError, Result};
use crate::protocol::WorkMessage;
use crate::transport::Transport;
use crate::types::{CollectiveKind, Rank, Tag};
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of one participant in one collective.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub kind: CollectiveKind,
    pub tag: Tag,
    pub comm: Arc<Communicator>,
    /// This participant's rank in `comm`.
    pub me: Rank,
    pub nproc: u32,
}

impl ActorContext {
    pub fn new(kind: CollectiveKind, tag: Tag, comm: Arc<Communicator>, me: Rank) -> Self {
        let nproc = comm.nproc();
        Self {
            kind,
            tag,
            comm,
            me,
            nproc,
        }
    }

    pub(crate) fn consistency(&self, reason: impl Into<String>) -> CollexError {
        CollexError::InternalConsistency {
            kind: self.kind,
            tag: self.tag,
            rank: self.me,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_dag(&self, reason: impl Into<String>) -> CollexError {
        CollexError::InvalidDag {
            kind: self.kind,
            tag: self.tag,
            rank: self.me,
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_buffer(&self, buffer: &'static str) -> CollexError {
        CollexError::MissingBuffer {
            kind: self.kind,
            tag: self.tag,
            rank: self.me,
            buffer,
        }
    }

    pub(crate) fn invalid_root(&self, root: Rank) -> CollexError {
        CollexError::InvalidRoot {
            kind: self.kind,
            tag: self.tag,
            rank: self.me,
            root,
            nproc: self.nproc,
        }
    }

    /// Fails unless `buf` is exactly `expected` bytes.
    pub(crate) fn check_len(&self, buf: &[u8], expected: usize) -> Result<()> {
        if buf.len() == expected {
            return Ok(());
        }
        Err(CollexError::BufferSizeMismatch {
            kind: self.kind,
            tag: self.tag,
            rank: self.me,
            expected,
            actual: buf.len(),
        })
    }
}

/// The algorithm-specific half of a DAG actor.
///
/// Implementations own their working buffers. Offsets and counts in
/// [`Action`]s are elements; implementations convert to bytes where they
/// touch memory.
pub trait DagAlgorithm: Send {
    /// Set up working buffers, seeding them with this rank's contribution.
    fn init_buffers(&mut self, ctx: &ActorContext, tport: &dyn Transport) -> Result<()>;

    /// Build the full action graph for this rank.
    fn init_dag(&mut self, ctx: &ActorContext, dag: &mut ActionDag) -> Result<()>;

    /// Bytes a send action transmits, or `None` when running without buffers.
    fn send_payload(&self, ctx: &ActorContext, action: &Action) -> Result<Option<Vec<u8>>>;

    /// Land a received payload: a copy for gather-style algorithms, a combine
    /// for reductions.
    fn buffer_action(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        payload: &[u8],
        tport: &dyn Transport,
    ) -> Result<()>;

    /// Purely local rearrangement.
    fn shuffle(
        &mut self,
        ctx: &ActorContext,
        action: &Action,
        _tport: &dyn Transport,
    ) -> Result<()> {
        Err(ctx.invalid_dag(format!("{action}: algorithm has no local rearrangement")))
    }

    /// Reorder output and release scratch space. Runs once, after the last
    /// action.
    fn finalize(&mut self, _ctx: &ActorContext, _tport: &dyn Transport) -> Result<()> {
        Ok(())
    }

    /// Hand the caller's destination buffer back.
    fn take_result(&mut self) -> Option<Vec<u8>>;
}

/// A participant's execution state as seen by its [`Collective`].
///
/// [`Collective`]: crate::collective::Collective
pub trait CollectiveActor: Send {
    fn participant(&self) -> Rank;

    /// Allocate buffers and build the action graph.
    fn init(&mut self, tport: &dyn Transport) -> Result<()>;

    /// Run every action that has no predecessors.
    fn start(&mut self, tport: &dyn Transport) -> Result<()>;

    /// Deliver a message addressed to this participant.
    fn recv(&mut self, msg: WorkMessage, tport: &dyn Transport) -> Result<()>;

    fn is_complete(&self) -> bool;

    fn take_result(&mut self) -> Option<Vec<u8>>;

    /// One line per unfinished action, naming what it waits for.
    fn deadlock_report(&self) -> Vec<String>;
}

/// Drives a [`DagAlgorithm`] through its action graph.
pub struct DagActor<A> {
    ctx: ActorContext,
    algo: A,
    dag: ActionDag,
    /// Receives that are ready and waiting for their message.
    posted: HashMap<(u32, Rank), ActionId>,
    /// Messages that arrived before their receive was ready.
    early: HashMap<(u32, Rank), WorkMessage>,
    finalized: bool,
}

impl<A: DagAlgorithm> DagActor<A> {
    pub fn new(ctx: ActorContext, algo: A) -> Self {
        Self {
            ctx,
            algo,
            dag: ActionDag::new(),
            posted: HashMap::new(),
            early: HashMap::new(),
            finalized: false,
        }
    }

    fn progress(&mut self, tport: &dyn Transport) -> Result<()> {
        while let Some(id) = self.dag.pop_ready() {
            let action = self.dag.action(id).clone();
            tracing::debug!(
                rank = self.ctx.me,
                tag = self.ctx.tag,
                kind = %self.ctx.kind,
                round = action.round,
                partner = action.partner,
                "starting {:?}",
                action.kind
            );
            match action.kind {
                ActionKind::Send => {
                    self.do_send(&action, tport)?;
                    self.dag.complete(id);
                }
                ActionKind::Recv => {
                    let key = (action.round, action.partner);
                    match self.early.remove(&key) {
                        Some(msg) => self.land(id, &action, msg, tport)?,
                        None => {
                            self.posted.insert(key, id);
                        }
                    }
                }
                ActionKind::Shuffle => {
                    self.algo.shuffle(&self.ctx, &action, tport)?;
                    self.dag.complete(id);
                }
            }
        }

        if self.dag.is_complete() && !self.finalized {
            self.finalized = true;
            self.algo.finalize(&self.ctx, tport)?;
            tracing::debug!(
                rank = self.ctx.me,
                tag = self.ctx.tag,
                kind = %self.ctx.kind,
                "actor complete"
            );
        }
        Ok(())
    }

    fn do_send(&mut self, action: &Action, tport: &dyn Transport) -> Result<()> {
        let payload = self.algo.send_payload(&self.ctx, action)?;
        let dst = self.ctx.comm.comm_to_global_rank(action.partner)?;
        let msg = WorkMessage {
            kind: self.ctx.kind as u8,
            tag: self.ctx.tag,
            round: action.round,
            sender: self.ctx.me,
            recver: action.partner,
            nelems: action.nelems as u64,
            payload,
        };
        tport.send(dst, msg)
    }

    fn land(
        &mut self,
        id: ActionId,
        action: &Action,
        msg: WorkMessage,
        tport: &dyn Transport,
    ) -> Result<()> {
        if msg.nelems != action.nelems as u64 {
            return Err(self.ctx.consistency(format!(
                "{action}: message carries {} elements",
                msg.nelems
            )));
        }
        if let Some(payload) = &msg.payload {
            self.algo.buffer_action(&self.ctx, action, payload, tport)?;
        }
        tracing::debug!(
            rank = self.ctx.me,
            tag = self.ctx.tag,
            kind = %self.ctx.kind,
            round = action.round,
            partner = action.partner,
            "recv complete"
        );
        self.dag.complete(id);
        Ok(())
    }
}

impl<A: DagAlgorithm> CollectiveActor for DagActor<A> {
    fn participant(&self) -> Rank {
        self.ctx.me
    }

    fn init(&mut self, tport: &dyn Transport) -> Result<()> {
        self.algo.init_buffers(&self.ctx, tport)?;
        self.algo.init_dag(&self.ctx, &mut self.dag)?;
        self.dag.validate().map_err(|reason| self.ctx.invalid_dag(reason))
    }

    fn start(&mut self, tport: &dyn Transport) -> Result<()> {
        self.dag.start();
        self.progress(tport)
    }

    fn recv(&mut self, msg: WorkMessage, tport: &dyn Transport) -> Result<()> {
        let key = (msg.round, msg.sender);
        if let Some(id) = self.posted.remove(&key) {
            let action = self.dag.action(id).clone();
            self.land(id, &action, msg, tport)?;
            return self.progress(tport);
        }

        let id = self.dag.find_recv(msg.round, msg.sender).ok_or_else(|| {
            self.ctx.consistency(format!(
                "unexpected message from rank {} in round {}",
                msg.sender, msg.round
            ))
        })?;
        if self.dag.is_done(id) || self.early.contains_key(&key) {
            return Err(self.ctx.consistency(format!(
                "duplicate message from rank {} in round {}",
                msg.sender, msg.round
            )));
        }
        tracing::trace!(
            rank = self.ctx.me,
            tag = self.ctx.tag,
            round = msg.round,
            partner = msg.sender,
            "queueing early message"
        );
        self.early.insert(key, msg);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.finalized
    }

    fn take_result(&mut self) -> Option<Vec<u8>> {
        self.algo.take_result()
    }

    fn deadlock_report(&self) -> Vec<String> {
        self.dag
            .blocked()
            .into_iter()
            .map(|b| {
                let prefix = format!(
                    "{} tag {} rank {}: action {} ({})",
                    self.ctx.kind, self.ctx.tag, self.ctx.me, b.id, b.action
                );
                if b.waiting_on.is_empty() {
                    format!("{prefix} has no message yet")
                } else {
                    format!("{prefix} waits on actions {:?}", b.waiting_on)
                }
            })
            .collect()
    }
}
