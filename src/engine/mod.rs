//! The collective engine: entry points that build and start collectives,
//! and the inbound-message path that drives them to completion.

mod smp;

use crate::collective::{
    ActorContext, BinaryTreeBcast, BinaryTreeBcastActor, BinomialReduce, BinomialReduceActor,
    BruckAllgatherv, BruckAllgathervActor, BruckBarrier, BruckBarrierActor, BtreeGather,
    BtreeGatherActor, BtreeScatter, BtreeScatterActor, Collective, CollectiveActor,
    DirectAlltoall, DirectAlltoallActor, HalvingAllreduce, HalvingAllreduceActor, RingAllgatherv,
    RingAllgathervActor, SimultaneousBtreeScan, SimultaneousBtreeScanActor,
};
use crate::comm::{Communicator, SmpGroup};
use crate::config::{AllgatherAlgorithm, CollexConfig};
use crate::error::{CollexError, Result};
use crate::protocol::{CollectiveDone, WorkMessage};
use crate::reduce::ReduceFn;
use crate::transport::Transport;
use crate::types::{CollectiveKind, CqId, Rank, Tag};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// Caller buffers for one collective call.
///
/// - `dst` and `src`: out-of-place.
/// - `dst` only: in place; the contribution is read from `dst`.
/// - neither: skeleton run, where messages carry counts but no data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buffers {
    pub dst: Option<Vec<u8>>,
    pub src: Option<Vec<u8>>,
}

impl Buffers {
    pub fn new(dst: Vec<u8>, src: Vec<u8>) -> Self {
        Self {
            dst: Some(dst),
            src: Some(src),
        }
    }

    pub fn in_place(dst: Vec<u8>) -> Self {
        Self {
            dst: Some(dst),
            src: None,
        }
    }

    pub fn skeleton() -> Self {
        Self::default()
    }

    /// Source only: a gather or reduce contribution from a non-root rank.
    pub fn send_only(src: Vec<u8>) -> Self {
        Self {
            dst: None,
            src: Some(src),
        }
    }
}

/// Identity of one collective call.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    pub tag: Tag,
    pub cq_id: CqId,
    /// `None` runs on the engine's global communicator.
    pub comm: Option<Arc<Communicator>>,
}

impl OpContext {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            ..Self::default()
        }
    }

    pub fn cq(mut self, cq_id: CqId) -> Self {
        self.cq_id = cq_id;
        self
    }

    pub fn on(mut self, comm: Arc<Communicator>) -> Self {
        self.comm = Some(comm);
        self
    }

    fn invalid_root(&self, kind: CollectiveKind, comm: &Communicator, root: Rank) -> CollexError {
        CollexError::InvalidRoot {
            kind,
            tag: self.tag,
            rank: comm.my_comm_rank(),
            root,
            nproc: comm.nproc(),
        }
    }

    fn check_len(
        &self,
        kind: CollectiveKind,
        comm: &Communicator,
        buf: &[u8],
        expected: usize,
    ) -> Result<()> {
        if buf.len() != expected {
            return Err(CollexError::BufferSizeMismatch {
                kind,
                tag: self.tag,
                rank: comm.my_comm_rank(),
                expected,
                actual: buf.len(),
            });
        }
        Ok(())
    }
}

type CollectiveKey = (CollectiveKind, Tag);

/// Work to run when a collective this engine started internally completes.
/// It receives that collective's result and returns the caller's completion
/// if the whole chain is done.
type Continuation<T> = Box<
    dyn FnOnce(&mut CollectiveEngine<T>, Option<Vec<u8>>) -> Result<Option<CollectiveDone>> + Send,
>;

/// Runs collectives for one process over a [`Transport`].
///
/// Entry points return the caller's completion if it is available
/// immediately. Otherwise the caller feeds inbound messages through
/// [`CollectiveEngine::incoming`] until one comes back. Completions that
/// surface while handling another call are queued for
/// [`CollectiveEngine::poll_done`].
pub struct CollectiveEngine<T> {
    tport: T,
    global: Arc<Communicator>,
    config: CollexConfig,
    active: HashMap<CollectiveKey, Collective>,
    pending: HashMap<CollectiveKey, Vec<WorkMessage>>,
    done: VecDeque<CollectiveDone>,
    chains: HashMap<CollectiveKey, Continuation<T>>,
}

impl<T: Transport> CollectiveEngine<T> {
    pub fn new(tport: T, config: CollexConfig) -> Result<Self> {
        let global = Arc::new(Communicator::global(tport.rank(), tport.nproc())?);
        Ok(Self {
            tport,
            global,
            config,
            active: HashMap::new(),
            pending: HashMap::new(),
            done: VecDeque::new(),
            chains: HashMap::new(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.tport
    }

    pub fn global_comm(&self) -> &Arc<Communicator> {
        &self.global
    }

    pub fn config(&self) -> &CollexConfig {
        &self.config
    }

    /// Number of collectives still running.
    pub fn active_collectives(&self) -> usize {
        self.active.len()
    }

    fn comm_for(&self, op: &OpContext) -> Arc<Communicator> {
        op.comm.clone().unwrap_or_else(|| Arc::clone(&self.global))
    }

    fn actor_context(kind: CollectiveKind, op: &OpContext, comm: &Arc<Communicator>) -> ActorContext {
        ActorContext::new(kind, op.tag, Arc::clone(comm), comm.my_comm_rank())
    }

    /// Allgather of `nelems` elements per rank.
    ///
    /// On a communicator with a balanced SMP grouping this runs node-locally
    /// first, then across one representative per node.
    pub fn allgather(
        &mut self,
        bufs: Buffers,
        nelems: usize,
        type_size: usize,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Allgather;
        let comm = self.comm_for(&op);
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        if let Some(group) = comm.smp_group().filter(|g| g.balanced) {
            let (smp, owner) = (Arc::clone(&group.smp), group.owner.clone());
            return self.smp_allgather(bufs, nelems, type_size, op, &comm, smp, owner);
        }
        let counts = vec![nelems; comm.nproc() as usize];
        let ctx = Self::actor_context(kind, &op, &comm);
        let actor: Box<dyn CollectiveActor> = match self.config.allgather {
            AllgatherAlgorithm::Bruck => Box::new(BruckAllgathervActor::new(
                ctx,
                BruckAllgatherv::new(counts, type_size, bufs.dst, bufs.src),
            )),
            AllgatherAlgorithm::Ring => Box::new(RingAllgathervActor::new(
                ctx,
                RingAllgatherv::new(counts, type_size, bufs.dst, bufs.src),
            )),
        };
        self.run(kind, &op, comm, actor)
    }

    /// Allgather where rank `r` contributes `recv_counts[r]` elements.
    pub fn allgatherv(
        &mut self,
        bufs: Buffers,
        recv_counts: &[usize],
        type_size: usize,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Allgatherv;
        let comm = self.comm_for(&op);
        if recv_counts.len() != comm.nproc() as usize {
            return Err(CollexError::CountMismatch {
                kind,
                tag: op.tag,
                rank: comm.my_comm_rank(),
                expected: comm.nproc() as usize,
                actual: recv_counts.len(),
            });
        }
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, recv_counts[0] * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let actor = BruckAllgathervActor::new(
            ctx,
            BruckAllgatherv::new(recv_counts.to_vec(), type_size, bufs.dst, bufs.src),
        );
        self.run(kind, &op, comm, Box::new(actor))
    }

    /// Gather `nelems` elements per rank into `root`'s destination, in rank
    /// order. Non-root destinations come back untouched.
    pub fn gather(
        &mut self,
        bufs: Buffers,
        root: Rank,
        nelems: usize,
        type_size: usize,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Gather;
        let comm = self.comm_for(&op);
        if root >= comm.nproc() {
            return Err(op.invalid_root(kind, &comm, root));
        }
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = BtreeGather::new(root, nelems, type_size, bufs.dst, bufs.src);
        self.run(kind, &op, comm, Box::new(BtreeGatherActor::new(ctx, algo)))
    }

    /// Inclusive prefix scan combining with `fxn`.
    pub fn scan(
        &mut self,
        bufs: Buffers,
        nelems: usize,
        type_size: usize,
        fxn: ReduceFn,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Scan;
        let comm = self.comm_for(&op);
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = SimultaneousBtreeScan::new(nelems, type_size, fxn, bufs.dst, bufs.src);
        self.run(kind, &op, comm, Box::new(SimultaneousBtreeScanActor::new(ctx, algo)))
    }

    /// Combine every rank's `nelems` elements with `fxn`, leaving the result
    /// on all ranks.
    ///
    /// On a communicator with a balanced SMP grouping this reduces within
    /// each node, then across one representative per node, then broadcasts
    /// back down.
    pub fn allreduce(
        &mut self,
        bufs: Buffers,
        nelems: usize,
        type_size: usize,
        fxn: ReduceFn,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Allreduce;
        let comm = self.comm_for(&op);
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        if let Some(group) = comm.smp_group().filter(|g| g.balanced) {
            let (smp, owner) = (Arc::clone(&group.smp), group.owner.clone());
            return self.smp_allreduce(bufs, nelems, type_size, fxn, op, &comm, smp, owner);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = HalvingAllreduce::new(nelems, type_size, fxn, bufs.dst, bufs.src);
        self.run(kind, &op, comm, Box::new(HalvingAllreduceActor::new(ctx, algo)))
    }

    /// Combine every rank's `nelems` elements with `fxn` into `root`'s
    /// destination. Non-root destinations come back untouched.
    pub fn reduce(
        &mut self,
        bufs: Buffers,
        root: Rank,
        nelems: usize,
        type_size: usize,
        fxn: ReduceFn,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Reduce;
        let comm = self.comm_for(&op);
        if root >= comm.nproc() {
            return Err(op.invalid_root(kind, &comm, root));
        }
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = BinomialReduce::new(root, nelems, type_size, fxn, bufs.dst, bufs.src);
        self.run(kind, &op, comm, Box::new(BinomialReduceActor::new(ctx, algo)))
    }

    /// Hand block `r` of `root`'s source to rank `r`'s destination.
    pub fn scatter(
        &mut self,
        bufs: Buffers,
        root: Rank,
        nelems: usize,
        type_size: usize,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Scatter;
        let comm = self.comm_for(&op);
        if root >= comm.nproc() {
            return Err(op.invalid_root(kind, &comm, root));
        }
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = BtreeScatter::new(root, nelems, type_size, bufs.dst, bufs.src);
        self.run(kind, &op, comm, Box::new(BtreeScatterActor::new(ctx, algo)))
    }

    /// Every rank sends block `r` of its source to rank `r`, which stores it
    /// at the sender's slot.
    pub fn alltoall(
        &mut self,
        bufs: Buffers,
        nelems: usize,
        type_size: usize,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Alltoall;
        let comm = self.comm_for(&op);
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = DirectAlltoall::new(nelems, type_size, bufs.dst, bufs.src);
        self.run(kind, &op, comm, Box::new(DirectAlltoallActor::new(ctx, algo)))
    }

    /// Broadcast `root`'s buffer to every rank.
    pub fn bcast(
        &mut self,
        buf: Option<Vec<u8>>,
        root: Rank,
        nelems: usize,
        type_size: usize,
        op: OpContext,
    ) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Bcast;
        let comm = self.comm_for(&op);
        if root >= comm.nproc() {
            return Err(op.invalid_root(kind, &comm, root));
        }
        if comm.nproc() == 1 {
            let bufs = Buffers { dst: buf, src: None };
            return self.skip_collective(kind, &op, &comm, bufs, nelems * type_size);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        let algo = BinaryTreeBcast::new(root, nelems, type_size, buf);
        self.run(kind, &op, comm, Box::new(BinaryTreeBcastActor::new(ctx, algo)))
    }

    pub fn barrier(&mut self, op: OpContext) -> Result<Option<CollectiveDone>> {
        let kind = CollectiveKind::Barrier;
        let comm = self.comm_for(&op);
        if comm.nproc() == 1 {
            return self.skip_collective(kind, &op, &comm, Buffers::skeleton(), 0);
        }
        let ctx = Self::actor_context(kind, &op, &comm);
        self.run(
            kind,
            &op,
            comm,
            Box::new(BruckBarrierActor::new(ctx, BruckBarrier)),
        )
    }

    /// Complete a single-rank collective with a local copy. Every buffer
    /// present must hold `bytes`.
    fn skip_collective(
        &mut self,
        kind: CollectiveKind,
        op: &OpContext,
        comm: &Communicator,
        bufs: Buffers,
        bytes: usize,
    ) -> Result<Option<CollectiveDone>> {
        let Buffers { mut dst, src } = bufs;
        for buf in dst.iter().chain(src.iter()) {
            op.check_len(kind, comm, buf, bytes)?;
        }
        if let (Some(dst), Some(src)) = (dst.as_mut(), src.as_ref()) {
            self.tport.memcopy(dst, src)?;
        }
        tracing::debug!(kind = %kind, tag = op.tag, "single-rank collective skipped");
        self.settle(CollectiveDone {
            kind,
            tag: op.tag,
            cq_id: op.cq_id,
            comm_rank: comm.my_comm_rank(),
            result: dst,
        })
    }

    fn run(
        &mut self,
        kind: CollectiveKind,
        op: &OpContext,
        comm: Arc<Communicator>,
        actor: Box<dyn CollectiveActor>,
    ) -> Result<Option<CollectiveDone>> {
        let mut coll = Collective::new(kind, op.tag, op.cq_id, comm);
        coll.init_actor(actor, &self.tport)?;
        self.start_collective(coll)
    }

    /// Start `coll`, merging it into a running collective with the same
    /// `(kind, tag)` if there is one.
    pub fn start_collective(&mut self, mut coll: Collective) -> Result<Option<CollectiveDone>> {
        let key = (coll.kind(), coll.tag());
        let mut done = coll.start(&self.tport)?;

        match self.active.get_mut(&key) {
            Some(active) => {
                done.extend(active.add_actors(coll, &self.tport)?);
            }
            None => {
                done.extend(self.deliver_pending(&mut coll, key)?);
                self.active.insert(key, coll);
            }
        }
        self.finish_if_complete(key);

        let mut finished = Vec::with_capacity(done.len());
        for d in done {
            if let Some(d) = self.settle(d)? {
                finished.push(d);
            }
        }
        let mut finished = finished.into_iter();
        let first = finished.next();
        self.done.extend(finished);
        Ok(first)
    }

    /// Replay messages that arrived before `coll` existed, in arrival order.
    fn deliver_pending(
        &mut self,
        coll: &mut Collective,
        key: CollectiveKey,
    ) -> Result<Vec<CollectiveDone>> {
        let mut done = Vec::new();
        for msg in self.pending.remove(&key).unwrap_or_default() {
            if let Some(d) = coll.recv(msg, &self.tport)? {
                done.push(d);
            }
        }
        Ok(done)
    }

    fn finish_if_complete(&mut self, key: CollectiveKey) {
        if self.active.get(&key).is_some_and(Collective::is_complete) {
            self.active.remove(&key);
            self.pending.remove(&key);
            tracing::debug!(kind = %key.0, tag = key.1, "collective finished");
        }
    }

    /// Run the next step after an internal collective, or hand `done` back
    /// if nothing is waiting on it.
    fn settle(&mut self, done: CollectiveDone) -> Result<Option<CollectiveDone>> {
        match self.chains.remove(&(done.kind, done.tag)) {
            Some(next) => {
                tracing::trace!(kind = %done.kind, tag = done.tag, "continuing chained collective");
                next(self, done.result)
            }
            None => Ok(Some(done)),
        }
    }

    /// Register `next` to run when collective `(kind, tag)` completes here.
    /// Must happen before that collective is started.
    fn chain<F>(&mut self, kind: CollectiveKind, tag: Tag, next: F)
    where
        F: FnOnce(&mut Self, Option<Vec<u8>>) -> Result<Option<CollectiveDone>> + Send + 'static,
    {
        self.chains.insert((kind, tag), Box::new(next));
    }

    /// Route an inbound message, queueing it if its collective has not been
    /// started here yet.
    pub fn incoming(&mut self, msg: WorkMessage) -> Result<Option<CollectiveDone>> {
        let key = (msg.collective_kind()?, msg.tag);
        let Some(coll) = self.active.get_mut(&key) else {
            tracing::trace!(
                kind = %key.0,
                tag = key.1,
                round = msg.round,
                partner = msg.sender,
                "queueing message for collective not yet started"
            );
            self.pending.entry(key).or_default().push(msg);
            return Ok(None);
        };
        let done = coll.recv(msg, &self.tport)?;
        self.finish_if_complete(key);
        match done {
            Some(done) => self.settle(done),
            None => Ok(None),
        }
    }

    /// Next queued completion, if any.
    pub fn poll_done(&mut self) -> Option<CollectiveDone> {
        self.done.pop_front()
    }

    /// Log and return what every running collective is waiting for.
    pub fn deadlock_check(&self) -> Result<Vec<String>> {
        let mut report = Vec::new();
        for coll in self.active.values() {
            if !coll.is_complete() {
                report.extend(coll.deadlock_check()?);
            }
        }
        for ((kind, tag), msgs) in &self.pending {
            let line = format!(
                "{kind} tag {tag}: {} messages for a collective not started here",
                msgs.len()
            );
            tracing::warn!("{line}");
            report.push(line);
        }
        Ok(report)
    }

    /// SMP grouping of `comm` using this engine's node layout.
    ///
    /// Once built on every member, allgather and allreduce on `comm` go
    /// through the grouping whenever it is balanced.
    pub fn create_smp_communicator<'c>(
        &self,
        comm: &'c Communicator,
        neighbors: &BTreeSet<Rank>,
    ) -> Result<Option<&'c SmpGroup>> {
        comm.create_smp_communicator(neighbors, &self.tport)
    }
}

impl<T> std::fmt::Debug for CollectiveEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectiveEngine")
            .field("rank", &self.global.my_comm_rank())
            .field("active", &self.active.values().collect::<Vec<_>>())
            .field("queued_completions", &self.done.len())
            .field("chained", &self.chains.len())
            .finish_non_exhaustive()
    }
}
