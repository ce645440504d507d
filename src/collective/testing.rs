//! Test doubles for driving actors and collectives without a cluster.

use crate::collective::action::{Action, ActionDag};
use crate::collective::actor::ActorContext;
use crate::comm::Communicator;
use crate::error::Result;
use crate::protocol::WorkMessage;
use crate::transport::{Transport, WorkspacePool};
use crate::types::{CollectiveKind, Rank};
use std::sync::{Arc, Mutex};

/// Records every send instead of delivering it.
pub(crate) struct RecordingTransport {
    rank: Rank,
    nproc: u32,
    pool: Arc<WorkspacePool>,
    sent: Mutex<Vec<(Rank, WorkMessage)>>,
}

impl RecordingTransport {
    pub(crate) fn new(rank: Rank, nproc: u32) -> Self {
        Self {
            rank,
            nproc,
            pool: WorkspacePool::new(8),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Everything sent so far, clearing the log.
    pub(crate) fn take_sent(&self) -> Vec<(Rank, WorkMessage)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl Transport for RecordingTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn nproc(&self) -> u32 {
        self.nproc
    }

    fn send(&self, dst: Rank, msg: WorkMessage) -> Result<()> {
        self.sent.lock().unwrap().push((dst, msg));
        Ok(())
    }

    fn workspace(&self) -> &Arc<WorkspacePool> {
        &self.pool
    }
}

/// Context for participant `me` of a global communicator of size `n`.
pub(crate) fn ctx_for(me: Rank, n: u32) -> ActorContext {
    let comm = Arc::new(Communicator::global(me, n).unwrap());
    ActorContext::new(CollectiveKind::Allgatherv, 0, comm, me)
}

/// Run a DAG to completion, treating every action as instantly done.
pub(crate) fn drain_dag(dag: &mut ActionDag) -> Vec<Action> {
    dag.start();
    let mut order = Vec::new();
    while let Some(id) = dag.pop_ready() {
        order.push(dag.action(id).clone());
        dag.complete(id);
    }
    assert!(dag.is_complete(), "DAG did not drain");
    order
}
