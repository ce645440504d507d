//! In-process cluster: every rank is a [`LocalNode`] with its own engine,
//! and ranks exchange rkyv-encoded work messages over tokio channels.

use crate::config::CollexConfig;
use crate::engine::CollectiveEngine;
use crate::error::{CollexError, Result};
use crate::protocol::{CollectiveDone, WorkMessage, decode_message, encode_message};
use crate::transport::{Transport, WorkspacePool};
use crate::types::{NodeId, Rank};
use rkyv::util::AlignedVec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Sending half of the in-process mesh for one rank.
pub struct LocalTransport {
    rank: Rank,
    ranks_per_node: u32,
    peers: Vec<mpsc::UnboundedSender<AlignedVec>>,
    workspace: Arc<WorkspacePool>,
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn nproc(&self) -> u32 {
        self.peers.len() as u32
    }

    fn rank_to_node(&self, rank: Rank) -> NodeId {
        rank / self.ranks_per_node
    }

    fn send(&self, dst: Rank, msg: WorkMessage) -> Result<()> {
        let peer = self
            .peers
            .get(dst as usize)
            .ok_or_else(|| CollexError::transport(format!("no route to rank {dst}")))?;
        let buf = encode_message(&msg)?;
        peer.send(buf)
            .map_err(|_| CollexError::transport(format!("rank {dst} has shut down")))
    }

    fn workspace(&self) -> &Arc<WorkspacePool> {
        &self.workspace
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("rank", &self.rank)
            .field("nproc", &self.peers.len())
            .field("workspace", &self.workspace)
            .finish()
    }
}

/// Builder for an in-process mesh.
pub struct LocalCluster;

impl LocalCluster {
    /// Create `nproc` connected nodes, one per rank.
    pub fn bootstrap(nproc: u32, config: CollexConfig) -> Result<Vec<LocalNode>> {
        if nproc == 0 {
            return Err(CollexError::InvalidCommunicator {
                reason: "cluster with zero ranks".into(),
            });
        }
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..nproc).map(|_| mpsc::unbounded_channel()).unzip();

        let mut nodes = Vec::with_capacity(nproc as usize);
        for (rank, inbox) in receivers.into_iter().enumerate() {
            let tport = LocalTransport {
                rank: rank as Rank,
                ranks_per_node: config.ranks_per_node.max(1),
                peers: senders.clone(),
                workspace: WorkspacePool::new(config.workspace_pool_size),
            };
            let timeout = config.collective_timeout;
            nodes.push(LocalNode {
                engine: CollectiveEngine::new(tport, config.clone())?,
                inbox,
                timeout,
            });
        }
        tracing::debug!(nproc, "local cluster ready");
        Ok(nodes)
    }

    /// Bootstrap a cluster and run `f` on every node as its own tokio task.
    /// Outputs come back in rank order; the first failing node fails the run.
    pub async fn run<F, Fut, R>(nproc: u32, config: CollexConfig, f: F) -> Result<Vec<R>>
    where
        F: Fn(LocalNode) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let handles = Self::bootstrap(nproc, config)?.into_iter().map(|node| {
            let f = Arc::clone(&f);
            let rank = node.rank();
            async move {
                tokio::spawn(async move { f(node).await })
                    .await
                    .map_err(|e| {
                        CollexError::transport_with_source(format!("rank {rank} task panicked"), e)
                    })?
            }
        });
        futures::future::try_join_all(handles).await
    }
}

/// One rank of a [`LocalCluster`].
pub struct LocalNode {
    engine: CollectiveEngine<LocalTransport>,
    inbox: mpsc::UnboundedReceiver<AlignedVec>,
    timeout: Duration,
}

impl LocalNode {
    pub fn rank(&self) -> Rank {
        self.engine.transport().rank()
    }

    pub fn engine(&self) -> &CollectiveEngine<LocalTransport> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CollectiveEngine<LocalTransport> {
        &mut self.engine
    }

    /// Block until the next completion.
    ///
    /// Pass the value an entry point returned: if it already completed the
    /// call, it is handed straight back. Otherwise inbound messages are fed
    /// to the engine until one yields a completion. Fails with
    /// [`CollexError::Timeout`] if no message arrives within the configured
    /// timeout, after logging what the engine is still waiting for.
    pub async fn wait(&mut self, first: Option<CollectiveDone>) -> Result<CollectiveDone> {
        if let Some(done) = first {
            return Ok(done);
        }
        loop {
            if let Some(done) = self.engine.poll_done() {
                return Ok(done);
            }
            let buf = match tokio::time::timeout(self.timeout, self.inbox.recv()).await {
                Ok(Some(buf)) => buf,
                Ok(None) => return Err(CollexError::transport("inbox closed")),
                Err(_) => {
                    self.engine.deadlock_check()?;
                    return Err(CollexError::Timeout {
                        rank: self.rank(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
            };
            let msg = decode_message(&buf)?;
            if let Some(done) = self.engine.incoming(msg)? {
                return Ok(done);
            }
        }
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("engine", &self.engine)
            .field("timeout", &self.timeout)
            .finish()
    }
}
