pub mod local;
pub mod workspace;

pub use local::{LocalCluster, LocalNode, LocalTransport};
pub use workspace::{Workspace, WorkspacePool, WorkspaceStats};

use crate::error::{CollexError, Result};
use crate::protocol::WorkMessage;
use crate::types::{NodeId, Rank};
use std::sync::Arc;

/// Point-to-point services a collective engine runs on.
///
/// Sends are fire-and-forget: `send` returns once the message is handed to
/// the wire, and the receiving engine is driven separately by feeding it
/// inbound messages through `CollectiveEngine::incoming`.
pub trait Transport: Send + Sync + 'static {
    /// This process's global rank.
    fn rank(&self) -> Rank;

    /// Number of global ranks.
    fn nproc(&self) -> u32;

    /// The node a global rank lives on. Defaults to one rank per node.
    fn rank_to_node(&self, rank: Rank) -> NodeId {
        rank
    }

    /// Deliver `msg` to global rank `dst`.
    fn send(&self, dst: Rank, msg: WorkMessage) -> Result<()>;

    /// Scratch allocator for collective working buffers.
    fn workspace(&self) -> &Arc<WorkspacePool>;

    /// Local copy between equally sized buffers.
    fn memcopy(&self, dst: &mut [u8], src: &[u8]) -> Result<()> {
        if dst.len() != src.len() {
            return Err(CollexError::transport(format!(
                "memcopy of {} bytes into a {}-byte region",
                src.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(src);
        Ok(())
    }
}
