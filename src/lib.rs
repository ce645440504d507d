pub mod collective;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod reduce;
pub mod transport;
pub mod types;

pub use collective::{Collective, CollectiveState};
pub use comm::{Communicator, RankMapping, SmpGroup};
pub use config::{AllgatherAlgorithm, CollexConfig};
pub use engine::{Buffers, CollectiveEngine, OpContext};
pub use error::{CollexError, Result};
pub use protocol::{CollectiveDone, WorkMessage};
pub use reduce::{ReduceFn, reduce_fn};
pub use transport::{LocalCluster, LocalNode, Transport, WorkspacePool, WorkspaceStats};
pub use types::{CollectiveKind, CqId, DataType, NodeId, Rank, ReduceOp, Tag};
