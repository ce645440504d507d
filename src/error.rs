use crate::types::{CollectiveKind, Rank, Tag};

pub type Result<T> = std::result::Result<T, CollexError>;

/// Every variant is fatal for the rank that hits it. A message arriving before
/// the collective or actor it targets exists is not an error: it is queued.
#[derive(Debug, thiserror::Error)]
pub enum CollexError {
    #[error("invalid communicator: {reason}")]
    InvalidCommunicator { reason: String },

    #[error("local rank {rank} is not mapped in a communicator of size {nproc}")]
    RankNotMapped { rank: Rank, nproc: u32 },

    #[error("global rank {rank} is not a member of this communicator")]
    NotAMember { rank: Rank },

    #[error("{communicator} communicator does not support {operation}")]
    UnsupportedTranslation {
        communicator: &'static str,
        operation: &'static str,
    },

    #[error("SMP neighbor set has no members in common with the communicator")]
    EmptySmpGroup,

    #[error("unknown collective type {raw}")]
    UnknownCollective { raw: u8 },

    #[error("{kind} tag {tag} already has an actor for participant {participant}")]
    DuplicateTag {
        kind: CollectiveKind,
        tag: Tag,
        participant: Rank,
    },

    #[error(
        "{kind} tag {tag} on rank {rank}: buffer size mismatch: expected {expected} bytes, got {actual}"
    )]
    BufferSizeMismatch {
        kind: CollectiveKind,
        tag: Tag,
        rank: Rank,
        expected: usize,
        actual: usize,
    },

    #[error(
        "{kind} tag {tag} on rank {rank}: count list has {actual} entries but the communicator has {expected} ranks"
    )]
    CountMismatch {
        kind: CollectiveKind,
        tag: Tag,
        rank: Rank,
        expected: usize,
        actual: usize,
    },

    #[error("{kind} tag {tag} on rank {rank}: requires a {buffer} buffer")]
    MissingBuffer {
        kind: CollectiveKind,
        tag: Tag,
        rank: Rank,
        buffer: &'static str,
    },

    #[error("{kind} tag {tag} on rank {rank}: invalid root {root} for communicator of size {nproc}")]
    InvalidRoot {
        kind: CollectiveKind,
        tag: Tag,
        rank: Rank,
        root: Rank,
        nproc: u32,
    },

    #[error("{kind} tag {tag} on rank {rank}: internal consistency violated: {reason}")]
    InternalConsistency {
        kind: CollectiveKind,
        tag: Tag,
        rank: Rank,
        reason: String,
    },

    #[error("{kind} tag {tag} on rank {rank}: invalid action DAG: {reason}")]
    InvalidDag {
        kind: CollectiveKind,
        tag: Tag,
        rank: Rank,
        reason: String,
    },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("message encode failed: {0}")]
    EncodeFailed(String),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("rank {rank} saw no collective progress for {timeout_ms}ms")]
    Timeout { rank: Rank, timeout_ms: u64 },
}

impl CollexError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }
}
