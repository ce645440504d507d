/// Identifier of the node (host) a rank lives on.
pub type NodeId = u32;

/// Rank of a participant, either global or communicator-local (0-indexed).
pub type Rank = u32;

/// Numeric tag distinguishing concurrent collectives of the same kind.
pub type Tag = u32;

/// Completion queue id a finished collective reports to.
pub type CqId = u32;

/// Data types with built-in combine functions.
///
/// Collectives themselves are datatype-agnostic and only see an element size;
/// this enum exists so callers can pick one of the combines in [`crate::reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    I8 = 2,
    I32 = 3,
    I64 = 4,
    U8 = 5,
    U32 = 6,
    U64 = 7,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 => 8,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduction operations with built-in combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    /// Element-wise sum.
    Sum,
    /// Element-wise product.
    Prod,
    /// Element-wise minimum.
    Min,
    /// Element-wise maximum.
    Max,
}

impl std::fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReduceOp::Sum => f.write_str("sum"),
            ReduceOp::Prod => f.write_str("prod"),
            ReduceOp::Min => f.write_str("min"),
            ReduceOp::Max => f.write_str("max"),
        }
    }
}

/// The collective operations the engine knows how to run.
///
/// Carried on every work message (as its `u8` discriminant) so the receiving
/// engine can route it to the collective with the same `(kind, tag)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CollectiveKind {
    Allgather = 0,
    Allgatherv = 1,
    Gather = 2,
    Scan = 3,
    Bcast = 4,
    Barrier = 5,
    Allreduce = 6,
    Reduce = 7,
    Scatter = 8,
    Alltoall = 9,
}

impl CollectiveKind {
    pub const ALL: [CollectiveKind; 10] = [
        CollectiveKind::Allgather,
        CollectiveKind::Allgatherv,
        CollectiveKind::Gather,
        CollectiveKind::Scan,
        CollectiveKind::Bcast,
        CollectiveKind::Barrier,
        CollectiveKind::Allreduce,
        CollectiveKind::Reduce,
        CollectiveKind::Scatter,
        CollectiveKind::Alltoall,
    ];

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            CollectiveKind::Allgather => "allgather",
            CollectiveKind::Allgatherv => "allgatherv",
            CollectiveKind::Gather => "gather",
            CollectiveKind::Scan => "scan",
            CollectiveKind::Bcast => "bcast",
            CollectiveKind::Barrier => "barrier",
            CollectiveKind::Allreduce => "allreduce",
            CollectiveKind::Reduce => "reduce",
            CollectiveKind::Scatter => "scatter",
            CollectiveKind::Alltoall => "alltoall",
        }
    }
}

impl TryFrom<u8> for CollectiveKind {
    type Error = crate::error::CollexError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        CollectiveKind::ALL
            .into_iter()
            .find(|k| *k as u8 == raw)
            .ok_or(crate::error::CollexError::UnknownCollective { raw })
    }
}

impl std::fmt::Display for CollectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
