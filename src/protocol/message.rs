use crate::error::Result;
use crate::types::{CollectiveKind, CqId, Rank, Tag};

/// One point-to-point transfer belonging to a collective.
///
/// Routed by `(kind, tag)` to a collective and by `recver` to the local actor.
/// `sender` and `recver` are ranks in the collective's communicator, so the
/// same message means the same thing on every process regardless of how the
/// communicator maps onto global ranks.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub struct WorkMessage {
    /// `CollectiveKind` discriminant.
    pub kind: u8,
    pub tag: Tag,
    pub round: u32,
    pub sender: Rank,
    pub recver: Rank,
    pub nelems: u64,
    /// `None` in skeleton mode: the count travels, the bytes do not.
    pub payload: Option<Vec<u8>>,
}

impl WorkMessage {
    /// Decode the collective kind, rejecting unknown discriminants.
    pub fn collective_kind(&self) -> Result<CollectiveKind> {
        CollectiveKind::try_from(self.kind)
    }
}

/// Completion token for one participant of one collective.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectiveDone {
    pub kind: CollectiveKind,
    pub tag: Tag,
    pub cq_id: CqId,
    /// Participant rank within the collective's communicator.
    pub comm_rank: Rank,
    /// The caller's destination buffer, handed back with the result in it.
    /// `None` for barriers and skeleton runs.
    pub result: Option<Vec<u8>>,
}
