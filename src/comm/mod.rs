//! Process groups and rank translation.
//!
//! A [`Communicator`] numbers its members `0..nproc` and translates between
//! those local ranks and the global rank space of the transport. The
//! translation strategy is a [`RankMapping`]; communicators are immutable once
//! built apart from the lazily created SMP grouping (see [`smp`]).

mod smp;

pub use smp::SmpGroup;

use crate::error::{CollexError, Result};
use crate::types::Rank;
use indexmap::IndexSet;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

/// How local ranks map onto global ranks.
#[derive(Debug)]
pub enum RankMapping {
    /// Local rank == global rank.
    Global,
    /// Arbitrary member list. Position in the set is the local rank.
    ExplicitMap { members: IndexSet<Rank> },
    /// Local rank `r` is base rank `(r + shift) mod n`.
    Shifted { base: Arc<Communicator>, shift: u32 },
    /// Forward-only translation through an ordered list.
    IndexList { ranks: Vec<Rank> },
    /// Local rank `r` is global rank `(r + shift) mod n`, computed on the fly.
    Rotate { shift: u32 },
    /// Contiguous global slice `[start, start + n)`.
    SubRange { start: Rank },
}

impl RankMapping {
    /// Short name used in diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            RankMapping::Global => "global",
            RankMapping::ExplicitMap { .. } => "explicit-map",
            RankMapping::Shifted { .. } => "shifted",
            RankMapping::IndexList { .. } => "index-list",
            RankMapping::Rotate { .. } => "rotate",
            RankMapping::SubRange { .. } => "sub-range",
        }
    }
}

/// A process group: this process's local rank, the group size, and the
/// strategy translating local ranks to global ones.
///
/// Shared read-only (behind `Arc`) by every collective running on it.
#[derive(Debug)]
pub struct Communicator {
    my_rank: Rank,
    nproc: u32,
    mapping: RankMapping,
    smp: OnceLock<Option<SmpGroup>>,
}

impl Communicator {
    fn build(my_rank: Rank, nproc: u32, mapping: RankMapping) -> Result<Self> {
        if nproc == 0 {
            return Err(CollexError::InvalidCommunicator {
                reason: format!("{} communicator with zero ranks", mapping.name()),
            });
        }
        if my_rank >= nproc {
            return Err(CollexError::InvalidCommunicator {
                reason: format!(
                    "local rank {my_rank} out of range for {} communicator of size {nproc}",
                    mapping.name()
                ),
            });
        }
        Ok(Self {
            my_rank,
            nproc,
            mapping,
            smp: OnceLock::new(),
        })
    }

    /// All `nproc` global ranks, in order.
    pub fn global(my_global: Rank, nproc: u32) -> Result<Self> {
        Self::build(my_global, nproc, RankMapping::Global)
    }

    /// An arbitrary subset of global ranks. Local ranks follow `members` order.
    pub fn explicit(my_global: Rank, members: impl IntoIterator<Item = Rank>) -> Result<Self> {
        let mut set = IndexSet::new();
        for g in members {
            if !set.insert(g) {
                return Err(CollexError::InvalidCommunicator {
                    reason: format!("global rank {g} listed twice"),
                });
            }
        }
        let my_rank = set
            .get_index_of(&my_global)
            .ok_or(CollexError::NotAMember { rank: my_global })? as Rank;
        let nproc = set.len() as u32;
        Self::build(my_rank, nproc, RankMapping::ExplicitMap { members: set })
    }

    /// Renumber `base` so that local rank 0 is base rank `shift`.
    pub fn shifted(base: Arc<Communicator>, shift: u32) -> Result<Self> {
        let nproc = base.nproc();
        let shift = shift % nproc;
        let my_rank = (base.my_comm_rank() + nproc - shift) % nproc;
        Self::build(my_rank, nproc, RankMapping::Shifted { base, shift })
    }

    /// Forward-only group. The caller supplies its own local rank because
    /// reverse lookup is not available.
    pub fn index_list(my_rank: Rank, ranks: Vec<Rank>) -> Result<Self> {
        let nproc = ranks.len() as u32;
        Self::build(my_rank, nproc, RankMapping::IndexList { ranks })
    }

    /// Virtual ring over global ranks `0..nproc` rotated by `shift`.
    pub fn rotate(my_global: Rank, nproc: u32, shift: u32) -> Result<Self> {
        if nproc == 0 {
            return Err(CollexError::InvalidCommunicator {
                reason: "rotate communicator with zero ranks".into(),
            });
        }
        if my_global >= nproc {
            return Err(CollexError::NotAMember { rank: my_global });
        }
        let shift = shift % nproc;
        let my_rank = (my_global + nproc - shift) % nproc;
        Self::build(my_rank, nproc, RankMapping::Rotate { shift })
    }

    /// Global ranks `[start, start + nproc)`.
    pub fn sub_range(my_global: Rank, start: Rank, nproc: u32) -> Result<Self> {
        if my_global < start || my_global - start >= nproc {
            return Err(CollexError::NotAMember { rank: my_global });
        }
        Self::build(my_global - start, nproc, RankMapping::SubRange { start })
    }

    pub fn nproc(&self) -> u32 {
        self.nproc
    }

    pub fn my_comm_rank(&self) -> Rank {
        self.my_rank
    }

    pub fn mapping(&self) -> &RankMapping {
        &self.mapping
    }

    /// Translate a local rank to its global rank.
    pub fn comm_to_global_rank(&self, rank: Rank) -> Result<Rank> {
        if rank >= self.nproc {
            return Err(CollexError::RankNotMapped {
                rank,
                nproc: self.nproc,
            });
        }
        let n = self.nproc;
        match &self.mapping {
            RankMapping::Global => Ok(rank),
            RankMapping::ExplicitMap { members } => members
                .get_index(rank as usize)
                .copied()
                .ok_or(CollexError::RankNotMapped { rank, nproc: n }),
            RankMapping::Shifted { base, shift } => base.comm_to_global_rank((rank + shift) % n),
            RankMapping::IndexList { ranks } => Ok(ranks[rank as usize]),
            RankMapping::Rotate { shift } => Ok((rank + shift) % n),
            RankMapping::SubRange { start } => Ok(start + rank),
        }
    }

    /// Translate a global rank to its local rank.
    pub fn global_to_comm_rank(&self, global: Rank) -> Result<Rank> {
        let n = self.nproc;
        match &self.mapping {
            RankMapping::Global => {
                if global < n {
                    Ok(global)
                } else {
                    Err(CollexError::NotAMember { rank: global })
                }
            }
            RankMapping::ExplicitMap { members } => members
                .get_index_of(&global)
                .map(|i| i as Rank)
                .ok_or(CollexError::NotAMember { rank: global }),
            RankMapping::Shifted { base, shift } => {
                let base_rank = base.global_to_comm_rank(global)?;
                Ok((base_rank + n - shift) % n)
            }
            RankMapping::IndexList { .. } => Err(CollexError::UnsupportedTranslation {
                communicator: self.mapping.name(),
                operation: "reverse rank lookup",
            }),
            RankMapping::Rotate { shift } => {
                if global < n {
                    Ok((global + n - shift) % n)
                } else {
                    Err(CollexError::NotAMember { rank: global })
                }
            }
            RankMapping::SubRange { start } => {
                if global >= *start && global - start < n {
                    Ok(global - start)
                } else {
                    Err(CollexError::NotAMember { rank: global })
                }
            }
        }
    }

    /// The members of `globals` that belong to this communicator.
    pub fn global_rank_set_intersection(&self, globals: &BTreeSet<Rank>) -> Result<BTreeSet<Rank>> {
        let n = self.nproc;
        match &self.mapping {
            RankMapping::Global => Ok(globals.iter().copied().filter(|&g| g < n).collect()),
            RankMapping::ExplicitMap { members } => Ok(globals
                .iter()
                .copied()
                .filter(|g| members.contains(g))
                .collect()),
            RankMapping::Shifted { base, .. } => base.global_rank_set_intersection(globals),
            RankMapping::IndexList { ranks } => Ok(ranks
                .iter()
                .copied()
                .filter(|g| globals.contains(g))
                .collect()),
            RankMapping::Rotate { .. } => Err(CollexError::UnsupportedTranslation {
                communicator: self.mapping.name(),
                operation: "rank set intersection",
            }),
            RankMapping::SubRange { start } => Ok(globals
                .range(*start..start + n)
                .copied()
                .collect()),
        }
    }

    /// Whether this communicator can be split into SMP-local groups.
    pub fn supports_smp(&self) -> bool {
        match &self.mapping {
            RankMapping::Global | RankMapping::ExplicitMap { .. } | RankMapping::SubRange { .. } => {
                true
            }
            RankMapping::Shifted { base, .. } => base.supports_smp(),
            RankMapping::IndexList { .. } | RankMapping::Rotate { .. } => false,
        }
    }

    /// Every member's global rank, in local rank order.
    pub fn global_ranks(&self) -> Result<Vec<Rank>> {
        (0..self.nproc)
            .map(|r| self.comm_to_global_rank(r))
            .collect()
    }
}
