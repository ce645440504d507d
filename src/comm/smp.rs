use crate::comm::Communicator;
use crate::error::{CollexError, Result};
use crate::transport::Transport;
use crate::types::{NodeId, Rank};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Node-local view of a communicator.
#[derive(Debug)]
pub struct SmpGroup {
    /// Members co-located with this process.
    pub smp: Arc<Communicator>,
    /// One representative (the lowest rank) per node. Only present on the
    /// representative itself.
    pub owner: Option<Arc<Communicator>>,
    /// Every node hosts the same number of members.
    pub balanced: bool,
}

impl Communicator {
    /// The grouping built by an earlier
    /// [`create_smp_communicator`](Self::create_smp_communicator), if any.
    pub fn smp_group(&self) -> Option<&SmpGroup> {
        self.smp.get().and_then(Option::as_ref)
    }

    /// Build, or return the cached, SMP grouping of this communicator.
    ///
    /// `neighbors` are the global ranks presumed to share this process's
    /// node. Returns `Ok(None)` when fewer than two of them belong to the
    /// communicator, since there is nothing to group.
    pub fn create_smp_communicator(
        &self,
        neighbors: &BTreeSet<Rank>,
        tport: &dyn Transport,
    ) -> Result<Option<&SmpGroup>> {
        if let Some(cached) = self.smp.get() {
            return Ok(cached.as_ref());
        }
        if !self.supports_smp() {
            return Err(CollexError::UnsupportedTranslation {
                communicator: self.mapping.name(),
                operation: "SMP grouping",
            });
        }

        let local = self.global_rank_set_intersection(neighbors)?;
        if local.is_empty() {
            return Err(CollexError::EmptySmpGroup);
        }
        let group = if local.len() <= 1 {
            tracing::debug!(rank = self.my_rank, "single-member SMP group, skipping");
            None
        } else {
            Some(self.build_smp_group(local, tport)?)
        };
        // A racing initializer computed the same group from the same inputs.
        let _ = self.smp.set(group);
        Ok(self.smp.get().and_then(Option::as_ref))
    }

    fn build_smp_group(&self, local: BTreeSet<Rank>, tport: &dyn Transport) -> Result<SmpGroup> {
        let me = self.comm_to_global_rank(self.my_rank)?;
        let leader = local.first().copied();
        let smp = Communicator::explicit(me, local)?;

        let mut by_node: BTreeMap<NodeId, Vec<Rank>> = BTreeMap::new();
        for g in self.global_ranks()? {
            by_node.entry(tport.rank_to_node(g)).or_default().push(g);
        }
        let mut sizes = by_node.values().map(Vec::len);
        let first = sizes.next().unwrap_or(0);
        let balanced = sizes.all(|s| s == first);

        let owner = if leader == Some(me) {
            let owners: BTreeSet<Rank> = by_node
                .values()
                .filter_map(|ranks| ranks.iter().min().copied())
                .collect();
            Some(Arc::new(Communicator::explicit(me, owners)?))
        } else {
            None
        };

        tracing::debug!(
            rank = self.my_rank,
            smp_size = smp.nproc(),
            owner = owner.is_some(),
            balanced,
            "created SMP group"
        );
        Ok(SmpGroup {
            smp: Arc::new(smp),
            owner,
            balanced,
        })
    }
}
