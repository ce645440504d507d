mod action;
mod actor;
mod allreduce;
mod alltoall;
mod barrier;
mod bcast;
mod binomial_reduce;
mod bruck;
mod btree_gather;
mod dag_collective;
mod helpers;
mod ring;
mod scan;
mod scatter;

#[cfg(test)]
pub(crate) mod testing;

pub use action::{Action, ActionDag, ActionId, ActionKind, Blocked};
pub use actor::{ActorContext, CollectiveActor, DagActor, DagAlgorithm};
pub use allreduce::{HalvingAllreduce, HalvingAllreduceActor};
pub use alltoall::{DirectAlltoall, DirectAlltoallActor};
pub use barrier::{BruckBarrier, BruckBarrierActor};
pub use bcast::{BinaryTreeBcast, BinaryTreeBcastActor};
pub use binomial_reduce::{BinomialReduce, BinomialReduceActor};
pub use bruck::{BruckAllgatherv, BruckAllgathervActor};
pub use btree_gather::{BtreeGather, BtreeGatherActor};
pub use dag_collective::{Collective, CollectiveState};
pub use ring::{RingAllgatherv, RingAllgathervActor};
pub use scan::{SimultaneousBtreeScan, SimultaneousBtreeScanActor};
pub use scatter::{BtreeScatter, BtreeScatterActor};
