//! Per-participant action graphs.
//!
//! An [`ActionDag`] is built once, before execution, from nothing but the
//! participant's rank and the communicator size. Each node counts its
//! unfinished predecessors; it becomes ready when that count reaches zero and
//! runs exactly once.

use crate::types::Rank;
use std::collections::{HashSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Send,
    Recv,
    Shuffle,
}

/// One local step. Offsets and counts are in elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub round: u32,
    /// Communicator rank of the peer. A shuffle names its own rank.
    pub partner: Rank,
    pub offset: usize,
    pub nelems: usize,
}

impl Action {
    pub fn send(round: u32, partner: Rank, offset: usize, nelems: usize) -> Self {
        Self {
            kind: ActionKind::Send,
            round,
            partner,
            offset,
            nelems,
        }
    }

    pub fn recv(round: u32, partner: Rank, offset: usize, nelems: usize) -> Self {
        Self {
            kind: ActionKind::Recv,
            round,
            partner,
            offset,
            nelems,
        }
    }

    pub fn shuffle(round: u32, me: Rank, offset: usize, nelems: usize) -> Self {
        Self {
            kind: ActionKind::Shuffle,
            round,
            partner: me,
            offset,
            nelems,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.kind {
            ActionKind::Send => "send to",
            ActionKind::Recv => "recv from",
            ActionKind::Shuffle => "shuffle on",
        };
        write!(
            f,
            "round {} {verb} {} [{}..{})",
            self.round,
            self.partner,
            self.offset,
            self.offset + self.nelems
        )
    }
}

/// Index of an action within its DAG.
pub type ActionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Ready,
    Done,
}

#[derive(Debug)]
struct Node {
    action: Action,
    preds: Vec<ActionId>,
    succs: Vec<ActionId>,
    unmet: usize,
    state: NodeState,
}

/// An action that has not finished, with whatever still blocks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    pub id: ActionId,
    pub action: Action,
    /// Predecessors that have not completed. Empty for an action that is
    /// ready but has not run, e.g. a receive still waiting for its message.
    pub waiting_on: Vec<ActionId>,
}

#[derive(Debug, Default)]
pub struct ActionDag {
    nodes: Vec<Node>,
    ready: VecDeque<ActionId>,
    done: usize,
    started: bool,
    defects: Vec<String>,
}

impl ActionDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action that runs after every action in `preds`.
    ///
    /// Predecessors must already be in the graph, which keeps it acyclic.
    pub fn add(&mut self, action: Action, preds: &[ActionId]) -> ActionId {
        let id = self.nodes.len();
        let mut unique = Vec::with_capacity(preds.len());
        for &p in preds {
            if p >= id {
                self.defects
                    .push(format!("action {id} ({action}) depends on unknown action {p}"));
            } else if !unique.contains(&p) {
                unique.push(p);
                self.nodes[p].succs.push(id);
            }
        }
        self.nodes.push(Node {
            action,
            unmet: unique.len(),
            preds: unique,
            succs: Vec::new(),
            state: NodeState::Waiting,
        });
        id
    }

    /// Structural problems found while building. Receives must be uniquely
    /// keyed by `(round, partner)` so an inbound message has one destination.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(defect) = self.defects.first() {
            return Err(defect.clone());
        }
        let mut keys = HashSet::new();
        for node in &self.nodes {
            let a = &node.action;
            if a.kind == ActionKind::Recv && !keys.insert((a.round, a.partner)) {
                return Err(format!(
                    "two receives from rank {} in round {}",
                    a.partner, a.round
                ));
            }
        }
        Ok(())
    }

    /// Release every action without predecessors.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for (id, node) in self.nodes.iter_mut().enumerate() {
            if node.unmet == 0 {
                node.state = NodeState::Ready;
                self.ready.push_back(id);
            }
        }
    }

    /// Next action whose predecessors have all completed.
    pub fn pop_ready(&mut self) -> Option<ActionId> {
        self.ready.pop_front()
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.nodes[id].action
    }

    /// Mark `id` finished and release any successor that becomes ready.
    /// Completing an action twice is a no-op.
    pub fn complete(&mut self, id: ActionId) {
        if self.nodes[id].state == NodeState::Done {
            return;
        }
        self.nodes[id].state = NodeState::Done;
        self.done += 1;
        let succs = std::mem::take(&mut self.nodes[id].succs);
        for &s in &succs {
            let node = &mut self.nodes[s];
            node.unmet -= 1;
            if node.unmet == 0 && node.state == NodeState::Waiting {
                node.state = NodeState::Ready;
                self.ready.push_back(s);
            }
        }
        self.nodes[id].succs = succs;
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.nodes.len()
    }

    pub fn is_done(&self, id: ActionId) -> bool {
        self.nodes[id].state == NodeState::Done
    }

    /// The receive expecting `partner`'s message for `round`.
    pub fn find_recv(&self, round: u32, partner: Rank) -> Option<ActionId> {
        self.nodes.iter().position(|n| {
            n.action.kind == ActionKind::Recv
                && n.action.round == round
                && n.action.partner == partner
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every unfinished action and its unfinished predecessors.
    pub fn blocked(&self) -> Vec<Blocked> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.state != NodeState::Done)
            .map(|(id, n)| Blocked {
                id,
                action: n.action.clone(),
                waiting_on: n
                    .preds
                    .iter()
                    .copied()
                    .filter(|&p| self.nodes[p].state != NodeState::Done)
                    .collect(),
            })
            .collect()
    }
}
