use crate::collective::actor::CollectiveActor;
use crate::comm::Communicator;
use crate::error::{CollexError, Result};
use crate::protocol::{CollectiveDone, WorkMessage};
use crate::transport::Transport;
use crate::types::{CollectiveKind, CqId, Rank, Tag};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// Lifecycle of a [`Collective`]. Destruction is the owner dropping it once
/// it reports [`CollectiveState::GloballyComplete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectiveState {
    Created,
    ActorsInitialized,
    Receiving,
    /// Some, but not all, local participants have finished.
    LocalComplete,
    GloballyComplete,
}

#[derive(Debug)]
struct Participant {
    refcount: u32,
    cq_id: CqId,
}

/// One instance of a collective operation on one process.
///
/// Owns an actor per locally hosted participant, routes inbound messages to
/// them by `recver`, and counts participants down to completion. Messages
/// for participants whose actor does not exist yet are queued in arrival
/// order and replayed when [`Collective::add_actors`] brings the actor in.
pub struct Collective {
    kind: CollectiveKind,
    tag: Tag,
    cq_id: CqId,
    comm: Arc<Communicator>,
    actors: BTreeMap<Rank, Box<dyn CollectiveActor>>,
    participants: BTreeMap<Rank, Participant>,
    pending: VecDeque<WorkMessage>,
    state: CollectiveState,
}

impl Collective {
    pub fn new(kind: CollectiveKind, tag: Tag, cq_id: CqId, comm: Arc<Communicator>) -> Self {
        Self {
            kind,
            tag,
            cq_id,
            comm,
            actors: BTreeMap::new(),
            participants: BTreeMap::new(),
            pending: VecDeque::new(),
            state: CollectiveState::Created,
        }
    }

    pub fn kind(&self) -> CollectiveKind {
        self.kind
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn cq_id(&self) -> CqId {
        self.cq_id
    }

    pub fn comm(&self) -> &Arc<Communicator> {
        &self.comm
    }

    pub fn state(&self) -> CollectiveState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == CollectiveState::GloballyComplete
    }

    /// Participants that have not finished.
    pub fn outstanding(&self) -> impl Iterator<Item = Rank> + '_ {
        self.participants.keys().copied()
    }

    /// Messages waiting for an actor that does not exist yet.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn consistency(&self, rank: Rank, reason: impl Into<String>) -> CollexError {
        CollexError::InternalConsistency {
            kind: self.kind,
            tag: self.tag,
            rank,
            reason: reason.into(),
        }
    }

    /// Initialize and register the actor for one participant.
    pub fn init_actor(
        &mut self,
        mut actor: Box<dyn CollectiveActor>,
        tport: &dyn Transport,
    ) -> Result<()> {
        let participant = actor.participant();
        if self.actors.contains_key(&participant) {
            return Err(CollexError::DuplicateTag {
                kind: self.kind,
                tag: self.tag,
                participant,
            });
        }
        actor.init(tport)?;
        self.actors.insert(participant, actor);
        self.participants
            .entry(participant)
            .or_insert(Participant {
                refcount: 0,
                cq_id: self.cq_id,
            })
            .refcount += 1;
        self.state = CollectiveState::ActorsInitialized;
        Ok(())
    }

    /// Start every actor, returning completions of actors that finish
    /// without needing any message.
    pub fn start(&mut self, tport: &dyn Transport) -> Result<Vec<CollectiveDone>> {
        tracing::debug!(
            kind = %self.kind,
            tag = self.tag,
            actors = self.actors.len(),
            "starting collective"
        );
        self.state = CollectiveState::Receiving;
        let mut done = Vec::new();
        let ranks: Vec<Rank> = self.actors.keys().copied().collect();
        for rank in ranks {
            let Some(actor) = self.actors.get_mut(&rank) else {
                continue;
            };
            actor.start(tport)?;
            if actor.is_complete()
                && let Some(d) = self.actor_done(rank)?
            {
                done.push(d);
            }
        }
        Ok(done)
    }

    /// Route a message to the actor for `msg.recver`, queueing it if that
    /// actor does not exist yet. Returns a completion if this message
    /// finished the participant.
    pub fn recv(
        &mut self,
        msg: WorkMessage,
        tport: &dyn Transport,
    ) -> Result<Option<CollectiveDone>> {
        let target = msg.recver;
        let Some(actor) = self.actors.get_mut(&target) else {
            tracing::trace!(
                kind = %self.kind,
                tag = self.tag,
                rank = target,
                round = msg.round,
                partner = msg.sender,
                "queueing message for absent actor"
            );
            self.pending.push_back(msg);
            return Ok(None);
        };
        if actor.is_complete() {
            tracing::warn!(
                kind = %self.kind,
                tag = self.tag,
                rank = target,
                round = msg.round,
                partner = msg.sender,
                "ignoring message for finished participant"
            );
            return Ok(None);
        }
        actor.recv(msg, tport)?;
        if actor.is_complete() {
            return self.actor_done(target);
        }
        Ok(None)
    }

    /// Drop one reference to `participant`. At zero its completion token is
    /// produced and its entry erased.
    pub fn actor_done(&mut self, participant: Rank) -> Result<Option<CollectiveDone>> {
        let Some(entry) = self.participants.get_mut(&participant) else {
            return Err(self.consistency(participant, "completion for unknown participant"));
        };
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return Ok(None);
        }
        let cq_id = entry.cq_id;
        self.participants.remove(&participant);
        let result = self
            .actors
            .get_mut(&participant)
            .and_then(|a| a.take_result());
        self.state = if self.participants.is_empty() {
            CollectiveState::GloballyComplete
        } else {
            CollectiveState::LocalComplete
        };
        tracing::debug!(
            kind = %self.kind,
            tag = self.tag,
            rank = participant,
            state = ?self.state,
            "participant complete"
        );
        Ok(Some(CollectiveDone {
            kind: self.kind,
            tag: self.tag,
            cq_id,
            comm_rank: participant,
            result,
        }))
    }

    /// Absorb the actors of a collective started separately for the same
    /// `(kind, tag)`, then replay queued messages in arrival order. Every
    /// completion produced along the way is returned.
    pub fn add_actors(
        &mut self,
        other: Collective,
        tport: &dyn Transport,
    ) -> Result<Vec<CollectiveDone>> {
        if other.kind != self.kind || other.tag != self.tag {
            return Err(self.consistency(
                self.comm.my_comm_rank(),
                format!("cannot merge {} tag {}", other.kind, other.tag),
            ));
        }
        let Collective {
            actors,
            participants,
            pending,
            ..
        } = other;

        if let Some(&dup) = actors.keys().find(|r| self.actors.contains_key(r)) {
            return Err(CollexError::DuplicateTag {
                kind: self.kind,
                tag: self.tag,
                participant: dup,
            });
        }
        for (rank, actor) in actors {
            self.actors.insert(rank, actor);
        }
        for (rank, p) in participants {
            self.participants
                .entry(rank)
                .or_insert(Participant {
                    refcount: 0,
                    cq_id: p.cq_id,
                })
                .refcount += p.refcount;
        }
        self.pending.extend(pending);
        if self.state == CollectiveState::GloballyComplete && !self.participants.is_empty() {
            self.state = CollectiveState::Receiving;
        }

        let mut done = Vec::new();
        let queued = std::mem::take(&mut self.pending);
        tracing::debug!(
            kind = %self.kind,
            tag = self.tag,
            replay = queued.len(),
            "replaying queued messages"
        );
        for msg in queued {
            if let Some(d) = self.recv(msg, tport)? {
                done.push(d);
            }
        }
        Ok(done)
    }

    /// Report what every unfinished participant is waiting for.
    pub fn deadlock_check(&self) -> Result<Vec<String>> {
        let mut report = Vec::new();
        for &rank in self.participants.keys() {
            let actor = self
                .actors
                .get(&rank)
                .ok_or_else(|| self.consistency(rank, "no actor for outstanding participant"))?;
            for line in actor.deadlock_report() {
                tracing::warn!("{line}");
                report.push(line);
            }
        }
        if !self.pending.is_empty() {
            let line = format!(
                "{} tag {}: {} messages queued for absent participants",
                self.kind,
                self.tag,
                self.pending.len()
            );
            tracing::warn!("{line}");
            report.push(line);
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Collective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collective")
            .field("kind", &self.kind)
            .field("tag", &self.tag)
            .field("state", &self.state)
            .field("actors", &self.actors.keys().collect::<Vec<_>>())
            .field("outstanding", &self.participants.keys().collect::<Vec<_>>())
            .field("pending", &self.pending.len())
            .finish()
    }
}
