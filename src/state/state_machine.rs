use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle phases of a party. The flow is linear and never loops back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PartyPhase {
    /// Players are joining.
    Lobby,
    /// Players are submitting songs.
    Submitting,
    /// Songs are played and voted on.
    Playing,
    /// Bonus awards, identities and the champion are revealed.
    Finale,
    /// The party is over.
    Complete,
}

/// Events that can be applied to the party state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyEvent {
    /// The host starts the party from the lobby.
    Start,
    /// Every player submitted their songs.
    SubmissionsComplete,
    /// No unplayed song remains in the queue.
    QueueExhausted,
    /// The finale reveal sequence has run to the end.
    RevealFinished,
}

/// `event` has no edge out of `from`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in.
    pub from: PartyPhase,
    /// Rejected event.
    pub event: PartyEvent,
}

/// Why a transition could not be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Another plan must be applied or aborted first.
    #[error("a state transition is already pending")]
    AlreadyPending,
    /// The event is not allowed from the current phase.
    #[error(transparent)]
    InvalidTransition(InvalidTransition),
}

/// Why a plan could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Nothing was planned.
    #[error("no transition is pending")]
    NoPending,
    /// The id handed back is not the pending plan's.
    #[error("plan {got} is not the pending plan {expected}")]
    IdMismatch { expected: PlanId, got: PlanId },
    /// The machine left the plan's source phase in the meantime.
    #[error("phase changed during transition (expected {expected:?}, got {actual:?})")]
    PhaseMismatch {
        expected: PartyPhase,
        actual: PartyPhase,
    },
    /// Another transition was taken since the plan was made.
    #[error("version changed during transition (expected {expected}, got {actual})")]
    VersionMismatch { expected: usize, actual: usize },
}

/// Why a plan could not be aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// Nothing was planned.
    #[error("no transition is pending")]
    NoPending,
    /// The id handed back is not the pending plan's.
    #[error("plan {got} is not the pending plan {expected}")]
    IdMismatch { expected: PlanId, got: PlanId },
}

/// Identifier of a pending plan.
pub type PlanId = Uuid;

/// Validated transition waiting for its side effects to succeed.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Token handed back to apply or abort.
    pub id: PlanId,
    /// Source phase.
    pub from: PartyPhase,
    /// Target phase.
    pub to: PartyPhase,
    /// Event that produced the plan.
    pub event: PartyEvent,
    version_next: usize,
}

/// Linear party lifecycle with two-step transitions: [`plan`](Self::plan) reserves the edge,
/// [`apply`](Self::apply) takes it once the new state is saved, [`abort`](Self::abort) drops it.
#[derive(Debug, Clone)]
pub struct PartyStateMachine {
    phase: PartyPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for PartyStateMachine {
    fn default() -> Self {
        Self::resume(PartyPhase::Lobby)
    }
}

impl PartyStateMachine {
    /// Machine for a new party, in the lobby.
    pub fn new() -> Self {
        Self::default()
    }

    /// Machine for a party loaded from storage in `phase`.
    pub fn resume(phase: PartyPhase) -> Self {
        Self {
            phase,
            version: 0,
            pending: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> PartyPhase {
        self.phase
    }

    /// Number of transitions taken since the machine was built.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Target of the pending plan, if any.
    pub fn pending_phase(&self) -> Option<PartyPhase> {
        self.pending.as_ref().map(|plan| plan.to)
    }

    /// Reserve the edge `event` takes from the current phase. At most one plan may be pending.
    pub fn plan(&mut self, event: PartyEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }
        let to = next_phase(self.phase, event).map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to,
            event,
            version_next: self.version + 1,
        };
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Take the pending edge and return the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<PartyPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;
        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }
        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }
        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        Ok(self.phase)
    }

    /// Drop the pending plan; the phase is left as it was.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        match &self.pending {
            None => Err(AbortError::NoPending),
            Some(plan) if plan.id != plan_id => Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            }),
            Some(_) => {
                self.pending = None;
                Ok(())
            }
        }
    }
}

fn next_phase(from: PartyPhase, event: PartyEvent) -> Result<PartyPhase, InvalidTransition> {
    match (from, event) {
        (PartyPhase::Lobby, PartyEvent::Start) => Ok(PartyPhase::Submitting),
        (PartyPhase::Submitting, PartyEvent::SubmissionsComplete) => Ok(PartyPhase::Playing),
        (PartyPhase::Playing, PartyEvent::QueueExhausted) => Ok(PartyPhase::Finale),
        (PartyPhase::Finale, PartyEvent::RevealFinished) => Ok(PartyPhase::Complete),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}
