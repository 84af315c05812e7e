//! Unit of work for party mutations.
//!
//! Every mutating operation runs against a draft copy of the party inside [`commit`]. The draft
//! is persisted before it replaces the live session, the pending state-machine plan is applied,
//! timers are armed and notifications go out last. Any failure before that point leaves the
//! live party untouched.

use std::time::SystemTime;

use rand::rngs::StdRng;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::models::PartyGraph,
    dto::sse::{PhaseChangedEvent, ServerEvent},
    error::ServiceError,
    services::timers::{self, TimerKey, TimerRequest},
    state::{
        Plan, PartyRuntime, SharedState,
        party::PartySession,
        state_machine::{PartyEvent, PartyPhase, PartyStateMachine},
    },
};

enum Notification {
    Party(ServerEvent),
    Player(Uuid, ServerEvent),
    PhaseChanged { from: PartyPhase, to: PartyPhase },
}

enum TimerOp {
    Schedule(TimerRequest),
    Cancel(TimerKey),
}

/// Draft of a party mutation.
pub struct Staged<'a> {
    /// Working copy of the party; becomes live on commit.
    pub session: PartySession,
    /// Timestamp of the operation.
    pub now: SystemTime,
    /// Party RNG; draws are kept only if the draft commits.
    pub rng: StdRng,
    /// Application configuration.
    pub config: &'a AppConfig,
    machine: &'a mut PartyStateMachine,
    plan: Option<Plan>,
    notifications: Vec<Notification>,
    timer_ops: Vec<TimerOp>,
}

impl Staged<'_> {
    /// Phase the party will be in once this draft commits.
    pub fn phase(&self) -> PartyPhase {
        self.plan
            .as_ref()
            .map(|plan| plan.to)
            .unwrap_or_else(|| self.machine.phase())
    }

    /// Plan a lifecycle transition; it is applied only if the draft commits.
    pub fn transition(&mut self, event: PartyEvent) -> Result<PartyPhase, ServiceError> {
        let plan = self.machine.plan(event)?;
        let (from, to) = (plan.from, plan.to);
        self.plan = Some(plan);
        self.notifications
            .push(Notification::PhaseChanged { from, to });
        Ok(to)
    }

    /// Queue an event for everyone following the party.
    pub fn notify_party<T: Serialize>(&mut self, name: &str, payload: &T) {
        match ServerEvent::json(Some(name.to_string()), payload) {
            Ok(event) => self.notifications.push(Notification::Party(event)),
            Err(err) => warn!(event = name, error = %err, "failed to serialize party event"),
        }
    }

    /// Queue an event for a single player.
    pub fn notify_player<T: Serialize>(&mut self, player_id: Uuid, name: &str, payload: &T) {
        match ServerEvent::json(Some(name.to_string()), payload) {
            Ok(event) => self
                .notifications
                .push(Notification::Player(player_id, event)),
            Err(err) => warn!(event = name, error = %err, "failed to serialize player event"),
        }
    }

    /// Arm a timer once the draft commits, replacing any timer under the same key.
    pub fn schedule(&mut self, request: TimerRequest) {
        self.timer_ops.push(TimerOp::Schedule(request));
    }

    /// Disarm a timer once the draft commits.
    pub fn cancel(&mut self, key: TimerKey) {
        self.timer_ops.push(TimerOp::Cancel(key));
    }
}

/// Run `work` against a draft of the party and make the result live only if it persists.
pub async fn commit<T, F>(
    state: &SharedState,
    runtime: &mut PartyRuntime,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnOnce(&mut Staged<'_>) -> Result<T, ServiceError>,
{
    if runtime.closed {
        return Err(ServiceError::NotFound("party".into()));
    }
    let store = state.require_store().await?;

    let mut staged = Staged {
        session: runtime.session.clone(),
        now: state.clock().now(),
        rng: runtime.rng.clone(),
        config: state.config(),
        machine: &mut runtime.machine,
        plan: None,
        notifications: Vec::new(),
        timer_ops: Vec::new(),
    };
    let outcome = work(&mut staged);
    let phase = staged.phase();
    let Staged {
        mut session,
        now,
        rng,
        plan,
        notifications,
        timer_ops,
        ..
    } = staged;

    let value = match outcome {
        Ok(value) => value,
        Err(err) => {
            abort_plan(runtime, plan.as_ref());
            return Err(err);
        }
    };

    session.updated_at = now;
    let graph = PartyGraph::from_session(&session, phase);
    let persisted = match timeout(state.config().persist_timeout(), store.save_party(graph)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(ServiceError::from(err)),
        Err(_) => Err(ServiceError::Timeout),
    };
    if let Err(err) = persisted {
        warn!(party_id = %session.id, error = %err, "failed to persist party; rolling back");
        abort_plan(runtime, plan.as_ref());
        return Err(err);
    }

    if let Some(plan) = plan {
        runtime.machine.apply(plan.id)?;
    }
    runtime.session = session;
    runtime.rng = rng;

    for op in timer_ops {
        match op {
            TimerOp::Schedule(request) => timers::schedule(state, runtime, request),
            TimerOp::Cancel(key) => timers::cancel(runtime, key),
        }
    }

    let party_id = runtime.session.id;
    let notifier = state.notifier();
    for notification in notifications {
        match notification {
            Notification::Party(event) => notifier.notify_party(party_id, event),
            Notification::Player(player_id, event) => notifier.notify_player(player_id, event),
            Notification::PhaseChanged { from, to } => {
                info!(party_id = %party_id, from = ?from, to = ?to, "party phase changed");
                let payload = PhaseChangedEvent {
                    party_id,
                    from,
                    phase: to,
                };
                match ServerEvent::json(Some("party.phase_changed".to_string()), &payload) {
                    Ok(event) => notifier.notify_party(party_id, event),
                    Err(err) => warn!(error = %err, "failed to serialize phase change"),
                }
            }
        }
    }

    Ok(value)
}

fn abort_plan(runtime: &mut PartyRuntime, plan: Option<&Plan>) {
    let Some(plan) = plan else {
        return;
    };
    if let Err(err) = runtime.machine.abort(plan.id) {
        warn!(
            plan_id = %plan.id,
            event = ?plan.event,
            error = ?err,
            "failed to abort transition"
        );
    }
}
