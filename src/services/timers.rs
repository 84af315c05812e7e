//! Fire-once party timers.
//!
//! Each armed timer carries a token. When it fires it re-enters the party's critical section and
//! only acts if the token it was armed with is still the one registered for its key, so a timer
//! that was cancelled or replaced after it started sleeping does nothing.

use std::{sync::Arc, time::Duration};

use tokio::{task::AbortHandle, time::sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::{finale_service, vote_service},
    state::{PartyRuntime, SharedState},
};

/// Delay before a timer whose action hit a storage outage runs again.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Slot a timer occupies; arming a key replaces the previous timer for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    SongTimeout(Uuid),
    RevealStep,
}

/// What a timer does once it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Close a song with whatever votes exist.
    ForceCompleteSong { song_id: Uuid },
    /// Reveal the finale step at `cursor`.
    RevealStep { cursor: usize },
}

/// Timer to arm: what to run, when, and under which key.
#[derive(Debug, Clone, Copy)]
pub struct TimerRequest {
    /// Slot the timer occupies.
    pub key: TimerKey,
    /// Time until it fires.
    pub delay: Duration,
    /// Work run when it fires.
    pub action: TimerAction,
}

impl TimerRequest {
    /// Close `song_id` after `delay`.
    pub fn song_timeout(song_id: Uuid, delay: Duration) -> Self {
        Self {
            key: TimerKey::SongTimeout(song_id),
            delay,
            action: TimerAction::ForceCompleteSong { song_id },
        }
    }

    /// Reveal step `cursor` after `delay`.
    pub fn reveal_step(cursor: usize, delay: Duration) -> Self {
        Self {
            key: TimerKey::RevealStep,
            delay,
            action: TimerAction::RevealStep { cursor },
        }
    }
}

/// Armed timer: the token it must still hold when it fires, and its task.
#[derive(Debug)]
pub struct ScheduledTimer {
    token: u64,
    handle: AbortHandle,
}

/// Arm `request` for the party held by `runtime`, replacing any timer on the same key.
pub fn schedule(state: &SharedState, runtime: &mut PartyRuntime, request: TimerRequest) {
    cancel(runtime, request.key);
    runtime.timer_seq += 1;
    let token = runtime.timer_seq;
    let party_id = runtime.session.id;
    let state = Arc::clone(state);

    let task = tokio::spawn(async move {
        sleep(request.delay).await;
        fire(state, party_id, request.key, token, request.action).await;
    });

    runtime.timers.insert(
        request.key,
        ScheduledTimer {
            token,
            handle: task.abort_handle(),
        },
    );
}

/// Disarm the timer on `key`, if any.
pub fn cancel(runtime: &mut PartyRuntime, key: TimerKey) {
    if let Some(timer) = runtime.timers.remove(&key) {
        timer.handle.abort();
    }
}

/// Disarm every timer of the party.
pub fn cancel_all(runtime: &mut PartyRuntime) {
    for (_, timer) in runtime.timers.drain() {
        timer.handle.abort();
    }
}

async fn fire(state: SharedState, party_id: Uuid, key: TimerKey, token: u64, action: TimerAction) {
    let Some(handle) = state.party(party_id) else {
        debug!(party_id = %party_id, ?key, "timer fired for unknown party; ignoring");
        return;
    };
    let mut runtime = handle.lock().await;

    if runtime.closed {
        debug!(party_id = %party_id, ?key, "timer fired for deleted party; ignoring");
        return;
    }
    match runtime.timers.get(&key) {
        Some(timer) if timer.token == token => {}
        _ => {
            debug!(party_id = %party_id, ?key, token, "stale timer fired; ignoring");
            return;
        }
    }
    runtime.timers.remove(&key);

    let result = match action {
        TimerAction::ForceCompleteSong { song_id } => {
            vote_service::force_complete_song(&state, &mut runtime, song_id).await
        }
        TimerAction::RevealStep { cursor } => {
            finale_service::reveal_step(&state, &mut runtime, cursor).await
        }
    };

    match result {
        Ok(()) => {}
        Err(err @ (ServiceError::Degraded | ServiceError::Unavailable(_) | ServiceError::Timeout)) => {
            warn!(party_id = %party_id, ?key, error = %err, "timer action failed; retrying");
            schedule(
                &state,
                &mut runtime,
                TimerRequest {
                    key,
                    delay: RETRY_DELAY,
                    action,
                },
            );
        }
        Err(err) => warn!(party_id = %party_id, ?key, error = %err, "timer action failed"),
    }
}
