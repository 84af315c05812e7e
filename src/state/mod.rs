pub mod clock;
pub mod party;
pub mod sse;
pub mod state_machine;
pub mod transitions;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use dashmap::{DashMap, mapref::entry::Entry};
use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::sync::{Mutex, MutexGuard, RwLock, watch};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::party_store::PartyStore,
    error::ServiceError,
    services::timers::{ScheduledTimer, TimerKey},
};

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::sse::{Notifier, PlayerConnection, Rooms, SseHub};
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId};
use self::{party::PartySession, state_machine::PartyStateMachine};

pub type SharedState = Arc<AppState>;

/// Capacity of each party's SSE broadcast channel.
const ROOM_CAPACITY: usize = 32;

/// Central application state: configuration, storage handle, party registry and fan-out.
pub struct AppState {
    config: Arc<AppConfig>,
    party_store: RwLock<Option<Arc<dyn PartyStore>>>,
    parties: DashMap<Uuid, Arc<PartyHandle>>,
    join_codes: DashMap<String, Uuid>,
    rooms: Arc<Rooms>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    seeder: StdMutex<StdRng>,
    degraded: watch::Sender<bool>,
}

/// Builder for [`AppState`] so tests can inject a clock, seed, store and notifier.
pub struct AppStateBuilder {
    config: AppConfig,
    clock: Arc<dyn Clock>,
    seed: Option<u64>,
    notifier: Option<Arc<dyn Notifier>>,
    store: Option<Arc<dyn PartyStore>>,
}

impl AppStateBuilder {
    /// Use `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Make every party RNG derive from `seed`.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Deliver events through `notifier` instead of the rooms.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Start with `store` installed.
    pub fn store(mut self, store: Arc<dyn PartyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Finish the state. Without a store it starts in degraded mode.
    pub fn build(self) -> SharedState {
        let rooms = Arc::new(Rooms::new(ROOM_CAPACITY));
        let notifier = self
            .notifier
            .unwrap_or_else(|| rooms.clone() as Arc<dyn Notifier>);
        let seeder = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (degraded_tx, _rx) = watch::channel(self.store.is_none());

        Arc::new(AppState {
            config: Arc::new(self.config),
            party_store: RwLock::new(self.store),
            parties: DashMap::new(),
            join_codes: DashMap::new(),
            rooms,
            notifier,
            clock: self.clock,
            seeder: StdMutex::new(seeder),
            degraded: degraded_tx,
        })
    }
}

impl AppState {
    /// Start building a state around `config`.
    pub fn builder(config: AppConfig) -> AppStateBuilder {
        AppStateBuilder {
            config,
            clock: Arc::new(SystemClock),
            seed: None,
            notifier: None,
            store: None,
        }
    }

    /// Construct a state with default collaborators and no store (degraded).
    pub fn new(config: AppConfig) -> SharedState {
        Self::builder(config).build()
    }

    /// Loaded application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Socket and SSE rooms of every party.
    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }

    /// Sink for party and player events.
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Wall clock used for timestamps and the reconnect window.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Obtain a handle to the current party store, if one is installed.
    pub async fn party_store(&self) -> Option<Arc<dyn PartyStore>> {
        let guard = self.party_store.read().await;
        guard.as_ref().cloned()
    }

    /// Store handle for a mutation, failing while the backend is degraded.
    pub async fn require_store(&self) -> Result<Arc<dyn PartyStore>, ServiceError> {
        if self.is_degraded().await {
            return Err(ServiceError::Degraded);
        }
        self.party_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new party store implementation and leave degraded mode.
    pub async fn set_party_store(&self, store: Arc<dyn PartyStore>) {
        {
            let mut guard = self.party_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current party store and enter degraded mode.
    pub async fn clear_party_store(&self) {
        {
            let mut guard = self.party_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Fresh RNG for a new or rehydrated party, drawn from the application seeder.
    pub fn party_rng(&self) -> StdRng {
        let seed = self
            .seeder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random::<u64>();
        StdRng::seed_from_u64(seed)
    }

    /// Live handle of a party, if it is loaded.
    pub fn party(&self, party_id: Uuid) -> Option<Arc<PartyHandle>> {
        self.parties.get(&party_id).map(|entry| entry.value().clone())
    }

    /// Number of parties held in memory.
    pub fn loaded_parties(&self) -> usize {
        self.parties.len()
    }

    /// Party registered under `join_code`, if it is loaded.
    pub fn party_by_code(&self, join_code: &str) -> Option<Uuid> {
        self.join_codes
            .get(&join_code.to_ascii_uppercase())
            .map(|entry| *entry.value())
    }

    /// Register a loaded party, keeping any handle registered first.
    pub(crate) fn register(&self, handle: Arc<PartyHandle>, join_code: &str) -> (Arc<PartyHandle>, bool) {
        let (handle, inserted) = match self.parties.entry(handle.id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
                (handle, true)
            }
        };
        self.join_codes
            .insert(join_code.to_ascii_uppercase(), handle.id);
        (handle, inserted)
    }

    /// Drop a party from the registry and its join-code index.
    pub(crate) fn unregister(&self, party_id: Uuid, join_code: &str) {
        self.parties.remove(&party_id);
        self.join_codes
            .remove_if(&join_code.to_ascii_uppercase(), |_, id| *id == party_id);
    }
}

/// Registry entry of a loaded party. The mutex is the party's critical section.
pub struct PartyHandle {
    /// Party identifier.
    pub id: Uuid,
    runtime: Mutex<PartyRuntime>,
}

impl PartyHandle {
    /// Wrap a runtime in its critical section.
    pub fn new(runtime: PartyRuntime) -> Self {
        Self {
            id: runtime.session.id,
            runtime: Mutex::new(runtime),
        }
    }

    /// Enter the party's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, PartyRuntime> {
        self.runtime.lock().await
    }
}

/// Everything a party owns in memory.
pub struct PartyRuntime {
    /// Lifecycle state machine.
    pub machine: PartyStateMachine,
    /// Live party data.
    pub session: PartySession,
    pub(crate) rng: StdRng,
    pub(crate) timers: HashMap<TimerKey, ScheduledTimer>,
    pub(crate) timer_seq: u64,
    /// Set once the party is deleted; later work on the handle is refused.
    pub(crate) closed: bool,
}

impl PartyRuntime {
    /// Runtime with no timers armed.
    pub fn new(machine: PartyStateMachine, session: PartySession, rng: StdRng) -> Self {
        Self {
            machine,
            session,
            rng,
            timers: HashMap::new(),
            timer_seq: 0,
            closed: false,
        }
    }

    /// Whether a timer is armed for `key`.
    pub fn has_timer(&self, key: TimerKey) -> bool {
        self.timers.contains_key(&key)
    }
}
