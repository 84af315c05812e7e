//! Process-local [`PartyStore`] with one table per entity.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use super::PartyStore;
use crate::dao::{
    models::{
        ActiveEventEntity, BonusResultEntity, ChildCounts, PartyEntity, PartyGraph,
        PartyListItemEntity, PlayerEntity, SongEntity, VoteEntity,
    },
    storage::{StorageError, StorageResult},
};

#[derive(Default)]
struct Tables {
    parties: DashMap<Uuid, PartyEntity>,
    players: DashMap<Uuid, PlayerEntity>,
    songs: DashMap<Uuid, SongEntity>,
    votes: DashMap<Uuid, VoteEntity>,
    events: DashMap<Uuid, ActiveEventEntity>,
    bonus_results: DashMap<Uuid, BonusResultEntity>,
    offline: AtomicBool,
}

/// In-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryPartyStore {
    tables: Arc<Tables>,
}

impl MemoryPartyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (or succeed again) to simulate an outage.
    pub fn set_available(&self, available: bool) {
        self.tables.offline.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> StorageResult<()> {
        if self.tables.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Offline { backend: "memory" });
        }
        Ok(())
    }

    fn remove_children(&self, id: Uuid) {
        let tables = &self.tables;
        tables.players.retain(|_, row| row.party_id != id);
        tables.songs.retain(|_, row| row.party_id != id);
        tables.votes.retain(|_, row| row.party_id != id);
        tables.events.retain(|_, row| row.party_id != id);
        tables.bonus_results.retain(|_, row| row.party_id != id);
    }

    fn save(&self, graph: PartyGraph) -> StorageResult<()> {
        self.check()?;
        let PartyGraph {
            party,
            players,
            songs,
            votes,
            events,
            bonus_results,
        } = graph;
        let tables = &self.tables;

        self.remove_children(party.id);
        tables.parties.insert(party.id, party);
        for row in players {
            tables.players.insert(row.id, row);
        }
        for row in songs {
            tables.songs.insert(row.id, row);
        }
        for row in votes {
            tables.votes.insert(row.id, row);
        }
        for row in events {
            tables.events.insert(row.id, row);
        }
        for row in bonus_results {
            tables.bonus_results.insert(row.id, row);
        }
        Ok(())
    }

    fn find(&self, id: Uuid) -> StorageResult<Option<PartyGraph>> {
        self.check()?;
        let tables = &self.tables;
        let Some(party) = tables.parties.get(&id).map(|row| row.value().clone()) else {
            return Ok(None);
        };

        fn rows<T: Clone>(table: &DashMap<Uuid, T>, owned: impl Fn(&T) -> bool) -> Vec<T> {
            table
                .iter()
                .filter(|entry| owned(entry.value()))
                .map(|entry| entry.value().clone())
                .collect()
        }

        Ok(Some(PartyGraph {
            party,
            players: rows(&tables.players, |row| row.party_id == id),
            songs: rows(&tables.songs, |row| row.party_id == id),
            votes: rows(&tables.votes, |row| row.party_id == id),
            events: rows(&tables.events, |row| row.party_id == id),
            bonus_results: rows(&tables.bonus_results, |row| row.party_id == id),
        }))
    }

    fn count(&self, id: Uuid) -> StorageResult<ChildCounts> {
        self.check()?;
        let tables = &self.tables;

        fn count<T>(table: &DashMap<Uuid, T>, owned: impl Fn(&T) -> bool) -> u64 {
            table.iter().filter(|entry| owned(entry.value())).count() as u64
        }

        Ok(ChildCounts {
            players: count(&tables.players, |row| row.party_id == id),
            songs: count(&tables.songs, |row| row.party_id == id),
            votes: count(&tables.votes, |row| row.party_id == id),
            events: count(&tables.events, |row| row.party_id == id),
            bonus_results: count(&tables.bonus_results, |row| row.party_id == id),
        })
    }
}

impl PartyStore for MemoryPartyStore {
    fn save_party(&self, graph: PartyGraph) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save(graph) })
    }

    fn find_party(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PartyGraph>>> {
        let store = self.clone();
        Box::pin(async move { store.find(id) })
    }

    fn find_party_id_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            Ok(store
                .tables
                .parties
                .iter()
                .find(|entry| entry.join_code.eq_ignore_ascii_case(&code))
                .map(|entry| *entry.key()))
        })
    }

    fn delete_party(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            let existed = store.tables.parties.remove(&id).is_some();
            store.remove_children(id);
            Ok(existed)
        })
    }

    fn count_children(&self, id: Uuid) -> BoxFuture<'static, StorageResult<ChildCounts>> {
        let store = self.clone();
        Box::pin(async move { store.count(id) })
    }

    fn list_parties(&self) -> BoxFuture<'static, StorageResult<Vec<PartyListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.check()?;
            let mut items = store
                .tables
                .parties
                .iter()
                .map(|entry| PartyListItemEntity::from(entry.value()))
                .collect::<Vec<_>>();
            items.sort_by_key(|item| item.created_at);
            Ok(items)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check() })
    }
}
