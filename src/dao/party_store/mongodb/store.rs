use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    connection::{MongoConfig, establish_connection},
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{
    models::{
        ActiveEventEntity, BonusResultEntity, ChildCounts, PartyEntity, PartyGraph,
        PartyListItemEntity, PlayerEntity, SongEntity, VoteEntity,
    },
    party_store::PartyStore,
    storage::StorageResult,
};

const PARTIES: &str = "parties";
const PLAYERS: &str = "players";
const SONGS: &str = "songs";
const VOTES: &str = "votes";
const EVENTS: &str = "events";
const BONUS_RESULTS: &str = "bonus_results";
const CHILD_COLLECTIONS: [&str; 5] = [PLAYERS, SONGS, VOTES, EVENTS, BONUS_RESULTS];

/// MongoDB-backed [`PartyStore`]: one collection per entity, children keyed by `party_id`.
#[derive(Clone)]
pub struct MongoPartyStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
    transactions: bool,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let transactions = detect_transactions(&database).await;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        guard.transactions = transactions;
        info!(transactions, "MongoDB connection re-established");
        Ok(())
    }
}

/// Multi-document transactions need a replica set member or a mongos router.
fn supports_transactions(hello: &Document) -> bool {
    hello.contains_key("setName") || hello.get_str("msg").is_ok_and(|msg| msg == "isdbgrid")
}

async fn detect_transactions(database: &Database) -> bool {
    match database.run_command(doc! { "hello": 1 }).await {
        Ok(hello) => supports_transactions(&hello),
        Err(err) => {
            warn!(error = %err, "hello command failed, saving parties without transactions");
            false
        }
    }
}

fn by_id(id: Uuid) -> Document {
    doc! { "id": id.to_string() }
}

fn by_party(party_id: Uuid) -> Document {
    doc! { "party_id": party_id.to_string() }
}

impl MongoPartyStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;
        let transactions = detect_transactions(&database).await;
        if !transactions {
            warn!("MongoDB deployment has no transaction support, party saves write the party document last");
        }

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState {
                client,
                database,
                transactions,
            }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let parties = database.collection::<Document>(PARTIES);
        for (field, name) in [("id", "party_id_idx"), ("join_code", "party_join_code_idx")] {
            let mut keys = Document::new();
            keys.insert(field, 1);
            let index = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(name.to_owned()))
                        .unique(Some(true))
                        .build(),
                )
                .build();
            parties
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: PARTIES,
                    index: field,
                    source,
                })?;
        }

        for collection_name in CHILD_COLLECTIONS {
            let collection = database.collection::<Document>(collection_name);
            let owner = IndexModel::builder()
                .keys(doc! { "party_id": 1 })
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection_name}_party_idx")))
                        .build(),
                )
                .build();
            let row = IndexModel::builder()
                .keys(doc! { "id": 1 })
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection_name}_id_idx")))
                        .unique(Some(true))
                        .build(),
                )
                .build();

            collection
                .create_index(owner)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: collection_name,
                    index: "party_id",
                    source,
                })?;
            collection
                .create_index(row)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: collection_name,
                    index: "id",
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T>(&self, name: &'static str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.database().await.collection::<T>(name)
    }

    /// Upsert `rows` and drop the party's rows that are no longer part of the graph.
    async fn replace_children<T>(
        &self,
        name: &'static str,
        party_id: Uuid,
        rows: Vec<T>,
        row_id: fn(&T) -> Uuid,
        mut session: Option<&mut ClientSession>,
    ) -> MongoResult<()>
    where
        T: Serialize + Send + Sync,
    {
        let collection = self.collection::<T>(name).await;
        let save_err = |source| MongoDaoError::SaveParty {
            id: party_id,
            collection: name,
            source,
        };
        let keep = rows
            .iter()
            .map(|row| row_id(row).to_string())
            .collect::<Vec<_>>();

        let mut stale =
            collection.delete_many(doc! { "party_id": party_id.to_string(), "id": { "$nin": keep } });
        if let Some(session) = session.as_deref_mut() {
            stale = stale.session(session);
        }
        stale.await.map_err(save_err)?;

        for row in &rows {
            let mut upsert = collection.replace_one(by_id(row_id(row)), row).upsert(true);
            if let Some(session) = session.as_deref_mut() {
                upsert = upsert.session(session);
            }
            upsert.await.map_err(save_err)?;
        }

        Ok(())
    }

    async fn load_children<T>(&self, name: &'static str, party_id: Uuid) -> MongoResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let collection = self.collection::<T>(name).await;
        let load_err = |source| MongoDaoError::LoadParty {
            id: party_id,
            collection: name,
            source,
        };
        collection
            .find(by_party(party_id))
            .await
            .map_err(load_err)?
            .try_collect()
            .await
            .map_err(load_err)
    }

    /// Write the whole graph. Inside a transaction when the deployment allows it,
    /// otherwise children first so the party document only moves once they are stored.
    async fn save_party(&self, graph: PartyGraph) -> MongoResult<()> {
        let (client, transactions) = {
            let guard = self.inner.state.read().await;
            (guard.client.clone(), guard.transactions)
        };
        let id = graph.party.id;
        if !transactions {
            return self.write_graph(graph, None).await;
        }

        let txn_err = |source| MongoDaoError::Transaction { id, source };
        let mut session = client.start_session().await.map_err(txn_err)?;
        session.start_transaction().await.map_err(txn_err)?;
        if let Err(err) = self.write_graph(graph, Some(&mut session)).await {
            if let Err(abort) = session.abort_transaction().await {
                warn!(party_id = %id, error = %abort, "failed to abort party save");
            }
            return Err(err);
        }
        session.commit_transaction().await.map_err(txn_err)
    }

    async fn write_graph(
        &self,
        graph: PartyGraph,
        mut session: Option<&mut ClientSession>,
    ) -> MongoResult<()> {
        let PartyGraph {
            party,
            players,
            songs,
            votes,
            events,
            bonus_results,
        } = graph;
        let id = party.id;

        self.replace_children(PLAYERS, id, players, |row: &PlayerEntity| row.id, session.as_deref_mut())
            .await?;
        self.replace_children(SONGS, id, songs, |row: &SongEntity| row.id, session.as_deref_mut())
            .await?;
        self.replace_children(VOTES, id, votes, |row: &VoteEntity| row.id, session.as_deref_mut())
            .await?;
        self.replace_children(
            EVENTS,
            id,
            events,
            |row: &ActiveEventEntity| row.id,
            session.as_deref_mut(),
        )
        .await?;
        self.replace_children(
            BONUS_RESULTS,
            id,
            bonus_results,
            |row: &BonusResultEntity| row.id,
            session.as_deref_mut(),
        )
        .await?;

        let collection = self.collection::<PartyEntity>(PARTIES).await;
        let mut upsert = collection.replace_one(by_id(id), &party).upsert(true);
        if let Some(session) = session {
            upsert = upsert.session(session);
        }
        upsert.await.map_err(|source| MongoDaoError::SaveParty {
            id,
            collection: PARTIES,
            source,
        })?;
        Ok(())
    }

    async fn find_party(&self, id: Uuid) -> MongoResult<Option<PartyGraph>> {
        let party = self
            .collection::<PartyEntity>(PARTIES)
            .await
            .find_one(by_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadParty {
                id,
                collection: PARTIES,
                source,
            })?;

        let Some(party) = party else {
            return Ok(None);
        };

        Ok(Some(PartyGraph {
            party,
            players: self.load_children(PLAYERS, id).await?,
            songs: self.load_children(SONGS, id).await?,
            votes: self.load_children(VOTES, id).await?,
            events: self.load_children(EVENTS, id).await?,
            bonus_results: self.load_children(BONUS_RESULTS, id).await?,
        }))
    }

    async fn find_party_id_by_code(&self, code: String) -> MongoResult<Option<Uuid>> {
        let party = self
            .collection::<PartyEntity>(PARTIES)
            .await
            .find_one(doc! { "join_code": code.to_ascii_uppercase() })
            .await
            .map_err(|source| MongoDaoError::FindByCode { code, source })?;
        Ok(party.map(|party| party.id))
    }

    async fn delete_party(&self, id: Uuid) -> MongoResult<bool> {
        for name in CHILD_COLLECTIONS {
            self.collection::<Document>(name)
                .await
                .delete_many(by_party(id))
                .await
                .map_err(|source| MongoDaoError::DeleteParty {
                    id,
                    collection: name,
                    source,
                })?;
        }

        let result = self
            .collection::<Document>(PARTIES)
            .await
            .delete_one(by_id(id))
            .await
            .map_err(|source| MongoDaoError::DeleteParty {
                id,
                collection: PARTIES,
                source,
            })?;
        Ok(result.deleted_count > 0)
    }

    async fn count_children(&self, id: Uuid) -> MongoResult<ChildCounts> {
        let mut counts = [0u64; CHILD_COLLECTIONS.len()];
        for (slot, name) in counts.iter_mut().zip(CHILD_COLLECTIONS) {
            *slot = self
                .collection::<Document>(name)
                .await
                .count_documents(by_party(id))
                .await
                .map_err(|source| MongoDaoError::LoadParty {
                    id,
                    collection: name,
                    source,
                })?;
        }
        let [players, songs, votes, events, bonus_results] = counts;
        Ok(ChildCounts {
            players,
            songs,
            votes,
            events,
            bonus_results,
        })
    }

    async fn list_parties(&self) -> MongoResult<Vec<PartyListItemEntity>> {
        let parties: Vec<PartyEntity> = self
            .collection::<PartyEntity>(PARTIES)
            .await
            .find(doc! {})
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|source| MongoDaoError::ListParties { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListParties { source })?;

        Ok(parties.iter().map(PartyListItemEntity::from).collect())
    }
}

impl PartyStore for MongoPartyStore {
    fn save_party(&self, graph: PartyGraph) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_party(graph).await.map_err(Into::into) })
    }

    fn find_party(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PartyGraph>>> {
        let store = self.clone();
        Box::pin(async move { store.find_party(id).await.map_err(Into::into) })
    }

    fn find_party_id_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let store = self.clone();
        Box::pin(async move { store.find_party_id_by_code(code).await.map_err(Into::into) })
    }

    fn delete_party(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_party(id).await.map_err(Into::into) })
    }

    fn count_children(&self, id: Uuid) -> BoxFuture<'static, StorageResult<ChildCounts>> {
        let store = self.clone();
        Box::pin(async move { store.count_children(id).await.map_err(Into::into) })
    }

    fn list_parties(&self) -> BoxFuture<'static, StorageResult<Vec<PartyListItemEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_parties().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_sets_and_routers_support_transactions() {
        assert!(supports_transactions(&doc! { "isWritablePrimary": true, "setName": "rs0" }));
        assert!(supports_transactions(&doc! { "isWritablePrimary": true, "msg": "isdbgrid" }));
        assert!(!supports_transactions(&doc! { "isWritablePrimary": true }));
    }
}
