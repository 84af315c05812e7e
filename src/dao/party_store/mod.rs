pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{ChildCounts, PartyGraph, PartyListItemEntity},
    storage::StorageResult,
};

/// Abstraction over the persistence layer for parties and everything they own.
pub trait PartyStore: Send + Sync {
    /// Upsert the party row and replace its children with the ones in `graph`.
    fn save_party(&self, graph: PartyGraph) -> BoxFuture<'static, StorageResult<()>>;
    fn find_party(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PartyGraph>>>;
    fn find_party_id_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<Uuid>>>;
    /// Delete the party and every row it owns. Returns whether the party existed.
    fn delete_party(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    fn count_children(&self, id: Uuid) -> BoxFuture<'static, StorageResult<ChildCounts>>;
    fn list_parties(&self) -> BoxFuture<'static, StorageResult<Vec<PartyListItemEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
