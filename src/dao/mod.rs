/// Persisted row types and the party graph conversions.
pub mod models;
/// Party persistence backends.
pub mod party_store;
/// Storage abstraction layer for database operations.
pub mod storage;
