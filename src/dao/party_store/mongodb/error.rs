use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save party `{id}` ({collection})")]
    SaveParty {
        id: Uuid,
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("transaction failed while saving party `{id}`")]
    Transaction {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load party `{id}` ({collection})")]
    LoadParty {
        id: Uuid,
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to look up join code `{code}`")]
    FindByCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete party `{id}` ({collection})")]
    DeleteParty {
        id: Uuid,
        collection: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to list parties")]
    ListParties {
        #[source]
        source: MongoError,
    },
}
