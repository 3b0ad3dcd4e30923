use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    MongoError(#[from] mongodb::error::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON encoding error: {0}")]
    BsonEncodeError(#[from] mongodb::bson::ser::Error),

    #[cfg(feature = "mongodb")]
    #[error("BSON decoding error: {0}")]
    BsonDecodeError(#[from] mongodb::bson::de::Error),

    #[cfg(feature = "neo4j")]
    #[error("Neo4j error: {0}")]
    Neo4jError(#[from] neo4rs::Error),

    #[error("Neo4j row error: {0}")]
    RowError(String),

    #[error("No storage configured")]
    NoStorageConfigured,

    #[error("Storage engine {0} is not compiled in")]
    EngineNotAvailable(&'static str),

    #[error("Invalid graph identifier `{0}`")]
    InvalidGraphIdentifier(String),

    #[error("Found more than one record while looking for {0}")]
    MoreThanOneRecord(String),

    #[error("Error: {0}")]
    Other(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod entities;
pub mod export;
pub mod hashing;
pub mod identity;
pub mod storage;

pub use entities::Family;
pub use hashing::ConfigHasher;
pub use identity::Identity;
pub use storage::{Repositories, StorageParameters};
