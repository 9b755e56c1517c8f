use warden_types::PersistError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create database connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration '{name}' failed: {source}")]
    Migration {
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row no longer decodes into its domain type.
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => PersistError::Serialization(e),
            other => PersistError::Backend(other.to_string()),
        }
    }
}
