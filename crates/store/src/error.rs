/// Errors from the shared-store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Redis returned an error or the connection failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A store operation did not complete within its deadline.
    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    /// A stored value could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invalidation pattern could not be compiled.
    #[error("Invalid key pattern: {0}")]
    Pattern(String),
}
