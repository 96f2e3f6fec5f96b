use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::OnceCell;

use crate::error::StoreError;

/// Default deadline for a single store round-trip.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Handle to the shared Redis instance.
///
/// Cheap to clone; clones share one long-lived [`ConnectionManager`] that is
/// opened on first use and reconnects on its own. Every operation is bounded
/// by `operation_timeout`, so an unreachable store surfaces as a fast
/// [`StoreError::Timeout`] instead of stalling the request.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    shared: Arc<OnceCell<ConnectionManager>>,
    operation_timeout: Duration,
}

impl RedisStore {
    pub fn open(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            shared: Arc::new(OnceCell::new()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        })
    }

    /// Override the per-operation deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.run(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    /// Run `op` on the shared connection under the operation deadline.
    pub(crate) async fn run<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let work = async move {
            let conn = self.shared_connection().await?;
            op(conn).await
        };
        within(self.operation_timeout, work).await
    }

    /// Run a blocking command (`BRPOP`) on a dedicated connection.
    ///
    /// A blocking command on the shared multiplexed connection would hold up
    /// every command queued behind it.
    pub(crate) async fn run_blocking<T, F, Fut>(
        &self,
        timeout: Duration,
        op: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let work = async move {
            let conn = self.client.get_multiplexed_async_connection().await?;
            op(conn).await
        };
        within(timeout, work).await
    }

    async fn shared_connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .shared
            .get_or_try_init(|| async {
                tracing::debug!("Opening shared Redis connection");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(manager.clone())
    }
}

async fn within<T>(
    timeout: Duration,
    work: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("operation_timeout", &self.operation_timeout)
            .field("connected", &self.shared.initialized())
            .finish_non_exhaustive()
    }
}
