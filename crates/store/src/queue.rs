//! Job hand-off for asynchronous inference.
//!
//! The API pushes a [`JobDescriptor`] and answers `202` immediately; the
//! worker pops descriptors and runs them. Delivery and acknowledgement
//! semantics beyond a single pop are the queue backend's concern.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dermalens_core::inference::JobDescriptor;
use tokio::sync::Notify;

use crate::error::StoreError;
use crate::redis_store::RedisStore;

/// Default Redis list holding queued jobs.
pub const DEFAULT_QUEUE_KEY: &str = "dermalens:jobs";

/// FIFO queue of inference jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), StoreError>;

    /// Pop the oldest job, waiting up to `wait` for one to arrive.
    async fn dequeue(&self, wait: Duration) -> Result<Option<JobDescriptor>, StoreError>;
}

// ---------------------------------------------------------------------------
// Redis list queue
// ---------------------------------------------------------------------------

/// Queue stored as a Redis list (`LPUSH` / `BRPOP`).
pub struct RedisJobQueue {
    store: RedisStore,
    key: String,
}

impl RedisJobQueue {
    pub fn new(store: RedisStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), StoreError> {
        let payload = serde_json::to_string(job)?;
        let key = self.key.as_str();
        self.store
            .run(|mut conn| async move {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(key)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<JobDescriptor>, StoreError> {
        let key = self.key.as_str();
        let wait_secs = wait.as_secs_f64().max(0.01);
        // The blocking pop gets its own deadline on top of the server-side wait.
        let deadline = wait + Duration::from_secs(2);
        let popped: Option<(String, String)> = self
            .store
            .run_blocking(deadline, |mut conn| async move {
                let popped: Option<(String, String)> = redis::cmd("BRPOP")
                    .arg(key)
                    .arg(wait_secs)
                    .query_async(&mut conn)
                    .await?;
                Ok(popped)
            })
            .await?;

        popped
            .map(|(_, payload)| serde_json::from_str(&payload).map_err(StoreError::from))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// In-memory queue
// ---------------------------------------------------------------------------

/// Process-local queue for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<JobDescriptor>>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<JobDescriptor>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), StoreError> {
        self.lock().push_back(job.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<JobDescriptor>, StoreError> {
        let ready = self.lock().pop_front();
        if ready.is_some() {
            return Ok(ready);
        }
        let _ = tokio::time::timeout(wait, self.notify.notified()).await;
        Ok(self.lock().pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dermalens_core::inference::InferenceRequest;

    fn job(url: &str) -> JobDescriptor {
        JobDescriptor::from_request(&InferenceRequest::for_image(url))
    }

    #[tokio::test]
    async fn memory_queue_is_fifo() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(&job("https://a/1.jpg")).await.unwrap();
        queue.enqueue(&job("https://a/2.jpg")).await.unwrap();
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.image_url, "https://a/1.jpg");
        let second = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.image_url, "https://a/2.jpg");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_memory_queue_times_out() {
        let queue = MemoryJobQueue::new();
        let popped = queue.dequeue(Duration::from_secs(1)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn dequeue_wakes_on_enqueue() {
        let queue = std::sync::Arc::new(MemoryJobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(&job("https://a/3.jpg")).await.unwrap();
        let popped = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.image_url, "https://a/3.jpg");
    }
}
