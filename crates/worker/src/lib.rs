//! Asynchronous inference worker.
//!
//! Pops [`JobDescriptor`]s pushed by the API, runs each through the
//! [`Orchestrator`], and reports the outcome to the job's `webhookUrl`.

pub mod config;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use dermalens_core::image_source::ImageSourcePolicy;
use dermalens_core::inference::{InferenceResponse, JobDescriptor};
use dermalens_pipeline::Orchestrator;
use dermalens_store::JobQueue;
use tokio_util::sync::CancellationToken;

pub use config::WorkerConfig;
pub use webhook::{JobStatus, WebhookDelivery, WebhookError, WebhookPayload};

/// Pause after a queue error before polling again.
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// How one job ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(Box<InferenceResponse>),
    Failed(String),
}

impl JobOutcome {
    fn into_payload(self, job: &JobDescriptor) -> WebhookPayload {
        match self {
            JobOutcome::Completed(response) => WebhookPayload::completed(job.job_id, *response),
            JobOutcome::Failed(error) => WebhookPayload::failed(job.job_id, error),
        }
    }
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<Orchestrator>,
    policy: ImageSourcePolicy,
    webhook: WebhookDelivery,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<Orchestrator>,
        policy: ImageSourcePolicy,
        webhook: WebhookDelivery,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            policy,
            webhook,
            poll_timeout,
        }
    }

    /// Consume jobs until `cancel` fires. A job already dequeued is
    /// finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("Worker consuming jobs");
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = self.queue.dequeue(self.poll_timeout) => next,
            };

            match next {
                Ok(Some(job)) => {
                    self.handle(job).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Job queue unavailable, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        tracing::info!("Worker stopped");
    }

    /// Process one job and deliver its webhook, if any.
    pub async fn handle(&self, job: JobDescriptor) {
        let outcome = self.process(&job).await;
        let Some(url) = job.webhook_url.as_deref() else {
            tracing::debug!(job_id = %job.job_id, "Job has no webhook, result dropped");
            return;
        };
        let payload = outcome.into_payload(&job);
        // Delivery failures are logged inside `deliver`.
        let _ = self.webhook.deliver(url, &payload).await;
    }

    /// Run the inference for one job.
    pub async fn process(&self, job: &JobDescriptor) -> JobOutcome {
        tracing::info!(job_id = %job.job_id, user_id = ?job.user_id, "Processing job");
        let request = job.to_request();

        let image = match self.policy.validate(&request.image_url) {
            Ok(image) => image,
            Err(e) => return JobOutcome::Failed(e.to_string()),
        };

        match self.orchestrator.run(&request, &image).await {
            Ok(response) => JobOutcome::Completed(Box::new(response)),
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Inference failed, attempting recovery");
                match self.orchestrator.recover(&request, &image).await {
                    Some(response) => JobOutcome::Completed(Box::new(response)),
                    None => JobOutcome::Failed(e.to_string()),
                }
            }
        }
    }
}
