//! Handler for `POST /infer`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use dermalens_core::image_source::ValidatedImage;
use dermalens_core::inference::{InferenceRequest, JobDescriptor};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Body of a 202 response for a queued job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResponse {
    pub job_id: String,
    pub status: &'static str,
}

/// POST /infer
///
/// Validates the image reference, then either queues the job (`sync: false`
/// with a queue configured) or runs the pipeline inline and returns the
/// merged result with an `X-Cache: HIT|MISS|FALLBACK` header.
pub async fn infer(
    State(state): State<AppState>,
    payload: Result<Json<InferenceRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let image = state.image_policy.validate(&request.image_url)?;

    if !request.sync {
        if let Some(queued) = enqueue(&state, &request).await {
            return Ok((StatusCode::ACCEPTED, Json(queued)).into_response());
        }
    }

    run_detached(state, request, image).await
}

// ---- private helpers ----

/// Queue the job. `None` when no queue is configured or the push failed, in
/// which case the request is served inline.
async fn enqueue(state: &AppState, request: &InferenceRequest) -> Option<QueuedResponse> {
    let queue = state.job_queue.as_ref()?;
    let job = JobDescriptor::from_request(request);

    match queue.enqueue(&job).await {
        Ok(()) => {
            tracing::info!(job_id = %job.job_id, user_id = ?job.user_id, "Inference job queued");
            Some(QueuedResponse {
                job_id: job.job_id.to_string(),
                status: "queued",
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "Job queue unavailable, processing inline");
            None
        }
    }
}

/// Run the pipeline in its own task.
///
/// Once dispatched, the fan-out finishes (and fills the cache) even if the
/// client disconnects or the request timeout answers first.
async fn run_detached(
    state: AppState,
    request: InferenceRequest,
    image: ValidatedImage,
) -> AppResult<Response> {
    tokio::spawn(async move { run_inline(&state, &request, &image).await })
        .await
        .map_err(|e| AppError::InternalError(format!("Inference task failed: {e}")))?
}

async fn run_inline(
    state: &AppState,
    request: &InferenceRequest,
    image: &ValidatedImage,
) -> AppResult<Response> {
    let orchestrator = &state.orchestrator;

    let response = match orchestrator.run(request, image).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, image_url = %image.url, "Inference failed");
            match orchestrator.recover(request, image).await {
                Some(response) => response,
                None => {
                    let retry_after = orchestrator
                        .breakers()
                        .acne()
                        .config()
                        .reset_timeout
                        .as_secs()
                        .max(1);
                    return Err(AppError::ServiceUnavailable { retry_after });
                }
            }
        }
    };

    tracing::info!(
        inference_id = %response.result.inference_id,
        cache_status = response.cache_status.as_str(),
        processing_time_ms = response.processing_time_ms,
        "Inference complete"
    );

    let cache_status = HeaderValue::from_static(response.cache_status.as_str());
    Ok(([(X_CACHE, cache_status)], Json(response)).into_response())
}
