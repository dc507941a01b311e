//! Staging intake.
//!
//! `POST /v1/staging` validates a request and hands it to the stager. A 202
//! means the task was desired; the staging outcome itself is reported to
//! `reply_to` by whoever runs the task.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stager_models::{StagingRequest, StagingResponse};

use super::error::{ApiError, FieldError};
use crate::state::AppState;

/// Body of a staging submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    pub request: StagingRequest,
    pub reply_to: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/staging", post(stage))
}

async fn stage(
    State(state): State<AppState>,
    Json(body): Json<StageRequest>,
) -> Result<Response, ApiError> {
    if body.reply_to.trim().is_empty() {
        return Err(
            ApiError::bad_request("invalid_request", "reply_to must not be empty").with_details(
                vec![FieldError {
                    field: "reply_to".to_string(),
                    message: "must not be empty".to_string(),
                }],
            ),
        );
    }
    body.request.validate()?;

    state.stager().stage(&body.request, &body.reply_to).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StagingResponse::accepted(body.request.task_guid())),
    )
        .into_response())
}
