use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::allocation::{Allocation, SourceAllocation};
use crate::controller::{AllocationController, DebugState};
use crate::entity::{IdValidationError, ParticipantId};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid participant id: {0}")]
    InvalidId(#[from] IdValidationError),

    #[error("participant {0} is not part of the allocation")]
    NotAllocated(ParticipantId),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidId(_) => StatusCode::BAD_REQUEST,
            ApiError::NotAllocated(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

#[axum::debug_handler]
async fn debug_state(State(controller): State<AllocationController>) -> Json<DebugState> {
    Json(controller.debug_state())
}

#[axum::debug_handler]
async fn allocation(State(controller): State<AllocationController>) -> Json<Allocation> {
    Json(controller.allocation())
}

#[axum::debug_handler]
async fn participant_allocation(
    State(controller): State<AllocationController>,
    Path(participant_id): Path<String>,
) -> Result<Json<Vec<SourceAllocation>>, ApiError> {
    let participant_id = ParticipantId::new(participant_id)?;
    let sources: Vec<SourceAllocation> = controller
        .allocation()
        .sources()
        .iter()
        .filter(|s| s.participant_id == participant_id)
        .cloned()
        .collect();

    if sources.is_empty() {
        return Err(ApiError::NotAllocated(participant_id));
    }
    Ok(Json(sources))
}

/// Read-only introspection routes. Nothing here changes allocator state.
pub fn router(controller: AllocationController) -> Router {
    Router::new()
        .route("/debug", get(debug_state))
        .route("/allocation", get(allocation))
        .route("/allocation/{participant_id}", get(participant_allocation))
        .with_state(controller)
}
