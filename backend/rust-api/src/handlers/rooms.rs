use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::RoomError,
    extractors::AppJson,
    models::{CreateRoomRequest, CreateRoomResponse, GroupingQuery, Identity, RoomCode, SessionStatus},
    services::AppState,
};

/// POST /api/v1/rooms
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    AppJson(req): AppJson<CreateRoomRequest>,
) -> Result<impl IntoResponse, RoomError> {
    req.validate()
        .map_err(|e| RoomError::Validation(e.to_string()))?;

    tracing::info!("Creating room for quiz_id={} by {}", req.quiz_id, identity.id);

    let (room_code, status) = state.rooms.create_or_get(&req.quiz_id, &identity).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            room_code,
            status,
            quiz_id: req.quiz_id,
        }),
    ))
}

/// GET /api/v1/rooms/{code}
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, RoomError> {
    let code = RoomCode::parse(&code)?;
    let snapshot = state.rooms.snapshot(&code).await?;
    Ok(Json(snapshot))
}

/// GET /api/v1/rooms/{code}/results
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, RoomError> {
    let code = RoomCode::parse(&code)?;
    let results = state.rooms.results(&code, &identity).await?;
    Ok(Json(json!({
        "room_code": code,
        "participants": results,
    })))
}

/// GET /api/v1/rooms/{code}/groups?size=k&category=c
pub async fn get_groups(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
    Query(query): Query<GroupingQuery>,
) -> Result<impl IntoResponse, RoomError> {
    let code = RoomCode::parse(&code)?;
    let grouping = state
        .rooms
        .groups(&code, &identity, query.size, query.category.as_deref())
        .await?;

    tracing::info!(
        room_code = %code,
        size = query.size,
        groups = grouping.groups.len(),
        "Formed groups"
    );

    Ok(Json(grouping))
}

/// POST /api/v1/rooms/{code}/start
pub async fn start_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, RoomError> {
    transition(&state, &identity, &code, SessionStatus::InProgress).await
}

/// POST /api/v1/rooms/{code}/stop
pub async fn stop_room(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, RoomError> {
    transition(&state, &identity, &code, SessionStatus::Completed).await
}

async fn transition(
    state: &AppState,
    identity: &Identity,
    code: &str,
    target: SessionStatus,
) -> Result<Json<serde_json::Value>, RoomError> {
    let code = RoomCode::parse(code)?;
    let status = state.rooms.transition(&code, target, identity).await?;
    Ok(Json(json!({
        "room_code": code,
        "status": status,
    })))
}
