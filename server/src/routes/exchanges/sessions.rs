use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::AuthUser,
    errors::{ApiError, ServerResult},
    exchange::{
        session::{self, AddMilestone, SessionFilters, UpdateSession},
        ExchangeSession,
    },
    extract::{parse_id, ApiQuery, ValidJson},
    pagination::{Pagination, DEFAULT_LIMIT},
    state::AppState,
};

pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(filters): ApiQuery<SessionFilters>,
) -> ServerResult<Json<Value>> {
    let pagination = Pagination::new(filters.page, filters.limit, DEFAULT_LIMIT);
    let (sessions, total) =
        ExchangeSession::list_for_user(&state.db, auth.user_id, &filters, pagination).await?;

    Ok(Json(pagination.envelope("sessions", "totalSessions", &sessions, total)?))
}

pub async fn show(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "session")?;
    let session = session::load_for_participant(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({ "session": session })))
}

pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<UpdateSession>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "session")?;
    let session = session::update(&state.db, id, auth.user_id, &input).await?;

    Ok(Json(json!({
        "message": "Session updated successfully",
        "session": session,
    })))
}

pub async fn confirm(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "session")?;
    let confirmed = session::confirm(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({
        "message": "Confirmation recorded successfully",
        "session": confirmed.session,
        "transaction": confirmed.transaction,
    })))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "session")?;
    session::cancel(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({ "message": "Session cancelled successfully" })))
}

pub async fn add_milestone(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<AddMilestone>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "session")?;
    let session = session::add_milestone(&state.db, id, auth.user_id, &input.description).await?;

    Ok(Json(json!({
        "message": "Milestone added successfully",
        "session": session,
    })))
}

pub async fn complete_milestone(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((id, index)): Path<(String, String)>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "session")?;
    let index = index
        .parse::<usize>()
        .map_err(|_| ApiError::bad_request("Invalid milestone index"))?;
    let session = session::complete_milestone(&state.db, id, auth.user_id, index).await?;

    Ok(Json(json!({
        "message": "Milestone completed successfully",
        "session": session,
    })))
}
