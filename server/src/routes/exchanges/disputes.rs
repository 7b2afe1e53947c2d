use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::{AdminUser, AuthUser},
    errors::{ApiError, OrNotFound as _, ServerResult},
    exchange::{
        dispute::{self, CreateDispute, DisputeFilters, ResolveDispute, RespondToDispute, DISPUTE_NOT_FOUND},
        Dispute,
    },
    extract::{parse_id, ApiQuery, ValidJson},
    pagination::{Pagination, DEFAULT_LIMIT},
    state::AppState,
};

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<CreateDispute>,
) -> ServerResult<impl IntoResponse> {
    let session_id = parse_id(&id, "session")?;
    let dispute = dispute::open(&state.db, session_id, auth.user_id, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Dispute created successfully",
            "dispute": dispute,
        })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(filters): ApiQuery<DisputeFilters>,
) -> ServerResult<Json<Value>> {
    let pagination = Pagination::new(filters.page, filters.limit, DEFAULT_LIMIT);
    let (disputes, total) =
        Dispute::list_for_user(&state.db, auth.user_id, &filters, pagination).await?;

    Ok(Json(pagination.envelope("disputes", "totalDisputes", &disputes, total)?))
}

pub async fn show(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "dispute")?;
    let dispute = Dispute::find_by_id(&state.db, id)
        .await?
        .or_not_found(DISPUTE_NOT_FOUND)?;
    if !dispute.is_party(auth.user_id) {
        return Err(ApiError::forbidden("You don't have access to this dispute"));
    }

    Ok(Json(json!({ "dispute": dispute })))
}

pub async fn respond(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<RespondToDispute>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "dispute")?;
    let dispute = dispute::respond(&state.db, id, auth.user_id, &input.response).await?;

    Ok(Json(json!({
        "message": "Response submitted successfully",
        "dispute": dispute,
    })))
}

pub async fn escalate(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "dispute")?;
    let dispute = dispute::escalate(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({
        "message": "Dispute escalated successfully",
        "dispute": dispute,
    })))
}

pub async fn resolve(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<ResolveDispute>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "dispute")?;
    let dispute = dispute::resolve(&state.db, id, admin.user.id, &input).await?;

    Ok(Json(json!({
        "message": "Dispute resolved successfully",
        "dispute": dispute,
    })))
}
