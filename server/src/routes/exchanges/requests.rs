use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::AuthUser,
    errors::{OrNotFound as _, ServerResult},
    exchange::{
        request::{self, CreateExchangeRequest, RequestFilters, UpdateExchangeRequest},
        response::{self, CreateExchangeResponse, REQUEST_NOT_FOUND},
        ExchangeRequest, ExchangeResponse,
    },
    extract::{parse_id, ApiQuery, ValidJson},
    pagination::{Pagination, DEFAULT_LIMIT},
    state::AppState,
};

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(input): ValidJson<CreateExchangeRequest>,
) -> ServerResult<impl IntoResponse> {
    let request = request::submit(&state.db, auth.user_id, &auth.username, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Exchange request created successfully",
            "exchangeRequest": request,
        })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(filters): ApiQuery<RequestFilters>,
) -> ServerResult<Json<Value>> {
    let pagination = Pagination::new(filters.page, filters.limit, DEFAULT_LIMIT);
    let (requests, total) = ExchangeRequest::list(&state.db, &filters, pagination).await?;

    Ok(Json(pagination.envelope("requests", "totalRequests", &requests, total)?))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "request")?;
    let request = ExchangeRequest::find_by_id(&state.db, id)
        .await?
        .or_not_found(REQUEST_NOT_FOUND)?;

    Ok(Json(json!({ "exchangeRequest": request })))
}

pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<UpdateExchangeRequest>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "request")?;
    let request = request::revise(&state.db, id, auth.user_id, &input).await?;

    Ok(Json(json!({
        "message": "Exchange request updated successfully",
        "exchangeRequest": request,
    })))
}

pub async fn cancel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "request")?;
    request::withdraw(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({ "message": "Exchange request cancelled successfully" })))
}

pub async fn responses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "request")?;
    let responses = ExchangeResponse::for_request(&state.db, id).await?;

    Ok(Json(json!({ "responses": responses })))
}

pub async fn respond(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<CreateExchangeResponse>,
) -> ServerResult<impl IntoResponse> {
    let id = parse_id(&id, "request")?;
    let response =
        response::respond(&state.db, id, auth.user_id, &auth.username, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Response created successfully",
            "exchangeResponse": response,
        })),
    ))
}

pub async fn accept(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<impl IntoResponse> {
    let id = parse_id(&id, "response")?;
    let session = response::accept(&state.db, id, auth.user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Exchange session created successfully",
            "session": session,
        })),
    ))
}

pub async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "response")?;
    response::reject(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({ "message": "Response rejected successfully" })))
}
