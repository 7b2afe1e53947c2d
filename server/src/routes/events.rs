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
    event::{self, CreateEvent, Event, EVENT_NOT_FOUND},
    extract::{parse_id, ValidJson},
    state::AppState,
};

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(input): ValidJson<CreateEvent>,
) -> ServerResult<impl IntoResponse> {
    let event = Event::create(&state.db, auth.user_id, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Event created successfully",
            "event": event,
        })),
    ))
}

pub async fn all(State(state): State<AppState>) -> ServerResult<Json<Vec<Event>>> {
    let events = Event::all(&state.db).await?;

    Ok(Json(events))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "event")?;
    let event = Event::find_by_id(&state.db, id)
        .await?
        .or_not_found(EVENT_NOT_FOUND)?;

    Ok(Json(json!({
        "message": "Event fetched successfully",
        "event": event,
    })))
}

pub async fn join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "event")?;
    let event = event::join(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({
        "message": "Joined event successfully",
        "event": event,
    })))
}
