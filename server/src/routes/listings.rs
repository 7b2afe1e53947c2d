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
    extract::{parse_id, ApiQuery, ValidJson},
    listing::{self, CreateListing, ListingFilters, SkillListing, UpdateListing, LISTING_NOT_FOUND},
    pagination::{Pagination, DEFAULT_LIMIT},
    state::AppState,
};

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(input): ValidJson<CreateListing>,
) -> ServerResult<impl IntoResponse> {
    let listing = SkillListing::create(&state.db, auth.user_id, &auth.username, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Skill listing created successfully",
            "listing": listing,
        })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(filters): ApiQuery<ListingFilters>,
) -> ServerResult<Json<Value>> {
    let pagination = Pagination::new(filters.page, filters.limit, DEFAULT_LIMIT);
    let (listings, total) = SkillListing::list(&state.db, &filters, pagination).await?;

    Ok(Json(pagination.envelope("listings", "totalListings", &listings, total)?))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<SkillListing>> {
    let id = parse_id(&id, "listing")?;
    let listing = SkillListing::view(&state.db, id)
        .await?
        .or_not_found(LISTING_NOT_FOUND)?;

    Ok(Json(listing))
}

pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<UpdateListing>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "listing")?;
    let listing = listing::revise(&state.db, id, auth.user_id, &input).await?;

    Ok(Json(json!({
        "message": "Skill listing updated successfully",
        "listing": listing,
    })))
}

pub async fn close(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "listing")?;
    listing::close(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({ "message": "Skill listing closed successfully" })))
}
