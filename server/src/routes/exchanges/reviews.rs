use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::{AuthUser, OptionalUser},
    errors::{ApiError, ServerResult},
    exchange::{
        review::{self, CreateReview, ReviewFilters},
        Review,
    },
    extract::{parse_id, ApiQuery, ValidJson},
    pagination::{Pagination, DEFAULT_LIMIT},
    state::AppState,
};

const REVIEW_NOT_FOUND: &str = "Review not found";

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<CreateReview>,
) -> ServerResult<impl IntoResponse> {
    let session_id = parse_id(&id, "session")?;
    let review = review::create(&state, session_id, auth.user_id, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Review created successfully",
            "review": review,
        })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(filters): ApiQuery<ReviewFilters>,
) -> ServerResult<Json<Value>> {
    let pagination = Pagination::new(filters.page, filters.limit, DEFAULT_LIMIT);
    let (reviews, total) = Review::list_public(&state.db, &filters, pagination).await?;

    Ok(Json(pagination.envelope("reviews", "totalReviews", &reviews, total)?))
}

/// Private reviews read as missing to anyone but the two people involved
pub async fn show(
    State(state): State<AppState>,
    viewer: OptionalUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "review")?;
    let review = Review::find_by_id(&state.db, id)
        .await?
        .filter(|review| review.visible_to(viewer.user_id()))
        .ok_or_else(|| ApiError::not_found(REVIEW_NOT_FOUND))?;

    Ok(Json(json!({ "review": review })))
}
