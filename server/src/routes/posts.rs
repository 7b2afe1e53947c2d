use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::AuthUser,
    comment::{self, Comment, CommentFilters, CommentSort, CreateComment, COMMENT_NOT_FOUND},
    errors::{ApiError, OrNotFound as _, ServerResult},
    extract::{parse_id, ApiQuery, ValidJson},
    post::{self, CreatePost, Post, PostFilters, PostSort, UpdatePost, POST_NOT_FOUND},
    state::AppState,
    vote::{self, CastVote, VoteTarget},
};

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(input): ValidJson<CreatePost>,
) -> ServerResult<impl IntoResponse> {
    let post = Post::create(&state.db, auth.user_id, &auth.username, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Post created successfully",
            "post": post,
        })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(filters): ApiQuery<PostFilters>,
) -> ServerResult<Json<Value>> {
    let sort = PostSort::parse(filters.sort.as_deref())?;
    let (posts, total) = Post::list(&state.db, &filters, sort).await?;

    Ok(Json(
        filters
            .pagination()
            .envelope("posts", "totalPosts", &posts, total)?,
    ))
}

pub async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "post")?;
    let post = Post::find_by_id(&state.db, id)
        .await?
        .or_not_found(POST_NOT_FOUND)?;

    Ok(Json(json!({ "post": post })))
}

pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<UpdatePost>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "post")?;
    let post = post::update(&state.db, id, auth.user_id, &input).await?;

    Ok(Json(json!({
        "message": "Post updated successfully",
        "post": post,
    })))
}

pub async fn delete(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "post")?;
    post::delete(&state.db, id, auth.user_id).await?;

    Ok(Json(json!({ "message": "Post deleted successfully" })))
}

async fn cast_vote(
    state: &AppState,
    auth: &AuthUser,
    target: VoteTarget,
    target_id: uuid::Uuid,
    input: &CastVote,
    not_found: &str,
) -> ServerResult<Json<Value>> {
    let score = vote::cast(&state.db, auth.user_id, target, target_id, input.vote_type)
        .await?
        .ok_or_else(|| ApiError::not_found(not_found))?;

    Ok(Json(json!({
        "message": "Vote recorded successfully",
        "voteScore": score,
    })))
}

pub async fn vote(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<CastVote>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "post")?;
    cast_vote(&state, &auth, VoteTarget::Post, id, &input, POST_NOT_FOUND).await
}

pub async fn vote_status(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "post")?;
    let vote_type = vote::current_vote(&state.db, auth.user_id, id).await?;

    Ok(Json(json!({ "voteType": vote_type })))
}

pub async fn comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(filters): ApiQuery<CommentFilters>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "post")?;
    let sort = CommentSort::parse(filters.sort.as_deref())?;
    Post::find_by_id(&state.db, id)
        .await?
        .or_not_found(POST_NOT_FOUND)?;

    let comments = Comment::top_level(&state.db, id, &filters, sort).await?;

    Ok(Json(json!({ "comments": comments })))
}

pub async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<CreateComment>,
) -> ServerResult<impl IntoResponse> {
    let id = parse_id(&id, "post")?;
    let comment = comment::create(&state.db, id, auth.user_id, &auth.username, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Comment created successfully",
            "comment": comment,
        })),
    ))
}

pub async fn replies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "comment")?;
    Comment::find_by_id(&state.db, id)
        .await?
        .or_not_found(COMMENT_NOT_FOUND)?;

    let replies = Comment::replies(&state.db, id).await?;

    Ok(Json(json!({ "replies": replies })))
}

pub async fn vote_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<CastVote>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "comment")?;
    cast_vote(&state, &auth, VoteTarget::Comment, id, &input, COMMENT_NOT_FOUND).await
}
