use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    auth::{hash_password, verify_password, AuthUser},
    errors::{ApiError, OrDuplicate as _, OrNotFound as _, ServerResult},
    extract::ValidJson,
    state::AppState,
    user::{CreateUser, LoginUser, UpdateProfile, User},
};

const USER_NOT_FOUND: &str = "User not found";
const USER_EXISTS: &str = "User already exists";

pub async fn create(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<CreateUser>,
) -> ServerResult<impl IntoResponse> {
    if User::username_or_email_taken(&state.db, &input.username, &input.email).await? {
        return Err(ApiError::bad_request(USER_EXISTS));
    }

    let password_hash = hash_password(&input.password)?;
    let user = User::create(&state.db, &input, &password_hash)
        .await
        .or_duplicate(USER_EXISTS)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User created successfully",
            "user": user,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(input): ValidJson<LoginUser>,
) -> ServerResult<Json<Value>> {
    let user = User::find_by_username(&state.db, &input.username).await?;

    // Unknown users and wrong passwords look the same to the caller
    let user = match user {
        Some(user) if verify_password(&input.password, &user.password_hash) => user,
        _ => return Err(ApiError::Unauthorized("Invalid credentials")),
    };

    let token = state.jwt.issue(user.id, &user.username)?;
    info!("User {} logged in", user.id);

    Ok(Json(json!({
        "message": "Login successful",
        "token": token,
        "user": user,
    })))
}

pub async fn me(State(state): State<AppState>, auth: AuthUser) -> ServerResult<Json<Value>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .or_not_found(USER_NOT_FOUND)?;

    Ok(Json(json!({
        "message": "User fetched successfully",
        "user": user,
    })))
}

pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(update): ValidJson<UpdateProfile>,
) -> ServerResult<Json<Value>> {
    let user = User::update_profile(&state.db, auth.user_id, &update)
        .await?
        .or_not_found(USER_NOT_FOUND)?;

    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": user,
    })))
}

pub async fn profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ServerResult<Json<Value>> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .or_not_found(USER_NOT_FOUND)?;

    Ok(Json(json!({
        "message": "User fetched successfully",
        "user": user,
    })))
}
