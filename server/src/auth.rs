use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use cja::color_eyre::eyre::{eyre, WrapErr as _};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::state::AppState;
use crate::user::User;

/// Default lifetime of an issued token in hours
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Body of the bearer tokens handed out by `/user/login`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("No token provided")]
    Missing,
    #[error("Invalid token")]
    Invalid,
    #[error("Token expired")]
    Expired,
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Missing => ApiError::Unauthorized("No token provided"),
            TokenError::Invalid => ApiError::Unauthorized("Invalid token"),
            TokenError::Expired => ApiError::Unauthorized("Token expired"),
        }
    }
}

/// Signing material for HS256 tokens
#[derive(Clone)]
pub struct JwtConfig {
    encoding: EncodingKey,
    decoding: DecodingKey,
    pub ttl: Duration,
}

impl JwtConfig {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn from_env() -> cja::Result<Self> {
        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| eyre!("JWT_SECRET is not defined in environment variables"))?;

        if secret.is_empty() {
            return Err(eyre!("JWT_SECRET must not be empty"));
        }

        let ttl_hours = match std::env::var("JWT_TTL_HOURS") {
            Ok(raw) => raw
                .parse::<i64>()
                .wrap_err_with(|| format!("Invalid JWT_TTL_HOURS value: {raw}"))?,
            Err(_) => DEFAULT_TOKEN_TTL_HOURS,
        };

        Ok(Self::new(&secret, Duration::hours(ttl_hours)))
    }

    pub fn issue(&self, user_id: Uuid, username: &str) -> cja::Result<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            username: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .wrap_err("Failed to sign token")
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Extract the current user from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(TokenError::Missing)?;
        let claims = state.jwt.verify(token)?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.username,
        })
    }
}

/// Extract an authenticated admin user from the request
/// Requires both a valid token and the `is_admin` flag on the account
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub user: User,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_user = AuthUser::from_request_parts(parts, state).await?;

        let user = User::find_by_id(&state.db, auth_user.user_id)
            .await?
            .ok_or(ApiError::Unauthorized("Invalid token"))?;

        if !user.is_admin {
            error!(
                "User {} attempted an admin action without admin privileges",
                user.id
            );
            return Err(ApiError::forbidden("Admin privileges required"));
        }

        Ok(AdminUser { user })
    }
}

/// Extract the optional user from the request; bad tokens count as anonymous
#[derive(Debug, Clone)]
pub struct OptionalUser {
    pub user: Option<AuthUser>,
}

#[async_trait]
impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = bearer_token(parts)
            .and_then(|token| state.jwt.verify(token).ok())
            .map(|claims| AuthUser {
                user_id: claims.user_id,
                username: claims.username,
            });

        Ok(OptionalUser { user })
    }
}

impl OptionalUser {
    pub fn user_id(&self) -> Option<Uuid> {
        self.user.as_ref().map(|u| u.user_id)
    }
}

pub fn hash_password(password: &str) -> cja::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| eyre!("Failed to hash password: {}", e))?;

    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("Stored password hash could not be parsed: {}", e);
            return false;
        }
    };

    let ok = Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok();

    if !ok {
        info!("Password verification failed");
    }

    ok
}
