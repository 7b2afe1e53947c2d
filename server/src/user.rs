use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use tracing::info;
use uuid::Uuid;

use crate::validation::{clean_list, Validate, ValidationErrors, Validator};

/// Avatar used when a new account does not supply one
pub const DEFAULT_AVATAR: &str = "https://avatar.iran.liara.run/public";

const USER_COLUMNS: &str = r#"
    id, username, email, password_hash, bio, about, avatar, tags, passing_year,
    skills_required, skills_offered, credits, trust_score, is_admin,
    created_at_utc, updated_at_utc
"#;

/// Represents a user in the system
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string, never serialized
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: Option<String>,
    pub about: Option<String>,
    pub avatar: String,
    pub tags: Vec<String>,
    pub passing_year: Option<i32>,
    pub skills_required: Vec<String>,
    pub skills_offered: Vec<String>,
    /// Spendable credit balance
    pub credits: i64,
    /// Mean overall rating of public reviews received
    pub trust_score: f64,
    pub is_admin: bool,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub email: String,
    pub bio: Option<String>,
    pub about: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub passing_year: Option<i32>,
    #[serde(default)]
    pub skills_required: Vec<String>,
    #[serde(default)]
    pub skills_offered: Vec<String>,
}

impl Validate for CreateUser {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("username", &self.username, 1, 20)
            .alphanumeric("username", &self.username)
            .length("password", &self.password, 1, 256)
            .alphanumeric("password", &self.password)
            .email("email", &self.email)
            .optional_length("bio", self.bio.as_deref(), 1, 500)
            .optional_length("about", self.about.as_deref(), 1, 500)
            .optional_url("avatar", self.avatar.as_deref())
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub username: String,
    pub password: String,
}

impl Validate for LoginUser {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .check(!self.username.is_empty(), "username", "Username is required")
            .check(!self.password.is_empty(), "password", "Password is required")
            .finish()
    }
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    pub bio: Option<String>,
    pub about: Option<String>,
    pub avatar: Option<String>,
    pub tags: Option<Vec<String>>,
    pub passing_year: Option<i32>,
    pub skills_required: Option<Vec<String>>,
    pub skills_offered: Option<Vec<String>>,
}

impl Validate for UpdateProfile {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .optional_length("bio", self.bio.as_deref(), 1, 500)
            .optional_length("about", self.about.as_deref(), 1, 500)
            .optional_url("avatar", self.avatar.as_deref())
            .finish()
    }
}

impl User {
    /// Get a user by their ID
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
    ) -> cja::Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(executor)
            .await
            .wrap_err_with(|| format!("Failed to load user {user_id}"))?;

        Ok(user)
    }

    pub async fn find_by_username<'e>(
        executor: impl PgExecutor<'e>,
        username: &str,
    ) -> cja::Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(executor)
            .await
            .wrap_err_with(|| format!("Failed to load user {username}"))?;

        Ok(user)
    }

    pub async fn username_or_email_taken<'e>(
        executor: impl PgExecutor<'e>,
        username: &str,
        email: &str,
    ) -> cja::Result<bool> {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 OR lower(email) = lower($2))",
        )
        .bind(username)
        .bind(email)
        .fetch_one(executor)
        .await?;

        Ok(taken)
    }

    /// Create a new user; `password_hash` must already be hashed
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        input: &CreateUser,
        password_hash: &str,
    ) -> cja::Result<User> {
        let query = format!(
            r#"
            INSERT INTO users (
                username, email, password_hash, bio, about, avatar, tags,
                passing_year, skills_required, skills_offered
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        );

        let user = sqlx::query_as::<_, User>(&query)
            .bind(&input.username)
            .bind(&input.email)
            .bind(password_hash)
            .bind(&input.bio)
            .bind(&input.about)
            .bind(input.avatar.as_deref().unwrap_or(DEFAULT_AVATAR))
            .bind(clean_list(&input.tags))
            .bind(input.passing_year)
            .bind(clean_list(&input.skills_required))
            .bind(clean_list(&input.skills_offered))
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert user")?;

        info!("Created new user with ID: {}", user.id);

        Ok(user)
    }

    pub async fn update_profile<'e>(
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
        update: &UpdateProfile,
    ) -> cja::Result<Option<User>> {
        let query = format!(
            r#"
            UPDATE users SET
                bio = COALESCE($2, bio),
                about = COALESCE($3, about),
                avatar = COALESCE($4, avatar),
                tags = COALESCE($5, tags),
                passing_year = COALESCE($6, passing_year),
                skills_required = COALESCE($7, skills_required),
                skills_offered = COALESCE($8, skills_offered),
                updated_at_utc = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );

        let user = sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .bind(&update.bio)
            .bind(&update.about)
            .bind(&update.avatar)
            .bind(update.tags.as_deref().map(clean_list))
            .bind(update.passing_year)
            .bind(update.skills_required.as_deref().map(clean_list))
            .bind(update.skills_offered.as_deref().map(clean_list))
            .fetch_optional(executor)
            .await
            .wrap_err_with(|| format!("Failed to update profile for user {user_id}"))?;

        if user.is_some() {
            info!("Updated profile for user {}", user_id);
        }

        Ok(user)
    }

    /// Lock a user's row for the rest of the transaction and return its balance
    pub async fn lock_credits<'e>(
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
    ) -> cja::Result<Option<i64>> {
        let credits: Option<i64> =
            sqlx::query_scalar("SELECT credits FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(executor)
                .await?;

        Ok(credits)
    }

    /// Add `delta` (possibly negative) to a balance, returning the new balance
    pub async fn adjust_credits<'e>(
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
        delta: i64,
    ) -> cja::Result<i64> {
        let credits: i64 = sqlx::query_scalar(
            "UPDATE users SET credits = credits + $2, updated_at_utc = NOW() WHERE id = $1 RETURNING credits",
        )
        .bind(user_id)
        .bind(delta)
        .fetch_one(executor)
        .await
        .wrap_err_with(|| format!("Failed to adjust credits for user {user_id}"))?;

        Ok(credits)
    }

    pub async fn set_trust_score<'e>(
        executor: impl PgExecutor<'e>,
        user_id: Uuid,
        trust_score: f64,
    ) -> cja::Result<()> {
        sqlx::query("UPDATE users SET trust_score = $2, updated_at_utc = NOW() WHERE id = $1")
            .bind(user_id)
            .bind(trust_score)
            .execute(executor)
            .await
            .wrap_err_with(|| format!("Failed to set trust score for user {user_id}"))?;

        info!("Updated trust score for user {} to {:.2}", user_id, trust_score);

        Ok(())
    }
}
