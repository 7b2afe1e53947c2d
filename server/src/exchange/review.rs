use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use cja::jobs::Job as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::{error, info};
use uuid::Uuid;

use super::session::{ExchangeSession, SESSION_NOT_FOUND};
use crate::errors::{ApiError, OrDuplicate as _, OrNotFound as _, ServerResult};
use crate::jobs::RecalculateTrustScoreJob;
use crate::pagination::Pagination;
use crate::state::AppState;
use crate::validation::{Validate, ValidationErrors, Validator};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    #[serde(rename = "exchangeSession")]
    pub exchange_session_id: Uuid,
    #[serde(rename = "reviewer")]
    pub reviewer_id: Uuid,
    #[serde(rename = "reviewee")]
    pub reviewee_id: Uuid,
    pub rating: i16,
    pub skill_rating: i16,
    pub communication_rating: i16,
    pub reliability_rating: i16,
    pub comment: Option<String>,
    pub is_public: bool,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const REVIEW_COLUMNS: &str = r#"
    id, exchange_session_id, reviewer_id, reviewee_id, rating, skill_rating,
    communication_rating, reliability_rating, comment, is_public,
    created_at_utc, updated_at_utc
"#;

fn default_public() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReview {
    pub rating: i16,
    pub skill_rating: i16,
    pub communication_rating: i16,
    pub reliability_rating: i16,
    pub comment: Option<String>,
    #[serde(default = "default_public")]
    pub is_public: bool,
}

impl Validate for CreateReview {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .range("rating", self.rating, 1, 5)
            .range("skillRating", self.skill_rating, 1, 5)
            .range("communicationRating", self.communication_rating, 1, 5)
            .range("reliabilityRating", self.reliability_rating, 1, 5)
            .optional_length("comment", self.comment.as_deref().map(str::trim), 10, 1000)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewFilters {
    pub reviewee: Option<Uuid>,
    pub session: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ReviewFilters {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE is_public = TRUE");
        if let Some(reviewee) = self.reviewee {
            qb.push(" AND reviewee_id = ").push_bind(reviewee);
        }
        if let Some(session) = self.session {
            qb.push(" AND exchange_session_id = ").push_bind(session);
        }
    }
}

impl Review {
    /// Whether `viewer` may read this review
    pub fn visible_to(&self, viewer: Option<Uuid>) -> bool {
        self.is_public
            || viewer.is_some_and(|id| id == self.reviewer_id || id == self.reviewee_id)
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<Review>> {
        let query = format!("SELECT {REVIEW_COLUMNS} FROM reviews WHERE id = $1");
        let review = sqlx::query_as::<_, Review>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(review)
    }

    pub async fn exists<'e>(
        executor: impl PgExecutor<'e>,
        session_id: Uuid,
        reviewer_id: Uuid,
    ) -> cja::Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM reviews WHERE exchange_session_id = $1 AND reviewer_id = $2)",
        )
        .bind(session_id)
        .bind(reviewer_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    async fn insert<'e>(
        executor: impl PgExecutor<'e>,
        session_id: Uuid,
        reviewer_id: Uuid,
        reviewee_id: Uuid,
        input: &CreateReview,
    ) -> cja::Result<Review> {
        let query = format!(
            r#"
            INSERT INTO reviews (
                exchange_session_id, reviewer_id, reviewee_id, rating, skill_rating,
                communication_rating, reliability_rating, comment, is_public
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {REVIEW_COLUMNS}
            "#
        );

        let review = sqlx::query_as::<_, Review>(&query)
            .bind(session_id)
            .bind(reviewer_id)
            .bind(reviewee_id)
            .bind(input.rating)
            .bind(input.skill_rating)
            .bind(input.communication_rating)
            .bind(input.reliability_rating)
            .bind(input.comment.as_deref().map(str::trim))
            .bind(input.is_public)
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert review")?;

        Ok(review)
    }

    pub async fn list_public(
        pool: &PgPool,
        filters: &ReviewFilters,
        pagination: Pagination,
    ) -> cja::Result<(Vec<Review>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reviews");
        filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items = QueryBuilder::<Postgres>::new(format!("SELECT {REVIEW_COLUMNS} FROM reviews"));
        filters.push_where(&mut items);
        items
            .push(" ORDER BY created_at_utc DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let reviews = items
            .build_query_as::<Review>()
            .fetch_all(pool)
            .await
            .wrap_err("Failed to list reviews")?;

        Ok((reviews, total))
    }

    /// Mean overall rating across a user's public reviews, 0 when there are none
    pub async fn average_rating<'e>(
        executor: impl PgExecutor<'e>,
        reviewee_id: Uuid,
    ) -> cja::Result<f64> {
        let average: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(rating)::DOUBLE PRECISION FROM reviews WHERE reviewee_id = $1 AND is_public = TRUE",
        )
        .bind(reviewee_id)
        .fetch_one(executor)
        .await?;

        Ok(average.unwrap_or(0.0))
    }

    /// Users who received a review since `since`
    pub async fn recent_reviewees<'e>(
        executor: impl PgExecutor<'e>,
        since: DateTime<Utc>,
    ) -> cja::Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT reviewee_id FROM reviews WHERE created_at_utc >= $1",
        )
        .bind(since)
        .fetch_all(executor)
        .await?;

        Ok(ids)
    }
}

const ALREADY_REVIEWED: &str = "You have already reviewed this session";

/// Review the other participant of a completed session
pub async fn create(
    state: &AppState,
    session_id: Uuid,
    reviewer_id: Uuid,
    input: &CreateReview,
) -> ServerResult<Review> {
    let session = ExchangeSession::find_by_id(&state.db, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    session.status.ensure_reviewable()?;
    let reviewee_id = session.participants().counterpart(reviewer_id)?;

    if Review::exists(&state.db, session_id, reviewer_id).await? {
        return Err(ApiError::bad_request(ALREADY_REVIEWED));
    }

    let review = Review::insert(&state.db, session_id, reviewer_id, reviewee_id, input)
        .await
        .or_duplicate(ALREADY_REVIEWED)?;
    info!("User {} reviewed session {}", reviewer_id, session_id);

    if let Err(err) = RecalculateTrustScoreJob::new(reviewee_id)
        .enqueue(state.clone(), "review_created".to_string())
        .await
    {
        error!(
            "Failed to enqueue trust score update for user {}: {:?}",
            reviewee_id, err
        );
    }

    Ok(review)
}
