use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::lifecycle::{ExchangeType, RequestStatus};
use super::response::REQUEST_NOT_FOUND;
use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::listing::{ListingStatus, SkillListing, LISTING_NOT_FOUND};
use crate::pagination::Pagination;
use crate::validation::{clean_list, Validate, ValidationErrors, Validator};

/// A user's proposal to trade for a listing
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    pub id: Uuid,
    #[serde(rename = "listing")]
    pub listing_id: Uuid,
    #[serde(rename = "requester")]
    pub requester_id: Uuid,
    pub requester_username: String,
    pub listing_creator_id: Uuid,
    pub message: String,
    pub proposed_exchange_type: ExchangeType,
    pub proposed_credits: i64,
    pub proposed_skills: Vec<String>,
    pub status: RequestStatus,
    pub response_message: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const REQUEST_COLUMNS: &str = r#"
    id, listing_id, requester_id, requester_username, listing_creator_id, message,
    proposed_exchange_type, proposed_credits, proposed_skills, status,
    response_message, responded_at, created_at_utc, updated_at_utc
"#;

fn check_terms(
    v: &mut Validator,
    exchange_type: ExchangeType,
    credits: i64,
    skills: &[String],
) {
    v.at_least("proposedCredits", credits, 0);
    if exchange_type.involves_credits() {
        v.check(
            credits > 0,
            "proposedCredits",
            format!("must be greater than 0 for {exchange_type} exchanges"),
        );
    }
    if exchange_type.involves_skills() {
        v.check(
            !clean_list(skills).is_empty(),
            "proposedSkills",
            format!("at least one skill is required for {exchange_type} exchanges"),
        );
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeRequest {
    pub listing: Uuid,
    pub message: String,
    pub proposed_exchange_type: ExchangeType,
    #[serde(default)]
    pub proposed_credits: i64,
    #[serde(default)]
    pub proposed_skills: Vec<String>,
}

impl Validate for CreateExchangeRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.length("message", self.message.trim(), 10, 1000);
        check_terms(
            &mut v,
            self.proposed_exchange_type,
            self.proposed_credits,
            &self.proposed_skills,
        );
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExchangeRequest {
    pub message: Option<String>,
    pub proposed_credits: Option<i64>,
    pub proposed_skills: Option<Vec<String>>,
}

impl Validate for UpdateExchangeRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        if let Some(message) = &self.message {
            v.length("message", message.trim(), 10, 1000);
        }
        if let Some(credits) = self.proposed_credits {
            v.at_least("proposedCredits", credits, 0);
        }
        v.finish()
    }
}

impl UpdateExchangeRequest {
    /// The terms that would result from applying this update to `current`
    pub fn check_against(&self, current: &ExchangeRequest) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        check_terms(
            &mut v,
            current.proposed_exchange_type,
            self.proposed_credits.unwrap_or(current.proposed_credits),
            self.proposed_skills
                .as_deref()
                .unwrap_or(&current.proposed_skills),
        );
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestFilters {
    pub listing: Option<Uuid>,
    pub requester: Option<Uuid>,
    pub status: Option<RequestStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl RequestFilters {
    fn push_where<'a>(&'a self, qb: &mut QueryBuilder<'a, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(listing) = self.listing {
            qb.push(" AND listing_id = ").push_bind(listing);
        }
        if let Some(requester) = self.requester {
            qb.push(" AND requester_id = ").push_bind(requester);
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status);
        }
    }
}

impl ExchangeRequest {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        requester_id: Uuid,
        requester_username: &str,
        listing_creator_id: Uuid,
        input: &CreateExchangeRequest,
    ) -> cja::Result<ExchangeRequest> {
        let query = format!(
            r#"
            INSERT INTO exchange_requests (
                listing_id, requester_id, requester_username, listing_creator_id,
                message, proposed_exchange_type, proposed_credits, proposed_skills
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {REQUEST_COLUMNS}
            "#
        );

        let request = sqlx::query_as::<_, ExchangeRequest>(&query)
            .bind(input.listing)
            .bind(requester_id)
            .bind(requester_username)
            .bind(listing_creator_id)
            .bind(input.message.trim())
            .bind(input.proposed_exchange_type)
            .bind(input.proposed_credits)
            .bind(clean_list(&input.proposed_skills))
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert exchange request")?;

        info!(
            "User {} requested listing {} ({})",
            requester_id, request.listing_id, request.id
        );

        Ok(request)
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<ExchangeRequest>> {
        let query = format!("SELECT {REQUEST_COLUMNS} FROM exchange_requests WHERE id = $1");
        let request = sqlx::query_as::<_, ExchangeRequest>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(request)
    }

    /// Like `find_by_id`, but holds the row lock until the transaction ends
    pub async fn lock<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<ExchangeRequest>> {
        let query =
            format!("SELECT {REQUEST_COLUMNS} FROM exchange_requests WHERE id = $1 FOR UPDATE");
        let request = sqlx::query_as::<_, ExchangeRequest>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(request)
    }

    pub async fn list(
        pool: &sqlx::PgPool,
        filters: &RequestFilters,
        pagination: Pagination,
    ) -> cja::Result<(Vec<ExchangeRequest>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exchange_requests");
        filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items =
            QueryBuilder::<Postgres>::new(format!("SELECT {REQUEST_COLUMNS} FROM exchange_requests"));
        filters.push_where(&mut items);
        items
            .push(" ORDER BY created_at_utc DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let requests = items
            .build_query_as::<ExchangeRequest>()
            .fetch_all(pool)
            .await
            .wrap_err("Failed to list exchange requests")?;

        Ok((requests, total))
    }

    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        update: &UpdateExchangeRequest,
    ) -> cja::Result<ExchangeRequest> {
        let query = format!(
            r#"
            UPDATE exchange_requests SET
                message = COALESCE($2, message),
                proposed_credits = COALESCE($3, proposed_credits),
                proposed_skills = COALESCE($4, proposed_skills),
                updated_at_utc = NOW()
            WHERE id = $1
            RETURNING {REQUEST_COLUMNS}
            "#
        );

        let request = sqlx::query_as::<_, ExchangeRequest>(&query)
            .bind(id)
            .bind(update.message.as_deref().map(str::trim))
            .bind(update.proposed_credits)
            .bind(update.proposed_skills.as_deref().map(clean_list))
            .fetch_one(executor)
            .await
            .wrap_err_with(|| format!("Failed to update exchange request {id}"))?;

        Ok(request)
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: RequestStatus,
    ) -> cja::Result<()> {
        sqlx::query(
            "UPDATE exchange_requests SET status = $2, updated_at_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(executor)
        .await?;

        info!("Exchange request {} is now {}", id, status);

        Ok(())
    }

    /// Store the creator's answer on the request itself
    pub async fn record_response<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: RequestStatus,
        message: &str,
    ) -> cja::Result<()> {
        sqlx::query(
            r#"
            UPDATE exchange_requests SET
                status = $2,
                response_message = $3,
                responded_at = NOW(),
                updated_at_utc = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(message)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// Ask for a listing; the listing's response counter goes up with it
pub async fn submit(
    pool: &PgPool,
    requester_id: Uuid,
    requester_username: &str,
    input: &CreateExchangeRequest,
) -> ServerResult<ExchangeRequest> {
    let mut tx = pool.begin().await?;

    let listing = SkillListing::find_by_id(&mut *tx, input.listing)
        .await?
        .or_not_found(LISTING_NOT_FOUND)?;
    if listing.status != ListingStatus::Active {
        return Err(ApiError::bad_request("This listing is no longer active"));
    }
    if listing.creator_id == requester_id {
        return Err(ApiError::bad_request("You cannot request your own listing"));
    }
    if !listing.exchange_type.accepts(input.proposed_exchange_type) {
        return Err(ValidationErrors::single(
            "proposedExchangeType",
            format!("this listing does not accept {} exchanges", input.proposed_exchange_type),
        )
        .into());
    }

    let request = ExchangeRequest::create(
        &mut *tx,
        requester_id,
        requester_username,
        listing.creator_id,
        input,
    )
    .await?;
    SkillListing::increment_response_count(&mut *tx, listing.id).await?;
    tx.commit().await?;

    Ok(request)
}

pub async fn revise(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    update: &UpdateExchangeRequest,
) -> ServerResult<ExchangeRequest> {
    let mut tx = pool.begin().await?;

    let request = ExchangeRequest::lock(&mut *tx, id)
        .await?
        .or_not_found(REQUEST_NOT_FOUND)?;
    if request.requester_id != user_id {
        return Err(ApiError::forbidden(
            "You don't have permission to update this request",
        ));
    }
    request.status.ensure_editable()?;
    update.check_against(&request)?;

    let request = ExchangeRequest::update(&mut *tx, id, update).await?;
    tx.commit().await?;

    Ok(request)
}

pub async fn withdraw(pool: &PgPool, id: Uuid, user_id: Uuid) -> ServerResult<()> {
    let mut tx = pool.begin().await?;

    let request = ExchangeRequest::lock(&mut *tx, id)
        .await?
        .or_not_found(REQUEST_NOT_FOUND)?;
    if request.requester_id != user_id {
        return Err(ApiError::forbidden(
            "You don't have permission to cancel this request",
        ));
    }
    let status = request.status.cancel()?;

    ExchangeRequest::set_status(&mut *tx, id, status).await?;
    tx.commit().await?;

    Ok(())
}
