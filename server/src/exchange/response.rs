use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use super::lifecycle::{ExchangeTerms, Participants, Proposal, ResponseStatus};
use super::request::ExchangeRequest;
use super::session::ExchangeSession;
use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::listing::{SkillListing, LISTING_NOT_FOUND};
use crate::validation::{clean_list, Validate, ValidationErrors, Validator};

pub const REQUEST_NOT_FOUND: &str = "Exchange request not found";
const RESPONSE_NOT_FOUND: &str = "Response not found";

/// The listing creator's answer to an exchange request
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeResponse {
    pub id: Uuid,
    #[serde(rename = "exchangeRequest")]
    pub exchange_request_id: Uuid,
    #[serde(rename = "responder")]
    pub responder_id: Uuid,
    pub responder_username: String,
    pub status: ResponseStatus,
    pub message: String,
    pub credits_offered: Option<i64>,
    pub skills_offered: Vec<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const RESPONSE_COLUMNS: &str = r#"
    id, exchange_request_id, responder_id, responder_username, status, message,
    credits_offered, skills_offered, created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExchangeResponse {
    pub status: ResponseStatus,
    pub message: String,
    pub credits_offered: Option<i64>,
    #[serde(default)]
    pub skills_offered: Vec<String>,
}

impl Validate for CreateExchangeResponse {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.check(
            self.status != ResponseStatus::Pending,
            "status",
            "must be either accepted or rejected",
        )
        .length("message", self.message.trim(), 10, 1000);
        if let Some(credits) = self.credits_offered {
            v.at_least("creditsOffered", credits, 0);
        }
        v.finish()
    }
}

impl ExchangeResponse {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        exchange_request_id: Uuid,
        responder_id: Uuid,
        responder_username: &str,
        input: &CreateExchangeResponse,
    ) -> cja::Result<ExchangeResponse> {
        let query = format!(
            r#"
            INSERT INTO exchange_responses (
                exchange_request_id, responder_id, responder_username, status,
                message, credits_offered, skills_offered
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {RESPONSE_COLUMNS}
            "#
        );

        let response = sqlx::query_as::<_, ExchangeResponse>(&query)
            .bind(exchange_request_id)
            .bind(responder_id)
            .bind(responder_username)
            .bind(input.status)
            .bind(input.message.trim())
            .bind(input.credits_offered)
            .bind(clean_list(&input.skills_offered))
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert exchange response")?;

        info!(
            "User {} {} exchange request {}",
            responder_id, response.status, exchange_request_id
        );

        Ok(response)
    }

    pub async fn exists_for_request<'e>(
        executor: impl PgExecutor<'e>,
        exchange_request_id: Uuid,
    ) -> cja::Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM exchange_responses WHERE exchange_request_id = $1)",
        )
        .bind(exchange_request_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    pub async fn for_request<'e>(
        executor: impl PgExecutor<'e>,
        exchange_request_id: Uuid,
    ) -> cja::Result<Vec<ExchangeResponse>> {
        let query = format!(
            "SELECT {RESPONSE_COLUMNS} FROM exchange_responses WHERE exchange_request_id = $1 ORDER BY created_at_utc DESC"
        );
        let responses = sqlx::query_as::<_, ExchangeResponse>(&query)
            .bind(exchange_request_id)
            .fetch_all(executor)
            .await?;

        Ok(responses)
    }

    pub async fn lock<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<ExchangeResponse>> {
        let query =
            format!("SELECT {RESPONSE_COLUMNS} FROM exchange_responses WHERE id = $1 FOR UPDATE");
        let response = sqlx::query_as::<_, ExchangeResponse>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(response)
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: ResponseStatus,
    ) -> cja::Result<()> {
        sqlx::query(
            "UPDATE exchange_responses SET status = $2, updated_at_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(executor)
        .await?;

        Ok(())
    }
}

/// The listing creator answers a pending request
pub async fn respond(
    pool: &PgPool,
    request_id: Uuid,
    responder_id: Uuid,
    responder_username: &str,
    input: &CreateExchangeResponse,
) -> ServerResult<ExchangeResponse> {
    let mut tx = pool.begin().await?;

    let request = ExchangeRequest::lock(&mut *tx, request_id)
        .await?
        .or_not_found(REQUEST_NOT_FOUND)?;
    if request.listing_creator_id != responder_id {
        return Err(ApiError::forbidden(
            "Only the listing creator can respond to this request",
        ));
    }

    let request_status = request.status.respond(input.status)?;
    if ExchangeResponse::exists_for_request(&mut *tx, request_id).await? {
        return Err(ApiError::bad_request(
            "You have already responded to this request",
        ));
    }

    let response =
        ExchangeResponse::create(&mut *tx, request_id, responder_id, responder_username, input)
            .await?;
    ExchangeRequest::record_response(&mut *tx, request_id, request_status, input.message.trim())
        .await?;
    tx.commit().await?;

    Ok(response)
}

async fn lock_with_request(
    conn: &mut PgConnection,
    response_id: Uuid,
) -> ServerResult<(ExchangeResponse, ExchangeRequest)> {
    let response = ExchangeResponse::lock(&mut *conn, response_id)
        .await?
        .or_not_found(RESPONSE_NOT_FOUND)?;
    let request = ExchangeRequest::lock(&mut *conn, response.exchange_request_id)
        .await?
        .or_not_found(REQUEST_NOT_FOUND)?;

    Ok((response, request))
}

/// The requester takes up an accepted response, which opens the session
#[tracing::instrument(skip(pool), err(Debug))]
pub async fn accept(
    pool: &PgPool,
    response_id: Uuid,
    user_id: Uuid,
) -> ServerResult<ExchangeSession> {
    let mut tx = pool.begin().await?;

    let (response, request) = lock_with_request(&mut *tx, response_id).await?;
    if request.requester_id != user_id {
        return Err(ApiError::forbidden("Only the requester can accept responses"));
    }
    let request_status = request.status.accept(response.status)?;

    let listing = SkillListing::find_by_id(&mut *tx, request.listing_id)
        .await?
        .or_not_found(LISTING_NOT_FOUND)?;

    let terms = ExchangeTerms::derive(&Proposal {
        listing_type: listing.listing_type,
        listing_creator: listing.creator_id,
        listing_skills: &listing.skills,
        requester: request.requester_id,
        exchange_type: request.proposed_exchange_type,
        credits: request.proposed_credits,
        skills: &request.proposed_skills,
    });
    let participants = Participants {
        requestor: request.requester_id,
        responder: response.responder_id,
    };

    let session =
        ExchangeSession::create(&mut *tx, listing.id, request.id, participants, &terms).await?;
    ExchangeRequest::set_status(&mut *tx, request.id, request_status).await?;
    tx.commit().await?;

    Ok(session)
}

/// The requester turns the response down; the request is closed with it
pub async fn reject(pool: &PgPool, response_id: Uuid, user_id: Uuid) -> ServerResult<()> {
    let mut tx = pool.begin().await?;

    let (response, request) = lock_with_request(&mut *tx, response_id).await?;
    if request.requester_id != user_id {
        return Err(ApiError::forbidden("Only the requester can reject responses"));
    }
    let (request_status, response_status) = request.status.decline(response.status)?;

    ExchangeResponse::set_status(&mut *tx, response.id, response_status).await?;
    ExchangeRequest::set_status(&mut *tx, request.id, request_status).await?;
    tx.commit().await?;

    info!("User {} rejected response {}", user_id, response_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_is_not_an_answer() {
        let input: CreateExchangeResponse = serde_json::from_value(json!({
            "status": "pending",
            "message": "Let me think about it for a bit",
        }))
        .unwrap();

        assert_eq!(input.validate().unwrap_err().fields(), vec!["status"]);
    }

    #[test]
    fn test_accepted_response() {
        let input: CreateExchangeResponse = serde_json::from_value(json!({
            "status": "accepted",
            "message": "Sounds great, let's do it",
            "skillsOffered": ["guitar"],
        }))
        .unwrap();

        assert!(input.validate().is_ok());
        assert_eq!(input.credits_offered, None);
    }

    #[test]
    fn test_unknown_status_fails_to_parse() {
        let parsed = serde_json::from_value::<CreateExchangeResponse>(json!({
            "status": "maybe",
            "message": "Sounds great, let's do it",
        }));
        assert!(parsed.is_err());
    }
}
