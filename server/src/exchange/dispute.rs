use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::lifecycle::DisputeStatus;
use super::session::{ExchangeSession, SESSION_NOT_FOUND};
use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::pagination::Pagination;
use crate::validation::{Validate, ValidationErrors, Validator};

pub const DISPUTE_NOT_FOUND: &str = "Dispute not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dispute_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    NoShow,
    IncompleteService,
    QualityIssue,
    Miscommunication,
    Other,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub id: Uuid,
    #[serde(rename = "exchangeSession")]
    pub exchange_session_id: Uuid,
    #[serde(rename = "initiator")]
    pub initiator_id: Uuid,
    #[serde(rename = "respondent")]
    pub respondent_id: Uuid,
    pub reason: DisputeReason,
    pub description: String,
    pub evidence: Vec<String>,
    pub respondent_response: Option<String>,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const DISPUTE_COLUMNS: &str = r#"
    id, exchange_session_id, initiator_id, respondent_id, reason, description,
    evidence, respondent_response, status, resolution, resolved_at,
    created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDispute {
    pub reason: DisputeReason,
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
}

impl Validate for CreateDispute {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        v.length("description", self.description.trim(), 20, 2000);
        for url in &self.evidence {
            v.url("evidence", url);
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondToDispute {
    pub response: String,
}

impl Validate for RespondToDispute {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("response", self.response.trim(), 20, 2000)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveDispute {
    pub resolution: String,
    pub status: DisputeStatus,
}

impl Validate for ResolveDispute {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("resolution", self.resolution.trim(), 1, 1000)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DisputeFilters {
    pub status: Option<DisputeStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl DisputeFilters {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>, user_id: Uuid) {
        qb.push(" WHERE (initiator_id = ")
            .push_bind(user_id)
            .push(" OR respondent_id = ")
            .push_bind(user_id)
            .push(")");
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status);
        }
    }
}

impl Dispute {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        user_id == self.initiator_id || user_id == self.respondent_id
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<Dispute>> {
        let query = format!("SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = $1");
        let dispute = sqlx::query_as::<_, Dispute>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(dispute)
    }

    async fn lock<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> cja::Result<Option<Dispute>> {
        let query = format!("SELECT {DISPUTE_COLUMNS} FROM disputes WHERE id = $1 FOR UPDATE");
        let dispute = sqlx::query_as::<_, Dispute>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(dispute)
    }

    async fn has_active<'e>(executor: impl PgExecutor<'e>, session_id: Uuid) -> cja::Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM disputes
                WHERE exchange_session_id = $1
                  AND status IN ('open', 'under_review', 'escalated')
            )
            "#,
        )
        .bind(session_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
        filters: &DisputeFilters,
        pagination: Pagination,
    ) -> cja::Result<(Vec<Dispute>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM disputes");
        filters.push_where(&mut count, user_id);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items = QueryBuilder::<Postgres>::new(format!("SELECT {DISPUTE_COLUMNS} FROM disputes"));
        filters.push_where(&mut items, user_id);
        items
            .push(" ORDER BY created_at_utc DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let disputes = items
            .build_query_as::<Dispute>()
            .fetch_all(pool)
            .await
            .wrap_err_with(|| format!("Failed to list disputes for user {user_id}"))?;

        Ok((disputes, total))
    }
}

/// Open a dispute on a session; the other participant becomes the respondent
#[tracing::instrument(skip(pool, input), err(Debug))]
pub async fn open(
    pool: &PgPool,
    session_id: Uuid,
    initiator_id: Uuid,
    input: &CreateDispute,
) -> ServerResult<Dispute> {
    let mut tx = pool.begin().await?;

    let session = ExchangeSession::lock(&mut *tx, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    let respondent_id = session.participants().counterpart(initiator_id)?;

    if Dispute::has_active(&mut *tx, session_id).await? {
        return Err(ApiError::bad_request(
            "An active dispute already exists for this session",
        ));
    }
    let session_status = session.status.dispute()?;

    let query = format!(
        r#"
        INSERT INTO disputes (
            exchange_session_id, initiator_id, respondent_id, reason, description, evidence
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {DISPUTE_COLUMNS}
        "#
    );
    let dispute = sqlx::query_as::<_, Dispute>(&query)
        .bind(session_id)
        .bind(initiator_id)
        .bind(respondent_id)
        .bind(input.reason)
        .bind(input.description.trim())
        .bind(&input.evidence)
        .fetch_one(&mut *tx)
        .await
        .wrap_err("Failed to insert dispute")?;

    ExchangeSession::set_status(&mut *tx, session_id, session_status).await?;
    tx.commit().await?;

    info!("User {} opened dispute {} on session {}", initiator_id, dispute.id, session_id);

    Ok(dispute)
}

async fn set_state<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    status: DisputeStatus,
) -> cja::Result<Dispute> {
    let query = format!(
        "UPDATE disputes SET status = $2, updated_at_utc = NOW() WHERE id = $1 RETURNING {DISPUTE_COLUMNS}"
    );
    let dispute = sqlx::query_as::<_, Dispute>(&query)
        .bind(id)
        .bind(status)
        .fetch_one(executor)
        .await?;

    Ok(dispute)
}

/// The respondent gives their side, moving the dispute under review
pub async fn respond(
    pool: &PgPool,
    dispute_id: Uuid,
    user_id: Uuid,
    response: &str,
) -> ServerResult<Dispute> {
    let mut tx = pool.begin().await?;

    let dispute = Dispute::lock(&mut *tx, dispute_id)
        .await?
        .or_not_found(DISPUTE_NOT_FOUND)?;
    if dispute.respondent_id != user_id {
        return Err(ApiError::forbidden(
            "Only the respondent can respond to this dispute",
        ));
    }
    let status = dispute.status.respond()?;

    let query = format!(
        r#"
        UPDATE disputes SET respondent_response = $2, status = $3, updated_at_utc = NOW()
        WHERE id = $1
        RETURNING {DISPUTE_COLUMNS}
        "#
    );
    let dispute = sqlx::query_as::<_, Dispute>(&query)
        .bind(dispute_id)
        .bind(response.trim())
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(dispute)
}

pub async fn escalate(pool: &PgPool, dispute_id: Uuid, user_id: Uuid) -> ServerResult<Dispute> {
    let mut tx = pool.begin().await?;

    let dispute = Dispute::lock(&mut *tx, dispute_id)
        .await?
        .or_not_found(DISPUTE_NOT_FOUND)?;
    if !dispute.is_party(user_id) {
        return Err(ApiError::forbidden("You don't have access to this dispute"));
    }
    let status = dispute.status.escalate()?;

    let dispute = set_state(&mut *tx, dispute_id, status).await?;
    tx.commit().await?;

    info!("Dispute {} escalated by {}", dispute_id, user_id);

    Ok(dispute)
}

/// Admin decision; the session keeps its disputed status
pub async fn resolve(
    pool: &PgPool,
    dispute_id: Uuid,
    admin_id: Uuid,
    input: &ResolveDispute,
) -> ServerResult<Dispute> {
    let mut tx = pool.begin().await?;

    let dispute = Dispute::lock(&mut *tx, dispute_id)
        .await?
        .or_not_found(DISPUTE_NOT_FOUND)?;
    let status = dispute.status.resolve(input.status)?;

    let query = format!(
        r#"
        UPDATE disputes SET
            resolution = $2,
            status = $3,
            resolved_at = NOW(),
            updated_at_utc = NOW()
        WHERE id = $1
        RETURNING {DISPUTE_COLUMNS}
        "#
    );
    let dispute = sqlx::query_as::<_, Dispute>(&query)
        .bind(dispute_id)
        .bind(input.resolution.trim())
        .bind(status)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Admin {} marked dispute {} as {}", admin_id, dispute_id, status);

    Ok(dispute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_dispute_rules() {
        let input: CreateDispute = serde_json::from_value(json!({
            "reason": "no_show",
            "description": "They never came",
            "evidence": ["https://example.com/chat.png", "not a link"],
        }))
        .unwrap();

        assert_eq!(input.reason, DisputeReason::NoShow);
        assert_eq!(
            input.validate().unwrap_err().fields(),
            vec!["description", "evidence"]
        );
    }

    #[test]
    fn test_unknown_reason_is_rejected() {
        let parsed = serde_json::from_value::<CreateDispute>(json!({
            "reason": "bad_vibes",
            "description": "Something felt off the whole time we met",
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_resolution_length() {
        let input = ResolveDispute {
            resolution: "x".repeat(1001),
            status: DisputeStatus::Resolved,
        };
        assert_eq!(input.validate().unwrap_err().fields(), vec!["resolution"]);

        let input = RespondToDispute {
            response: "I was there on time, here is the full story".to_string(),
        };
        assert!(input.validate().is_ok());
    }
}
