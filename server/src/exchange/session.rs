use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::credit::{self, CreditTransaction};
use super::lifecycle::{
    Confirmations, ExchangeTerms, ExchangeType, LifecycleError, Participants, SessionStatus,
    Settlement, SkillTransfer,
};
use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::pagination::Pagination;
use crate::validation::{Validate, ValidationErrors, Validator};

pub const SESSION_NOT_FOUND: &str = "Session not found";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub description: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The engagement opened once a requester takes up an accepted response
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSession {
    pub id: Uuid,
    #[serde(rename = "listing")]
    pub listing_id: Uuid,
    #[serde(rename = "exchangeRequest")]
    pub exchange_request_id: Uuid,
    #[serde(rename = "requestor")]
    pub requestor_id: Uuid,
    #[serde(rename = "responder")]
    pub responder_id: Uuid,
    pub exchange_type: ExchangeType,
    pub credits_amount: i64,
    #[serde(rename = "creditsPayer")]
    pub credits_payer_id: Option<Uuid>,
    pub skills_exchanged: Json<Vec<SkillTransfer>>,
    pub status: SessionStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub milestones: Json<Vec<Milestone>>,
    pub requestor_confirmed: bool,
    pub responder_confirmed: bool,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const SESSION_COLUMNS: &str = r#"
    id, listing_id, exchange_request_id, requestor_id, responder_id, exchange_type,
    credits_amount, credits_payer_id, skills_exchanged, status, start_date, end_date,
    completed_date, milestones, requestor_confirmed, responder_confirmed,
    created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSession {
    pub status: Option<SessionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Validate for UpdateSession {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            v.check(end >= start, "endDate", "cannot be before startDate");
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddMilestone {
    pub description: String,
}

impl Validate for AddMilestone {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("description", self.description.trim(), 1, 500)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilters {
    pub status: Option<SessionStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl SessionFilters {
    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>, user_id: Uuid) {
        qb.push(" WHERE (requestor_id = ")
            .push_bind(user_id)
            .push(" OR responder_id = ")
            .push_bind(user_id)
            .push(")");
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status);
        }
    }
}

/// What a confirmation did to the session
#[derive(Debug, Clone, Serialize)]
pub struct Confirmed {
    pub session: ExchangeSession,
    pub transaction: Option<CreditTransaction>,
}

impl ExchangeSession {
    pub fn participants(&self) -> Participants {
        Participants {
            requestor: self.requestor_id,
            responder: self.responder_id,
        }
    }

    pub fn confirmations(&self) -> Confirmations {
        Confirmations {
            requestor: self.requestor_confirmed,
            responder: self.responder_confirmed,
        }
    }

    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        listing_id: Uuid,
        exchange_request_id: Uuid,
        participants: Participants,
        terms: &ExchangeTerms,
    ) -> cja::Result<ExchangeSession> {
        let query = format!(
            r#"
            INSERT INTO exchange_sessions (
                listing_id, exchange_request_id, requestor_id, responder_id, exchange_type,
                credits_amount, credits_payer_id, skills_exchanged, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'scheduled')
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let session = sqlx::query_as::<_, ExchangeSession>(&query)
            .bind(listing_id)
            .bind(exchange_request_id)
            .bind(participants.requestor)
            .bind(participants.responder)
            .bind(terms.exchange_type)
            .bind(terms.credits_amount)
            .bind(terms.credits_payer)
            .bind(Json(&terms.skills_exchanged))
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert exchange session")?;

        info!(
            "Opened exchange session {} for request {}",
            session.id, exchange_request_id
        );

        Ok(session)
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<ExchangeSession>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM exchange_sessions WHERE id = $1");
        let session = sqlx::query_as::<_, ExchangeSession>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(session)
    }

    pub async fn lock<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<ExchangeSession>> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM exchange_sessions WHERE id = $1 FOR UPDATE");
        let session = sqlx::query_as::<_, ExchangeSession>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(session)
    }

    /// Sessions the user takes part in, on either side
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
        filters: &SessionFilters,
        pagination: Pagination,
    ) -> cja::Result<(Vec<ExchangeSession>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM exchange_sessions");
        filters.push_where(&mut count, user_id);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items =
            QueryBuilder::<Postgres>::new(format!("SELECT {SESSION_COLUMNS} FROM exchange_sessions"));
        filters.push_where(&mut items, user_id);
        items
            .push(" ORDER BY created_at_utc DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let sessions = items
            .build_query_as::<ExchangeSession>()
            .fetch_all(pool)
            .await
            .wrap_err_with(|| format!("Failed to list sessions for user {user_id}"))?;

        Ok((sessions, total))
    }

    pub async fn update_schedule<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: SessionStatus,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> cja::Result<ExchangeSession> {
        let query = format!(
            r#"
            UPDATE exchange_sessions SET
                status = $2,
                start_date = COALESCE($3, start_date),
                end_date = COALESCE($4, end_date),
                updated_at_utc = NOW()
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let session = sqlx::query_as::<_, ExchangeSession>(&query)
            .bind(id)
            .bind(status)
            .bind(start_date)
            .bind(end_date)
            .fetch_one(executor)
            .await
            .wrap_err_with(|| format!("Failed to update session {id}"))?;

        Ok(session)
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: SessionStatus,
    ) -> cja::Result<()> {
        sqlx::query(
            "UPDATE exchange_sessions SET status = $2, updated_at_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(executor)
        .await?;

        info!("Exchange session {} is now {}", id, status);

        Ok(())
    }

    async fn record_confirmations<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        confirmations: Confirmations,
        status: SessionStatus,
    ) -> cja::Result<ExchangeSession> {
        let query = format!(
            r#"
            UPDATE exchange_sessions SET
                requestor_confirmed = $2,
                responder_confirmed = $3,
                status = $4,
                completed_date = CASE WHEN $4 = 'completed'::exchange_session_status
                    THEN NOW() ELSE completed_date END,
                updated_at_utc = NOW()
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        );

        let session = sqlx::query_as::<_, ExchangeSession>(&query)
            .bind(id)
            .bind(confirmations.requestor)
            .bind(confirmations.responder)
            .bind(status)
            .fetch_one(executor)
            .await
            .wrap_err_with(|| format!("Failed to record confirmation on session {id}"))?;

        Ok(session)
    }

    async fn set_milestones<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        milestones: &[Milestone],
    ) -> cja::Result<ExchangeSession> {
        let query = format!(
            "UPDATE exchange_sessions SET milestones = $2, updated_at_utc = NOW() WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        );

        let session = sqlx::query_as::<_, ExchangeSession>(&query)
            .bind(id)
            .bind(Json(milestones))
            .fetch_one(executor)
            .await?;

        Ok(session)
    }
}

/// Load a session for `user_id`, refusing anyone who is not a participant
pub async fn load_for_participant(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
) -> ServerResult<ExchangeSession> {
    let session = ExchangeSession::find_by_id(pool, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    session.participants().role_of(user_id)?;

    Ok(session)
}

pub async fn update(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    update: &UpdateSession,
) -> ServerResult<ExchangeSession> {
    let mut tx = pool.begin().await?;

    let session = ExchangeSession::lock(&mut *tx, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    session.participants().role_of(user_id)?;

    if !session.status.is_open() {
        return Err(LifecycleError::SessionClosed(session.status).into());
    }
    let status = match update.status {
        Some(to) => session.status.update_to(to)?,
        None => session.status,
    };

    let start = update.start_date.or(session.start_date);
    let end = update.end_date.or(session.end_date);
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ValidationErrors::single("endDate", "cannot be before startDate").into());
        }
    }

    let session = ExchangeSession::update_schedule(
        &mut *tx,
        session_id,
        status,
        update.start_date,
        update.end_date,
    )
    .await?;
    tx.commit().await?;

    Ok(session)
}

/// Record the caller's confirmation; the second one completes the session
/// and settles its credits in the same transaction.
#[tracing::instrument(skip(pool), err(Debug))]
pub async fn confirm(pool: &PgPool, session_id: Uuid, user_id: Uuid) -> ServerResult<Confirmed> {
    let mut tx = pool.begin().await?;

    let session = ExchangeSession::lock(&mut *tx, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    let participants = session.participants();
    let role = participants.role_of(user_id)?;

    let (confirmations, status) = session.confirmations().confirm(session.status, role)?;

    let mut transaction = None;
    if status == SessionStatus::Completed {
        let settlement =
            Settlement::for_session(&participants, session.credits_amount, session.credits_payer_id)?;
        if let Some(settlement) = settlement {
            transaction = Some(credit::settle(&mut *tx, settlement, session_id).await?);
        }
    }

    let session =
        ExchangeSession::record_confirmations(&mut *tx, session_id, confirmations, status).await?;
    tx.commit().await?;

    if session.status == SessionStatus::Completed {
        info!("Exchange session {} completed", session_id);
    }

    Ok(Confirmed {
        session,
        transaction,
    })
}

pub async fn cancel(pool: &PgPool, session_id: Uuid, user_id: Uuid) -> ServerResult<()> {
    let mut tx = pool.begin().await?;

    let session = ExchangeSession::lock(&mut *tx, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    session.participants().role_of(user_id)?;

    let status = session.status.cancel()?;
    ExchangeSession::set_status(&mut *tx, session_id, status).await?;
    tx.commit().await?;

    Ok(())
}

pub async fn add_milestone(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    description: &str,
) -> ServerResult<ExchangeSession> {
    let mut tx = pool.begin().await?;

    let session = ExchangeSession::lock(&mut *tx, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    session.participants().role_of(user_id)?;
    if !session.status.is_open() {
        return Err(LifecycleError::SessionClosed(session.status).into());
    }

    let mut milestones = session.milestones.0;
    milestones.push(Milestone {
        description: description.trim().to_string(),
        completed: false,
        completed_at: None,
    });

    let session = ExchangeSession::set_milestones(&mut *tx, session_id, &milestones).await?;
    tx.commit().await?;

    Ok(session)
}

/// Mark the milestone at `index` done
pub fn complete_milestone_at(
    milestones: &mut [Milestone],
    index: usize,
    now: DateTime<Utc>,
) -> ServerResult<()> {
    let milestone = milestones
        .get_mut(index)
        .ok_or_else(|| ApiError::not_found("Milestone not found"))?;
    if milestone.completed {
        return Err(ApiError::bad_request("Milestone already completed"));
    }

    milestone.completed = true;
    milestone.completed_at = Some(now);

    Ok(())
}

pub async fn complete_milestone(
    pool: &PgPool,
    session_id: Uuid,
    user_id: Uuid,
    index: usize,
) -> ServerResult<ExchangeSession> {
    let mut tx = pool.begin().await?;

    let session = ExchangeSession::lock(&mut *tx, session_id)
        .await?
        .or_not_found(SESSION_NOT_FOUND)?;
    session.participants().role_of(user_id)?;
    if !session.status.is_open() {
        return Err(LifecycleError::SessionClosed(session.status).into());
    }

    let mut milestones = session.milestones.0;
    complete_milestone_at(&mut milestones, index, Utc::now())?;

    let session = ExchangeSession::set_milestones(&mut *tx, session_id, &milestones).await?;
    tx.commit().await?;

    Ok(session)
}
