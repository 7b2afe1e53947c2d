use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::{eyre, WrapErr as _};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use super::lifecycle::Settlement;
use crate::errors::{ApiError, ServerResult};
use crate::pagination::Pagination;
use crate::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_transaction_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Exchange,
    Bonus,
    Refund,
    Penalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "credit_transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

/// Ledger entry for credits moving between two users
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: Uuid,
    #[serde(rename = "fromUser")]
    pub from_user_id: Uuid,
    #[serde(rename = "toUser")]
    pub to_user_id: Uuid,
    pub amount: i64,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[serde(rename = "relatedExchange")]
    pub related_exchange_id: Option<Uuid>,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const TRANSACTION_COLUMNS: &str = r#"
    id, from_user_id, to_user_id, amount, transaction_type, related_exchange_id,
    status, description, created_at_utc, updated_at_utc
"#;

pub const INSUFFICIENT_CREDITS: &str = "Insufficient credits to settle this exchange";

/// Move the session's credits from payer to payee and write the ledger entry.
///
/// Must run inside the transaction that completes the session. Both user rows
/// are locked in id order so concurrent settlements cannot deadlock.
#[tracing::instrument(skip(conn), err(Debug))]
pub async fn settle(
    conn: &mut PgConnection,
    settlement: Settlement,
    session_id: Uuid,
) -> ServerResult<CreditTransaction> {
    let (first, second) = if settlement.payer < settlement.payee {
        (settlement.payer, settlement.payee)
    } else {
        (settlement.payee, settlement.payer)
    };

    let mut payer_balance = None;
    for user_id in [first, second] {
        let balance = User::lock_credits(&mut *conn, user_id)
            .await?
            .ok_or_else(|| eyre!("User {user_id} vanished while settling session {session_id}"))?;
        if user_id == settlement.payer {
            payer_balance = Some(balance);
        }
    }

    let payer_balance = payer_balance.unwrap_or_default();
    if !settlement.can_cover(payer_balance) {
        warn!(
            "User {} has {} credits but owes {} for session {}",
            settlement.payer, payer_balance, settlement.amount, session_id
        );
        return Err(ApiError::Conflict(INSUFFICIENT_CREDITS.to_string()));
    }

    User::adjust_credits(&mut *conn, settlement.payer, -settlement.amount).await?;
    User::adjust_credits(&mut *conn, settlement.payee, settlement.amount).await?;

    let query = format!(
        r#"
        INSERT INTO credit_transactions (
            from_user_id, to_user_id, amount, transaction_type, related_exchange_id,
            status, description
        )
        VALUES ($1, $2, $3, 'exchange', $4, 'completed', $5)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    );

    let transaction = sqlx::query_as::<_, CreditTransaction>(&query)
        .bind(settlement.payer)
        .bind(settlement.payee)
        .bind(settlement.amount)
        .bind(session_id)
        .bind(format!("Payment for exchange session {session_id}"))
        .fetch_one(&mut *conn)
        .await
        .wrap_err_with(|| format!("Failed to record settlement for session {session_id}"))?;

    info!(
        "Settled {} credits from {} to {} for session {}",
        settlement.amount, settlement.payer, settlement.payee, session_id
    );

    Ok(transaction)
}

impl CreditTransaction {
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: Uuid,
        pagination: Pagination,
    ) -> cja::Result<(Vec<CreditTransaction>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credit_transactions WHERE from_user_id = $1 OR to_user_id = $1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        let query = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM credit_transactions
            WHERE from_user_id = $1 OR to_user_id = $1
            ORDER BY created_at_utc DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let transactions = sqlx::query_as::<_, CreditTransaction>(&query)
            .bind(user_id)
            .bind(pagination.limit)
            .bind(pagination.offset())
            .fetch_all(pool)
            .await
            .wrap_err_with(|| format!("Failed to list transactions for user {user_id}"))?;

        Ok((transactions, total))
    }
}
