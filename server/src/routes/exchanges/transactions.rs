use axum::{extract::State, Json};
use serde_json::Value;

use crate::{
    auth::AuthUser,
    errors::ServerResult,
    exchange::CreditTransaction,
    extract::ApiQuery,
    pagination::PageParams,
    state::AppState,
};

pub async fn list(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> ServerResult<Json<Value>> {
    let pagination = params.pagination();
    let (transactions, total) =
        CreditTransaction::list_for_user(&state.db, auth.user_id, pagination).await?;

    Ok(Json(pagination.envelope(
        "transactions",
        "totalTransactions",
        &transactions,
        total,
    )?))
}
