use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::{
    auth::{AdminUser, AuthUser},
    errors::{ApiError, OrNotFound as _, ServerResult},
    extract::{parse_id, ApiQuery, ValidJson},
    report::{CreateReport, Report, ReportFilters, UpdateReport},
    state::AppState,
};

pub async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidJson(input): ValidJson<CreateReport>,
) -> ServerResult<impl IntoResponse> {
    if !Report::target_exists(&state.db, input.target_type, input.target_id).await? {
        return Err(ApiError::not_found("Reported content not found"));
    }

    let report = Report::create(&state.db, auth.user_id, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Report submitted successfully",
            "report": report,
        })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(filters): ApiQuery<ReportFilters>,
) -> ServerResult<Json<Value>> {
    let (reports, total) = Report::list(&state.db, &filters).await?;

    Ok(Json(
        filters
            .pagination()
            .envelope("reports", "totalReports", &reports, total)?,
    ))
}

pub async fn update(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
    ValidJson(input): ValidJson<UpdateReport>,
) -> ServerResult<Json<Value>> {
    let id = parse_id(&id, "report")?;
    let report = Report::set_status(&state.db, id, input.status)
        .await?
        .or_not_found("Report not found")?;

    tracing::info!("Admin {} marked report {} as {:?}", admin.user.id, id, report.status);

    Ok(Json(json!({
        "message": "Report updated successfully",
        "report": report,
    })))
}
