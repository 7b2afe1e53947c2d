use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::pagination::{Pagination, DEFAULT_LIMIT};
use crate::validation::{Validate, ValidationErrors, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_target", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportTarget {
    Post,
    Comment,
    User,
}

impl ReportTarget {
    fn table(&self) -> &'static str {
        match self {
            ReportTarget::Post => "posts",
            ReportTarget::Comment => "comments",
            ReportTarget::User => "users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Harassment,
    HateSpeech,
    Misinformation,
    Violence,
    SexualContent,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "report_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    #[serde(rename = "reporter")]
    pub reporter_id: Uuid,
    pub target_type: ReportTarget,
    pub target_id: Uuid,
    pub reason: ReportReason,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const REPORT_COLUMNS: &str = r#"
    id, reporter_id, target_type, target_id, reason, description, status,
    created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReport {
    pub target_type: ReportTarget,
    pub target_id: Uuid,
    pub reason: ReportReason,
    pub description: Option<String>,
}

impl Validate for CreateReport {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .optional_length("description", self.description.as_deref(), 0, 500)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReport {
    pub status: ReportStatus,
}

impl Validate for UpdateReport {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .check(
                self.status != ReportStatus::Pending,
                "status",
                "must be reviewed, resolved or dismissed",
            )
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportFilters {
    pub status: Option<ReportStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ReportFilters {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit, DEFAULT_LIMIT)
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        if let Some(status) = self.status {
            qb.push(" WHERE status = ").push_bind(status);
        }
    }
}

impl Report {
    /// Whether the reported post, comment or user exists
    pub async fn target_exists<'e>(
        executor: impl PgExecutor<'e>,
        target_type: ReportTarget,
        target_id: Uuid,
    ) -> cja::Result<bool> {
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            target_type.table()
        );
        let exists: bool = sqlx::query_scalar(&query)
            .bind(target_id)
            .fetch_one(executor)
            .await?;

        Ok(exists)
    }

    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        reporter_id: Uuid,
        input: &CreateReport,
    ) -> cja::Result<Report> {
        let query = format!(
            r#"
            INSERT INTO reports (reporter_id, target_type, target_id, reason, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {REPORT_COLUMNS}
            "#
        );

        let report = sqlx::query_as::<_, Report>(&query)
            .bind(reporter_id)
            .bind(input.target_type)
            .bind(input.target_id)
            .bind(input.reason)
            .bind(input.description.as_deref().map(str::trim))
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert report")?;

        info!(
            "User {} reported {:?} {}",
            reporter_id, report.target_type, report.target_id
        );

        Ok(report)
    }

    pub async fn list(pool: &PgPool, filters: &ReportFilters) -> cja::Result<(Vec<Report>, i64)> {
        let pagination = filters.pagination();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reports");
        filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items = QueryBuilder::<Postgres>::new(format!("SELECT {REPORT_COLUMNS} FROM reports"));
        filters.push_where(&mut items);
        items
            .push(" ORDER BY created_at_utc DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let reports = items
            .build_query_as::<Report>()
            .fetch_all(pool)
            .await
            .wrap_err("Failed to list reports")?;

        Ok((reports, total))
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: ReportStatus,
    ) -> cja::Result<Option<Report>> {
        let query = format!(
            "UPDATE reports SET status = $2, updated_at_utc = NOW() WHERE id = $1 RETURNING {REPORT_COLUMNS}"
        );
        let report = sqlx::query_as::<_, Report>(&query)
            .bind(id)
            .bind(status)
            .fetch_optional(executor)
            .await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_report_body() {
        let input: CreateReport = serde_json::from_value(json!({
            "targetType": "comment",
            "targetId": Uuid::new_v4(),
            "reason": "hate_speech",
        }))
        .unwrap();

        assert_eq!(input.target_type, ReportTarget::Comment);
        assert_eq!(input.reason, ReportReason::HateSpeech);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_description_limit() {
        let input = CreateReport {
            target_type: ReportTarget::User,
            target_id: Uuid::new_v4(),
            reason: ReportReason::Spam,
            description: Some("x".repeat(501)),
        };
        assert_eq!(input.validate().unwrap_err().fields(), vec!["description"]);
    }

    #[test]
    fn test_reports_cannot_be_reset_to_pending() {
        let update = UpdateReport {
            status: ReportStatus::Pending,
        };
        assert!(update.validate().is_err());
        assert!(UpdateReport {
            status: ReportStatus::Dismissed
        }
        .validate()
        .is_ok());
    }
}
