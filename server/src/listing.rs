use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::exchange::lifecycle::ExchangeType;
use crate::pagination::Pagination;
use crate::validation::{clean_list, Validate, ValidationErrors, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "listing_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Offer,
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "skill_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Programming,
    Design,
    Writing,
    Marketing,
    Business,
    Languages,
    Music,
    Art,
    Fitness,
    Cooking,
    Photography,
    Videography,
    Teaching,
    Consulting,
    Other,
}

/// Exchange terms a listing is open to; `Flexible` accepts any proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "listing_exchange_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ListingExchangeType {
    CreditsOnly,
    SkillOnly,
    CreditsAndSkill,
    Flexible,
}

impl ListingExchangeType {
    pub fn accepts(&self, proposed: ExchangeType) -> bool {
        match self {
            ListingExchangeType::Flexible => true,
            ListingExchangeType::CreditsOnly => proposed == ExchangeType::CreditsOnly,
            ListingExchangeType::SkillOnly => proposed == ExchangeType::SkillOnly,
            ListingExchangeType::CreditsAndSkill => proposed == ExchangeType::CreditsAndSkill,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "duration_unit", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Hours,
    Days,
    Weeks,
    Sessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "location_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Online,
    InPerson,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "listing_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Active,
    InProgress,
    Completed,
    Cancelled,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ListingDuration {
    #[sqlx(rename = "duration_value")]
    pub value: i32,
    #[sqlx(rename = "duration_unit")]
    pub unit: DurationUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ListingLocation {
    #[serde(rename = "type")]
    #[sqlx(rename = "location_type")]
    pub kind: LocationType,
    pub city: Option<String>,
    pub country: Option<String>,
}

/// A skill someone offers to teach, or asks to learn
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SkillListing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub creator_id: Uuid,
    pub creator_username: String,
    pub listing_type: ListingType,
    pub skills: Vec<String>,
    pub category: SkillCategory,
    pub exchange_type: ListingExchangeType,
    pub credit_amount: i64,
    pub skills_wanted: Vec<String>,
    #[sqlx(flatten)]
    pub duration: ListingDuration,
    pub availability_schedule: Option<String>,
    #[sqlx(flatten)]
    pub location: ListingLocation,
    pub status: ListingStatus,
    pub view_count: i32,
    pub response_count: i32,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const LISTING_COLUMNS: &str = r#"
    id, title, description, creator_id, creator_username, listing_type, skills,
    category, exchange_type, credit_amount, skills_wanted, duration_value,
    duration_unit, availability_schedule, location_type, city, country, status,
    view_count, response_count, created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListing {
    pub title: String,
    pub description: String,
    pub listing_type: ListingType,
    pub skills: Vec<String>,
    pub category: SkillCategory,
    pub exchange_type: ListingExchangeType,
    #[serde(default)]
    pub credit_amount: i64,
    #[serde(default)]
    pub skills_wanted: Vec<String>,
    pub duration: ListingDuration,
    pub availability_schedule: Option<String>,
    pub location: ListingLocation,
}

impl Validate for CreateListing {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("title", self.title.trim(), 5, 100)
            .length("description", self.description.trim(), 20, 2000)
            .check(
                !clean_list(&self.skills).is_empty(),
                "skills",
                "at least one skill is required",
            )
            .at_least("creditAmount", self.credit_amount, 0)
            .at_least("duration.value", self.duration.value, 1)
            .optional_length(
                "availabilitySchedule",
                self.availability_schedule.as_deref(),
                0,
                500,
            )
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateListing {
    pub title: Option<String>,
    pub description: Option<String>,
    pub skills: Option<Vec<String>>,
    pub category: Option<SkillCategory>,
    pub exchange_type: Option<ListingExchangeType>,
    pub credit_amount: Option<i64>,
    pub skills_wanted: Option<Vec<String>>,
    pub availability_schedule: Option<String>,
}

impl Validate for UpdateListing {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        if let Some(title) = &self.title {
            v.length("title", title.trim(), 5, 100);
        }
        if let Some(description) = &self.description {
            v.length("description", description.trim(), 20, 2000);
        }
        if let Some(skills) = &self.skills {
            v.check(
                !clean_list(skills).is_empty(),
                "skills",
                "at least one skill is required",
            );
        }
        if let Some(credit_amount) = self.credit_amount {
            v.at_least("creditAmount", credit_amount, 0);
        }
        v.optional_length(
            "availabilitySchedule",
            self.availability_schedule.as_deref(),
            0,
            500,
        );
        v.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingFilters {
    pub category: Option<SkillCategory>,
    pub status: Option<ListingStatus>,
    pub skill: Option<String>,
    pub creator: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl ListingFilters {
    fn push_where<'a>(&'a self, qb: &mut QueryBuilder<'a, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(category) = self.category {
            qb.push(" AND category = ").push_bind(category);
        }
        if let Some(status) = self.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(skill) = self.skill.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            qb.push(" AND ").push_bind(skill).push(" = ANY(skills)");
        }
        if let Some(creator) = self.creator {
            qb.push(" AND creator_id = ").push_bind(creator);
        }
    }
}

impl SkillListing {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        creator_id: Uuid,
        creator_username: &str,
        input: &CreateListing,
    ) -> cja::Result<SkillListing> {
        let query = format!(
            r#"
            INSERT INTO skill_listings (
                title, description, creator_id, creator_username, listing_type, skills,
                category, exchange_type, credit_amount, skills_wanted, duration_value,
                duration_unit, availability_schedule, location_type, city, country
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {LISTING_COLUMNS}
            "#
        );

        let listing = sqlx::query_as::<_, SkillListing>(&query)
            .bind(input.title.trim())
            .bind(input.description.trim())
            .bind(creator_id)
            .bind(creator_username)
            .bind(input.listing_type)
            .bind(clean_list(&input.skills))
            .bind(input.category)
            .bind(input.exchange_type)
            .bind(input.credit_amount)
            .bind(clean_list(&input.skills_wanted))
            .bind(input.duration.value)
            .bind(input.duration.unit)
            .bind(&input.availability_schedule)
            .bind(input.location.kind)
            .bind(&input.location.city)
            .bind(&input.location.country)
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert skill listing")?;

        info!("Created skill listing {} for {}", listing.id, creator_id);

        Ok(listing)
    }

    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<SkillListing>> {
        let query = format!("SELECT {LISTING_COLUMNS} FROM skill_listings WHERE id = $1");
        let listing = sqlx::query_as::<_, SkillListing>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(listing)
    }

    /// Load a listing and count the view in one statement
    pub async fn view<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<SkillListing>> {
        let query = format!(
            "UPDATE skill_listings SET view_count = view_count + 1 WHERE id = $1 RETURNING {LISTING_COLUMNS}"
        );
        let listing = sqlx::query_as::<_, SkillListing>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(listing)
    }

    pub async fn list(
        pool: &sqlx::PgPool,
        filters: &ListingFilters,
        pagination: Pagination,
    ) -> cja::Result<(Vec<SkillListing>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM skill_listings");
        filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items = QueryBuilder::<Postgres>::new(format!("SELECT {LISTING_COLUMNS} FROM skill_listings"));
        filters.push_where(&mut items);
        items
            .push(" ORDER BY created_at_utc DESC LIMIT ")
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let listings = items
            .build_query_as::<SkillListing>()
            .fetch_all(pool)
            .await
            .wrap_err("Failed to list skill listings")?;

        Ok((listings, total))
    }

    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        update: &UpdateListing,
    ) -> cja::Result<SkillListing> {
        let query = format!(
            r#"
            UPDATE skill_listings SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                skills = COALESCE($4, skills),
                category = COALESCE($5, category),
                exchange_type = COALESCE($6, exchange_type),
                credit_amount = COALESCE($7, credit_amount),
                skills_wanted = COALESCE($8, skills_wanted),
                availability_schedule = COALESCE($9, availability_schedule),
                updated_at_utc = NOW()
            WHERE id = $1
            RETURNING {LISTING_COLUMNS}
            "#
        );

        let listing = sqlx::query_as::<_, SkillListing>(&query)
            .bind(id)
            .bind(update.title.as_deref().map(str::trim))
            .bind(update.description.as_deref().map(str::trim))
            .bind(update.skills.as_deref().map(clean_list))
            .bind(update.category)
            .bind(update.exchange_type)
            .bind(update.credit_amount)
            .bind(update.skills_wanted.as_deref().map(clean_list))
            .bind(&update.availability_schedule)
            .fetch_one(executor)
            .await
            .wrap_err_with(|| format!("Failed to update skill listing {id}"))?;

        Ok(listing)
    }

    pub async fn set_status<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        status: ListingStatus,
    ) -> cja::Result<()> {
        sqlx::query("UPDATE skill_listings SET status = $2, updated_at_utc = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(executor)
            .await?;

        info!("Skill listing {} is now {:?}", id, status);

        Ok(())
    }

    pub async fn increment_response_count<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<()> {
        sqlx::query("UPDATE skill_listings SET response_count = response_count + 1 WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(())
    }
}

pub const LISTING_NOT_FOUND: &str = "Skill listing not found";

async fn owned_by<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
    user_id: Uuid,
    action: &str,
) -> ServerResult<SkillListing> {
    let listing = SkillListing::find_by_id(executor, id)
        .await?
        .or_not_found(LISTING_NOT_FOUND)?;
    if listing.creator_id != user_id {
        return Err(ApiError::forbidden(format!(
            "You don't have permission to {action} this listing"
        )));
    }

    Ok(listing)
}

pub async fn revise(
    pool: &sqlx::PgPool,
    id: Uuid,
    user_id: Uuid,
    update: &UpdateListing,
) -> ServerResult<SkillListing> {
    let listing = owned_by(pool, id, user_id, "update").await?;
    if listing.status != ListingStatus::Active {
        return Err(ApiError::bad_request("Can only update active listings"));
    }

    Ok(SkillListing::update(pool, id, update).await?)
}

/// Take a listing off the board; it stays readable as `closed`
pub async fn close(pool: &sqlx::PgPool, id: Uuid, user_id: Uuid) -> ServerResult<()> {
    owned_by(pool, id, user_id, "delete").await?;
    SkillListing::set_status(pool, id, ListingStatus::Closed).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing_body() -> serde_json::Value {
        json!({
            "title": "Beginner guitar lessons",
            "description": "Open chords, strumming patterns and your first songs.",
            "listingType": "offer",
            "skills": ["guitar"],
            "category": "music",
            "exchangeType": "flexible",
            "creditAmount": 10,
            "duration": {"value": 4, "unit": "sessions"},
            "location": {"type": "in_person", "city": "Lisbon", "country": "PT"}
        })
    }

    #[test]
    fn test_create_listing_deserializes_and_validates() {
        let input: CreateListing = serde_json::from_value(listing_body()).unwrap();

        assert_eq!(input.listing_type, ListingType::Offer);
        assert_eq!(input.location.kind, LocationType::InPerson);
        assert_eq!(input.duration.unit, DurationUnit::Sessions);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_create_listing_rules() {
        let mut body = listing_body();
        body["title"] = json!("Gtr");
        body["description"] = json!("too short");
        body["skills"] = json!(["  "]);
        body["creditAmount"] = json!(-1);
        body["duration"]["value"] = json!(0);

        let input: CreateListing = serde_json::from_value(body).unwrap();
        assert_eq!(
            input.validate().unwrap_err().fields(),
            vec!["title", "description", "skills", "creditAmount", "duration.value"]
        );
    }

    #[test]
    fn test_listing_exchange_type_accepts() {
        assert!(ListingExchangeType::Flexible.accepts(ExchangeType::SkillOnly));
        assert!(ListingExchangeType::CreditsOnly.accepts(ExchangeType::CreditsOnly));
        assert!(!ListingExchangeType::CreditsOnly.accepts(ExchangeType::CreditsAndSkill));
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let mut body = listing_body();
        body["category"] = json!("astrology");
        assert!(serde_json::from_value::<CreateListing>(body).is_err());
    }

    #[test]
    fn test_partial_update_only_checks_present_fields() {
        assert!(UpdateListing::default().validate().is_ok());

        let update = UpdateListing {
            title: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(update.validate().unwrap_err().fields(), vec!["title"]);
    }
}
