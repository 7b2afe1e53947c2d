use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::errors::{ApiError, ServerResult};
use crate::validation::{clean_list, Validate, ValidationErrors, Validator};

pub const EVENT_NOT_FOUND: &str = "Event not found";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "creator")]
    pub creator_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "date")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "endDate")]
    pub ends_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub participants: Vec<Uuid>,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const EVENT_COLUMNS: &str = r#"
    id, creator_id, title, description, location, starts_at, ends_at, tags,
    participants, created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvent {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Validate for CreateEvent {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("title", self.title.trim(), 5, 100)
            .optional_length("description", self.description.as_deref(), 0, 2000)
            .optional_length("location", self.location.as_deref(), 0, 200)
            .check(
                self.end_date.map_or(true, |end| end >= self.date),
                "endDate",
                "cannot be before the start date",
            )
            .finish()
    }
}

impl Event {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        creator_id: Uuid,
        input: &CreateEvent,
    ) -> cja::Result<Event> {
        let query = format!(
            r#"
            INSERT INTO events (creator_id, title, description, location, starts_at, ends_at, tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let event = sqlx::query_as::<_, Event>(&query)
            .bind(creator_id)
            .bind(input.title.trim())
            .bind(&input.description)
            .bind(&input.location)
            .bind(input.date)
            .bind(input.end_date)
            .bind(clean_list(&input.tags))
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert event")?;

        info!("User {} created event {}", creator_id, event.id);

        Ok(event)
    }

    pub async fn all<'e>(executor: impl PgExecutor<'e>) -> cja::Result<Vec<Event>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY starts_at ASC");
        let events = sqlx::query_as::<_, Event>(&query)
            .fetch_all(executor)
            .await?;

        Ok(events)
    }

    pub async fn find_by_id<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> cja::Result<Option<Event>> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let event = sqlx::query_as::<_, Event>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(event)
    }
}

/// Add the user to the participant list
pub async fn join(pool: &PgPool, event_id: Uuid, user_id: Uuid) -> ServerResult<Event> {
    let query = format!(
        r#"
        UPDATE events
        SET participants = array_append(participants, $2), updated_at_utc = NOW()
        WHERE id = $1 AND NOT ($2 = ANY(participants))
        RETURNING {EVENT_COLUMNS}
        "#
    );

    let joined = sqlx::query_as::<_, Event>(&query)
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    if let Some(event) = joined {
        info!("User {} joined event {}", user_id, event_id);
        return Ok(event);
    }

    // Nothing updated: either the event is missing or the user is already in it
    match Event::find_by_id(pool, event_id).await? {
        Some(_) => Err(ApiError::bad_request("Already joined this event")),
        None => Err(ApiError::not_found(EVENT_NOT_FOUND)),
    }
}
