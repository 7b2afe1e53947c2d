use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::pagination::{SortOrder, MAX_LIMIT};
use crate::post::POST_NOT_FOUND;
use crate::validation::{Validate, ValidationErrors, Validator};

pub const COMMENT_NOT_FOUND: &str = "Comment not found";
pub const MAX_DEPTH: i32 = 10;
const DEFAULT_COMMENT_LIMIT: i64 = 50;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub content: String,
    #[serde(rename = "author")]
    pub author_id: Uuid,
    pub author_username: String,
    #[serde(rename = "post")]
    pub post_id: Uuid,
    #[serde(rename = "parentComment")]
    pub parent_comment_id: Option<Uuid>,
    pub depth: i32,
    pub vote_score: i32,
    pub reply_count: i32,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const COMMENT_COLUMNS: &str = r#"
    id, content, author_id, author_username, post_id, parent_comment_id, depth,
    vote_score, reply_count, created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComment {
    pub content: String,
    pub parent_comment: Option<Uuid>,
}

impl Validate for CreateComment {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("content", self.content.trim(), 1, 10000)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommentSort {
    #[default]
    CreatedAt,
    VoteScore,
    ReplyCount,
}

impl CommentSort {
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw {
            None | Some("createdAt") => Ok(CommentSort::CreatedAt),
            Some("voteScore") => Ok(CommentSort::VoteScore),
            Some("replyCount") => Ok(CommentSort::ReplyCount),
            Some(_) => Err(ApiError::bad_request("Invalid sort field")),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            CommentSort::CreatedAt => "created_at_utc",
            CommentSort::VoteScore => "vote_score",
            CommentSort::ReplyCount => "reply_count",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentFilters {
    pub sort: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
    pub limit: Option<i64>,
}

impl CommentFilters {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_COMMENT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Depth of a new comment under `parent`, refusing to nest past [`MAX_DEPTH`]
pub fn reply_depth(parent: Option<&Comment>) -> Result<i32, ApiError> {
    let depth = parent.map_or(0, |p| p.depth + 1);
    if depth > MAX_DEPTH {
        return Err(ApiError::bad_request("Maximum comment depth reached"));
    }
    Ok(depth)
}

impl Comment {
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> cja::Result<Option<Comment>> {
        let query = format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1");
        let comment = sqlx::query_as::<_, Comment>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(comment)
    }

    pub async fn top_level<'e>(
        executor: impl PgExecutor<'e>,
        post_id: Uuid,
        filters: &CommentFilters,
        sort: CommentSort,
    ) -> cja::Result<Vec<Comment>> {
        let query = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE post_id = $1 AND depth = 0 ORDER BY {} {}, id LIMIT $2",
            sort.column(),
            filters.order.as_sql()
        );
        let comments = sqlx::query_as::<_, Comment>(&query)
            .bind(post_id)
            .bind(filters.limit())
            .fetch_all(executor)
            .await
            .wrap_err("Failed to list comments")?;

        Ok(comments)
    }

    pub async fn replies<'e>(
        executor: impl PgExecutor<'e>,
        parent_id: Uuid,
    ) -> cja::Result<Vec<Comment>> {
        let query = format!(
            "SELECT {COMMENT_COLUMNS} FROM comments WHERE parent_comment_id = $1 ORDER BY created_at_utc ASC"
        );
        let comments = sqlx::query_as::<_, Comment>(&query)
            .bind(parent_id)
            .fetch_all(executor)
            .await?;

        Ok(comments)
    }
}

/// Post a comment, or a reply when `parentComment` is given, and bump the counters
pub async fn create(
    pool: &PgPool,
    post_id: Uuid,
    author_id: Uuid,
    author_username: &str,
    input: &CreateComment,
) -> ServerResult<Comment> {
    let mut tx = pool.begin().await?;

    let post_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1)")
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;
    if !post_exists {
        return Err(ApiError::not_found(POST_NOT_FOUND));
    }

    let parent = match input.parent_comment {
        Some(parent_id) => {
            let query =
                format!("SELECT {COMMENT_COLUMNS} FROM comments WHERE id = $1 FOR UPDATE");
            let parent = sqlx::query_as::<_, Comment>(&query)
                .bind(parent_id)
                .fetch_optional(&mut *tx)
                .await?
                .or_not_found("Parent comment not found")?;
            if parent.post_id != post_id {
                return Err(ApiError::bad_request(
                    "Parent comment does not belong to this post",
                ));
            }
            Some(parent)
        }
        None => None,
    };
    let depth = reply_depth(parent.as_ref())?;

    let query = format!(
        r#"
        INSERT INTO comments (content, author_id, author_username, post_id, parent_comment_id, depth)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {COMMENT_COLUMNS}
        "#
    );
    let comment = sqlx::query_as::<_, Comment>(&query)
        .bind(input.content.trim())
        .bind(author_id)
        .bind(author_username)
        .bind(post_id)
        .bind(input.parent_comment)
        .bind(depth)
        .fetch_one(&mut *tx)
        .await
        .wrap_err("Failed to insert comment")?;

    sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    if let Some(parent) = &parent {
        sqlx::query("UPDATE comments SET reply_count = reply_count + 1 WHERE id = $1")
            .bind(parent.id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!("User {} commented on post {}", author_id, post_id);

    Ok(comment)
}
