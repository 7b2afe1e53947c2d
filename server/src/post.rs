use chrono::{DateTime, Utc};
use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::errors::{ApiError, OrNotFound as _, ServerResult};
use crate::pagination::{like_pattern, Pagination, SortOrder};
use crate::validation::{Validate, ValidationErrors, Validator};

pub const POST_NOT_FOUND: &str = "Post not found";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
    #[serde(rename = "author")]
    pub author_id: Uuid,
    pub author_username: String,
    pub vote_score: i32,
    pub comment_count: i32,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

const POST_COLUMNS: &str = r#"
    id, title, content, media_url, author_id, author_username, vote_score,
    comment_count, created_at_utc, updated_at_utc
"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePost {
    pub title: String,
    pub content: Option<String>,
    pub media_url: Option<String>,
}

impl Validate for CreatePost {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Validator::new()
            .length("title", self.title.trim(), 3, 300)
            .optional_length("content", self.content.as_deref(), 0, 40000)
            .optional_url("mediaUrl", self.media_url.as_deref())
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePost {
    pub title: Option<String>,
    pub content: Option<String>,
    pub media_url: Option<String>,
}

impl Validate for UpdatePost {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut v = Validator::new();
        if let Some(title) = &self.title {
            v.length("title", title.trim(), 3, 300);
        }
        v.optional_length("content", self.content.as_deref(), 0, 40000)
            .optional_url("mediaUrl", self.media_url.as_deref())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostSort {
    #[default]
    CreatedAt,
    VoteScore,
    CommentCount,
    Title,
}

impl PostSort {
    pub fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw {
            None | Some("createdAt") => Ok(PostSort::CreatedAt),
            Some("voteScore") => Ok(PostSort::VoteScore),
            Some("commentCount") => Ok(PostSort::CommentCount),
            Some("title") => Ok(PostSort::Title),
            Some(_) => Err(ApiError::bad_request("Invalid sort field")),
        }
    }

    fn column(&self) -> &'static str {
        match self {
            PostSort::CreatedAt => "created_at_utc",
            PostSort::VoteScore => "vote_score",
            PostSort::CommentCount => "comment_count",
            PostSort::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostFilters {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort: Option<String>,
    #[serde(default)]
    pub order: SortOrder,
    pub author: Option<Uuid>,
    pub search: Option<String>,
}

impl PostFilters {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit, crate::pagination::DEFAULT_LIMIT)
    }

    fn push_where(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" WHERE TRUE");
        if let Some(author) = self.author {
            qb.push(" AND author_id = ").push_bind(author);
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = like_pattern(search);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR content ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }
}

impl Post {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        author_id: Uuid,
        author_username: &str,
        input: &CreatePost,
    ) -> cja::Result<Post> {
        let query = format!(
            r#"
            INSERT INTO posts (title, content, media_url, author_id, author_username)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {POST_COLUMNS}
            "#
        );

        let post = sqlx::query_as::<_, Post>(&query)
            .bind(input.title.trim())
            .bind(&input.content)
            .bind(&input.media_url)
            .bind(author_id)
            .bind(author_username)
            .fetch_one(executor)
            .await
            .wrap_err("Failed to insert post")?;

        info!("User {} created post {}", author_id, post.id);

        Ok(post)
    }

    pub async fn find_by_id<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> cja::Result<Option<Post>> {
        let query = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let post = sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(post)
    }

    pub async fn list(
        pool: &PgPool,
        filters: &PostFilters,
        sort: PostSort,
    ) -> cja::Result<(Vec<Post>, i64)> {
        let pagination = filters.pagination();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM posts");
        filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

        let mut items = QueryBuilder::<Postgres>::new(format!("SELECT {POST_COLUMNS} FROM posts"));
        filters.push_where(&mut items);
        items
            .push(format!(
                " ORDER BY {} {}, id LIMIT ",
                sort.column(),
                filters.order.as_sql()
            ))
            .push_bind(pagination.limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let posts = items
            .build_query_as::<Post>()
            .fetch_all(pool)
            .await
            .wrap_err("Failed to list posts")?;

        Ok((posts, total))
    }

    async fn apply_update<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
        update: &UpdatePost,
    ) -> cja::Result<Post> {
        let query = format!(
            r#"
            UPDATE posts SET
                title = COALESCE($2, title),
                content = COALESCE($3, content),
                media_url = COALESCE($4, media_url),
                updated_at_utc = NOW()
            WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        );

        let post = sqlx::query_as::<_, Post>(&query)
            .bind(id)
            .bind(update.title.as_deref().map(str::trim))
            .bind(&update.content)
            .bind(&update.media_url)
            .fetch_one(executor)
            .await
            .wrap_err_with(|| format!("Failed to update post {id}"))?;

        Ok(post)
    }
}

pub async fn update(pool: &PgPool, id: Uuid, user_id: Uuid, input: &UpdatePost) -> ServerResult<Post> {
    let post = Post::find_by_id(pool, id).await?.or_not_found(POST_NOT_FOUND)?;
    if post.author_id != user_id {
        return Err(ApiError::forbidden(
            "You don't have permission to update this post",
        ));
    }

    Ok(Post::apply_update(pool, id, input).await?)
}

/// Remove a post along with its comments and every vote cast on either
pub async fn delete(pool: &PgPool, id: Uuid, user_id: Uuid) -> ServerResult<()> {
    let mut tx = pool.begin().await?;

    let query = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1 FOR UPDATE");
    let post = sqlx::query_as::<_, Post>(&query)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .or_not_found(POST_NOT_FOUND)?;
    if post.author_id != user_id {
        return Err(ApiError::forbidden(
            "You don't have permission to delete this post",
        ));
    }

    sqlx::query(
        "DELETE FROM votes WHERE target_id = $1 OR target_id IN (SELECT id FROM comments WHERE post_id = $1)",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("User {} deleted post {}", user_id, id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_whitelist() {
        assert_eq!(PostSort::parse(None).unwrap(), PostSort::CreatedAt);
        assert_eq!(PostSort::parse(Some("voteScore")).unwrap(), PostSort::VoteScore);
        assert_eq!(PostSort::parse(Some("title")).unwrap().column(), "title");

        let err = PostSort::parse(Some("password_hash; DROP TABLE posts")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid sort field");
    }

    #[test]
    fn test_create_post_validation() {
        let input: CreatePost = serde_json::from_value(json!({
            "title": "  hi ",
            "mediaUrl": "not a url",
        }))
        .unwrap();

        assert_eq!(input.validate().unwrap_err().fields(), vec!["title", "mediaUrl"]);

        let input: CreatePost = serde_json::from_value(json!({
            "title": "Looking for a chess partner",
            "content": "Weekends work best",
            "mediaUrl": "https://example.com/board.png",
        }))
        .unwrap();
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_content_limit() {
        let input = CreatePost {
            title: "Long post".to_string(),
            content: Some("x".repeat(40001)),
            media_url: None,
        };
        assert_eq!(input.validate().unwrap_err().fields(), vec!["content"]);
    }

    #[test]
    fn test_empty_update_is_valid() {
        assert!(UpdatePost::default().validate().is_ok());
    }

    #[test]
    fn test_filters_from_query() {
        let filters: PostFilters =
            serde_json::from_value(json!({"sort": "commentCount", "order": "asc", "page": 2}))
                .unwrap();
        assert_eq!(filters.order, SortOrder::Asc);
        assert_eq!(filters.pagination().offset(), 20);
    }
}
