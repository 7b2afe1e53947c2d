use cja::color_eyre::eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::validation::{Validate, ValidationErrors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vote_type", rename_all = "snake_case")]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Upvote,
    Downvote,
}

impl VoteType {
    fn weight(&self) -> i32 {
        match self {
            VoteType::Upvote => 1,
            VoteType::Downvote => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vote_target", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VoteTarget {
    Post,
    Comment,
}

impl VoteTarget {
    fn table(&self) -> &'static str {
        match self {
            VoteTarget::Post => "posts",
            VoteTarget::Comment => "comments",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVote {
    pub vote_type: VoteType,
}

impl Validate for CastVote {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// What casting a vote does to the voter's existing vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    Create(VoteType),
    Remove,
    Flip(VoteType),
}

impl VoteChange {
    /// Voting the same way twice takes the vote back; voting the other way flips it
    pub fn between(existing: Option<VoteType>, cast: VoteType) -> VoteChange {
        match existing {
            None => VoteChange::Create(cast),
            Some(current) if current == cast => VoteChange::Remove,
            Some(_) => VoteChange::Flip(cast),
        }
    }

    /// How much the target's score moves, given the vote that was there before
    pub fn delta(&self, existing: Option<VoteType>) -> i32 {
        match (self, existing) {
            (VoteChange::Create(cast), _) => cast.weight(),
            (VoteChange::Remove, Some(current)) => -current.weight(),
            (VoteChange::Remove, None) => 0,
            (VoteChange::Flip(cast), _) => 2 * cast.weight(),
        }
    }
}

pub async fn current_vote<'e>(
    executor: impl PgExecutor<'e>,
    user_id: Uuid,
    target_id: Uuid,
) -> cja::Result<Option<VoteType>> {
    let vote: Option<VoteType> =
        sqlx::query_scalar("SELECT vote_type FROM votes WHERE user_id = $1 AND target_id = $2")
            .bind(user_id)
            .bind(target_id)
            .fetch_optional(executor)
            .await?;

    Ok(vote)
}

/// Apply a vote and return the target's new score, or `None` if the target does not exist
#[tracing::instrument(skip(pool), err)]
pub async fn cast(
    pool: &PgPool,
    user_id: Uuid,
    target: VoteTarget,
    target_id: Uuid,
    vote_type: VoteType,
) -> cja::Result<Option<i32>> {
    let table = target.table();
    let mut tx = pool.begin().await?;

    // Votes on one target are serialized through its row lock
    let exists: Option<i32> =
        sqlx::query_scalar(&format!("SELECT vote_score FROM {table} WHERE id = $1 FOR UPDATE"))
            .bind(target_id)
            .fetch_optional(&mut *tx)
            .await?;
    if exists.is_none() {
        return Ok(None);
    }

    let existing = current_vote(&mut *tx, user_id, target_id).await?;
    let change = VoteChange::between(existing, vote_type);

    match change {
        VoteChange::Create(vote_type) => {
            sqlx::query(
                "INSERT INTO votes (user_id, target_type, target_id, vote_type) VALUES ($1, $2, $3, $4)",
            )
            .bind(user_id)
            .bind(target)
            .bind(target_id)
            .bind(vote_type)
            .execute(&mut *tx)
            .await?;
        }
        VoteChange::Remove => {
            sqlx::query("DELETE FROM votes WHERE user_id = $1 AND target_id = $2")
                .bind(user_id)
                .bind(target_id)
                .execute(&mut *tx)
                .await?;
        }
        VoteChange::Flip(vote_type) => {
            sqlx::query(
                "UPDATE votes SET vote_type = $3, updated_at_utc = NOW() WHERE user_id = $1 AND target_id = $2",
            )
            .bind(user_id)
            .bind(target_id)
            .bind(vote_type)
            .execute(&mut *tx)
            .await?;
        }
    }

    let score: i32 = sqlx::query_scalar(&format!(
        "UPDATE {table} SET vote_score = vote_score + $2 WHERE id = $1 RETURNING vote_score"
    ))
    .bind(target_id)
    .bind(change.delta(existing))
    .fetch_one(&mut *tx)
    .await
    .wrap_err_with(|| format!("Failed to update vote score on {table} {target_id}"))?;

    tx.commit().await?;

    debug!(?change, score, "Vote recorded");

    Ok(Some(score))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_vote() {
        let up = VoteChange::between(None, VoteType::Upvote);
        assert_eq!(up, VoteChange::Create(VoteType::Upvote));
        assert_eq!(up.delta(None), 1);

        let down = VoteChange::between(None, VoteType::Downvote);
        assert_eq!(down.delta(None), -1);
    }

    #[test]
    fn test_same_vote_twice_undoes_it() {
        let existing = Some(VoteType::Upvote);
        let change = VoteChange::between(existing, VoteType::Upvote);
        assert_eq!(change, VoteChange::Remove);
        assert_eq!(change.delta(existing), -1);

        let existing = Some(VoteType::Downvote);
        let change = VoteChange::between(existing, VoteType::Downvote);
        assert_eq!(change.delta(existing), 1);
    }

    #[test]
    fn test_opposite_vote_flips() {
        let existing = Some(VoteType::Downvote);
        let change = VoteChange::between(existing, VoteType::Upvote);
        assert_eq!(change, VoteChange::Flip(VoteType::Upvote));
        assert_eq!(change.delta(existing), 2);

        let existing = Some(VoteType::Upvote);
        assert_eq!(VoteChange::between(existing, VoteType::Downvote).delta(existing), -2);
    }

    #[test]
    fn test_vote_sequence_matches_score() {
        // up, up (undo), down, up (flip) leaves a single upvote
        let mut existing = None;
        let mut score = 0;
        for cast in [VoteType::Upvote, VoteType::Upvote, VoteType::Downvote, VoteType::Upvote] {
            let change = VoteChange::between(existing, cast);
            score += change.delta(existing);
            existing = match change {
                VoteChange::Create(v) | VoteChange::Flip(v) => Some(v),
                VoteChange::Remove => None,
            };
        }
        assert_eq!(score, 1);
        assert_eq!(existing, Some(VoteType::Upvote));
    }

    #[test]
    fn test_vote_body() {
        let vote: CastVote = serde_json::from_value(serde_json::json!({"voteType": "downvote"})).unwrap();
        assert_eq!(vote.vote_type, VoteType::Downvote);
        assert!(serde_json::from_value::<CastVote>(serde_json::json!({"voteType": "meh"})).is_err());
    }
}
