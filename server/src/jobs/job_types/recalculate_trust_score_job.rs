use cja::jobs::Job;
use color_eyre::eyre::Context as _;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{exchange::Review, state::AppState, user::User};

/// Job to refresh a user's trust score from the public reviews they received
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecalculateTrustScoreJob {
    pub user_id: uuid::Uuid,
}

impl RecalculateTrustScoreJob {
    pub fn new(user_id: uuid::Uuid) -> Self {
        Self { user_id }
    }
}

#[async_trait::async_trait]
impl Job<AppState> for RecalculateTrustScoreJob {
    const NAME: &'static str = "RecalculateTrustScoreJob";

    async fn run(&self, app_state: AppState) -> cja::Result<()> {
        let score = Review::average_rating(&app_state.db, self.user_id)
            .await
            .wrap_err_with(|| format!("Failed to average reviews for user {}", self.user_id))?;

        User::set_trust_score(&app_state.db, self.user_id, score).await?;

        info!(user_id = %self.user_id, score, "Recalculated trust score");

        Ok(())
    }
}
