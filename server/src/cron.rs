use chrono::Utc;
use cja::{
    cron::{CronRegistry, Worker},
    jobs::Job as _,
};
use tracing::{error, info};

use crate::{exchange::Review, jobs::RecalculateTrustScoreJob, state::AppState};

const TRUST_SCORE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

fn cron_registry() -> CronRegistry<AppState> {
    let mut registry = CronRegistry::new();

    registry.register(
        "refresh_trust_scores",
        TRUST_SCORE_INTERVAL,
        |state: AppState, _job_name: String| {
            Box::pin(async move {
                if let Err(err) = refresh_trust_scores(state).await {
                    tracing::error!("Failed to run refresh_trust_scores: {:?}", err);
                }
                Ok::<_, std::convert::Infallible>(())
            })
        },
    );

    registry
}

pub async fn run_cron(app_state: AppState) -> cja::Result<()> {
    Ok(Worker::new(app_state, cron_registry()).run().await?)
}

/// Enqueue a trust score refresh for everyone reviewed since the last run
async fn refresh_trust_scores(state: AppState) -> cja::Result<()> {
    let since = Utc::now() - chrono::Duration::from_std(TRUST_SCORE_INTERVAL)?;
    let user_ids = Review::recent_reviewees(&state.db, since).await?;

    info!("Found {} recently reviewed users", user_ids.len());

    for user_id in &user_ids {
        if let Err(err) = RecalculateTrustScoreJob::new(*user_id)
            .enqueue(state.clone(), "refresh_trust_scores_cron".to_string())
            .await
        {
            error!(
                "Failed to enqueue trust score job for user {}: {:?}",
                user_id, err
            );
        }
    }

    info!("Enqueued {} trust score jobs", user_ids.len());
    Ok(())
}
