use cja::jobs::Job;

use crate::jobs::job_types::RecalculateTrustScoreJob;
use crate::state::AppState;

/// Names of every job the worker knows how to run
pub fn get_available_jobs() -> Vec<&'static str> {
    vec![RecalculateTrustScoreJob::NAME]
}

// This implements the Jobs struct required by the cja job worker
cja::impl_job_registry!(AppState, RecalculateTrustScoreJob);
