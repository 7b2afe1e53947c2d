mod recalculate_trust_score_job;

// Re-export job types for easier access
pub use recalculate_trust_score_job::RecalculateTrustScoreJob;
