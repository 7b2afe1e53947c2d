use cja::{
    server::run_server,
    setup::{setup_sentry, setup_tracing},
};
use tracing::info;

use skillswap::{cron, jobs, routes, state::AppState};

fn main() -> color_eyre::Result<()> {
    let _sentry_guard = setup_sentry();

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()?
        .block_on(async { run_application().await })
}

async fn run_application() -> cja::Result<()> {
    setup_tracing("skillswap")?;

    let app_state = AppState::from_env().await?;

    info!("Starting SkillSwap");
    let futures = spawn_application_tasks(app_state).await?;

    futures::future::try_join_all(futures).await?;

    Ok(())
}

/// Server, job worker and cron loop, each skippable with `<NAME>_DISABLED=true`
async fn spawn_application_tasks(
    app_state: AppState,
) -> cja::Result<Vec<tokio::task::JoinHandle<cja::Result<()>>>> {
    let mut futures = vec![];

    if is_feature_enabled("SERVER") {
        info!("Server Enabled");
        futures.push(tokio::spawn(run_server(routes::routes(app_state.clone()))));
    } else {
        info!("Server Disabled");
    }

    if is_feature_enabled("JOBS") {
        info!(jobs = ?jobs::get_available_jobs(), "Jobs Enabled");
        futures.push(tokio::spawn(cja::jobs::worker::job_worker(
            app_state.clone(),
            jobs::Jobs,
        )));
    } else {
        info!("Jobs Disabled");
    }

    if is_feature_enabled("CRON") {
        info!("Cron Enabled");
        futures.push(tokio::spawn(cron::run_cron(app_state.clone())));
    } else {
        info!("Cron Disabled");
    }

    info!(tasks = futures.len(), "Application tasks spawned");
    Ok(futures)
}

fn is_feature_enabled(feature: &str) -> bool {
    std::env::var(format!("{feature}_DISABLED")).map_or(true, |value| value != "true"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_exactly_true_disables_a_task() {
        let cases = [
            ("SKILLSWAP_UNSET", None, true),
            ("SKILLSWAP_FALSE", Some("false"), true),
            ("SKILLSWAP_YES", Some("yes"), true),
            ("SKILLSWAP_TRUE", Some("true"), false),
        ];

        for (feature, value, enabled) in cases {
            let var = format!("{feature}_DISABLED");
            match value {
                Some(value) => std::env::set_var(&var, value),
                None => std::env::remove_var(&var),
            }

            assert_eq!(is_feature_enabled(feature), enabled, "{var}={value:?}");
            std::env::remove_var(&var);
        }
    }
}
