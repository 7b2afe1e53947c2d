use axum::{
    routing::{get, post, put},
    Json,
};
use serde_json::{json, Value};

use crate::state::AppState;

pub mod events;
pub mod exchanges;
pub mod listings;
pub mod posts;
pub mod reports;
pub mod users;

/// Build the application router with all routes
pub fn routes(app_state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/", get(health))
        // Users
        .route("/user/create", post(users::create))
        .route("/user/login", post(users::login))
        .route("/user/me", get(users::me).put(users::update_me))
        .route("/user/:username", get(users::profile))
        // Events
        .route("/event/create", post(events::create))
        .route("/event/all", get(events::all))
        .route("/event/:id", get(events::show))
        .route("/event/:id/join", post(events::join))
        // Posts, comments and votes
        .route("/post", get(posts::list).post(posts::create))
        .route(
            "/post/:id",
            get(posts::show).put(posts::update).delete(posts::delete),
        )
        .route("/post/:id/vote", get(posts::vote_status).post(posts::vote))
        .route(
            "/post/:id/comments",
            get(posts::comments).post(posts::create_comment),
        )
        .route("/post/comments/:id/replies", get(posts::replies))
        .route("/post/comments/:id/vote", post(posts::vote_comment))
        // Skill listings
        .route("/listing", get(listings::list).post(listings::create))
        .route(
            "/listing/:id",
            get(listings::show)
                .put(listings::update)
                .delete(listings::close),
        )
        // Exchange requests and responses
        .route(
            "/exchange/requests",
            get(exchanges::requests::list).post(exchanges::requests::create),
        )
        .route(
            "/exchange/requests/:id",
            get(exchanges::requests::show)
                .put(exchanges::requests::update)
                .delete(exchanges::requests::cancel),
        )
        .route(
            "/exchange/requests/:id/responses",
            get(exchanges::requests::responses).post(exchanges::requests::respond),
        )
        .route(
            "/exchange/responses/:id/accept",
            post(exchanges::requests::accept),
        )
        .route(
            "/exchange/responses/:id/reject",
            post(exchanges::requests::reject),
        )
        // Exchange sessions
        .route("/exchange/sessions", get(exchanges::sessions::list))
        .route(
            "/exchange/sessions/:id",
            get(exchanges::sessions::show)
                .put(exchanges::sessions::update)
                .delete(exchanges::sessions::cancel),
        )
        .route(
            "/exchange/sessions/:id/confirm",
            post(exchanges::sessions::confirm),
        )
        .route(
            "/exchange/sessions/:id/milestones",
            post(exchanges::sessions::add_milestone),
        )
        .route(
            "/exchange/sessions/:id/milestones/:index/complete",
            post(exchanges::sessions::complete_milestone),
        )
        .route(
            "/exchange/sessions/:id/reviews",
            post(exchanges::reviews::create),
        )
        .route(
            "/exchange/sessions/:id/disputes",
            post(exchanges::disputes::create),
        )
        // Reviews
        .route("/exchange/reviews", get(exchanges::reviews::list))
        .route("/exchange/reviews/:id", get(exchanges::reviews::show))
        // Disputes
        .route("/exchange/disputes", get(exchanges::disputes::list))
        .route("/exchange/disputes/:id", get(exchanges::disputes::show))
        .route(
            "/exchange/disputes/:id/respond",
            post(exchanges::disputes::respond),
        )
        .route(
            "/exchange/disputes/:id/escalate",
            post(exchanges::disputes::escalate),
        )
        .route(
            "/exchange/disputes/:id/resolve",
            post(exchanges::disputes::resolve),
        )
        // Credit ledger
        .route("/exchange/transactions", get(exchanges::transactions::list))
        // Moderation
        .route("/report", get(reports::list).post(reports::create))
        .route("/report/:id", put(reports::update))
        // Add trace layer for debugging
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "message": "SkillSwap API is running",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
