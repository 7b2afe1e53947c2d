//! Workflows that only hold together inside Postgres: locks, counters and
//! rollbacks. Each test gets a fresh database from `sqlx::test`, so these
//! need `DATABASE_URL` and run with `cargo test -- --ignored`.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use chrono::Duration;
use serde_json::{json, Value};
use skillswap::{
    auth::JwtConfig,
    comment::{self, CreateComment},
    errors::is_unique_violation,
    event::{CreateEvent, Event},
    exchange::{
        dispute::{self, CreateDispute},
        lifecycle::SessionStatus,
        request::{self, CreateExchangeRequest},
        response::{self, CreateExchangeResponse},
        session, ExchangeRequest, ExchangeSession,
    },
    listing::{CreateListing, SkillListing},
    post::{self, CreatePost, Post},
    routes::routes,
    state::AppState,
    user::{CreateUser, User},
    vote::{self, VoteTarget, VoteType},
};
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

async fn user(pool: &PgPool, username: &str, credits: i64) -> User {
    let input: CreateUser = serde_json::from_value(json!({
        "username": username,
        "password": "secret123",
        "email": format!("{username}@example.com"),
    }))
    .unwrap();
    let user = User::create(pool, &input, "not-a-real-hash").await.unwrap();
    if credits != 0 {
        User::adjust_credits(pool, user.id, credits).await.unwrap();
    }
    user
}

async fn credits(pool: &PgPool, user_id: Uuid) -> i64 {
    User::find_by_id(pool, user_id).await.unwrap().unwrap().credits
}

async fn listing(pool: &PgPool, creator: &User) -> SkillListing {
    let input: CreateListing = serde_json::from_value(json!({
        "title": "Beginner guitar lessons",
        "description": "Chords, strumming and your first three songs",
        "listingType": "offer",
        "skills": ["guitar"],
        "category": "music",
        "exchangeType": "flexible",
        "creditAmount": 30,
        "duration": { "value": 2, "unit": "hours" },
        "location": { "type": "online" },
    }))
    .unwrap();

    SkillListing::create(pool, creator.id, &creator.username, &input)
        .await
        .unwrap()
}

async fn ask(pool: &PgPool, listing: &SkillListing, requester: &User, credits: i64) -> ExchangeRequest {
    let input: CreateExchangeRequest = serde_json::from_value(json!({
        "listing": listing.id,
        "message": "I would love to learn a few songs",
        "proposedExchangeType": "credits_only",
        "proposedCredits": credits,
    }))
    .unwrap();

    request::submit(pool, requester.id, &requester.username, &input)
        .await
        .unwrap()
}

async fn agree(pool: &PgPool, request: &ExchangeRequest, creator: &User) -> Uuid {
    let input: CreateExchangeResponse = serde_json::from_value(json!({
        "status": "accepted",
        "message": "Happy to teach you, see you soon",
    }))
    .unwrap();

    response::respond(pool, request.id, creator.id, &creator.username, &input)
        .await
        .unwrap()
        .id
}

/// Creator offers lessons, requester proposes `offered` credits and both agree
async fn open_session(pool: &PgPool, requester_credits: i64, offered: i64) -> (User, User, ExchangeSession) {
    let creator = user(pool, "creator", 0).await;
    let requester = user(pool, "requester", requester_credits).await;
    let listing = listing(pool, &creator).await;
    let request = ask(pool, &listing, &requester, offered).await;
    let response_id = agree(pool, &request, &creator).await;
    let session = response::accept(pool, response_id, requester.id).await.unwrap();

    (creator, requester, session)
}

async fn ledger_rows(pool: &PgPool, session_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM credit_transactions WHERE related_exchange_id = $1")
        .bind(session_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn vote_on(pool: &PgPool, post: &Post, voter: &User, vote_type: VoteType) -> Option<i32> {
    vote::cast(pool, voter.id, VoteTarget::Post, post.id, vote_type)
        .await
        .unwrap()
}

fn app(pool: PgPool) -> axum::Router {
    routes(AppState {
        db: pool,
        cookie_key: cja::server::cookies::CookieKey::from_env_or_generate().unwrap(),
        jwt: JwtConfig::new("storage-test-secret", Duration::hours(1)),
    })
}

async fn get_json(pool: &PgPool, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = app(pool.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();

    (status, serde_json::from_slice(&bytes).unwrap())
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_second_confirmation_settles_credits(pool: PgPool) {
    let (creator, requester, session) = open_session(&pool, 50, 30).await;
    assert_eq!(session.credits_payer_id, Some(requester.id));

    let first = session::confirm(&pool, session.id, requester.id).await.unwrap();
    assert!(first.transaction.is_none());
    assert_eq!(first.session.status, SessionStatus::Scheduled);

    let second = session::confirm(&pool, session.id, creator.id).await.unwrap();
    assert_eq!(second.session.status, SessionStatus::Completed);
    let transaction = second.transaction.unwrap();
    assert_eq!(transaction.from_user_id, requester.id);
    assert_eq!(transaction.to_user_id, creator.id);
    assert_eq!(transaction.amount, 30);

    assert_eq!(credits(&pool, requester.id).await, 20);
    assert_eq!(credits(&pool, creator.id).await, 30);
    assert_eq!(ledger_rows(&pool, session.id).await, 1);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_short_balance_rolls_back_the_confirmation(pool: PgPool) {
    let (creator, requester, session) = open_session(&pool, 10, 30).await;

    session::confirm(&pool, session.id, requester.id).await.unwrap();
    let err = session::confirm(&pool, session.id, creator.id).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert_eq!(err.to_string(), "Insufficient credits to settle this exchange");

    let stored = ExchangeSession::find_by_id(&pool, session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Scheduled);
    assert!(stored.requestor_confirmed);
    assert!(!stored.responder_confirmed);

    assert_eq!(credits(&pool, requester.id).await, 10);
    assert_eq!(credits(&pool, creator.id).await, 0);
    assert_eq!(ledger_rows(&pool, session.id).await, 0);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_request_opens_one_session(pool: PgPool) {
    let creator = user(&pool, "creator", 0).await;
    let requester = user(&pool, "requester", 100).await;
    let listing = listing(&pool, &creator).await;
    let request = ask(&pool, &listing, &requester, 30).await;
    let response_id = agree(&pool, &request, &creator).await;

    response::accept(&pool, response_id, requester.id).await.unwrap();
    let err = response::accept(&pool, response_id, requester.id).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let sessions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM exchange_sessions WHERE exchange_request_id = $1")
            .bind(request.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(sessions, 1);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_one_active_dispute_per_session(pool: PgPool) {
    let (creator, requester, session) = open_session(&pool, 50, 30).await;
    let input: CreateDispute = serde_json::from_value(json!({
        "reason": "no_show",
        "description": "The lesson was booked but nobody turned up",
    }))
    .unwrap();

    let dispute = dispute::open(&pool, session.id, requester.id, &input).await.unwrap();
    assert_eq!(dispute.respondent_id, creator.id);

    let err = dispute::open(&pool, session.id, creator.id, &input).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(err.to_string(), "An active dispute already exists for this session");

    let stored = ExchangeSession::find_by_id(&pool, session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Disputed);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_votes_create_undo_and_flip(pool: PgPool) {
    let author = user(&pool, "author", 0).await;
    let alice = user(&pool, "alice", 0).await;
    let bob = user(&pool, "bob", 0).await;
    let input: CreatePost = serde_json::from_value(json!({ "title": "Favourite chord shapes" })).unwrap();
    let post = Post::create(&pool, author.id, &author.username, &input).await.unwrap();

    assert_eq!(vote_on(&pool, &post, &alice, VoteType::Upvote).await, Some(1));
    assert_eq!(vote_on(&pool, &post, &alice, VoteType::Upvote).await, Some(0));
    assert_eq!(vote::current_vote(&pool, alice.id, post.id).await.unwrap(), None);
    assert_eq!(vote_on(&pool, &post, &alice, VoteType::Upvote).await, Some(1));
    assert_eq!(vote_on(&pool, &post, &alice, VoteType::Downvote).await, Some(-1));
    assert_eq!(vote_on(&pool, &post, &bob, VoteType::Downvote).await, Some(-2));

    let stored = Post::find_by_id(&pool, post.id).await.unwrap().unwrap();
    assert_eq!(stored.vote_score, -2);
    assert_eq!(
        vote::current_vote(&pool, alice.id, post.id).await.unwrap(),
        Some(VoteType::Downvote)
    );

    let missing = vote::cast(&pool, bob.id, VoteTarget::Comment, Uuid::new_v4(), VoteType::Upvote)
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_post_delete_removes_comments_and_votes(pool: PgPool) {
    let author = user(&pool, "author", 0).await;
    let reader = user(&pool, "reader", 0).await;
    let input: CreatePost = serde_json::from_value(json!({ "title": "Open mic night recap" })).unwrap();
    let post = Post::create(&pool, author.id, &author.username, &input).await.unwrap();

    let top: CreateComment = serde_json::from_value(json!({ "content": "Great night" })).unwrap();
    let top = comment::create(&pool, post.id, reader.id, &reader.username, &top).await.unwrap();
    let reply: CreateComment =
        serde_json::from_value(json!({ "content": "Agreed", "parentComment": top.id })).unwrap();
    let reply = comment::create(&pool, post.id, author.id, &author.username, &reply).await.unwrap();
    assert_eq!(reply.depth, 1);
    assert_eq!(Post::find_by_id(&pool, post.id).await.unwrap().unwrap().comment_count, 2);

    vote::cast(&pool, reader.id, VoteTarget::Post, post.id, VoteType::Upvote).await.unwrap();
    vote::cast(&pool, author.id, VoteTarget::Comment, top.id, VoteType::Upvote).await.unwrap();

    let err = post::delete(&pool, post.id, reader.id).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);

    post::delete(&pool, post.id, author.id).await.unwrap();

    assert!(Post::find_by_id(&pool, post.id).await.unwrap().is_none());
    let comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE post_id = $1")
        .bind(post.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE target_id = ANY($1)")
        .bind(vec![post.id, top.id, reply.id])
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(comments, 0);
    assert_eq!(votes, 0);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_listing_counters(pool: PgPool) {
    let creator = user(&pool, "creator", 0).await;
    let requester = user(&pool, "requester", 0).await;
    let listing = listing(&pool, &creator).await;
    assert_eq!(listing.view_count, 0);

    SkillListing::view(&pool, listing.id).await.unwrap();
    let viewed = SkillListing::view(&pool, listing.id).await.unwrap().unwrap();
    assert_eq!(viewed.view_count, 2);

    ask(&pool, &listing, &requester, 10).await;
    let stored = SkillListing::find_by_id(&pool, listing.id).await.unwrap().unwrap();
    assert_eq!(stored.response_count, 1);
    assert_eq!(stored.view_count, 2);
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_duplicate_username_is_a_unique_violation(pool: PgPool) {
    user(&pool, "taken", 0).await;
    let input: CreateUser = serde_json::from_value(json!({
        "username": "taken",
        "password": "secret123",
        "email": "someone.else@example.com",
    }))
    .unwrap();

    let err = User::create(&pool, &input, "not-a-real-hash").await.unwrap_err();
    assert!(is_unique_violation(&err));
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "needs a Postgres DATABASE_URL"]
async fn test_read_endpoints_wrap_their_bodies(pool: PgPool) {
    let author = user(&pool, "author", 0).await;
    let input: CreatePost = serde_json::from_value(json!({ "title": "Looking for a drummer" })).unwrap();
    let post = Post::create(&pool, author.id, &author.username, &input).await.unwrap();
    let event: CreateEvent = serde_json::from_value(json!({
        "title": "Jam session",
        "date": "2030-06-01T18:00:00Z",
    }))
    .unwrap();
    Event::create(&pool, author.id, &event).await.unwrap();

    let (status, body) = get_json(&pool, &format!("/post/{}", post.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["post"]["title"], "Looking for a drummer");

    let (_, body) = get_json(&pool, &format!("/post/{}/comments", post.id)).await;
    assert_eq!(body, json!({ "comments": [] }));

    let (_, body) = get_json(&pool, "/event/all").await;
    assert_eq!(body[0]["title"], "Jam session");

    let (status, body) =
        get_json(&pool, &format!("/exchange/requests/{}/responses", Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "responses": [] }));
}
