pub mod auth;
pub mod comment;
pub mod cron;
pub mod errors;
pub mod event;
pub mod exchange;
pub mod extract;
pub mod jobs;
pub mod listing;
pub mod pagination;
pub mod post;
pub mod report;
pub mod routes;
pub mod state;
pub mod user;
pub mod validation;
pub mod vote;
