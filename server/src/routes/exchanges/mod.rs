//! Handlers for the `/exchange` tree: requests and their responses, the
//! sessions they open, and what happens after a session ends (reviews,
//! disputes and the credit ledger).

pub mod disputes;
pub mod requests;
pub mod reviews;
pub mod sessions;
pub mod transactions;
