pub mod credit;
pub mod dispute;
pub mod lifecycle;
pub mod request;
pub mod response;
pub mod review;
pub mod session;

pub use credit::CreditTransaction;
pub use dispute::Dispute;
pub use request::ExchangeRequest;
pub use response::ExchangeResponse;
pub use review::Review;
pub use session::ExchangeSession;
