pub mod client;
pub mod error;
pub mod extract;
pub mod response;

pub use client::ClientIp;
pub use error::AppError;
pub use extract::{JsonBody, QueryParams};
