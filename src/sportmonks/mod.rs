pub mod client;
pub mod error;
pub mod provider;
pub mod retry;

pub use client::{FetchOptions, SportmonksClient};
pub use error::FetchError;
pub use provider::{DetailsOrigin, SeasonDetails, StatsSource};
pub use retry::{RateLimitGate, Retrier, RetryPolicy};
