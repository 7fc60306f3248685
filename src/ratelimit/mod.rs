//! Rate limiting logic and state management.

mod algorithm;
mod counter;
mod limiter;
mod manager;

pub use algorithm::Algorithm;
pub use counter::{CheckResult, CounterState};
pub use limiter::RateLimiter;
pub use manager::RateLimiterManager;
