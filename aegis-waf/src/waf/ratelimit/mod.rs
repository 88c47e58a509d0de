pub mod limiter;
pub mod token_bucket;

pub use limiter::{BucketSweeper, RateLimiter};
