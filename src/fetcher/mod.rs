pub mod backoff;
pub mod client;
pub mod domain;
pub mod errors;
pub mod pipeline;
pub mod rate_limit;
pub mod types;

pub use backoff::RetryPolicy;
pub use client::{Fetcher, parse_http_url, random_user_agent};
pub use domain::{clean_url, domain_of, normalize_target, registrable_domain};
pub use errors::{FailureKind, FetchError};
pub use rate_limit::RateLimiter;
pub use types::{Charset, FetchResult};
