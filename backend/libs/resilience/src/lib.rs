/// Resilience primitives for outbound delivery
///
/// Provides retry with exponential backoff for calls to external systems.
/// Unlike a blanket retry loop, `with_retry` takes a retryability predicate so
/// permanent failures (e.g. a 4xx from the provider) short-circuit instead of
/// burning the attempt budget.
pub mod retry;

pub use retry::{with_retry, RetryConfig, RetryError};
