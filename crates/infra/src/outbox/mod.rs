//! Outbox delivery: retry policy, bounded publish attempts, the relay loop,
//! and relay health.

pub mod health;
pub mod relay;
pub mod retry;
pub mod timed;

pub use health::{HealthReport, HealthStatus, RelayHealth};
pub use relay::{OutboxRelay, RelayConfig, RelayCycle, RelayHandle, RelayStats};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use timed::TimedPublisher;
