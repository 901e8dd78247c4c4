//! Broker client implementations.
//!
//! The in-memory broker lives in `supplyline-events`; transport-backed
//! clients are feature-gated here.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsBroker;
