//! Process-wide tracing setup shared by every supplyline binary.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, LoggingConfig, init, init_with};
