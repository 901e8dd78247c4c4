//! Infrastructure layer: stores, the transition pipeline, outbox delivery,
//! broker adapters, and configuration.

pub mod broker;
pub mod config;
pub mod outbox;
pub mod repository;
pub mod services;
pub mod store;

pub use repository::{EntityRepository, PipelineConfig, TransitionError, TransitionOutcome};

#[cfg(test)]
mod integration_tests;
