//! Broker client abstraction (publish side only).
//!
//! The broker is treated as unreliable:
//!
//! - **May be slow**: callers bound each attempt with their own timeout
//! - **May reject**: errors are returned, never swallowed
//! - **May duplicate**: the same payload can be accepted more than once
//! - **No ordering across subjects**
//!
//! An [`Ack`] only means "accepted by the broker for durable delivery", never
//! "seen by a consumer".

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use thiserror::Error;

/// Broker acknowledgment of a publish.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    /// Broker-assigned position/id of the stored message, if the transport has one.
    pub broker_id: Option<String>,
    /// The broker reports it already held this message.
    pub duplicate: bool,
}

impl Ack {
    pub fn with_id(broker_id: impl Into<String>) -> Self {
        Self {
            broker_id: Some(broker_id.into()),
            duplicate: false,
        }
    }
}

/// Publish failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker refused the message.
    #[error("broker rejected message: {0}")]
    Rejected(String),

    /// The broker could not be reached.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// No acknowledgment within the attempt timeout.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// `publish(subject, payload) → ack`.
///
/// The trait requires `Send + Sync`; the relay shares one client across its
/// worker threads.
pub trait BrokerClient: Send + Sync {
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<Ack, BrokerError>;
}

impl<B> BrokerClient for Arc<B>
where
    B: BrokerClient + ?Sized,
{
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<Ack, BrokerError> {
        (**self).publish(subject, payload)
    }
}

/// Receiving end for deliveries observed by an in-process broker.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
