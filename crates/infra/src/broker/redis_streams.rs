//! Redis Streams broker client (`XADD`, publish side only).
//!
//! - **Stream key**: `<key_prefix><subject>`, one stream per subject
//! - **Fields**: `subject` and `payload` (the integration event JSON)
//! - **Ack**: the stream entry id returned by `XADD`
//! - **Trimming**: optional `MAXLEN ~ n` on every append
//!
//! Connect, read and write timeouts all use the configured timeout, so a
//! stalled Redis surfaces as `BrokerError::Timeout` instead of blocking the
//! relay. One connection is cached and dropped after any error.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use supplyline_events::{Ack, BrokerClient, BrokerError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisStreamsBroker {
    client: redis::Client,
    key_prefix: String,
    timeout: Duration,
    max_len: Option<usize>,
    conn: Mutex<Option<redis::Connection>>,
}

impl std::fmt::Debug for RedisStreamsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsBroker")
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsBroker {
    /// Create a client for `redis_url` (e.g. `redis://localhost:6379`).
    ///
    /// No connection is opened until the first publish.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Unavailable(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            key_prefix: String::new(),
            timeout: DEFAULT_TIMEOUT,
            max_len: None,
            conn: Mutex::new(None),
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Approximate cap on each stream's length.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn stream_key(&self, subject: &str) -> String {
        format!("{}{}", self.key_prefix, subject)
    }

    fn connect(&self) -> Result<redis::Connection, redis::RedisError> {
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        debug!(timeout = ?self.timeout, "redis connection opened");
        Ok(conn)
    }

    fn classify(&self, err: &redis::RedisError) -> BrokerError {
        if err.is_timeout() {
            BrokerError::Timeout(self.timeout)
        } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            BrokerError::Unavailable(err.to_string())
        } else {
            BrokerError::Rejected(err.to_string())
        }
    }

    fn xadd(&self, conn: &mut redis::Connection, key: &str, subject: &str, payload: &[u8]) -> redis::RedisResult<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*").arg("subject").arg(subject).arg("payload").arg(payload);
        cmd.query(conn)
    }
}

impl BrokerClient for RedisStreamsBroker {
    #[instrument(skip(self, payload), fields(bytes = payload.len()), err)]
    fn publish(&self, subject: &str, payload: &[u8]) -> Result<Ack, BrokerError> {
        let key = self.stream_key(subject);
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| BrokerError::Unavailable("connection lock poisoned".to_string()))?;

        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect().map_err(|e| self.classify(&e))?,
        };

        match self.xadd(&mut conn, &key, subject, payload) {
            Ok(entry_id) => {
                *guard = Some(conn);
                Ok(Ack::with_id(entry_id))
            }
            Err(e) => {
                warn!(stream_key = %key, error = %e, "XADD failed, dropping connection");
                Err(self.classify(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use redis::{ErrorKind, RedisError};

    use super::*;

    fn broker() -> RedisStreamsBroker {
        RedisStreamsBroker::new("redis://127.0.0.1:6379")
            .unwrap()
            .with_timeout(Duration::from_millis(250))
    }

    #[test]
    fn stream_key_is_prefixed_subject() {
        let broker = broker().with_key_prefix("supplyline:");
        assert_eq!(
            broker.stream_key("supplychain.inventory.alert.low_stock"),
            "supplyline:supplychain.inventory.alert.low_stock"
        );
    }

    #[test]
    fn invalid_url_is_rejected_up_front() {
        assert!(matches!(
            RedisStreamsBroker::new("not a url"),
            Err(BrokerError::Unavailable(_))
        ));
    }

    #[test]
    fn errors_are_classified() {
        let broker = broker();

        let timeout = RedisError::from(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        assert_eq!(broker.classify(&timeout), BrokerError::Timeout(Duration::from_millis(250)));

        let refused = RedisError::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(matches!(broker.classify(&refused), BrokerError::Unavailable(_)));

        let wrong_type = RedisError::from((ErrorKind::TypeError, "WRONGTYPE"));
        assert!(matches!(broker.classify(&wrong_type), BrokerError::Rejected(_)));
    }
}
