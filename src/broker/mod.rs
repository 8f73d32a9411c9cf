//! Broker connectivity: the connection seam, the bounded output channel,
//! and the line-delimited TCP session.

pub mod outbox;
pub mod tcp;

use std::time::Duration;

use crate::Result;

pub use outbox::Outbox;
pub use tcp::TcpConnection;

/// The publish/subscribe session the agent talks to the controller through.
///
/// Session establishment, TLS, and reconnect internals live behind this
/// seam. Every method is non-blocking by contract except [`Connection::drive`],
/// which blocks for at most the given timeout.
pub trait Connection: Send + Sync {
    /// Try to establish the broker session. Returns `false` when the broker
    /// is unreachable but the attempt may be retried.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Broker` on unrecoverable session failures.
    fn open_session(&self) -> Result<bool>;

    /// Tear down and re-establish the session after a poll failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Broker` when re-establishment fails.
    fn reconnect(&self) -> Result<()>;

    /// Run one bounded housekeeping cycle: ingest pending inbound bytes and
    /// service the session. A non-zero return code signals connection
    /// trouble; the caller reacts by invoking [`Connection::reconnect`].
    fn drive(&self, timeout: Duration) -> i32;

    /// Take the next pending inbound message, if any.
    fn try_recv(&self) -> Option<String>;

    /// Publish one outbound payload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Broker` when the payload cannot be delivered.
    fn publish(&self, payload: &str) -> Result<()>;
}
