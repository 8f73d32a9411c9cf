//! Bounded output channel between worker pump tasks and the broker.
//!
//! Multi-producer, single-consumer: worker output pumps push serialized
//! response records, and one dedicated sender task drains the channel and
//! publishes each record verbatim. Producers block on a full channel
//! (backpressure); records are capped at [`MAX_RECORD_BYTES`], longer
//! payloads being chunked by their producers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::Connection;
use crate::{AppError, Result};

/// Maximum records in flight.
pub const CHANNEL_CAPACITY: usize = 100;

/// Maximum size of one record on the channel.
pub const MAX_RECORD_BYTES: usize = 2500;

/// Producer handle onto the output channel.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
}

impl Outbox {
    /// Create the channel and start the sender task.
    ///
    /// The task drains the channel until cancellation or a publish failure.
    /// On failure it logs and tears down its own end; producers then observe
    /// a closed channel and surface `AppError::Channel`, but the dispatcher
    /// keeps running.
    pub fn start<C>(connection: Arc<C>, cancel: CancellationToken) -> (Self, JoinHandle<()>)
    where
        C: Connection + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("output channel sender shutting down");
                        break;
                    }
                    record = rx.recv() => {
                        let Some(record) = record else {
                            info!("output channel closed; sender exiting");
                            break;
                        };
                        if let Err(err) = connection.publish(&record) {
                            error!(%err, "publish failed; tearing down output channel");
                            rx.close();
                            break;
                        }
                    }
                }
            }
        });

        (Self { tx }, task)
    }

    /// Push one record, blocking while the channel is full.
    ///
    /// Oversized records are truncated to [`MAX_RECORD_BYTES`] with a
    /// warning rather than rejected; producers are expected to chunk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Channel` when the sender task has torn down.
    pub async fn send(&self, record: String) -> Result<()> {
        let record = if record.len() > MAX_RECORD_BYTES {
            warn!(
                len = record.len(),
                "output record exceeds channel record size, truncating"
            );
            truncate_to_boundary(record, MAX_RECORD_BYTES)
        } else {
            record
        };

        self.tx
            .send(record)
            .await
            .map_err(|err| AppError::Channel(format!("output channel closed: {err}")))
    }
}

/// Cut a string at the nearest char boundary at or below `max` bytes.
fn truncate_to_boundary(mut record: String, max: usize) -> String {
    let mut cut = max;
    while cut > 0 && !record.is_char_boundary(cut) {
        cut -= 1;
    }
    record.truncate(cut);
    record
}
