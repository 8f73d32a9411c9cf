//! Per-worker output pumps.
//!
//! Each piped worker stream gets one pump task that reads lines, chunks
//! them to fit the output channel's record size, and pushes serialized
//! response records into the outbox. Both streams of one worker share a
//! response ordinal so the controller can order the combined stream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::Outbox;
use crate::protocol::Response;

/// Payload budget per chunk, leaving headroom for the message envelope
/// within the channel's record size.
pub const CHUNK_BYTES: usize = 2000;

/// Which worker stream a pump is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// The worker's stdout.
    Stdout,
    /// The worker's stderr.
    Stderr,
}

/// Correlation fields shared by every record one worker produces.
#[derive(Debug, Clone)]
pub struct OutputMeta {
    /// The agent's node uuid.
    pub node_uuid: String,
    /// Worker pid.
    pub pid: u32,
    /// Owning command's task uuid.
    pub task_uuid: String,
    /// Owning command's source.
    pub source: String,
    /// Owning command's sequence number.
    pub request_sequence_number: i64,
    /// Ordinal shared across both stream pumps of the worker.
    pub counter: Arc<AtomicU32>,
}

/// Start one pump task for a worker stream.
///
/// When `capture_path` is set the raw lines are also appended to that file.
/// The task ends when the stream closes; outbox failures end it early
/// without affecting the worker or the dispatcher.
pub fn pump_stream<R>(
    stream: R,
    kind: StreamKind,
    capture_path: Option<String>,
    meta: OutputMeta,
    outbox: Outbox,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = match capture_path {
            Some(ref path) => match open_capture(path).await {
                Ok(file) => Some(file),
                Err(err) => {
                    warn!(path, %err, "failed to open capture file, streaming only");
                    None
                }
            },
            None => None,
        };

        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(ref mut file) = capture {
                if let Err(err) = file.write_all(line.as_bytes()).await {
                    warn!(%err, "capture write failed, dropping capture file");
                    capture = None;
                } else {
                    let _ = file.write_all(b"\n").await;
                }
            }

            for chunk in chunk_line(&line) {
                let (std_out, std_err) = match kind {
                    StreamKind::Stdout => (Some(chunk), None),
                    StreamKind::Stderr => (None, Some(chunk)),
                };
                let ordinal = meta.counter.fetch_add(1, Ordering::SeqCst);
                let record = Response::output_chunk(
                    &meta.node_uuid,
                    meta.pid,
                    ordinal,
                    std_out,
                    std_err,
                    &meta.source,
                    &meta.task_uuid,
                    meta.request_sequence_number,
                );
                let Ok(wire) = record.to_wire() else {
                    warn!("failed to serialize output chunk");
                    continue;
                };
                if let Err(err) = outbox.send(wire).await {
                    debug!(%err, "output channel gone, pump exiting");
                    return;
                }
            }
        }
    })
}

async fn open_capture(path: &str) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

/// Split one line into channel-sized payload chunks on char boundaries.
fn chunk_line(line: &str) -> Vec<String> {
    if line.len() <= CHUNK_BYTES {
        return vec![line.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let mut cut = CHUNK_BYTES.min(rest.len());
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_owned());
        rest = tail;
    }
    chunks
}
