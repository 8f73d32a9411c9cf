//! Line-delimited TCP session implementing the [`Connection`] seam.
//!
//! One JSON message per newline-terminated line in each direction. The
//! session is deliberately plain: framing and reconnection only, no
//! protocol logic.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broker::Connection;
use crate::{AppError, Result};

struct Inner {
    stream: Option<TcpStream>,
    carry: Vec<u8>,
    inbound: VecDeque<String>,
}

/// TCP-backed broker session.
pub struct TcpConnection {
    addr: String,
    inner: Mutex<Inner>,
}

impl TcpConnection {
    /// Create an unconnected session toward `host:port`.
    #[must_use]
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            inner: Mutex::new(Inner {
                stream: None,
                carry: Vec::new(),
                inbound: VecDeque::new(),
            }),
        }
    }

    fn dial(&self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)
            .map_err(|err| AppError::Broker(format!("connect to {} failed: {err}", self.addr)))?;
        stream
            .set_nodelay(true)
            .map_err(|err| AppError::Broker(format!("set_nodelay failed: {err}")))?;
        Ok(stream)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means another thread panicked mid-update of
        // the buffers; the connection state itself stays usable.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Connection for TcpConnection {
    fn open_session(&self) -> Result<bool> {
        match self.dial() {
            Ok(stream) => {
                info!(addr = %self.addr, "broker session opened");
                self.lock().stream = Some(stream);
                Ok(true)
            }
            Err(err) => {
                debug!(%err, "broker session attempt failed");
                Ok(false)
            }
        }
    }

    fn reconnect(&self) -> Result<()> {
        let stream = self.dial()?;
        info!(addr = %self.addr, "broker session re-established");
        let mut inner = self.lock();
        inner.stream = Some(stream);
        inner.carry.clear();
        Ok(())
    }

    fn drive(&self, timeout: Duration) -> i32 {
        // A zero read timeout would disable the timeout entirely.
        let timeout = timeout.max(Duration::from_millis(1));

        let mut inner = self.lock();
        let Some(stream) = inner.stream.as_mut() else {
            return 1;
        };

        if stream.set_read_timeout(Some(timeout)).is_err() {
            inner.stream = None;
            return 1;
        }

        let mut buf = [0_u8; 4096];
        match stream.read(&mut buf) {
            Ok(0) => {
                warn!(addr = %self.addr, "broker closed the session");
                inner.stream = None;
                return 1;
            }
            Ok(n) => {
                inner.carry.extend_from_slice(&buf[..n]);
                while let Some(pos) = inner.carry.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = inner.carry.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                    if !line.is_empty() {
                        inner.inbound.push_back(line);
                    }
                }
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {}
            Err(err) => {
                warn!(%err, "broker read failed");
                inner.stream = None;
                return 1;
            }
        }
        0
    }

    fn try_recv(&self) -> Option<String> {
        self.lock().inbound.pop_front()
    }

    fn publish(&self, payload: &str) -> Result<()> {
        let mut inner = self.lock();
        let Some(stream) = inner.stream.as_mut() else {
            return Err(AppError::Broker("no active broker session".into()));
        };
        stream
            .write_all(payload.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
            .and_then(|()| stream.flush())
            .map_err(|err| AppError::Broker(format!("publish failed: {err}")))
    }
}
