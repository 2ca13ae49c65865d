//! Bridge protocol handler over an engine's stdio.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use engine_bridge_core::{
    EngineError, OutputStore,
    protocol::{EngineMessage, EngineOutcome, EngineRequest, OutputStream, RequestEnvelope},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex as AsyncMutex, oneshot},
};

/// Protocol error.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Engine closed its output before responding")]
    Disconnected,
}

impl From<ProtocolError> for EngineError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Disconnected => Self::Disconnected,
            ProtocolError::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe => {
                Self::Disconnected
            }
            ProtocolError::Io(io) => Self::Io(io),
            ProtocolError::Json(json) => Self::Protocol(json.to_string()),
        }
    }
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<u64, oneshot::Sender<EngineOutcome>>,
    closed: bool,
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Correlates requests written to the engine with responses read back.
///
/// A background task reads the engine's output: responses complete the
/// matching request, display output and any non-protocol lines go to the
/// [`OutputStore`].
#[derive(Clone)]
pub struct EnginePeer {
    writer: Arc<AsyncMutex<Writer>>,
    pending: Arc<Mutex<Pending>>,
    next_id: Arc<AtomicU64>,
}

impl EnginePeer {
    /// Spawn a new protocol peer.
    ///
    /// This starts a background task reading from `reader`.
    #[must_use]
    pub fn spawn<W, R>(writer: W, reader: R, output: Arc<OutputStore>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let peer = Self {
            writer: Arc::new(AsyncMutex::new(Box::new(writer))),
            pending: Arc::new(Mutex::new(Pending::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let pending = Arc::clone(&peer.pending);
        tokio::spawn(async move {
            if let Err(e) = read_loop(reader, &pending, &output).await {
                tracing::error!("Engine reader loop error: {e}");
            }
            let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.closed = true;
            // Dropping the senders fails every in-flight request.
            pending.waiters.clear();
            output.push_finished();
        });

        peer
    }

    /// Send a request and wait for its outcome.
    ///
    /// # Errors
    /// Returns error if the write fails or the engine goes away first.
    pub async fn request(&self, request: EngineRequest) -> Result<EngineOutcome, ProtocolError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.closed {
                return Err(ProtocolError::Disconnected);
            }
            pending.waiters.insert(id, tx);
        }

        tracing::debug!(id, op = request.op(), "Sending engine request");
        if let Err(e) = self.send_json(&RequestEnvelope { id, request }).await {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .waiters
                .remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| ProtocolError::Disconnected)
    }

    /// Whether the engine's output has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    async fn send_json<T: serde::Serialize>(&self, message: &T) -> Result<(), ProtocolError> {
        let json = serde_json::to_string(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }
}

async fn read_loop<R>(
    reader: R,
    pending: &Mutex<Pending>,
    output: &OutputStore,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if reader.read_line(&mut buffer).await? == 0 {
            break; // EOF
        }
        let line = buffer.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<EngineMessage>(line) {
            Ok(EngineMessage::Output { stream, text }) => match stream {
                OutputStream::Stdout => output.push_stdout(text),
                OutputStream::Stderr => output.push_stderr(text),
            },
            Ok(EngineMessage::Response { id, outcome }) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .waiters
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => tracing::warn!(id, "Response for unknown engine request"),
                }
            }
            Err(_) => {
                // Banners and stray prints from the engine itself.
                output.push_stdout(format!("{line}\n"));
            }
        }
    }
    Ok(())
}
