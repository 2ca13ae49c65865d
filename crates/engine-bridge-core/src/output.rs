//! Broadcast + history store for the engine's display output.

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default history size limit (16 MB).
const HISTORY_BYTES: usize = 16 * 1024 * 1024;

/// One chunk of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMsg {
    Stdout(String),
    Stderr(String),
    /// The engine's output streams are closed.
    Finished,
}

impl OutputMsg {
    fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 8;
        match self {
            Self::Stdout(s) | Self::Stderr(s) => s.len() + OVERHEAD,
            Self::Finished => OVERHEAD,
        }
    }
}

#[derive(Clone)]
struct StoredMsg {
    msg: OutputMsg,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredMsg>,
    total_bytes: usize,
}

/// Output store with broadcast and history support.
///
/// Display output of remote evaluations never becomes a local value; it
/// lands here. Late subscribers receive history first, then live output.
pub struct OutputStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<OutputMsg>,
}

impl Default for OutputStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputStore {
    /// Create a new output store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push a message to both live listeners and history.
    pub fn push(&self, msg: OutputMsg) {
        let _ = self.sender.send(msg.clone());
        let bytes = msg.approx_bytes();

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredMsg { msg, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    pub fn push_stdout<S: Into<String>>(&self, s: S) {
        self.push(OutputMsg::Stdout(s.into()));
    }

    pub fn push_stderr<S: Into<String>>(&self, s: S) {
        self.push(OutputMsg::Stderr(s.into()));
    }

    pub fn push_finished(&self) {
        self.push(OutputMsg::Finished);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<OutputMsg> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<OutputMsg> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.msg.clone())
            .collect()
    }

    /// All stdout text captured so far, concatenated.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        self.get_history()
            .into_iter()
            .filter_map(|m| match m {
                OutputMsg::Stdout(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(
        &self,
    ) -> futures::stream::BoxStream<'static, Result<OutputMsg, std::io::Error>> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history.into_iter().map(Ok::<_, std::io::Error>));
        let live = BroadcastStream::new(rx).filter_map(|res: Result<OutputMsg, _>| async move {
            res.ok().map(Ok::<_, std::io::Error>)
        });

        Box::pin(hist.chain(live))
    }

    /// Forward a stream of output messages into this store.
    pub fn spawn_forwarder<S, E>(self: Arc<Self>, stream: S) -> tokio::task::JoinHandle<()>
    where
        S: futures::Stream<Item = Result<OutputMsg, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::pin!(stream);

            while let Some(next) = stream.next().await {
                match next {
                    Ok(msg) => self.push(msg),
                    Err(e) => self.push(OutputMsg::Stderr(format!("stream error: {e}"))),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[test]
    fn test_stdout_text_skips_stderr() {
        let store = OutputStore::new();
        store.push_stdout("typecode: 'SBML_MODEL'\n");
        store.push_stderr("Warning: slow\n");
        store.push_stdout("SBML_level: 3\n");

        assert_eq!(store.stdout_text(), "typecode: 'SBML_MODEL'\nSBML_level: 3\n");
        assert_eq!(store.get_history().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_replays_history_then_live() {
        let store = Arc::new(OutputStore::new());
        store.push_stdout("Netabolics toolbox initialised.\n");
        let mut stream = store.history_plus_stream();

        store.push_stderr("Warning: slow\n");
        store.push_finished();

        let mut seen = Vec::new();
        while let Some(msg) = stream.next().await {
            let msg = msg.unwrap();
            let done = msg == OutputMsg::Finished;
            seen.push(msg);
            if done {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                OutputMsg::Stdout("Netabolics toolbox initialised.\n".into()),
                OutputMsg::Stderr("Warning: slow\n".into()),
                OutputMsg::Finished,
            ]
        );
    }

    #[tokio::test]
    async fn test_forwarder_records_errors() {
        let store = Arc::new(OutputStore::new());
        let stream = futures::stream::iter(vec![
            Ok(OutputMsg::Stderr("line".into())),
            Err("broken pipe"),
        ]);
        tokio_test::assert_ok!(Arc::clone(&store).spawn_forwarder(stream).await);

        assert_eq!(
            store.get_history(),
            vec![
                OutputMsg::Stderr("line".into()),
                OutputMsg::Stderr("stream error: broken pipe".into()),
            ]
        );
    }
}
