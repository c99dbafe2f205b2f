//! Background response reader.
//!
//! One task per connection pulls frames off the socket and dispatches
//! them: continuations wake the writer, tagged completions go to the
//! registry, untagged data updates the shared connection state.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::framed::{Frame, ResponseReader};
use super::registry::{CommandTagRegistry, Completion};
use crate::parser::{FetchedItem, Response, UntaggedResponse};
use crate::types::{Capabilities, ResponseCode};
use crate::{Error, Result};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the server greeting.
    Connecting,
    /// Greeting received; commands may be issued.
    Ready,
    /// LOGOUT issued; the connection is being released.
    LoggingOut,
    /// The reader task has stopped.
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between command issuers and the reader task.
pub(crate) struct Shared {
    pub(crate) registry: CommandTagRegistry,
    capabilities: RwLock<Capabilities>,
    exists: Mutex<Option<u32>>,
    last_activity: Mutex<Instant>,
    state: Mutex<ConnectionState>,
    greeting: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl Shared {
    pub(crate) fn new(greeting: oneshot::Sender<Result<()>>) -> Self {
        Self {
            registry: CommandTagRegistry::default(),
            capabilities: RwLock::new(Capabilities::new()),
            exists: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            state: Mutex::new(ConnectionState::Connecting),
            greeting: Mutex::new(Some(greeting)),
        }
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_capabilities(&self, capabilities: Capabilities) {
        debug!(count = capabilities.len(), "capabilities updated");
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = capabilities;
    }

    pub(crate) fn exists(&self) -> Option<u32> {
        *lock(&self.exists)
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        if *current != ConnectionState::Closed {
            *current = state;
        }
    }

    fn signal_greeting(&self, result: Result<()>) {
        if let Some(greeting) = lock(&self.greeting).take() {
            if result.is_ok() {
                self.set_state(ConnectionState::Ready);
            }
            let _ = greeting.send(result);
        }
    }

    fn dispatch(
        &self,
        frame: &Frame,
        continuations: &mpsc::UnboundedSender<()>,
        fetched: &mpsc::UnboundedSender<FetchedItem>,
    ) -> Result<()> {
        match frame.parse()? {
            Response::Continuation { .. } => {
                self.signal_greeting(Ok(()));
                let _ = continuations.send(());
            }
            Response::Untagged(untagged) => self.handle_untagged(untagged, fetched),
            Response::Tagged {
                tag,
                status,
                code,
                text,
            } => {
                if let Some(names) = code.as_ref().and_then(ResponseCode::capabilities) {
                    self.set_capabilities(names.iter().collect());
                }
                let completion = Completion { status, code, text };
                if !self.registry.resolve(&tag, completion) {
                    debug!(%tag, "completion for unknown tag");
                }
            }
        }
        Ok(())
    }

    fn handle_untagged(&self, untagged: UntaggedResponse, fetched: &mpsc::UnboundedSender<FetchedItem>) {
        match untagged {
            UntaggedResponse::Ok { code, text } | UntaggedResponse::PreAuth { code, text } => {
                if let Some(names) = code.as_ref().and_then(ResponseCode::capabilities) {
                    self.set_capabilities(names.iter().collect());
                }
                debug!(%text, "server status");
                self.signal_greeting(Ok(()));
            }
            UntaggedResponse::Bye { text, .. } => {
                info!(%text, "server said goodbye");
                self.signal_greeting(Err(Error::Protocol(format!(
                    "server refused the connection: {text}"
                ))));
            }
            UntaggedResponse::No { text, .. } | UntaggedResponse::Bad { text, .. } => {
                warn!(%text, "server warning");
            }
            UntaggedResponse::Capability(capabilities) => self.set_capabilities(capabilities),
            UntaggedResponse::Exists(n) => *lock(&self.exists) = Some(n),
            UntaggedResponse::Expunge(_) => {
                if let Some(n) = lock(&self.exists).as_mut() {
                    *n = n.saturating_sub(1);
                }
            }
            UntaggedResponse::Fetch(item) => {
                let _ = fetched.send(item);
            }
            UntaggedResponse::Recent(_) | UntaggedResponse::Flags(_) => {}
            UntaggedResponse::Other { keyword, .. } => {
                debug!(%keyword, "ignoring untagged response");
            }
        }
    }

    /// Marks the connection closed and fails everything still waiting.
    fn terminate(&self, reason: &str) {
        let expected = self.state() == ConnectionState::LoggingOut;
        *lock(&self.state) = ConnectionState::Closed;

        self.signal_greeting(Err(Error::ConnectionClosed(reason.to_string())));
        let failed = self.registry.fail_all(reason);

        if expected && failed == 0 {
            debug!(reason, "response reader stopped");
        } else {
            warn!(reason, failed, "response reader stopped");
        }
    }
}

/// Reads and dispatches frames until the stream ends, fails or carries a
/// response that does not parse.
pub(crate) async fn read_loop<R>(
    mut reader: ResponseReader<R>,
    shared: std::sync::Arc<Shared>,
    continuations: mpsc::UnboundedSender<()>,
    fetched: mpsc::UnboundedSender<FetchedItem>,
) where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => {
                *lock(&shared.last_activity) = Instant::now();
                if let Err(e) = shared.dispatch(&frame, &continuations, &fetched) {
                    break e.to_string();
                }
            }
            Ok(None) => break "server closed the connection".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    shared.terminate(&reason);
}
