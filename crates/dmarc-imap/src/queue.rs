//! Folder-based work queue on top of an IMAP mailbox.
//!
//! Every poll cycle opens a fresh connection, fetches everything in the
//! inbox folder and hands each message to a [`MessageHandler`]. Messages
//! the handler accepts are moved to the done folder; messages it rejects
//! go to the error folder.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Result;
use crate::connection::{ConnectionConfig, ImapConnection};
use crate::parser::FetchedItem;

/// Default time between two poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default inactivity timeout of connections opened by the queue.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mailbox names used by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFolders {
    /// Folder polled for new messages.
    pub inbox: String,
    /// Destination of successfully handled messages.
    pub done: String,
    /// Destination of messages the handler rejected.
    pub error: String,
}

impl Default for QueueFolders {
    fn default() -> Self {
        Self {
            inbox: "INBOX".to_string(),
            done: "Archive".to_string(),
            error: "Invalid".to_string(),
        }
    }
}

/// Per-message callback of the queue.
pub trait MessageHandler: Send + Sync {
    /// Error returned for messages that belong in the error folder.
    type Error: Display + Send;

    /// Processes one raw RFC 822 message.
    fn handle(
        &self,
        message: &[u8],
    ) -> impl Future<Output = std::result::Result<(), Self::Error>> + Send;
}

/// Polls an IMAP inbox and dispatches its messages.
pub struct ImapQueue {
    config: Arc<ConnectionConfig>,
    folders: Arc<QueueFolders>,
    poll_interval: Duration,
    timeout: Duration,
    consumer: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl ImapQueue {
    /// Creates a queue; nothing happens until [`consume`](Self::consume).
    #[must_use]
    pub fn new(config: ConnectionConfig, folders: QueueFolders, poll_interval: Duration) -> Self {
        Self {
            config: Arc::new(config),
            folders: Arc::new(folders),
            poll_interval,
            timeout: DEFAULT_TIMEOUT,
            consumer: None,
        }
    }

    /// Sets the connection inactivity timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The folders this queue works with.
    #[must_use]
    pub fn folders(&self) -> &QueueFolders {
        &self.folders
    }

    /// Returns true while a consumer task is running.
    #[must_use]
    pub const fn is_consuming(&self) -> bool {
        self.consumer.is_some()
    }

    /// Starts polling in a background task.
    ///
    /// A failed cycle is logged and retried after the poll interval. Calling
    /// this while a consumer is already running does nothing.
    pub fn consume<H>(&mut self, handler: Arc<H>)
    where
        H: MessageHandler + 'static,
    {
        if self.consumer.is_some() {
            warn!("queue consumer already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let config = self.config.clone();
        let folders = self.folders.clone();
        let poll_interval = self.poll_interval;
        let timeout = self.timeout;

        let task = tokio::spawn(async move {
            info!(inbox = %folders.inbox, ?poll_interval, "queue consumer started");
            while !*stop_rx.borrow() {
                match poll(&config, &folders, timeout, handler.as_ref()).await {
                    Ok(0) => debug!("no messages in inbox"),
                    Ok(processed) => info!(processed, "poll cycle finished"),
                    Err(e) => warn!(error = %e, "poll cycle failed"),
                }

                tokio::select! {
                    () = tokio::time::sleep(poll_interval) => {}
                    changed = stop_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("queue consumer stopped");
        });

        self.consumer = Some((stop_tx, task));
    }

    /// Signals the consumer to stop and waits until it has.
    ///
    /// A batch in progress runs to completion first.
    pub async fn stop_consumer(&mut self) {
        if let Some((stop, task)) = self.consumer.take() {
            let _ = stop.send(true);
            if let Err(e) = task.await {
                warn!(error = %e, "queue consumer panicked");
            }
        }
    }

    /// Runs a single poll cycle and returns the number of messages handled.
    pub async fn poll_once<H: MessageHandler>(&self, handler: &H) -> Result<usize> {
        poll(&self.config, &self.folders, self.timeout, handler).await
    }
}

impl std::fmt::Debug for ImapQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapQueue")
            .field("config", &self.config)
            .field("folders", &self.folders)
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .field("consuming", &self.is_consuming())
            .finish()
    }
}

async fn poll<H: MessageHandler>(
    config: &ConnectionConfig,
    folders: &QueueFolders,
    timeout: Duration,
    handler: &H,
) -> Result<usize> {
    let connection = ImapConnection::open(config, timeout).await?;
    let result = process_inbox(&connection, folders, handler).await;
    connection.close().await;
    result
}

async fn process_inbox<H: MessageHandler>(
    connection: &ImapConnection,
    folders: &QueueFolders,
    handler: &H,
) -> Result<usize> {
    for folder in [&folders.inbox, &folders.done, &folders.error] {
        connection.create_if_not_exists(folder).await?;
    }

    let count = connection.select(&folders.inbox).await?;
    if count == 0 {
        return Ok(0);
    }
    debug!(count, inbox = %folders.inbox, "fetching messages");

    // Results stream in while FETCH is still running and may remain queued
    // after its completion; stop only when both are done.
    let sequence_set = format!("1:{count}");
    let fetch = connection.fetch(&sequence_set, "(UID RFC822)");
    tokio::pin!(fetch);
    let mut processed = 0;

    loop {
        tokio::select! {
            result = &mut fetch => {
                result?;
                break;
            }
            Some(item) = connection.next_fetched() => {
                processed += handle_item(connection, folders, handler, item).await?;
            }
        }
    }

    for item in connection.drain_fetched().await {
        processed += handle_item(connection, folders, handler, item).await?;
    }

    Ok(processed)
}

async fn handle_item<H: MessageHandler>(
    connection: &ImapConnection,
    folders: &QueueFolders,
    handler: &H,
    item: FetchedItem,
) -> Result<usize> {
    let (Some(uid), Some(message)) = (item.uid(), item.rfc822()) else {
        warn!(seq = item.seq, "FETCH result without UID or body, leaving message in place");
        return Ok(0);
    };

    let destination = match handler.handle(message).await {
        Ok(()) => &folders.done,
        Err(e) => {
            warn!(%uid, error = %e, "message handler failed");
            &folders.error
        }
    };

    debug!(%uid, folder = %destination, "moving message");
    connection.uid_move_graceful(uid, destination).await?;
    Ok(1)
}
