//! The IMAP connection and its command vocabulary.

#![allow(clippy::missing_errors_doc)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::config::ConnectionConfig;
use super::framed::ResponseReader;
use super::reader::{ConnectionState, Shared, read_loop};
use super::registry::{CommandLocks, Completion, PendingCommand};
use super::stream;
use crate::command::{Command, StoreAction};
use crate::parser::FetchedItem;
use crate::types::{Capabilities, Status, Uid};
use crate::{Error, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Writer {
    sink: BoxedWriter,
    continuations: mpsc::UnboundedReceiver<()>,
}

/// A logged-in IMAP connection.
///
/// All methods take `&self`: commands may be issued from several tasks at
/// once. Commands with the same name run one at a time in call order;
/// commands with different names are in flight together and each waits for
/// its own tagged completion.
pub struct ImapConnection {
    shared: Arc<Shared>,
    writer: Mutex<Writer>,
    locks: CommandLocks,
    fetched: Mutex<mpsc::UnboundedReceiver<FetchedItem>>,
    reader: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl ImapConnection {
    /// Connects, waits for the greeting, queries capabilities and logs in.
    ///
    /// `timeout` bounds the connect phase and is the inactivity timeout of
    /// every command issued on the connection.
    pub async fn open(config: &ConnectionConfig, timeout: Duration) -> Result<Self> {
        debug!(host = %config.host, port = config.port, tls = config.use_ssl, "connecting");
        let stream = tokio::time::timeout(timeout, stream::connect(config))
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        let connection = Self::from_stream(stream, timeout).await?;
        connection
            .login(&config.username, &config.password)
            .await?;
        Ok(connection)
    }

    /// Starts the reader on an established stream, waits for the greeting
    /// and fetches the capability list. The caller still has to log in.
    pub async fn from_stream<S>(stream: S, timeout: Duration) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (greeting_tx, greeting_rx) = oneshot::channel();
        let (continuation_tx, continuation_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared::new(greeting_tx));
        let reader = tokio::spawn(read_loop(
            ResponseReader::new(read_half),
            shared.clone(),
            continuation_tx,
            fetch_tx,
        ));

        let connection = Self {
            shared,
            writer: Mutex::new(Writer {
                sink: Box::new(write_half),
                continuations: continuation_rx,
            }),
            locks: CommandLocks::default(),
            fetched: Mutex::new(fetch_rx),
            reader: Some(reader),
            timeout,
        };

        match tokio::time::timeout(timeout, greeting_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => {
                return Err(Error::ConnectionClosed(
                    "no greeting from server".to_string(),
                ));
            }
            Err(_) => return Err(Error::Timeout(timeout)),
        }

        connection.capability().await?;
        Ok(connection)
    }

    /// Issues a command and waits for its tagged completion.
    ///
    /// Fails with [`Error::Server`] when the completion is not OK and with
    /// [`Error::Timeout`] when nothing at all was received from the server
    /// for the connection timeout.
    pub async fn command(&self, command: &Command) -> Result<Completion> {
        let name = command.name();
        let mut pending = self.shared.registry.register()?;
        let _name_guard = self.locks.acquire(name).await;

        debug!(tag = %pending.tag(), ?command, "sending command");
        let completion = match self.write_command(command, &mut pending).await? {
            Some(early) => early?,
            None => self.wait_for_completion(&mut pending).await?,
        };

        if completion.status != Status::Ok {
            return Err(Error::Server {
                command: name.to_string(),
                status: completion.status.to_string(),
                text: completion.text,
            });
        }
        Ok(completion)
    }

    /// Writes the command under the connection-wide write lock.
    ///
    /// Returns the completion early if the server answered before every
    /// literal was sent (for example a rejected LOGIN).
    async fn write_command(
        &self,
        command: &Command,
        pending: &mut PendingCommand<'_>,
    ) -> Result<Option<Result<Completion>>> {
        let chunks = command.encode(pending.tag());
        let last = chunks.len() - 1;
        let mut writer = self.writer.lock().await;

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::select! {
                    signal = writer.continuations.recv() => {
                        if signal.is_none() {
                            return Err(Error::ConnectionClosed(
                                "reader stopped during literal handshake".to_string(),
                            ));
                        }
                    }
                    completion = &mut pending.receiver => {
                        return Ok(Some(completion.unwrap_or_else(|_| {
                            Err(Error::ConnectionClosed("completion dropped".to_string()))
                        })));
                    }
                    () = tokio::time::sleep(self.timeout) => {
                        return Err(Error::Timeout(self.timeout));
                    }
                }
            }

            if i < last {
                // Forget continuations that did not belong to this literal
                while writer.continuations.try_recv().is_ok() {}
            }

            let sink = &mut writer.sink;
            tokio::time::timeout(self.timeout, async {
                sink.write_all(chunk).await?;
                sink.flush().await
            })
            .await
            .map_err(|_| Error::Timeout(self.timeout))??;
        }

        Ok(None)
    }

    /// Waits for the tagged completion, measuring inactivity from the last
    /// response of any kind (or from the moment the command was written).
    async fn wait_for_completion(&self, pending: &mut PendingCommand<'_>) -> Result<Completion> {
        let issued = Instant::now();

        loop {
            let deadline = self.shared.last_activity().max(issued) + self.timeout;
            match tokio::time::timeout_at(deadline, &mut pending.receiver).await {
                Ok(Ok(result)) => return result,
                Ok(Err(_)) => {
                    return Err(Error::ConnectionClosed("completion dropped".to_string()));
                }
                Err(_) => {
                    let idle_since = self.shared.last_activity().max(issued);
                    if idle_since + self.timeout <= Instant::now() {
                        debug!(tag = %pending.tag(), "command timed out");
                        return Err(Error::Timeout(self.timeout));
                    }
                }
            }
        }
    }

    /// Issues CAPABILITY and returns the refreshed capability set.
    pub async fn capability(&self) -> Result<Capabilities> {
        self.command(&Command::Capability).await?;
        Ok(self.capabilities())
    }

    /// Logs in; both credentials are sent as literals.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        self.command(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
        info!(username, "logged in");
        Ok(())
    }

    /// Selects a mailbox and returns its message count.
    pub async fn select(&self, mailbox: &str) -> Result<u32> {
        self.command(&Command::Select {
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(self.num_exists().unwrap_or(0))
    }

    /// Issues FETCH; results arrive through [`next_fetched`](Self::next_fetched).
    pub async fn fetch(&self, sequence_set: &str, items: &str) -> Result<()> {
        self.command(&Command::Fetch {
            sequence_set: sequence_set.to_string(),
            items: items.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Creates a mailbox.
    pub async fn create(&self, mailbox: &str) -> Result<()> {
        self.command(&Command::Create {
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Deletes a mailbox.
    pub async fn delete(&self, mailbox: &str) -> Result<()> {
        self.command(&Command::Delete {
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Creates the mailbox unless it can already be selected.
    ///
    /// Leaves the mailbox selected if it existed.
    pub async fn create_if_not_exists(&self, mailbox: &str) -> Result<()> {
        match self.select(mailbox).await {
            Err(Error::Server { .. }) => {
                info!(mailbox, "creating missing mailbox");
                self.create(mailbox).await
            }
            other => other.map(|_| ()),
        }
    }

    /// Copies a message to another mailbox.
    pub async fn uid_copy(&self, uid: Uid, mailbox: &str) -> Result<()> {
        self.command(&Command::UidCopy {
            uid,
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Moves a message; requires the MOVE capability.
    pub async fn uid_move(&self, uid: Uid, mailbox: &str) -> Result<()> {
        if !self.capabilities().supports_move() {
            return Err(Error::MissingCapability("MOVE".to_string()));
        }
        self.command(&Command::UidMove {
            uid,
            mailbox: mailbox.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Moves a message with UID MOVE, or with COPY, STORE `\Deleted` and
    /// EXPUNGE on servers without the MOVE capability.
    pub async fn uid_move_graceful(&self, uid: Uid, mailbox: &str) -> Result<()> {
        if self.capabilities().supports_move() {
            return self.uid_move(uid, mailbox).await;
        }

        debug!(%uid, mailbox, "server lacks MOVE, copying instead");
        self.uid_copy(uid, mailbox).await?;
        self.uid_store(uid, StoreAction::Add, &["\\Deleted"], true)
            .await?;
        self.expunge().await
    }

    /// Changes the flags of a message.
    pub async fn uid_store(
        &self,
        uid: Uid,
        action: StoreAction,
        flags: &[&str],
        silent: bool,
    ) -> Result<()> {
        self.command(&Command::UidStore {
            uid,
            action,
            flags: flags.iter().map(ToString::to_string).collect(),
            silent,
        })
        .await?;
        Ok(())
    }

    /// Permanently removes messages flagged `\Deleted`.
    pub async fn expunge(&self) -> Result<()> {
        self.command(&Command::Expunge).await?;
        Ok(())
    }

    /// Waits for the next untagged FETCH result.
    ///
    /// Returns `None` once the connection is closed and every result was
    /// consumed.
    pub async fn next_fetched(&self) -> Option<FetchedItem> {
        self.fetched.lock().await.recv().await
    }

    /// Takes every FETCH result received so far without waiting.
    pub async fn drain_fetched(&self) -> Vec<FetchedItem> {
        let mut fetched = self.fetched.lock().await;
        let mut items = Vec::new();
        while let Ok(item) = fetched.try_recv() {
            items.push(item);
        }
        items
    }

    /// Message count of the selected mailbox, if known.
    #[must_use]
    pub fn num_exists(&self) -> Option<u32> {
        self.shared.exists()
    }

    /// Capabilities advertised by the server.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.shared.capabilities()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Logs out and releases the connection.
    ///
    /// LOGOUT is best effort: failures are logged and never prevent the
    /// socket from being closed and the reader from being reaped.
    pub async fn close(mut self) {
        if self.state() != ConnectionState::Closed {
            self.shared.set_state(ConnectionState::LoggingOut);
            match tokio::time::timeout(self.timeout, self.command(&Command::Logout)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(error = %e, "logout failed"),
                Err(_) => debug!("logout timed out"),
            }
        }

        {
            let mut writer = self.writer.lock().await;
            if let Ok(Err(e)) = tokio::time::timeout(self.timeout, writer.sink.shutdown()).await {
                debug!(error = %e, "closing the socket failed");
            }
        }

        if let Some(mut reader) = self.reader.take()
            && tokio::time::timeout(self.timeout, &mut reader).await.is_err()
        {
            debug!("response reader did not stop, aborting it");
            reader.abort();
        }
    }
}

impl Drop for ImapConnection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for ImapConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConnection")
            .field("state", &self.state())
            .field("exists", &self.num_exists())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Peer {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn expect(&mut self, line: &str) {
            let mut buf = String::new();
            self.reader.read_line(&mut buf).await.unwrap();
            assert_eq!(buf, line);
        }

        async fn send(&mut self, data: &str) {
            self.writer.write_all(data.as_bytes()).await.unwrap();
        }
    }

    async fn connected(timeout: Duration, capabilities: &str) -> (ImapConnection, Peer) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(server);
        let mut peer = Peer {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        let (connection, peer) = tokio::join!(ImapConnection::from_stream(client, timeout), async {
            peer.send("* OK ready\r\n").await;
            peer.expect("a0 CAPABILITY\r\n").await;
            peer.send(&format!("* CAPABILITY {capabilities}\r\na0 OK done\r\n"))
                .await;
            peer
        });
        (connection.unwrap(), peer)
    }

    #[tokio::test]
    async fn greeting_and_capabilities() {
        let (connection, _peer) = connected(TIMEOUT, "IMAP4rev1 MOVE").await;
        assert_eq!(connection.state(), ConnectionState::Ready);
        assert!(connection.capabilities().supports_move());
        assert!(connection.capabilities().contains("imap4rev1"));
    }

    #[tokio::test]
    async fn greeting_bye_refuses_connection() {
        let (client, server) = tokio::io::duplex(1024);
        let (_read_half, mut write_half) = tokio::io::split(server);
        write_half
            .write_all(b"* BYE too many connections\r\n")
            .await
            .unwrap();

        let err = ImapConnection::from_stream(client, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ref text) if text.contains("too many")));
    }

    #[tokio::test]
    async fn login_waits_for_each_continuation() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.login("user", "secret"), async {
            peer.expect("a1 LOGIN {4}\r\n").await;
            peer.send("+ go ahead\r\n").await;
            peer.expect("user {6}\r\n").await;
            peer.send("+ go ahead\r\n").await;
            peer.expect("secret\r\n").await;
            peer.send("a1 OK logged in\r\n").await;
        });
        result.unwrap();
    }

    #[tokio::test]
    async fn rejected_literal_completes_early() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.login("user", "secret"), async {
            peer.expect("a1 LOGIN {4}\r\n").await;
            peer.send("a1 NO [AUTHENTICATIONFAILED] invalid credentials\r\n")
                .await;
        });
        let err = result.unwrap_err();
        assert!(err.is_server_error());
        assert!(err.to_string().contains("invalid credentials"));
    }

    #[tokio::test]
    async fn select_tracks_exists_and_expunge() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (count, ()) = tokio::join!(connection.select("INBOX"), async {
            peer.expect("a1 SELECT {5}\r\n").await;
            peer.send("+ ok\r\n").await;
            peer.expect("INBOX\r\n").await;
            peer.send("* FLAGS (\\Seen \\Deleted)\r\n* 3 EXISTS\r\n* 0 RECENT\r\n")
                .await;
            peer.send("a1 OK [READ-WRITE] selected\r\n").await;
        });
        assert_eq!(count.unwrap(), 3);

        let (result, ()) = tokio::join!(connection.expunge(), async {
            peer.expect("a2 EXPUNGE\r\n").await;
            peer.send("* 1 EXPUNGE\r\n* 1 EXPUNGE\r\na2 OK expunged\r\n")
                .await;
        });
        result.unwrap();
        assert_eq!(connection.num_exists(), Some(1));
    }

    #[tokio::test]
    async fn fetch_results_are_queued() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.fetch("1:2", "(UID RFC822)"), async {
            peer.expect("a1 FETCH 1:2 (UID RFC822)\r\n").await;
            peer.send("* 1 FETCH (UID 10 RFC822 {5}\r\nhello)\r\n").await;
            peer.send("* 2 FETCH (UID 11 RFC822 {5}\r\nworld)\r\n").await;
            peer.send("a1 OK fetched\r\n").await;
        });
        result.unwrap();

        let first = connection.next_fetched().await.unwrap();
        assert_eq!(first.uid().map(Uid::get), Some(10));
        assert_eq!(first.rfc822(), Some(&b"hello"[..]));

        let rest = connection.drain_fetched().await;
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].uid().map(Uid::get), Some(11));
    }

    #[tokio::test]
    async fn no_completion_is_a_server_error() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.select("Missing"), async {
            peer.expect("a1 SELECT {7}\r\n").await;
            peer.send("+ ok\r\n").await;
            peer.expect("Missing\r\n").await;
            peer.send("a1 NO [TRYCREATE] no such mailbox\r\n").await;
        });
        match result.unwrap_err() {
            Error::Server {
                command,
                status,
                text,
            } => {
                assert_eq!(command, "SELECT");
                assert_eq!(status, "NO");
                assert_eq!(text, "no such mailbox");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn move_without_capability_is_refused() {
        let (connection, _peer) = connected(TIMEOUT, "IMAP4rev1").await;
        let err = connection
            .uid_move(Uid::new(4).unwrap(), "Archive")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingCapability(ref name) if name == "MOVE"));
    }

    #[tokio::test]
    async fn graceful_move_falls_back_to_copy() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(
            connection.uid_move_graceful(Uid::new(4).unwrap(), "Archive"),
            async {
                peer.expect("a1 UID COPY 4 {7}\r\n").await;
                peer.send("+ ok\r\n").await;
                peer.expect("Archive\r\n").await;
                peer.send("a1 OK copied\r\n").await;
                peer.expect("a2 UID STORE 4 +FLAGS.SILENT (\\Deleted)\r\n")
                    .await;
                peer.send("a2 OK stored\r\n").await;
                peer.expect("a3 EXPUNGE\r\n").await;
                peer.send("a3 OK expunged\r\n").await;
            }
        );
        result.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_fails_pending_command() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.expunge(), async {
            peer.expect("a1 EXPUNGE\r\n").await;
            drop(peer);
        });
        assert!(matches!(result.unwrap_err(), Error::ConnectionClosed(_)));
        tokio::task::yield_now().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(matches!(
            connection.expunge().await.unwrap_err(),
            Error::ConnectionClosed(_)
        ));
    }

    #[tokio::test]
    async fn unparseable_response_fails_pending_command() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.expunge(), async {
            peer.expect("a1 EXPUNGE\r\n").await;
            peer.send("* 1 FETCH (UID\r\n").await;
        });
        match result.unwrap_err() {
            Error::ConnectionClosed(reason) => assert!(reason.contains("position"), "{reason}"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(connection.state(), ConnectionState::Closed);
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_times_out() {
        let timeout = Duration::from_secs(2);
        let (connection, mut peer) = connected(timeout, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.expunge(), async {
            peer.expect("a1 EXPUNGE\r\n").await;
        });
        assert!(matches!(result.unwrap_err(), Error::Timeout(t) if t == timeout));
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn untagged_traffic_keeps_command_alive() {
        let timeout = Duration::from_secs(2);
        let (connection, mut peer) = connected(timeout, "IMAP4rev1").await;

        let (result, ()) = tokio::join!(connection.expunge(), async {
            peer.expect("a1 EXPUNGE\r\n").await;
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                peer.send("* OK still working\r\n").await;
            }
            peer.send("a1 OK expunged\r\n").await;
        });
        result.unwrap();
    }

    #[tokio::test]
    async fn close_logs_out() {
        let (connection, mut peer) = connected(TIMEOUT, "IMAP4rev1").await;

        let ((), ()) = tokio::join!(connection.close(), async {
            peer.expect("a1 LOGOUT\r\n").await;
            peer.send("* BYE logging out\r\na1 OK bye\r\n").await;
            drop(peer);
        });
    }
}
