//! In-process IMAP server for integration tests.
//!
//! Speaks just enough IMAP4rev1 for the client and the queue: literals
//! with continuation requests, a mailbox model with UIDs, MOVE or
//! COPY/STORE/EXPUNGE, and per-command gates that hold a completion back
//! until the test releases it.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dmarc_imap::ConnectionConfig;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "reports@example.com";
pub const PASSWORD: &str = "hunter2";

#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Advertise the MOVE extension.
    pub move_capability: bool,
    /// Send `* OK` every tick while a completion is held back.
    pub tick: Option<Duration>,
    /// Number of initial connections closed before the greeting.
    pub refuse_first: usize,
    /// Put RFC822 before UID in FETCH responses.
    pub body_first: bool,
    /// Leave UID out of FETCH responses.
    pub omit_uid: bool,
    /// Send `RFC822 NIL` instead of the message.
    pub nil_body: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            move_capability: true,
            tick: None,
            refuse_first: 0,
            body_first: false,
            omit_uid: false,
            nil_body: false,
        }
    }
}

struct Message {
    uid: u32,
    body: Vec<u8>,
    deleted: bool,
}

#[derive(Default)]
struct State {
    mailboxes: BTreeMap<String, Vec<Message>>,
    next_uid: u32,
    received: Vec<String>,
    gates: HashMap<String, Arc<Semaphore>>,
    connections: usize,
}

impl State {
    fn append(&mut self, mailbox: &str, body: Vec<u8>) {
        self.next_uid += 1;
        let uid = self.next_uid;
        self.mailboxes
            .entry(mailbox.to_string())
            .or_default()
            .push(Message {
                uid,
                body,
                deleted: false,
            });
    }
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State {
            mailboxes: BTreeMap::from([("INBOX".to_string(), Vec::new())]),
            ..State::default()
        }));

        let accept = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let number = {
                        let mut state = state.lock().unwrap();
                        state.connections += 1;
                        state.connections
                    };
                    if number <= options.refuse_first {
                        drop(stream);
                        continue;
                    }
                    tokio::spawn(serve(stream, state.clone(), options.clone()));
                }
            }
        });

        Self {
            addr,
            state,
            accept,
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::builder("127.0.0.1", USERNAME, PASSWORD)
            .port(self.addr.port())
            .use_ssl(false)
            .build()
    }

    pub fn add_mailbox(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .mailboxes
            .entry(name.to_string())
            .or_default();
    }

    pub fn add_message(&self, mailbox: &str, body: &[u8]) {
        self.state.lock().unwrap().append(mailbox, body.to_vec());
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.state.lock().unwrap().mailboxes.contains_key(name)
    }

    /// Bodies of the messages in a mailbox, empty if it does not exist.
    pub fn messages(&self, mailbox: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .mailboxes
            .get(mailbox)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn uids(&self, mailbox: &str) -> Vec<u32> {
        self.state
            .lock()
            .unwrap()
            .mailboxes
            .get(mailbox)
            .map(|messages| messages.iter().map(|m| m.uid).collect())
            .unwrap_or_default()
    }

    /// Commands received so far, without tags, e.g. `UID MOVE 7 Archive`.
    pub fn received(&self) -> Vec<String> {
        self.state.lock().unwrap().received.clone()
    }

    /// Received commands starting with `name`.
    pub fn received_named(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name} ");
        self.received()
            .into_iter()
            .filter(|line| line.starts_with(&prefix) || line == name)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Holds back completions of `command` until released.
    pub fn hold(&self, command: &str) {
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(command.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held completions of `command` through.
    pub fn release(&self, command: &str, count: usize) {
        if let Some(gate) = self.state.lock().unwrap().gates.get(command) {
            gate.add_permits(count);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type Writer = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

async fn send(writer: &Writer, data: &[u8]) {
    let _ = writer.lock().await.write_all(data).await;
}

struct Session {
    selected: Option<String>,
}

async fn serve(stream: TcpStream, state: Arc<Mutex<State>>, options: MockOptions) {
    let (read_half, write_half) = stream.into_split();
    let writer: Writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let mut reader = BufReader::new(read_half);
    let session = Arc::new(Mutex::new(Session { selected: None }));

    send(&writer, b"* OK mock IMAP server ready\r\n").await;

    while let Some(args) = read_command(&mut reader, &writer).await {
        if args.len() < 2 {
            send(&writer, b"* BAD missing command\r\n").await;
            continue;
        }
        let tag = args[0].clone();
        let (name, rest) = if args[1].eq_ignore_ascii_case("UID") && args.len() > 2 {
            (format!("UID {}", args[2].to_uppercase()), args[3..].to_vec())
        } else {
            (args[1].to_uppercase(), args[2..].to_vec())
        };

        let line = std::iter::once(name.clone())
            .chain(rest.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        state.lock().unwrap().received.push(line);

        if name == "LOGOUT" {
            send(&writer, format!("* BYE logging out\r\n{tag} OK LOGOUT completed\r\n").as_bytes()).await;
            let _ = writer.lock().await.shutdown().await;
            return;
        }

        tokio::spawn({
            let state = state.clone();
            let session = session.clone();
            let writer = writer.clone();
            let options = options.clone();
            async move {
                wait_for_gate(&state, &name, &writer, options.tick).await;
                let response = respond(&state, &session, &options, &tag, &name, &rest);
                send(&writer, &response).await;
            }
        });
    }
}

async fn wait_for_gate(state: &Mutex<State>, name: &str, writer: &Writer, tick: Option<Duration>) {
    let Some(gate) = state.lock().unwrap().gates.get(name).cloned() else {
        return;
    };

    let permit = gate.acquire_owned();
    tokio::pin!(permit);
    loop {
        tokio::select! {
            permit = &mut permit => {
                if let Ok(permit) = permit {
                    permit.forget();
                }
                return;
            }
            () = tokio::time::sleep(tick.unwrap_or_default()), if tick.is_some() => {
                send(writer, b"* OK still working\r\n").await;
            }
        }
    }
}

/// Reads one command, answering literal announcements with a
/// continuation request. Literal arguments become single arguments.
async fn read_command(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: &Writer,
) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }

    loop {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        let Some((head, len)) = literal_suffix(trimmed) else {
            args.extend(trimmed.split_whitespace().map(String::from));
            return Some(args);
        };

        args.extend(head.split_whitespace().map(String::from));
        send(writer, b"+ OK continue\r\n").await;
        let mut literal = vec![0; len];
        reader.read_exact(&mut literal).await.ok()?;
        args.push(String::from_utf8_lossy(&literal).into_owned());

        line.clear();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
    }
}

fn literal_suffix(line: &str) -> Option<(&str, usize)> {
    let body = line.strip_suffix('}')?;
    let open = body.rfind('{')?;
    let len = body[open + 1..].parse().ok()?;
    Some((&body[..open], len))
}

fn respond(
    state: &Mutex<State>,
    session: &Mutex<Session>,
    options: &MockOptions,
    tag: &str,
    name: &str,
    args: &[String],
) -> Vec<u8> {
    let mut state = state.lock().unwrap();
    let mut session = session.lock().unwrap();
    let mut out = String::new();
    let mut bytes = Vec::new();

    let status = match (name, args) {
        ("CAPABILITY", []) => {
            let extra = if options.move_capability { " MOVE" } else { "" };
            out.push_str(&format!("* CAPABILITY IMAP4rev1 UIDPLUS{extra}\r\n"));
            "OK CAPABILITY completed".to_string()
        }
        ("LOGIN", [user, pass]) => {
            if user == USERNAME && pass == PASSWORD {
                "OK LOGIN completed".to_string()
            } else {
                "NO [AUTHENTICATIONFAILED] invalid credentials".to_string()
            }
        }
        ("SELECT", [mailbox]) => match state.mailboxes.get(mailbox) {
            Some(messages) => {
                session.selected = Some(mailbox.clone());
                out.push_str("* FLAGS (\\Answered \\Flagged \\Deleted \\Seen \\Draft)\r\n");
                out.push_str(&format!("* {} EXISTS\r\n* 0 RECENT\r\n", messages.len()));
                out.push_str(&format!("* OK [UIDNEXT {}] predicted\r\n", state.next_uid + 1));
                "OK [READ-WRITE] SELECT completed".to_string()
            }
            None => "NO [NONEXISTENT] no such mailbox".to_string(),
        },
        ("CREATE", [mailbox]) => {
            if state.mailboxes.contains_key(mailbox) {
                "NO [ALREADYEXISTS] mailbox exists".to_string()
            } else {
                state.mailboxes.insert(mailbox.clone(), Vec::new());
                "OK CREATE completed".to_string()
            }
        }
        ("DELETE", [mailbox]) => {
            if state.mailboxes.remove(mailbox).is_some() {
                "OK DELETE completed".to_string()
            } else {
                "NO [NONEXISTENT] no such mailbox".to_string()
            }
        }
        ("FETCH", [range, ..]) => {
            let messages = session
                .selected
                .as_ref()
                .and_then(|mailbox| state.mailboxes.get(mailbox));
            if let Some(messages) = messages {
                let (first, last) = parse_range(range, messages.len());
                for seq in first..=last {
                    let message = &messages[seq - 1];
                    let uid = if options.omit_uid {
                        "FLAGS ()".to_string()
                    } else {
                        format!("UID {}", message.uid)
                    };
                    let (body, literal): (String, &[u8]) = if options.nil_body {
                        ("RFC822 NIL".to_string(), &[][..])
                    } else {
                        (format!("RFC822 {{{}}}\r\n", message.body.len()), message.body.as_slice())
                    };
                    bytes.extend_from_slice(format!("* {seq} FETCH (").as_bytes());
                    if options.body_first {
                        bytes.extend_from_slice(body.as_bytes());
                        bytes.extend_from_slice(literal);
                        bytes.extend_from_slice(format!(" {uid}").as_bytes());
                    } else {
                        bytes.extend_from_slice(format!("{uid} {body}").as_bytes());
                        bytes.extend_from_slice(literal);
                    }
                    bytes.extend_from_slice(b")\r\n");
                }
                "OK FETCH completed".to_string()
            } else {
                "BAD no mailbox selected".to_string()
            }
        }
        ("UID COPY" | "UID MOVE", [uid, target]) => {
            let is_move = name == "UID MOVE";
            if is_move && !options.move_capability {
                "BAD unknown command".to_string()
            } else if !state.mailboxes.contains_key(target) {
                "NO [TRYCREATE] no such mailbox".to_string()
            } else {
                let source = session.selected.clone().unwrap_or_default();
                let uid: u32 = uid.parse().unwrap_or(0);
                let found = state
                    .mailboxes
                    .get(&source)
                    .and_then(|messages| messages.iter().position(|m| m.uid == uid));
                match found {
                    Some(index) => {
                        let body = if is_move {
                            out.push_str(&format!("* {} EXPUNGE\r\n", index + 1));
                            state.mailboxes.get_mut(&source).unwrap().remove(index).body
                        } else {
                            state.mailboxes[&source][index].body.clone()
                        };
                        state.append(target, body);
                        format!("OK {name} completed")
                    }
                    None => format!("OK {name} no messages"),
                }
            }
        }
        ("UID STORE", [uid, action, flags @ ..]) => {
            let uid: u32 = uid.parse().unwrap_or(0);
            let deleting = action.starts_with('+') && flags.iter().any(|f| f.contains("\\Deleted"));
            let selected = session.selected.clone().unwrap_or_default();
            if deleting
                && let Some(message) = state
                    .mailboxes
                    .get_mut(&selected)
                    .and_then(|messages| messages.iter_mut().find(|m| m.uid == uid))
            {
                message.deleted = true;
            }
            "OK STORE completed".to_string()
        }
        ("EXPUNGE", []) => {
            let selected = session.selected.clone().unwrap_or_default();
            if let Some(messages) = state.mailboxes.get_mut(&selected) {
                let mut seq = 1;
                messages.retain(|message| {
                    if message.deleted {
                        out.push_str(&format!("* {seq} EXPUNGE\r\n"));
                        false
                    } else {
                        seq += 1;
                        true
                    }
                });
            }
            "OK EXPUNGE completed".to_string()
        }
        _ => "BAD unknown command".to_string(),
    };

    bytes.extend_from_slice(out.as_bytes());
    bytes.extend_from_slice(format!("{tag} {status}\r\n").as_bytes());
    bytes
}

fn parse_range(range: &str, len: usize) -> (usize, usize) {
    let (first, last) = range.split_once(':').unwrap_or((range, range));
    let first = first.parse().unwrap_or(1).max(1);
    let last = if last == "*" {
        len
    } else {
        last.parse().unwrap_or(len).min(len)
    };
    (first, last)
}

/// Connection timeout used by tests that do not exercise timeouts.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a logged-in connection to the mock server.
pub async fn open(server: &MockServer) -> dmarc_imap::ImapConnection {
    dmarc_imap::ImapConnection::open(&server.config(), TIMEOUT)
        .await
        .unwrap()
}
