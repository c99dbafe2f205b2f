//! End-to-end tests for the polling queue.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{MockOptions, MockServer, wait_for};
use dmarc_imap::{ImapQueue, MessageHandler, QueueFolders};

const MESSAGE: &[u8] = b"From: reports@example.net\r\nSubject: Report\r\n\r\nhello\r\n";

#[derive(Default)]
struct Recorder {
    reject: bool,
    seen: Mutex<Vec<Vec<u8>>>,
}

impl Recorder {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<Vec<u8>> {
        self.seen.lock().unwrap().clone()
    }
}

impl MessageHandler for Recorder {
    type Error = String;

    async fn handle(&self, message: &[u8]) -> Result<(), Self::Error> {
        self.seen.lock().unwrap().push(message.to_vec());
        if self.reject {
            Err("not a report".to_string())
        } else {
            Ok(())
        }
    }
}

fn queue(server: &MockServer, poll_interval: Duration) -> ImapQueue {
    ImapQueue::new(server.config(), QueueFolders::default(), poll_interval)
        .with_timeout(common::TIMEOUT)
}

#[tokio::test]
async fn handled_message_moves_to_done_folder() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_message("INBOX", MESSAGE);
    let handler = Recorder::default();

    let processed = queue(&server, Duration::from_secs(60))
        .poll_once(&handler)
        .await
        .unwrap();

    assert_eq!(processed, 1);
    assert_eq!(handler.seen(), vec![MESSAGE.to_vec()]);
    assert!(server.messages("INBOX").is_empty());
    assert_eq!(server.messages("Archive"), vec![MESSAGE.to_vec()]);
    assert!(server.messages("Invalid").is_empty());
    assert_eq!(server.received_named("FETCH"), vec!["FETCH 1:1 (UID RFC822)"]);
}

#[tokio::test]
async fn rejected_message_moves_to_error_folder() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_message("INBOX", MESSAGE);
    let handler = Recorder::rejecting();

    queue(&server, Duration::from_secs(60))
        .poll_once(&handler)
        .await
        .unwrap();

    assert!(server.messages("INBOX").is_empty());
    assert!(server.messages("Archive").is_empty());
    assert_eq!(server.messages("Invalid"), vec![MESSAGE.to_vec()]);
}

#[tokio::test]
async fn incomplete_fetch_results_stay_in_inbox() {
    for options in [
        MockOptions {
            omit_uid: true,
            ..MockOptions::default()
        },
        MockOptions {
            nil_body: true,
            ..MockOptions::default()
        },
    ] {
        let server = MockServer::start(options).await;
        server.add_message("INBOX", MESSAGE);
        let handler = Recorder::default();

        let processed = queue(&server, Duration::from_secs(60))
            .poll_once(&handler)
            .await
            .unwrap();

        assert_eq!(processed, 0);
        assert!(handler.seen().is_empty());
        assert_eq!(server.messages("INBOX"), vec![MESSAGE.to_vec()]);
        assert!(server.messages("Archive").is_empty());
        assert!(server.messages("Invalid").is_empty());
        assert!(server.received_named("UID MOVE").is_empty());
        assert!(server.received_named("UID COPY").is_empty());
    }
}

#[tokio::test]
async fn empty_inbox_skips_fetch_but_creates_folders() {
    let server = MockServer::start(MockOptions::default()).await;
    let handler = Recorder::default();

    let processed = queue(&server, Duration::from_secs(60))
        .poll_once(&handler)
        .await
        .unwrap();

    assert_eq!(processed, 0);
    assert!(server.has_mailbox("Archive"));
    assert!(server.has_mailbox("Invalid"));
    assert!(server.received_named("FETCH").is_empty());
    assert_eq!(server.received_named("LOGOUT").len(), 1);
}

#[tokio::test]
async fn batch_without_move_capability() {
    let server = MockServer::start(MockOptions {
        move_capability: false,
        ..MockOptions::default()
    })
    .await;
    for i in 0..3 {
        server.add_message("INBOX", format!("Subject: {i}\r\n\r\nbody\r\n").as_bytes());
    }
    let handler = Recorder::default();

    let processed = queue(&server, Duration::from_secs(60))
        .poll_once(&handler)
        .await
        .unwrap();

    assert_eq!(processed, 3);
    assert!(server.messages("INBOX").is_empty());
    assert_eq!(server.messages("Archive").len(), 3);
    assert_eq!(server.received_named("UID COPY").len(), 3);
    assert!(server.received_named("UID MOVE").is_empty());
}

#[tokio::test]
async fn custom_folder_names() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_mailbox("Reports");
    server.add_message("Reports", MESSAGE);
    let folders = QueueFolders {
        inbox: "Reports".to_string(),
        done: "Reports/Done".to_string(),
        error: "Reports/Failed".to_string(),
    };
    let handler = Recorder::default();

    ImapQueue::new(server.config(), folders, Duration::from_secs(60))
        .poll_once(&handler)
        .await
        .unwrap();

    assert_eq!(server.messages("Reports/Done"), vec![MESSAGE.to_vec()]);
    assert!(server.has_mailbox("Reports/Failed"));
    assert!(server.messages("INBOX").is_empty());
}

#[tokio::test]
async fn failed_cycle_is_retried() {
    let server = MockServer::start(MockOptions {
        refuse_first: 1,
        ..MockOptions::default()
    })
    .await;
    server.add_message("INBOX", MESSAGE);
    let handler = Arc::new(Recorder::default());

    let mut queue = queue(&server, Duration::from_millis(100));
    queue.consume(handler.clone());
    assert!(queue.is_consuming());

    wait_for(|| server.messages("Archive").len() == 1).await;
    queue.stop_consumer().await;

    assert!(!queue.is_consuming());
    assert!(server.connections() >= 2);
    assert_eq!(handler.seen().len(), 1);
}

#[tokio::test]
async fn stop_interrupts_sleep() {
    let server = MockServer::start(MockOptions::default()).await;
    let handler = Arc::new(Recorder::default());

    let mut queue = queue(&server, Duration::from_secs(3600));
    queue.consume(handler);
    wait_for(|| server.received_named("LOGOUT").len() == 1).await;

    tokio::time::timeout(Duration::from_secs(2), queue.stop_consumer())
        .await
        .unwrap();
    assert_eq!(server.connections(), 1);
}
