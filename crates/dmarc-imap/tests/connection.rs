//! Integration tests for the IMAP connection against an in-process server.

#![allow(clippy::unwrap_used)]

mod common;

use std::time::{Duration, Instant};

use common::{MockOptions, MockServer, TIMEOUT, open, wait_for};
use dmarc_imap::{ConnectionState, Error, ImapConnection, Uid};

#[tokio::test]
async fn open_logs_in_and_reads_capabilities() {
    let server = MockServer::start(MockOptions::default()).await;
    let connection = open(&server).await;

    assert_eq!(connection.state(), ConnectionState::Ready);
    assert!(connection.capabilities().supports_move());
    assert_eq!(
        server.received(),
        vec![
            "CAPABILITY".to_string(),
            format!("LOGIN {} {}", common::USERNAME, common::PASSWORD),
        ]
    );

    connection.close().await;
    assert_eq!(server.received_named("LOGOUT").len(), 1);
}

#[tokio::test]
async fn wrong_password_fails_open() {
    let server = MockServer::start(MockOptions::default()).await;
    let mut config = server.config();
    config.password = "wrong".to_string();

    let err = ImapConnection::open(&config, TIMEOUT).await.unwrap_err();
    assert!(err.is_server_error(), "unexpected error: {err}");
}

#[tokio::test]
async fn closed_before_greeting_fails_open() {
    let server = MockServer::start(MockOptions {
        refuse_first: 1,
        ..MockOptions::default()
    })
    .await;

    let err = ImapConnection::open(&server.config(), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn same_name_commands_run_in_call_order() {
    let server = MockServer::start(MockOptions::default()).await;
    let connection = open(&server).await;
    server.hold("CREATE");

    let creates = async {
        tokio::join!(
            connection.create("first"),
            connection.create("second"),
            connection.create("third"),
        )
    };
    let control = async {
        wait_for(|| server.received_named("CREATE").len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The other two wait for the first completion before being written
        assert_eq!(server.received_named("CREATE").len(), 1);
        server.release("CREATE", 3);
    };

    let ((first, second, third), ()) = tokio::join!(creates, control);
    first.unwrap();
    second.unwrap();
    third.unwrap();
    assert_eq!(
        server.received_named("CREATE"),
        vec!["CREATE first", "CREATE second", "CREATE third"]
    );
}

#[tokio::test]
async fn different_commands_run_in_parallel() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_mailbox("Old");
    let connection = open(&server).await;
    server.hold("CREATE");

    // DELETE must finish while CREATE is still held, otherwise this hangs
    let (created, ()) = tokio::time::timeout(
        TIMEOUT,
        async {
            tokio::join!(connection.create("New"), async {
                connection.delete("Old").await.unwrap();
                server.release("CREATE", 1);
            })
        },
    )
    .await
    .unwrap();

    created.unwrap();
    assert!(server.has_mailbox("New"));
    assert!(!server.has_mailbox("Old"));
}

#[tokio::test]
async fn silent_server_times_out() {
    let server = MockServer::start(MockOptions::default()).await;
    let timeout = Duration::from_millis(300);
    let connection = ImapConnection::open(&server.config(), timeout)
        .await
        .unwrap();
    server.hold("EXPUNGE");

    let started = Instant::now();
    let err = connection.expunge().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(t) if t == timeout));
    assert!(started.elapsed() >= timeout);

    // The connection itself stays usable
    connection.capability().await.unwrap();
}

#[tokio::test]
async fn chatty_server_does_not_time_out() {
    let server = MockServer::start(MockOptions {
        tick: Some(Duration::from_millis(100)),
        ..MockOptions::default()
    })
    .await;
    let timeout = Duration::from_millis(400);
    let connection = ImapConnection::open(&server.config(), timeout)
        .await
        .unwrap();
    server.hold("EXPUNGE");

    let started = Instant::now();
    let (result, ()) = tokio::join!(connection.expunge(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        server.release("EXPUNGE", 1);
    });

    result.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn graceful_move_uses_move_when_advertised() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_message("INBOX", b"Subject: one\r\n\r\nbody\r\n");
    server.add_mailbox("Archive");
    let connection = open(&server).await;

    assert_eq!(connection.select("INBOX").await.unwrap(), 1);
    let uid = Uid::new(server.uids("INBOX")[0]).unwrap();
    connection.uid_move_graceful(uid, "Archive").await.unwrap();

    assert_eq!(server.received_named("UID MOVE").len(), 1);
    assert!(server.received_named("UID COPY").is_empty());
    assert!(server.received_named("EXPUNGE").is_empty());
    assert!(server.messages("INBOX").is_empty());
    assert_eq!(server.messages("Archive").len(), 1);
    assert_eq!(connection.num_exists(), Some(0));
}

#[tokio::test]
async fn graceful_move_falls_back_to_copy_store_expunge() {
    let server = MockServer::start(MockOptions {
        move_capability: false,
        ..MockOptions::default()
    })
    .await;
    server.add_message("INBOX", b"Subject: one\r\n\r\nbody\r\n");
    server.add_mailbox("Archive");
    let connection = open(&server).await;

    connection.select("INBOX").await.unwrap();
    let uid = Uid::new(server.uids("INBOX")[0]).unwrap();
    connection.uid_move_graceful(uid, "Archive").await.unwrap();

    assert!(server.received_named("UID MOVE").is_empty());
    assert_eq!(
        server.received_named("UID COPY"),
        vec![format!("UID COPY {uid} Archive")]
    );
    assert_eq!(
        server.received_named("UID STORE"),
        vec![format!("UID STORE {uid} +FLAGS.SILENT (\\Deleted)")]
    );
    assert_eq!(server.received_named("EXPUNGE").len(), 1);
    assert!(server.messages("INBOX").is_empty());
    assert_eq!(server.messages("Archive").len(), 1);
}

#[tokio::test]
async fn fetch_results_in_either_attribute_order() {
    for body_first in [false, true] {
        let server = MockServer::start(MockOptions {
            body_first,
            ..MockOptions::default()
        })
        .await;
        server.add_message("INBOX", b"Subject: a\r\n\r\nfirst\r\n");
        server.add_message("INBOX", b"Subject: b\r\n\r\nsecond\r\n");
        let connection = open(&server).await;

        assert_eq!(connection.select("INBOX").await.unwrap(), 2);
        connection.fetch("1:2", "(UID RFC822)").await.unwrap();

        let items = connection.drain_fetched().await;
        assert_eq!(items.len(), 2);
        let uids = server.uids("INBOX");
        for (item, (uid, body)) in items.iter().zip(uids.iter().zip(server.messages("INBOX"))) {
            assert_eq!(item.uid().map(Uid::get), Some(*uid));
            assert_eq!(item.rfc822(), Some(body.as_slice()));
        }
        connection.close().await;
    }
}

#[tokio::test]
async fn create_if_not_exists_only_creates_missing() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_mailbox("Archive");
    let connection = open(&server).await;

    connection.create_if_not_exists("Archive").await.unwrap();
    connection.create_if_not_exists("Invalid").await.unwrap();

    assert_eq!(server.received_named("CREATE"), vec!["CREATE Invalid"]);
    assert!(server.has_mailbox("Invalid"));
}

#[tokio::test]
async fn move_to_missing_mailbox_is_server_error() {
    let server = MockServer::start(MockOptions::default()).await;
    server.add_message("INBOX", b"Subject: x\r\n\r\n");
    let connection = open(&server).await;

    connection.select("INBOX").await.unwrap();
    let uid = Uid::new(server.uids("INBOX")[0]).unwrap();
    match connection.uid_move(uid, "Nowhere").await.unwrap_err() {
        Error::Server { command, status, .. } => {
            assert_eq!(command, "UID MOVE");
            assert_eq!(status, "NO");
        }
        other => panic!("unexpected error: {other}"),
    }
}
