use futures::StreamExt;
use md5::{Digest, Md5};
use pglink::{Connection, error::ErrorKind, postgres::SqlState};
use tokio::io::AsyncReadExt;

mod common;
use common::{Backend, config};

#[tokio::test]
async fn startup_parameters() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);
    let config = config().set_application_name("worker");

    let (conn, params) = tokio::join!(Connection::connect_stream(client, &config), async {
        let params = backend.startup().await;
        backend.auth_ok().await;
        backend.ready_startup().await;
        params
    });

    let conn = conn.unwrap();
    assert!(params.contains(&("user".into(), "alice".into())));
    assert!(params.contains(&("database".into(), "app".into())));
    assert!(params.contains(&("application_name".into(), "worker".into())));
    assert!(params.contains(&("client_encoding".into(), "UTF8".into())));

    assert_eq!(conn.parameter("server_version"), Some("17.0"));
    assert_eq!(conn.process_id(), Some(4242));
    assert!(conn.transaction_status().is_idle());
    assert!(conn.cancel_token().is_some());
}

#[tokio::test]
async fn cleartext_password() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);

    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth(3, &[]).await;
        let password = backend.expect(b'p').await;
        assert_eq!(password.first_string(), "secret");
        backend.auth_ok().await;
        backend.ready_startup().await;
    });

    conn.unwrap();
}

#[tokio::test]
async fn md5_password() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);
    let salt = [1, 2, 3, 4];

    let inner = format!("{:x}", Md5::new().chain_update("secret").chain_update("alice").finalize());
    let expected = format!("md5{:x}", Md5::new().chain_update(inner).chain_update(salt).finalize());

    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth(5, &salt).await;
        let password = backend.expect(b'p').await;
        assert_eq!(password.first_string(), expected);
        backend.auth_ok().await;
        backend.ready_startup().await;
    });

    conn.unwrap();
}

#[tokio::test]
async fn scram_rejects_foreign_nonce() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);

    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth(10, b"SCRAM-SHA-256\0\0").await;
        let initial = backend.expect(b'p').await;
        assert_eq!(initial.first_string(), "SCRAM-SHA-256");
        backend.auth(11, b"r=not-the-client-nonce,s=c2FsdA==,i=4096").await;
    });

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(_)), "{err:?}");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn unsupported_authentication() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);

    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth(2, &[]).await;
    });

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(_)), "{err:?}");
}

#[tokio::test]
async fn missing_password() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);
    let config = pglink::Config::new().set_user("alice");

    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth(3, &[]).await;
    });

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Auth(_)), "{err:?}");
}

#[tokio::test]
async fn rejected_by_backend() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);

    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.error("FATAL", "28P01", "password authentication failed").await;
    });

    let err = conn.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::INVALID_PASSWORD));
}

#[tokio::test]
async fn unexpected_message_in_startup() {
    let (client, server) = tokio::io::duplex(4096);
    let mut backend = Backend::new(server);

    let config = config();
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth_ok().await;
        backend.command_complete("SELECT 1").await;
    });

    let err = conn.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Protocol(_)), "{err:?}");
}

#[tokio::test]
async fn fatal_error_closes_connection() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(conn.simple_query("select 1"), async {
        backend.simple_query().await;
        backend.error("FATAL", "57P01", "terminating connection due to administrator command").await;
    });

    let err = result.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::ADMIN_SHUTDOWN));
    assert!(err.is_fatal());
    assert!(conn.is_closed());

    let closed = conn.closed();
    closed.await;

    let err = conn.simple_query("select 1").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Closed(_)), "{err:?}");
}

#[tokio::test]
async fn notice_is_not_an_error() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(conn.simple_query("drop table if exists foo"), async {
        backend.simple_query().await;
        backend.notice("table \"foo\" does not exist, skipping").await;
        backend.command_complete("DROP TABLE").await;
        backend.ready(b'I').await;
    });

    let results = result.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].rows().is_empty());
}

#[tokio::test]
async fn notifications_between_queries() {
    let (mut conn, mut backend) = common::connect().await;
    let mut notifs = conn.notifications();

    let (result, ()) = tokio::join!(conn.simple_query("listen jobs"), async {
        backend.simple_query().await;
        backend.command_complete("LISTEN").await;
        backend.notification(99, "jobs", "first").await;
        backend.ready(b'I').await;
    });
    result.unwrap();

    let notif = notifs.next().await.unwrap();
    assert_eq!(notif.process_id(), 99);
    assert_eq!(notif.channel(), "jobs");
    assert_eq!(notif.payload(), "first");
    assert!(notifs.try_next().is_none());
}

#[tokio::test]
async fn graceful_close() {
    let (conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(conn.close(), async {
        backend.expect(b'X').await;
        assert!(backend.is_eof().await);
    });

    result.unwrap();
}

#[tokio::test]
async fn cancel_running_query() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (mut conn, mut backend) = common::connect_with(config().set_host("127.0.0.1").set_port(port)).await;
    let token = conn.cancel_token().unwrap();

    let (result, ()) = tokio::join!(conn.simple_query("select pg_sleep(10)"), async {
        backend.simple_query().await;

        let (cancelled, request) = tokio::join!(token.cancel(), async {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![];
            socket.read_to_end(&mut request).await.unwrap();
            request
        });
        cancelled.unwrap();

        // length, cancel request code, then the key from BackendKeyData
        assert_eq!(request.len(), 16);
        assert_eq!(&request[..4], &16u32.to_be_bytes());
        assert_eq!(&request[4..8], &80_877_102u32.to_be_bytes());
        assert_eq!(&request[8..12], &4242u32.to_be_bytes());
        assert_eq!(&request[12..], &7u32.to_be_bytes());

        backend.error("ERROR", "57014", "canceling statement due to user request").await;
        backend.ready(b'I').await;
    });

    let err = result.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::QUERY_CANCELED));
    assert!(!conn.is_closed());
}
