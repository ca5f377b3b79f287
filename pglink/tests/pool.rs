use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use futures::poll;
use pglink::{
    Connection, PoolConfig,
    connection::ConnectFuture,
    error::ErrorKind,
    pool::PoolError,
    transaction::TransactionStatus,
};
use tokio::sync::mpsc;

mod common;
use common::{Backend, accept};

#[tokio::test]
async fn released_connection_is_rolled_back() {
    let (connector, mut backends) = common::connector();
    let pool = PoolConfig::new(connector).max_size(1).connect_lazy();

    let (conn, mut backend) = tokio::join!(pool.acquire(), accept(&mut backends));
    let mut conn = conn.unwrap();

    let (result, ()) = tokio::join!(conn.simple_query("BEGIN"), async {
        backend.simple_query().await;
        backend.command_complete("BEGIN").await;
        backend.ready(b'T').await;
    });
    result.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Active);

    drop(conn);

    let (conn, ()) = tokio::join!(pool.acquire(), async {
        assert_eq!(backend.simple_query().await, "ROLLBACK");
        backend.command_complete("ROLLBACK").await;
        backend.ready(b'I').await;
    });

    let conn = conn.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.process_id(), Some(4242));
}

#[tokio::test]
async fn connection_is_reused() {
    let (connector, mut backends) = common::connector();
    let pool = PoolConfig::new(connector).max_size(2).connect_lazy();

    let (conn, _backend) = tokio::join!(pool.acquire(), accept(&mut backends));
    drop(conn.unwrap());

    // idle connection is handed out without connecting again
    let conn = pool.acquire().await.unwrap();
    assert!(!conn.is_closed());
    assert!(backends.try_recv().is_err());
}

#[tokio::test]
async fn wait_queue_full() {
    let (connector, mut backends) = common::connector();
    let pool = PoolConfig::new(connector).max_size(1).max_wait_queue(1).connect_lazy();

    let (first, _backend) = tokio::join!(pool.acquire(), accept(&mut backends));
    let first = first.unwrap();

    let mut second = pool.acquire();
    assert!(poll!(&mut second).is_pending());

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Pool(PoolError::WaitQueueFull)), "{err:?}");

    drop(first);
    let second = second.await.unwrap();
    assert!(second.transaction_status().is_idle());
}

#[tokio::test]
async fn connect_error_only_fails_its_borrower() {
    let (tx, mut backends) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));

    let connector = {
        let attempts = attempts.clone();
        move || -> ConnectFuture {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                let err = io::Error::from(io::ErrorKind::ConnectionRefused);
                return Box::pin(async move { Err::<Connection, pglink::Error>(err.into()) });
            }
            let (client, server) = tokio::io::duplex(64 * 1024);
            let _ = tx.send(Backend::new(server));
            Box::pin(async move { Connection::connect_stream(client, &common::config()).await })
        }
    };

    let pool = PoolConfig::new(connector).max_size(1).connect_lazy();

    let mut first = pool.acquire();
    let mut second = pool.acquire();
    assert!(poll!(&mut first).is_pending());
    assert!(poll!(&mut second).is_pending());

    let err = first.await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Io(_)), "{err:?}");

    // the waiting borrower triggers a new attempt
    let (second, _backend) = tokio::join!(second, accept(&mut backends));
    second.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn close_pool() {
    let (connector, mut backends) = common::connector();
    let pool = PoolConfig::new(connector).max_size(1).connect_lazy();

    let (first, mut backend) = tokio::join!(pool.acquire(), accept(&mut backends));
    let first = first.unwrap();

    let mut waiting = pool.acquire();
    assert!(poll!(&mut waiting).is_pending());

    pool.close();

    let err = waiting.await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Pool(PoolError::Closed)), "{err:?}");

    // borrowed connection is closed when returned
    drop(first);
    backend.expect(b'X').await;

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Pool(PoolError::Closed)), "{err:?}");
}

#[tokio::test]
async fn lost_idle_connection_is_replaced() {
    let (connector, mut backends) = common::connector();
    let pool = PoolConfig::new(connector).max_size(1).connect_lazy();

    let (conn, backend) = tokio::join!(pool.acquire(), accept(&mut backends));
    drop(conn.unwrap());

    // backend goes away while the connection is idle
    drop(backend);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (conn, _backend) = tokio::join!(pool.acquire(), accept(&mut backends));
    assert!(!conn.unwrap().is_closed());
}
