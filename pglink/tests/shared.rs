use futures::poll;
use pglink::{connection::SharedConnection, error::ErrorKind};

mod common;
use common::{INT4, int4};

#[tokio::test]
async fn query_through_shared_connection() {
    let (conn, mut backend) = common::connect().await;
    let shared = SharedConnection::new(conn);

    let (row, ()) = tokio::join!(pglink::query::<_, _, (i32,)>("select $1", &shared).bind(3).fetch_one(), async {
        backend.describe(&[INT4], &[("n", INT4)]).await;
        backend.bind_execute_sync().await;
        backend.bind_complete().await;
        backend.data_row(&[Some(&int4(3))]).await;
        backend.command_complete("SELECT 1").await;
        backend.ready(b'I').await;
    });

    assert_eq!(row.unwrap(), (3,));
}

#[tokio::test]
async fn callers_are_serialized() {
    let (conn, _backend) = common::connect().await;
    let shared = SharedConnection::new(conn);

    let guard = shared.acquire().await.unwrap();
    let mut next = shared.acquire();
    assert!(poll!(&mut next).is_pending());

    drop(guard);
    let guard = next.await.unwrap();
    assert_eq!(guard.process_id(), Some(4242));
}

#[tokio::test]
async fn close_waits_for_current_caller() {
    let (conn, mut backend) = common::connect().await;
    let shared = SharedConnection::new(conn);

    let guard = shared.acquire().await.unwrap();
    let mut waiting = shared.acquire();
    assert!(poll!(&mut waiting).is_pending());

    let mut close = Box::pin(shared.close());
    assert!(poll!(&mut close).is_pending());
    assert!(shared.is_closed());

    // waiting callers fail immediately
    let err = waiting.await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Closed(_)), "{err:?}");

    drop(guard);
    let (result, ()) = tokio::join!(close, async {
        backend.expect(b'X').await;
    });
    result.unwrap();
    shared.closed().await;

    let err = shared.acquire().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Closed(_)), "{err:?}");
}
