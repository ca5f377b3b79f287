use pglink::{encode::EncodeError, error::ErrorKind, postgres::SqlState, transaction::TransactionStatus};

mod common;
use common::{INT4, INT8, TEXT, int4};

#[tokio::test]
async fn fetch_all_with_params() {
    let (mut conn, mut backend) = common::connect().await;

    let sql = "select id, name from users where id > $1";
    let (rows, bind) = tokio::join!(
        pglink::query::<_, _, (i32, String)>(sql, &mut conn).bind(0).fetch_all(),
        async {
            let parse = backend.describe(&[INT4], &[("id", INT4), ("name", TEXT)]).await;
            let bind = backend.bind_execute_sync().await;
            backend.bind_complete().await;
            backend.data_row(&[Some(&int4(1)), Some(b"alice")]).await;
            backend.data_row(&[Some(&int4(2)), Some(b"bob")]).await;
            backend.command_complete("SELECT 2").await;
            backend.ready(b'I').await;
            assert!(!parse.is_empty(), "statement is named");
            bind
        }
    );

    let rows = rows.unwrap();
    assert_eq!(rows, [(1, "alice".to_owned()), (2, "bob".to_owned())]);
    assert_eq!(bind.bind_params(), [Some(int4(0))]);
}

#[tokio::test]
async fn cached_statement_skips_parse() {
    let (mut conn, mut backend) = common::connect().await;
    let sql = "select $1::int8";

    for round in 0..2 {
        let (row, ()) = tokio::join!(
            pglink::query::<_, _, (i64,)>(sql, &mut conn).bind(7i64).fetch_one(),
            async {
                if round == 0 {
                    backend.describe(&[INT8], &[("int8", INT8)]).await;
                }
                backend.bind_execute_sync().await;
                backend.bind_complete().await;
                backend.data_row(&[Some(&7i64.to_be_bytes())]).await;
                backend.command_complete("SELECT 1").await;
                backend.ready(b'I').await;
            }
        );
        assert_eq!(row.unwrap(), (7,));
    }
}

#[tokio::test]
async fn rejected_parameter_is_not_sent() {
    let (mut conn, mut backend) = common::connect().await;
    let sql = "select $1::int4";

    let (result, ()) = tokio::join!(
        pglink::query::<_, _, (i32,)>(sql, &mut conn).bind(true).fetch_one(),
        async {
            backend.describe(&[INT4], &[("int4", INT4)]).await;
        }
    );

    let err = result.unwrap_err();
    match err.kind() {
        ErrorKind::Encode(EncodeError::Type { index, .. }) => assert_eq!(*index, 0),
        _ => panic!("expected encode error, found {err:?}"),
    }

    // abandoned exchange only ends with a `Sync`, then the statement is reused
    let (row, ()) = tokio::join!(
        pglink::query::<_, _, (i32,)>(sql, &mut conn).bind(5).fetch_one(),
        async {
            backend.expect(b'S').await;
            backend.ready(b'I').await;
            let bind = backend.bind_execute_sync().await;
            assert_eq!(bind.bind_params(), [Some(int4(5))]);
            backend.bind_complete().await;
            backend.data_row(&[Some(&int4(5))]).await;
            backend.command_complete("SELECT 1").await;
            backend.ready(b'I').await;
        }
    );
    assert_eq!(row.unwrap(), (5,));
}

#[tokio::test]
async fn wrong_parameter_count() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(
        pglink::execute("insert into t values($1, $2)", &mut conn).bind(1).execute(),
        async {
            backend.describe(&[INT4, INT4], &[]).await;
        }
    );

    let err = result.unwrap_err();
    assert!(
        matches!(err.kind(), ErrorKind::Encode(EncodeError::Count { expected: 2, found: 1 })),
        "{err:?}"
    );
}

#[tokio::test]
async fn execute_rows_affected() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(
        pglink::execute("insert into t values($1)", &mut conn).bind(1).execute(),
        async {
            backend.describe(&[INT4], &[]).await;
            backend.bind_execute_sync().await;
            backend.bind_complete().await;
            backend.command_complete("INSERT 0 1").await;
            backend.ready(b'I').await;
        }
    );

    assert_eq!(result.unwrap().rows_affected, 1);
}

#[tokio::test]
async fn fetch_one_without_row() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(
        pglink::query::<_, _, (i32,)>("select 1 where false", &mut conn).fetch_one(),
        async {
            backend.describe(&[], &[("one", INT4)]).await;
            backend.bind_execute_sync().await;
            backend.bind_complete().await;
            backend.command_complete("SELECT 0").await;
            backend.ready(b'I').await;
        }
    );

    let err = result.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::RowNotFound(_)), "{err:?}");
}

#[tokio::test]
async fn database_error_keeps_connection_usable() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(conn.simple_query("selec 1"), async {
        backend.simple_query().await;
        backend.error("ERROR", "42601", "syntax error at or near \"selec\"").await;
        backend.ready(b'I').await;
    });

    let err = result.unwrap_err();
    assert_eq!(err.code(), Some(&SqlState::SYNTAX_ERROR));
    assert!(!err.is_fatal());
    assert!(!conn.is_closed());

    let (result, ()) = tokio::join!(conn.simple_query("select 1"), async {
        backend.simple_query().await;
        backend.row_description(&[("one", INT4)]).await;
        backend.data_row(&[Some(b"1")]).await;
        backend.command_complete("SELECT 1").await;
        backend.ready(b'I').await;
    });

    let results = result.unwrap();
    assert_eq!(results[0].rows().len(), 1);
    assert_eq!(results[0].rows()[0].try_get::<_, i32>(0).unwrap(), 1);
}

#[tokio::test]
async fn simple_query_multiple_statements() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, sql) = tokio::join!(conn.simple_query("update t set a = 1; select 'x'"), async {
        let sql = backend.simple_query().await;
        backend.command_complete("UPDATE 3").await;
        backend.row_description(&[("text", TEXT)]).await;
        backend.data_row(&[Some(b"x")]).await;
        backend.command_complete("SELECT 1").await;
        backend.ready(b'I').await;
        sql
    });

    let results = result.unwrap();
    assert_eq!(sql, "update t set a = 1; select 'x'");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rows_affected(), 3);
    assert_eq!(results[1].rows()[0].try_get::<_, String>(0).unwrap(), "x");
}

#[tokio::test]
async fn empty_query() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(pglink::execute("", &mut conn).execute(), async {
        backend.describe(&[], &[]).await;
        backend.bind_execute_sync().await;
        backend.bind_complete().await;
        backend.empty_query().await;
        backend.ready(b'I').await;
    });

    let err = result.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::EmptyQuery(_)), "{err:?}");

    let (result, ()) = tokio::join!(conn.simple_query(""), async {
        backend.simple_query().await;
        backend.empty_query().await;
        backend.ready(b'I').await;
    });
    assert!(result.unwrap().is_empty());
}

#[tokio::test]
async fn failed_transaction_rejected_locally() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(conn.simple_query("begin; insert into t values (1)"), async {
        backend.simple_query().await;
        backend.command_complete("BEGIN").await;
        backend.error("ERROR", "23505", "duplicate key value violates unique constraint").await;
        backend.ready(b'E').await;
    });

    assert_eq!(result.unwrap_err().code(), Some(&SqlState::UNIQUE_VIOLATION));

    let err = pglink::execute("insert into t values (2)", &mut conn).execute().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::TransactionFailed(_)), "{err:?}");
    assert_eq!(conn.transaction_status(), TransactionStatus::Failed);

    // nothing is sent for the rejected statement
    let (result, sql) = tokio::join!(conn.simple_query("rollback"), async {
        let sql = backend.simple_query().await;
        backend.command_complete("ROLLBACK").await;
        backend.ready(b'I').await;
        sql
    });

    result.unwrap();
    assert_eq!(sql, "rollback");
    assert!(conn.transaction_status().is_idle());
}

#[tokio::test]
async fn batch_single_sync() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, tags) = tokio::join!(
        pglink::execute("insert into t values($1, $2)", &mut conn).batch([(1, "a"), (2, "b"), (3, "c")]),
        async {
            backend.describe(&[INT4, TEXT], &[]).await;
            let tags = backend.until(b'S').await;
            for _ in 0..3 {
                backend.bind_complete().await;
                backend.command_complete("INSERT 0 1").await;
            }
            backend.ready(b'I').await;
            tags
        }
    );

    let results = result.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|e| e.rows_affected == 1));
    assert_eq!(tags, b"BEBEBES");
}

#[tokio::test]
async fn batch_validated_before_execution() {
    let (mut conn, mut backend) = common::connect().await;

    let (result, ()) = tokio::join!(
        pglink::execute("insert into t values($1)", &mut conn).batch([(1, 1), (2, 2)]),
        async {
            backend.describe(&[INT4], &[]).await;
        }
    );

    let err = result.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Encode(EncodeError::Count { .. })), "{err:?}");

    let (result, ()) = tokio::join!(conn.simple_query("select 1"), async {
        // no `Bind` was sent
        backend.expect(b'S').await;
        backend.ready(b'I').await;
        backend.simple_query().await;
        backend.command_complete("SELECT 0").await;
        backend.ready(b'I').await;
    });
    result.unwrap();
}

#[tokio::test]
async fn evicted_statement_is_closed() {
    let config = common::config().set_statement_cache_capacity(1);
    let (mut conn, mut backend) = common::connect_with(config).await;

    let (row, first) = tokio::join!(
        pglink::query::<_, _, (i32,)>("select 1", &mut conn).fetch_one(),
        async {
            let name = backend.describe(&[], &[("one", INT4)]).await;
            backend.bind_execute_sync().await;
            backend.bind_complete().await;
            backend.data_row(&[Some(&int4(1))]).await;
            backend.command_complete("SELECT 1").await;
            backend.ready(b'I').await;
            name
        }
    );
    assert_eq!(row.unwrap(), (1,));

    let (row, ()) = tokio::join!(
        pglink::query::<_, _, (i32,)>("select 2", &mut conn).fetch_one(),
        async {
            let second = backend.describe(&[], &[("two", INT4)]).await;
            assert_ne!(second, first);

            let close = backend.expect(b'C').await;
            assert_eq!(close.body[0], b'S');
            assert_eq!(&close.body[1..close.body.len() - 1], first.as_bytes());

            backend.bind_execute_sync().await;
            backend.close_complete().await;
            backend.bind_complete().await;
            backend.data_row(&[Some(&int4(2))]).await;
            backend.command_complete("SELECT 1").await;
            backend.ready(b'I').await;
        }
    );
    assert_eq!(row.unwrap(), (2,));
}

#[tokio::test]
async fn cached_prepare_sends_nothing() {
    let (mut conn, mut backend) = common::connect().await;
    let sql = "select $1::int4";

    let (stmt, ()) = tokio::join!(conn.prepare(sql), async {
        backend.describe(&[INT4], &[("int4", INT4)]).await;
        backend.expect(b'S').await;
        backend.ready(b'I').await;
    });
    let stmt = stmt.unwrap();

    let cached = conn.prepare(sql).await.unwrap();
    assert_eq!(cached.name(), stmt.name());

    // next message on the wire is the query itself, no stray `Sync`
    let (result, ()) = tokio::join!(conn.simple_query("select 1"), async {
        backend.simple_query().await;
        backend.command_complete("SELECT 0").await;
        backend.ready(b'I').await;
    });
    result.unwrap();
}
