//! Execute one statement with many parameter sets.
use super::ops::{Prepare, check_failed_transaction, portal};
use crate::{
    Result,
    encode::{Encoded, Tuple, encode_params},
    postgres::{BackendMessage, ProtocolError, backend, frontend},
    row::RowResult,
    sql::Sql,
    transport::{PgTransport, PgTransportExt},
};

/// Parse once, then `Bind` and `Execute` for every tuple followed by a single `Sync`.
///
/// Every tuple is validated before any `Bind` is sent. Outside of a
/// transaction block, the whole batch runs in one implicit transaction.
pub(crate) async fn batch<IO, SQL>(mut io: IO, sql: SQL, tuples: Vec<Tuple>) -> Result<Vec<RowResult>>
where
    IO: PgTransport,
    SQL: Sql,
{
    io.ready().await?;
    check_failed_transaction(&io, sql.sql())?;

    let mut prepare = Prepare::new(sql.persistent());
    let stmt = std::future::poll_fn(|cx| prepare.poll_prepare(sql.sql(), &mut io, cx)).await?;

    let encoded = tuples
        .iter()
        .map(|tuple| encode_params(tuple.values(), stmt.params()))
        .collect::<Result<Vec<Encoded>, _>>();

    let encoded = match encoded {
        Ok(ok) => ok,
        Err(err) => {
            io.ready_request();
            return Err(err.into());
        },
    };

    for params in &encoded {
        portal(&mut io, "", &stmt, params, 0);
    }
    io.send(frontend::Sync);
    io.flush().await?;

    let mut results = Vec::with_capacity(encoded.len());

    for _ in 0..encoded.len() {
        io.recv::<backend::BindComplete>().await?;
        loop {
            use BackendMessage::*;
            match io.recv().await? {
                DataRow(_) => continue,
                CommandComplete(cmd) => results.push(RowResult { rows_affected: cmd.rows_affected() }),
                EmptyQueryResponse(_) => results.push(RowResult::default()),
                f => {
                    io.ready_request();
                    Err(ProtocolError::unexpected_phase(f.msgtype(), "batch execution"))?
                },
            }
            break;
        }
    }

    io.recv::<backend::ReadyForQuery>().await?;

    Ok(results)
}
