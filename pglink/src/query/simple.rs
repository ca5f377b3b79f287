//! Simple query protocol.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-SIMPLE-QUERY>
use std::{mem, sync::Arc};

use super::ops::check_failed_transaction;
use crate::{
    Result, Row,
    postgres::{BackendMessage, ProtocolError, frontend},
    row::RowDescriptor,
    transport::{PgTransport, PgTransportExt},
};

/// Result of a single statement in a simple query.
///
/// All values are in text format.
#[derive(Debug, Default)]
pub struct SimpleQueryResult {
    columns: Arc<RowDescriptor>,
    rows: Vec<Row>,
    rows_affected: u64,
}

impl SimpleQueryResult {
    /// Result columns, empty if statement returns no rows.
    pub fn columns(&self) -> &RowDescriptor {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

/// Perform a simple query, returns one result per completed statement.
pub(crate) async fn simple_query<IO: PgTransport>(mut io: IO, sql: &str) -> Result<Vec<SimpleQueryResult>> {
    io.ready().await?;
    check_failed_transaction(&io, sql)?;

    io.send(frontend::Query { sql });
    io.flush().await?;

    let mut results = vec![];
    let mut current = SimpleQueryResult::default();

    loop {
        use BackendMessage::*;
        match io.recv().await? {
            RowDescription(rd) => current.columns = Arc::new(RowDescriptor::parse(rd)?),
            DataRow(dr) => current.rows.push(Row::new(current.columns.clone(), dr)?),
            CommandComplete(cmd) => {
                current.rows_affected = cmd.rows_affected();
                results.push(mem::take(&mut current));
            },
            EmptyQueryResponse(_) => { },
            ReadyForQuery(_) => break,
            CopyInResponse(_) => {
                io.send(frontend::CopyFail { message: "COPY FROM STDIN is not supported in simple query" });
            },
            CopyOutResponse(_) | CopyData(_) | CopyDone(_) => { },
            f => {
                io.ready_request();
                Err(ProtocolError::unexpected_phase(f.msgtype(), "simple query"))?
            },
        }
    }

    Ok(results)
}

/// Execute a simple query, returns rows affected by the last statement.
pub(crate) async fn simple_exec<IO: PgTransport>(io: &mut IO, sql: &str) -> Result<u64> {
    let results = simple_query(io, sql).await?;
    Ok(results.last().map(SimpleQueryResult::rows_affected).unwrap_or_default())
}
