//! Extended query building blocks.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-EXT-QUERY>
use std::task::{Context, Poll, ready};

use crate::{
    Result,
    encode::Encoded,
    error::TransactionFailed,
    postgres::{BackendMessage, Oid, ProtocolError, backend, frontend},
    row::RowDescriptor,
    sql::ends_failed_transaction,
    statement::{Statement, StatementName},
    transaction::TransactionStatus,
    transport::PgTransport,
    types::TypeInfo,
};

/// Reject statement locally when the transaction is aborted.
///
/// Only statement that ends the transaction block is sent.
pub(crate) fn check_failed_transaction<IO: PgTransport>(io: &IO, sql: &str) -> Result<()> {
    if io.transaction_status() == TransactionStatus::Failed && !ends_failed_transaction(sql) {
        return Err(TransactionFailed.into());
    }
    Ok(())
}

/// Poll based statement preparation.
///
/// On cache miss, `Parse` and `Describe` is sent followed by `Flush`, responses possible:
/// - `ParseComplete`
/// - `ParameterDescription`
/// - `RowDescription` or `NoData`
#[derive(Debug)]
pub(crate) struct Prepare {
    phase: Phase,
    name: StatementName,
    persistent: bool,
    /// `Parse` is sent, the exchange needs to be closed.
    parsed: bool,
    params: Vec<Oid>,
}

#[derive(Debug)]
enum Phase {
    Start,
    ParseComplete,
    ParameterDescription,
    RowDescription,
    Complete,
}

impl Prepare {
    pub fn new(persistent: bool) -> Prepare {
        Prepare {
            phase: Phase::Start,
            name: StatementName::unnamed(),
            persistent,
            parsed: false,
            params: vec![],
        }
    }

    /// Returns `true` if statement is taken from the cache, nothing was sent.
    pub fn is_cached(&self) -> bool {
        !self.parsed
    }

    pub fn poll_prepare<IO: PgTransport>(
        &mut self,
        sql: &str,
        io: &mut IO,
        cx: &mut Context,
    ) -> Poll<Result<Statement>> {
        loop {
            match self.phase {
                Phase::Start => {
                    self.persistent = self.persistent && io.cache_enabled();

                    if self.persistent {
                        if let Some(stmt) = io.get_stmt(sql) {
                            self.phase = Phase::Complete;
                            return Poll::Ready(Ok(stmt));
                        }
                        self.name = StatementName::next();
                        // names wrap around, skip one still in the cache
                        while io.has_stmt_name(self.name.as_str()) {
                            self.name = StatementName::next();
                        }
                    }

                    io.send(frontend::Parse {
                        prepare_name: self.name.as_str(),
                        sql,
                        oids: &[],
                    });
                    io.send(frontend::Describe {
                        kind: b'S',
                        name: self.name.as_str(),
                    });
                    io.send(frontend::Flush);
                    self.parsed = true;
                    self.phase = Phase::ParseComplete;
                },
                Phase::ParseComplete => {
                    ready!(io.poll_recv::<backend::ParseComplete>(cx))?;
                    self.phase = Phase::ParameterDescription;
                },
                Phase::ParameterDescription => {
                    let desc = ready!(io.poll_recv::<backend::ParameterDescription>(cx))?;
                    self.params = desc.oids;
                    self.phase = Phase::RowDescription;
                },
                Phase::RowDescription => {
                    let columns = match ready!(io.poll_recv::<BackendMessage>(cx))? {
                        BackendMessage::RowDescription(rd) => {
                            RowDescriptor::parse(rd)?.with_formats(TypeInfo::format_of)
                        },
                        BackendMessage::NoData(_) => RowDescriptor::default(),
                        f => {
                            io.ready_request();
                            self.phase = Phase::Complete;
                            let err = ProtocolError::unexpected_phase(f.msgtype(), "statement description");
                            return Poll::Ready(Err(err.into()));
                        },
                    };

                    let stmt = Statement::new(
                        self.name.clone(),
                        sql.to_owned(),
                        std::mem::take(&mut self.params),
                        columns,
                    );

                    if self.persistent {
                        io.add_stmt(stmt.clone());
                    }

                    self.phase = Phase::Complete;
                    return Poll::Ready(Ok(stmt));
                },
                Phase::Complete => {
                    return Poll::Ready(Err(ProtocolError::malformed("statement already prepared").into()));
                },
            }
        }
    }
}

/// Prepare statement outside of a query.
pub(crate) async fn prepare<IO: PgTransport>(mut io: IO, sql: &str) -> Result<Statement> {
    std::future::poll_fn(|cx| io.poll_ready(cx)).await?;
    check_failed_transaction(&io, sql)?;

    let mut prepare = Prepare::new(true);
    let stmt = std::future::poll_fn(|cx| prepare.poll_prepare(sql, &mut io, cx)).await?;

    // close the exchange, `Flush` does not end it
    if !prepare.is_cached() {
        io.ready_request();
        std::future::poll_fn(|cx| io.poll_ready(cx)).await?;
    }

    Ok(stmt)
}

/// Write `Bind`, `Execute` messages to `io`.
///
/// Responses possible:
/// - `BindComplete` from `Bind`
/// - `DataRow` from `Execute`
/// - `Execute` phase is always terminated by the appearance of exactly one of these messages:
///   - `CommandComplete`
///   - `EmptyQueryResponse`
///   - `ErrorResponse`
///   - `PortalSuspended`
pub(crate) fn portal<IO: PgTransport>(
    io: &mut IO,
    portal: &str,
    stmt: &Statement,
    params: &Encoded,
    max_row: u32,
) {
    io.send(frontend::Bind {
        portal_name: portal,
        stmt_name: stmt.name(),
        param_formats: &params.formats,
        params: &params.values,
        result_formats: &stmt.columns().formats(),
    });
    io.send(frontend::Execute {
        portal_name: portal,
        max_row,
    });
}
