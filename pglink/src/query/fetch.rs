//! Extended query futures and stream.
use futures_core::Stream;
use std::{
    marker::PhantomData,
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll::{self, *},
        ready,
    },
};

use super::ops::{Prepare, check_failed_transaction, portal};
use crate::{
    FromRow, Result, Row,
    encode::encode_params,
    error::EmptyQuery,
    postgres::{
        ProtocolError,
        backend::{self, CommandComplete},
        frontend,
    },
    row::{RowDescriptor, RowNotFound, RowResult},
    sql::Sql,
    statement::Statement,
    transport::PgTransport,
    types::Value,
};

/// Stream of rows from an extended query.
///
/// The stream should be polled until completion. A stream dropped early
/// leaves the rest of its responses to be discarded by the next exchange.
#[must_use = "streams do nothing unless polled"]
pub struct FetchStream<SQL, ExeFut, IO, R> {
    sql: SQL,
    params: Vec<Value>,
    max_row: u32,
    state: State<ExeFut, IO>,
    cmd: Option<CommandComplete>,
    _p: PhantomData<fn() -> R>,
}

enum State<ExeFut, IO> {
    Connect(ExeFut),
    Run { io: IO, phase: Phase },
    Complete,
}

enum Phase {
    Ready,
    Prepare(Prepare),
    Portal(Statement),
    BindComplete(Arc<RowDescriptor>),
    DataRow(Arc<RowDescriptor>),
    ReadyForQuery,
}

impl<SQL, ExeFut, IO, R> FetchStream<SQL, ExeFut, IO, R> {
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Value>, max_row: u32) -> Self {
        Self {
            sql,
            params,
            max_row,
            state: State::Connect(exe),
            cmd: None,
            _p: PhantomData,
        }
    }

    /// Number of rows affected, available after the stream is completed.
    pub fn rows_affected(&self) -> Option<u64> {
        self.cmd.as_ref().map(CommandComplete::rows_affected)
    }
}

impl<SQL, ExeFut, IO, R> FetchStream<SQL, ExeFut, IO, R>
where
    SQL: Sql,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    fn poll_step(&mut self, cx: &mut Context) -> Poll<Result<Option<R>>> {
        loop {
            let (io, phase) = match &mut self.state {
                State::Connect(f) => {
                    let io = ready!(Pin::new(f).poll(cx))?;
                    self.state = State::Run { io, phase: Phase::Ready };
                    continue;
                },
                State::Run { io, phase } => (io, phase),
                State::Complete => return Ready(Ok(None)),
            };

            match phase {
                Phase::Ready => {
                    ready!(io.poll_ready(cx))?;
                    check_failed_transaction(io, self.sql.sql())?;
                    *phase = Phase::Prepare(Prepare::new(self.sql.persistent()));
                },
                Phase::Prepare(prepare) => {
                    let stmt = ready!(prepare.poll_prepare(self.sql.sql(), io, cx))?;
                    *phase = Phase::Portal(stmt);
                },
                Phase::Portal(stmt) => {
                    let encoded = match encode_params(&self.params, stmt.params()) {
                        Ok(ok) => ok,
                        Err(err) => {
                            io.ready_request();
                            return Ready(Err(err.into()));
                        },
                    };
                    portal(io, "", stmt, &encoded, self.max_row);
                    io.send(frontend::Sync);
                    *phase = Phase::BindComplete(stmt.descriptor().clone());
                },
                Phase::BindComplete(desc) => {
                    ready!(io.poll_recv::<backend::BindComplete>(cx))?;
                    *phase = Phase::DataRow(desc.clone());
                },
                Phase::DataRow(desc) => {
                    use backend::BackendMessage::*;
                    match ready!(io.poll_recv(cx))? {
                        DataRow(dr) => {
                            let row = Row::new(desc.clone(), dr).map_err(Into::into).and_then(R::from_row);
                            return match row {
                                Ok(row) => Ready(Ok(Some(row))),
                                Err(err) => {
                                    io.ready_request();
                                    Ready(Err(err.into()))
                                },
                            };
                        },

                        // `Execute` phase terminations:
                        CommandComplete(cmd) => self.cmd = Some(cmd),
                        PortalSuspended(_) => { },
                        EmptyQueryResponse(_) => {
                            io.ready_request();
                            return Ready(Err(EmptyQuery.into()));
                        },
                        f => {
                            io.ready_request();
                            let err = ProtocolError::unexpected_phase(f.msgtype(), "fetching data rows");
                            return Ready(Err(err.into()));
                        },
                    }

                    *phase = Phase::ReadyForQuery;
                },
                Phase::ReadyForQuery => {
                    ready!(io.poll_recv::<backend::ReadyForQuery>(cx))?;
                    self.state = State::Complete;
                },
            }
        }
    }
}

impl<SQL, ExeFut, IO, R> Stream for FetchStream<SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport,
    R: FromRow,
{
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();
        match ready!(me.poll_step(cx)) {
            Ok(Some(row)) => Ready(Some(Ok(row))),
            Ok(None) => Ready(None),
            Err(err) => {
                me.state = State::Complete;
                Ready(Some(Err(err)))
            },
        }
    }
}

impl<SQL, ExeFut, IO, R> std::fmt::Debug for FetchStream<SQL, ExeFut, IO, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchStream")
            .field("params", &self.params)
            .field("max_row", &self.max_row)
            .field("complete", &matches!(self.state, State::Complete))
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchAll<SQL, ExeFut, IO, R> {
    fetch: FetchStream<SQL, ExeFut, IO, R>,
    output: Vec<R>,
}

impl<SQL, ExeFut, IO, R> FetchAll<SQL, ExeFut, IO, R> {
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Value>) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 0),
            output: vec![],
        }
    }
}

impl<SQL, ExeFut, IO, R> Future for FetchAll<SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport,
    R: FromRow + Unpin,
{
    type Output = Result<Vec<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output.push(r);
        }

        Ready(Ok(std::mem::take(&mut me.output)))
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchOne<SQL, ExeFut, IO, R> {
    fetch: FetchStream<SQL, ExeFut, IO, R>,
    output: Option<R>,
}

impl<SQL, ExeFut, IO, R> FetchOne<SQL, ExeFut, IO, R> {
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Value>) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 1),
            output: None,
        }
    }
}

impl<SQL, ExeFut, IO, R> Future for FetchOne<SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport,
    R: FromRow + Unpin,
{
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output = Some(r);
        }

        match me.output.take() {
            Some(row) => Ready(Ok(row)),
            None => Ready(Err(RowNotFound.into())),
        }
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct FetchOptional<SQL, ExeFut, IO, R> {
    fetch: FetchStream<SQL, ExeFut, IO, R>,
    output: Option<R>,
}

impl<SQL, ExeFut, IO, R> FetchOptional<SQL, ExeFut, IO, R> {
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Value>) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 1),
            output: None,
        }
    }
}

impl<SQL, ExeFut, IO, R> Future for FetchOptional<SQL, ExeFut, IO, R>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport,
    R: FromRow + Unpin,
{
    type Output = Result<Option<R>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while let Some(r) = ready!(Pin::new(&mut me.fetch).poll_next(cx)?) {
            me.output = Some(r);
        }

        Ready(Ok(me.output.take()))
    }
}

#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Execute<SQL, ExeFut, IO> {
    fetch: FetchStream<SQL, ExeFut, IO, ()>,
}

impl<SQL, ExeFut, IO> Execute<SQL, ExeFut, IO> {
    pub(crate) fn new(sql: SQL, exe: ExeFut, params: Vec<Value>) -> Self {
        Self {
            fetch: FetchStream::new(sql, exe, params, 0),
        }
    }
}

impl<SQL, ExeFut, IO> Future for Execute<SQL, ExeFut, IO>
where
    SQL: Sql + Unpin,
    ExeFut: Future<Output = Result<IO>> + Unpin,
    IO: PgTransport,
{
    type Output = Result<RowResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let me = self.get_mut();

        while ready!(Pin::new(&mut me.fetch).poll_next(cx)?).is_some() { }

        Ready(Ok(RowResult {
            rows_affected: me.fetch.rows_affected().unwrap_or_default(),
        }))
    }
}
