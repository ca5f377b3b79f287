//! Incremental fetch over a named portal.
use futures_core::Stream;
use futures_util::task::AtomicWaker;
use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, ready},
};

use super::ops::{Prepare, check_failed_transaction};
use crate::{
    Result, Row,
    common::verbose,
    encode::encode_params,
    error::EmptyQuery,
    postgres::{BackendMessage, ProtocolError, backend, frontend},
    row::RowDescriptor,
    sql::Sql,
    statement::PortalName,
    transport::{PgTransport, PgTransportExt},
    types::Value,
};

/// A server side cursor, rows are fetched incrementally.
///
/// Fetches use `Flush` instead of `Sync`, so a cursor works outside of a
/// transaction block. Other query cannot run on the connection until the
/// cursor is closed or dropped.
///
/// # Example
///
/// ```no_run
/// # async fn app(mut conn: pglink::Connection) -> pglink::Result<()> {
/// let mut cursor = pglink::query_row("select * from post", &mut conn).cursor().await?;
///
/// while cursor.has_more() {
///     for row in cursor.read(64).await? {
///         println!("{row:?}");
///     }
/// }
///
/// cursor.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Cursor<IO: PgTransport> {
    io: IO,
    portal: PortalName,
    desc: Arc<RowDescriptor>,
    lookahead: Option<Row>,
    fetching: Option<Fetching>,
    /// Portal execution is completed.
    done: bool,
    closed: bool,
}

struct Fetching {
    rows: Vec<Row>,
    want: usize,
}

impl<IO: PgTransport> Cursor<IO> {
    pub(crate) async fn open<SQL: Sql>(mut io: IO, sql: SQL, params: Vec<Value>) -> Result<Cursor<IO>> {
        io.ready().await?;
        check_failed_transaction(&io, sql.sql())?;

        let mut prepare = Prepare::new(sql.persistent());
        let stmt = std::future::poll_fn(|cx| prepare.poll_prepare(sql.sql(), &mut io, cx)).await?;

        let encoded = match encode_params(&params, stmt.params()) {
            Ok(ok) => ok,
            Err(err) => {
                io.ready_request();
                return Err(err.into());
            },
        };

        let portal = PortalName::next();
        verbose!("open cursor {portal}");

        io.send(frontend::Bind {
            portal_name: portal.as_str(),
            stmt_name: stmt.name(),
            param_formats: &encoded.formats,
            params: &encoded.values,
            result_formats: &stmt.columns().formats(),
        });
        io.send(frontend::Flush);
        io.recv::<backend::BindComplete>().await?;

        Ok(Cursor {
            io,
            portal,
            desc: stmt.descriptor().clone(),
            lookahead: None,
            fetching: None,
            done: false,
            closed: false,
        })
    }

    /// Returns `true` if there is more row to read.
    pub fn has_more(&self) -> bool {
        !self.closed && (self.lookahead.is_some() || !self.done)
    }

    /// Result columns.
    pub fn columns(&self) -> &RowDescriptor {
        &self.desc
    }

    /// Read at most `n` rows.
    ///
    /// Returns empty [`Vec`] if there is no more row.
    pub async fn read(&mut self, n: u32) -> Result<Vec<Row>> {
        std::future::poll_fn(|cx| self.poll_read(cx, n)).await
    }

    pub(crate) fn poll_read(&mut self, cx: &mut Context, n: u32) -> Poll<Result<Vec<Row>>> {
        if self.closed {
            return Poll::Ready(Ok(vec![]));
        }

        let fetching = match &mut self.fetching {
            Some(fetching) => fetching,
            None => {
                let n = n.max(1) as usize;
                let mut rows = Vec::with_capacity(n + 1);
                rows.extend(self.lookahead.take());

                if self.done {
                    return Poll::Ready(Ok(rows));
                }

                // one more row to know whether there is more
                let want = n - rows.len() + 1;
                self.io.send(frontend::Execute {
                    portal_name: self.portal.as_str(),
                    max_row: u32::try_from(want).unwrap_or(u32::MAX),
                });
                self.io.send(frontend::Flush);
                self.fetching.insert(Fetching { rows, want: n })
            },
        };

        loop {
            use BackendMessage::*;
            let message = match ready!(self.io.poll_recv(cx)) {
                Ok(ok) => ok,
                Err(err) => {
                    self.fetching = None;
                    self.done = true;
                    self.closed = true;
                    return Poll::Ready(Err(err));
                },
            };
            match message {
                DataRow(dr) => {
                    let row = Row::new(self.desc.clone(), dr)?;
                    fetching.rows.push(row);
                    continue;
                },
                PortalSuspended(_) => { },
                CommandComplete(_) => self.done = true,
                EmptyQueryResponse(_) => {
                    self.fetching = None;
                    self.done = true;
                    return Poll::Ready(Err(EmptyQuery.into()));
                },
                f => {
                    self.fetching = None;
                    self.io.ready_request();
                    self.closed = true;
                    let err = ProtocolError::unexpected_phase(f.msgtype(), "cursor fetch");
                    return Poll::Ready(Err(err.into()));
                },
            }
            break;
        }

        let Fetching { mut rows, want } = match self.fetching.take() {
            Some(fetching) => fetching,
            None => return Poll::Ready(Ok(vec![])),
        };

        if rows.len() > want {
            self.lookahead = rows.pop();
        }

        Poll::Ready(Ok(rows))
    }

    /// Close the portal.
    pub async fn close(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.fetching = None;
        self.io.send(frontend::Close { variant: b'P', name: self.portal.as_str() });
        self.io.ready_request();
        self.io.ready().await
    }

    /// Convert to [`Stream`] which fetch `fetch_size` rows at a time.
    pub fn into_stream(self, fetch_size: u32) -> RowStream<IO> {
        RowStream {
            cursor: self,
            fetch_size: fetch_size.max(1),
            buffer: VecDeque::new(),
            control: StreamControl::default(),
        }
    }
}

impl<IO: PgTransport> Drop for Cursor<IO> {
    fn drop(&mut self) {
        if !self.closed {
            self.io.send(frontend::Close { variant: b'P', name: self.portal.as_str() });
            self.io.ready_request();
        }
    }
}

impl<IO: PgTransport> fmt::Debug for Cursor<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("portal", &self.portal)
            .field("has_more", &self.has_more())
            .finish()
    }
}

/// A [`Stream`] of rows from [`Cursor`].
///
/// The stream can be paused with its [`StreamControl`], rows already
/// fetched are still delivered while paused.
pub struct RowStream<IO: PgTransport> {
    cursor: Cursor<IO>,
    fetch_size: u32,
    buffer: VecDeque<Row>,
    control: StreamControl,
}

impl<IO: PgTransport> RowStream<IO> {
    /// Returns a handle to pause and resume the stream, from any thread.
    pub fn control(&self) -> StreamControl {
        self.control.clone()
    }

    /// Returns the underlying cursor, rows buffered but not yet yielded are discarded.
    pub fn into_cursor(self) -> Cursor<IO> {
        self.cursor
    }
}

impl<IO: PgTransport> Stream for RowStream<IO> {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            if let Some(row) = me.buffer.pop_front() {
                return Poll::Ready(Some(Ok(row)));
            }

            if !me.cursor.has_more() {
                return Poll::Ready(None);
            }

            if me.control.inner.paused.load(Ordering::Acquire) {
                me.control.inner.waker.register(cx.waker());
                if me.control.inner.paused.load(Ordering::Acquire) {
                    return Poll::Pending;
                }
            }

            match ready!(me.cursor.poll_read(cx, me.fetch_size)) {
                Ok(rows) => me.buffer.extend(rows),
                Err(err) => return Poll::Ready(Some(Err(err))),
            }
        }
    }
}

impl<IO: PgTransport> fmt::Debug for RowStream<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("cursor", &self.cursor)
            .field("buffered", &self.buffer.len())
            .field("control", &self.control)
            .finish()
    }
}

/// Pause and resume a [`RowStream`].
///
/// Pausing only stops further fetch, a fetch in progress is not interrupted.
#[derive(Clone, Default)]
pub struct StreamControl {
    inner: Arc<ControlInner>,
}

#[derive(Default)]
struct ControlInner {
    paused: AtomicBool,
    waker: AtomicWaker,
}

impl StreamControl {
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        self.inner.waker.wake();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }
}

impl fmt::Debug for StreamControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamControl")
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() { }

    #[test]
    fn control_is_send_sync() {
        assert_send_sync::<StreamControl>();
    }

    #[test]
    fn pause_resume() {
        let control = StreamControl::default();
        let handle = control.clone();
        std::thread::spawn(move || handle.pause()).join().unwrap();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
    }
}
