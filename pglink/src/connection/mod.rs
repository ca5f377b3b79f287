//! Postgres connection.
use bytes::{Buf, Bytes, BytesMut};
use std::{
    collections::HashMap,
    fmt, io,
    task::{Context, Poll, ready},
};
use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, watch},
};

use crate::{
    Result,
    common::{ByteStr, trace, verbose},
    error::Closed,
    net::{AsyncStream, Socket},
    postgres::{
        BackendProtocol, ErrorResponse, FrontendProtocol, NoticeResponse, ProtocolError,
        Severity,
        backend::{self, BackendKeyData},
        frontend,
    },
    pubsub::{Notification, Notifications},
    query::simple::{SimpleQueryResult, simple_query},
    statement::{Statement, StatementCache},
    transaction::TransactionStatus,
    transport::{PgTransport, PgTransportExt},
};

mod auth;
mod cancel;
mod config;
mod shared;
mod startup;

pub use auth::AuthError;
pub use cancel::CancelToken;
pub use config::{Config, ConfigError, ConnectFuture, Connector};
pub use shared::{SharedConnection, SharedFuture, SharedGuard};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Postgres connection.
///
/// A connection handle one exchange at a time, an exchange that is dropped
/// before completion is drained before the next one starts.
///
/// # Example
///
/// ```no_run
/// # async fn app() -> pglink::Result<()> {
/// let mut conn = pglink::Connection::connect_env().await?;
///
/// let (id,): (i32,) = pglink::query("select 420", &mut conn).fetch_one().await?;
/// assert_eq!(id, 420);
///
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    socket: Socket,
    read_buf: BytesMut,
    write_buf: BytesMut,

    stmts: StatementCache,
    cache_enabled: bool,

    key_data: Option<BackendKeyData>,
    config: Option<Config>,
    parameters: HashMap<ByteStr, ByteStr>,
    tx_status: TransactionStatus,

    /// `Sync` or `Query` sent without its `ReadyForQuery` received.
    syncs_inflight: usize,
    /// Cache eviction `Close` sent without its `CloseComplete` received.
    closes_inflight: usize,
    draining: bool,
    closed: bool,

    close_notify: watch::Sender<bool>,
    notifications: Option<mpsc::UnboundedSender<Notification>>,
}

impl Connection {
    /// Connect to the database using given config.
    pub async fn connect(config: &Config) -> Result<Connection> {
        Self::connect_with(config.clone()).await
    }

    /// Connect to the database using config from environment variables.
    ///
    /// See [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_with(Config::from_env()?).await
    }

    /// Connect to the database using given owned config.
    pub async fn connect_with(config: Config) -> Result<Connection> {
        config.validate()?;

        let socket = match config.socket() {
            Some(dir) => {
                let path = format!("{dir}/.s.PGSQL.{}", config.port());
                Socket::connect_socket(&path).await?
            },
            None => Socket::connect_tcp(config.host(), config.port()).await?,
        };

        Self::handshake(socket, config).await
    }

    /// Perform startup handshake over an already established stream.
    ///
    /// This can be used with TLS stream.
    pub async fn connect_stream<S: AsyncStream>(stream: S, config: &Config) -> Result<Connection> {
        config.validate()?;
        Self::handshake(Socket::from_stream(stream), config.clone()).await
    }

    async fn handshake(socket: Socket, config: Config) -> Result<Connection> {
        let mut me = Self::new(socket, &config);
        me.key_data = startup::startup(&config, &mut me).await?;
        me.config = Some(config);
        trace!("connected, process id {:?}", me.process_id());
        Ok(me)
    }

    fn new(socket: Socket, config: &Config) -> Connection {
        let capacity = match config.statement_cache() {
            true => config.statement_cache_capacity(),
            false => 0,
        };
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            stmts: StatementCache::new(capacity),
            cache_enabled: config.statement_cache(),
            key_data: None,
            config: None,
            parameters: HashMap::new(),
            tx_status: TransactionStatus::Idle,
            syncs_inflight: 0,
            closes_inflight: 0,
            draining: false,
            closed: false,
            close_notify: watch::Sender::new(false),
            notifications: None,
        }
    }

    /// Gracefully close the connection.
    ///
    /// Closing an already closed connection is a no-op.
    pub async fn close(mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.send(frontend::Terminate);
        let result = self.flush().await;
        self.mark_closed();
        result?;
        self.socket.shutdown().await?;
        Ok(())
    }

    /// Prepare a named statement.
    ///
    /// The statement is cached, subsequent call with the same sql returns the cached statement.
    pub async fn prepare(&mut self, sql: &str) -> Result<Statement> {
        crate::query::ops::prepare(self, sql).await
    }

    /// Execute a simple query, which may contain multiple statements.
    ///
    /// All values are returned in text format.
    pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<SimpleQueryResult>> {
        simple_query(self, sql).await
    }

    /// Returns a token that can cancel the query currently being processed.
    ///
    /// Returns `None` if the backend did not send cancellation key.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        let key = self.key_data?;
        Some(CancelToken::new(self.config.clone(), key.process_id, key.secret_key))
    }

    /// Returns a stream of asynchronous notifications.
    ///
    /// Notifications are only received while the connection reads from the
    /// backend. Calling this again replaces the previous stream, which then ends.
    pub fn notifications(&mut self) -> Notifications {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notifications = Some(tx);
        Notifications::new(rx)
    }

    /// Resolves when the connection is closed.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.close_notify.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Run-time parameter reported by the backend.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(ByteStr::as_str)
    }

    /// Backend process id.
    pub fn process_id(&self) -> Option<u32> {
        self.key_data.map(|e| e.process_id)
    }

    /// Transaction status reported by the last `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    /// Returns `true` if the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drain any pending exchange and rollback if a transaction is left open.
    pub(crate) async fn recycle(&mut self) -> Result<()> {
        self.ready().await?;
        if !self.tx_status.is_idle() {
            self.send(frontend::Query { sql: "ROLLBACK" });
            self.ready_request();
            self.ready().await?;
        }
        if !self.tx_status.is_idle() {
            return Err(ProtocolError::malformed("transaction still open after ROLLBACK").into());
        }
        Ok(())
    }

    /// Poll to read asynchronous messages while no exchange is in progress.
    ///
    /// Only returns on error.
    pub(crate) fn poll_idle(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        ready!(self.poll_ready(cx))?;
        loop {
            let (msgtype, body) = ready!(self.poll_message(cx))?;
            match self.dispatch(msgtype, body) {
                Ok(None) => {},
                Ok(Some((ErrorResponse::MSGTYPE, body))) => {
                    let err = match ErrorResponse::decode(ErrorResponse::MSGTYPE, body)
                        .and_then(ErrorResponse::to_db_error)
                    {
                        Ok(db) => db.into(),
                        Err(err) => err.into(),
                    };
                    self.mark_closed();
                    return Poll::Ready(Err(err));
                },
                Ok(Some((msgtype, _))) => {
                    let err = ProtocolError::unexpected_phase(msgtype, "idle");
                    return Poll::Ready(Err(self.fatal(err.into())));
                },
                Err(err) => return Poll::Ready(Err(self.fatal(err))),
            }
        }
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            verbose!("connection closed");
            self.closed = true;
            self.notifications = None;
            self.close_notify.send_replace(true);
        }
    }

    fn fatal(&mut self, err: crate::Error) -> crate::Error {
        self.mark_closed();
        err
    }

    /// Read a single message frame.
    fn poll_message(&mut self, cx: &mut Context) -> Poll<Result<(u8, Bytes)>> {
        loop {
            if let Some(header) = self.read_buf.get(..5) {
                let msgtype = header[0];
                let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;

                if len < 4 {
                    let err = ProtocolError::malformed("message length less than 4");
                    return Poll::Ready(Err(self.fatal(err.into())));
                }

                if self.read_buf.len() > len {
                    self.read_buf.advance(5);
                    let body = self.read_buf.split_to(len - 4).freeze();
                    verbose!("(B){}", crate::postgres::BackendMessage::message_name(msgtype));
                    return Poll::Ready(Ok((msgtype, body)));
                }

                self.read_buf.reserve(1 + len - self.read_buf.len());
            } else {
                self.read_buf.reserve(DEFAULT_BUF_CAPACITY);
            }

            match ready!(crate::io::poll_read(&mut self.socket, &mut self.read_buf, cx)) {
                Ok(0) => {
                    let err = io::Error::from(io::ErrorKind::UnexpectedEof);
                    return Poll::Ready(Err(self.fatal(err.into())));
                },
                Ok(_) => {},
                Err(err) => return Poll::Ready(Err(self.fatal(err.into()))),
            }
        }
    }

    /// Handle asynchronous and bookkeeping messages.
    ///
    /// Returns `None` if message is consumed.
    fn dispatch(&mut self, msgtype: u8, body: Bytes) -> Result<Option<(u8, Bytes)>> {
        match msgtype {
            NoticeResponse::MSGTYPE => {
                let notice = NoticeResponse::decode(msgtype, body)?.to_db_error()?;
                #[cfg(feature = "log")]
                log::warn!("{notice}");
                let _ = notice;
            },
            backend::ParameterStatus::MSGTYPE => {
                let status = backend::ParameterStatus::decode(msgtype, body)?;
                self.parameters.insert(status.name, status.value);
            },
            backend::NotificationResponse::MSGTYPE => {
                let notif = backend::NotificationResponse::decode(msgtype, body)?;
                if let Some(tx) = &self.notifications {
                    if tx.send(Notification::from(notif)).is_err() {
                        self.notifications = None;
                    }
                }
            },
            backend::CloseComplete::MSGTYPE if self.closes_inflight > 0 => {
                self.closes_inflight -= 1;
            },
            backend::ReadyForQuery::MSGTYPE => {
                let rfq = backend::ReadyForQuery::decode(msgtype, body.clone())?;
                self.tx_status = TransactionStatus::from_indicator(rfq.tx_status)
                    .ok_or(ProtocolError::malformed("unknown transaction status indicator"))?;
                self.syncs_inflight = self.syncs_inflight.saturating_sub(1);
                if self.syncs_inflight == 0 {
                    // every response before the last sync point is received
                    self.closes_inflight = 0;
                }
                return Ok(Some((msgtype, body)));
            },
            _ => return Ok(Some((msgtype, body))),
        }
        Ok(None)
    }
}

impl PgTransport for Connection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        if self.write_buf.is_empty() {
            return Poll::Ready(Ok(()));
        }
        let result = ready!(crate::io::poll_write_all(&mut self.socket, &mut self.write_buf, cx));
        if result.is_err() {
            self.mark_closed();
        }
        Poll::Ready(result)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        if self.closed {
            return Poll::Ready(Err(Closed.into()));
        }

        ready!(self.poll_flush(cx))?;

        loop {
            let (msgtype, body) = ready!(self.poll_message(cx))?;

            let (msgtype, body) = match self.dispatch(msgtype, body) {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(err) => return Poll::Ready(Err(self.fatal(err))),
            };

            if msgtype == ErrorResponse::MSGTYPE {
                let db = match ErrorResponse::decode(msgtype, body).and_then(ErrorResponse::to_db_error) {
                    Ok(db) => db,
                    Err(err) => return Poll::Ready(Err(self.fatal(err.into()))),
                };
                verbose!("(B)ErrorResponse: {db}");
                if matches!(db.severity(), Severity::Fatal | Severity::Panic) {
                    self.mark_closed();
                } else {
                    // backend skips messages until Sync
                    self.ready_request();
                }
                return Poll::Ready(Err(db.into()));
            }

            return Poll::Ready(B::decode(msgtype, body).map_err(|err| self.fatal(err.into())));
        }
    }

    fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        if self.closed {
            return Poll::Ready(Err(Closed.into()));
        }

        while self.draining {
            if self.syncs_inflight == 0 {
                self.draining = false;
                break;
            }

            ready!(self.poll_flush(cx))?;
            let (msgtype, body) = ready!(self.poll_message(cx))?;

            // responses of abandoned exchange, including its error, are discarded
            if let Err(err) = self.dispatch(msgtype, body) {
                return Poll::Ready(Err(self.fatal(err)));
            }
        }

        ready!(self.poll_flush(cx))?;
        Poll::Ready(Ok(()))
    }

    fn ready_request(&mut self) {
        if self.syncs_inflight == 0 {
            self.send(frontend::Sync);
        }
        self.draining = true;
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        // Sync and Query, each answered by exactly one ReadyForQuery
        if matches!(F::MSGTYPE, b'S' | b'Q') {
            self.syncs_inflight += 1;
        }
        verbose!("(F){}", F::MSGTYPE as char);
        frontend::write(message, &mut self.write_buf);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        startup.write(&mut self.write_buf);
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    fn get_stmt(&mut self, sql: &str) -> Option<Statement> {
        self.stmts.get(sql)
    }

    fn add_stmt(&mut self, stmt: Statement) {
        for evicted in self.stmts.insert(stmt) {
            if !evicted.is_unnamed() {
                verbose!("evict statement {}", evicted.name());
                self.send(frontend::Close { variant: b'S', name: evicted.name() });
                self.closes_inflight += 1;
            }
        }
    }

    fn remove_stmt(&mut self, sql: &str) -> Option<Statement> {
        self.stmts.remove(sql)
    }

    fn has_stmt_name(&self, name: &str) -> bool {
        self.stmts.contains_name(name)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket)
            .field("process_id", &self.process_id())
            .field("tx_status", &self.tx_status)
            .field("stmts", &self.stmts)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
