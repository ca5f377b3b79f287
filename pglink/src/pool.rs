//! Database connection pooling.
use std::{
    fmt, io,
    ops::{Deref, DerefMut},
    pin::Pin,
    task::{Context, Poll, ready},
};

use crate::{
    Connection, Result,
    executor::Executor,
    postgres::{BackendProtocol, FrontendProtocol, frontend},
    statement::Statement,
    transaction::TransactionStatus,
    transport::PgTransport,
};

mod config;
mod worker;

pub use config::PoolConfig;

/// Database connection pool.
///
/// Connections are created on demand up to [`PoolConfig::max_size`]. A
/// connection returned to the pool is drained and, if it still holds an
/// unfinished transaction, rolled back before it is handed to the next borrower.
///
/// The pool is driven by a background task, it must be created within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// # async fn app() -> pglink::Result<()> {
/// let pool = pglink::Pool::connect_env().await?;
///
/// let (id,): (i32,) = pglink::query("select 420", &pool).fetch_one().await?;
/// assert_eq!(id, 420);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Pool {
    handle: worker::WorkerHandle,
}

impl Pool {
    /// Create [`Pool`] using config from environment variables and try to create one connection.
    ///
    /// See [`Config::from_env`][crate::Config::from_env].
    pub async fn connect_env() -> Result<Pool> {
        Self::connect_with(PoolConfig::from_env()?).await
    }

    /// Create [`Pool`] and try to create one connection.
    pub async fn connect_with(config: PoolConfig) -> Result<Pool> {
        let pool = Self::connect_lazy_with(config);
        pool.acquire().await?;
        Ok(pool)
    }

    /// Create [`Pool`] without trying to create connection.
    pub fn connect_lazy_with(config: PoolConfig) -> Pool {
        let (handle, worker) = worker::WorkerHandle::new(config);
        tokio::spawn(worker);
        Self { handle }
    }

    /// Borrow a connection.
    ///
    /// Fails immediately with [`PoolError::WaitQueueFull`] if there is no
    /// idle connection and the wait queue is full.
    pub fn acquire(&self) -> PoolConnect {
        PoolConnect { pool: Some(self.clone()) }
    }

    /// Close the pool.
    ///
    /// Borrowers still waiting fail with [`PoolError::Closed`], idle
    /// connections are closed, and borrowed connections are closed when returned.
    pub fn close(&self) {
        self.handle.close();
    }

    fn poll_connection(&mut self, cx: &mut Context) -> Poll<Result<Connection>> {
        self.handle.poll_acquire(cx)
    }
}

impl Executor for Pool {
    type Transport = PoolConnection;

    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        PoolConnect { pool: Some(self) }
    }
}

impl Executor for &Pool {
    type Transport = PoolConnection;

    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        self.acquire()
    }
}

impl Executor for &mut Pool {
    type Transport = PoolConnection;

    type Future = PoolConnect;

    fn connection(self) -> Self::Future {
        self.acquire()
    }
}

/// Future returned from [`Pool::acquire`].
#[derive(Debug)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct PoolConnect {
    pool: Option<Pool>,
}

impl Future for PoolConnect {
    type Output = Result<PoolConnection>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(pool) = self.pool.as_mut() else {
            return Poll::Ready(Err(PoolError::Closed.into()));
        };
        let conn = ready!(pool.poll_connection(cx))?;
        let Some(pool) = self.pool.take() else {
            return Poll::Ready(Err(PoolError::Closed.into()));
        };
        Poll::Ready(Ok(PoolConnection { pool, conn: Some(conn) }))
    }
}

/// A connection borrowed from [`Pool`], returned to the pool on drop.
pub struct PoolConnection {
    pool: Pool,
    conn: Option<Connection>,
}

impl PoolConnection {
    /// Returns the [`Pool`] handle.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Take the connection out of the pool.
    ///
    /// The pool frees the slot and may create a new connection.
    pub fn detach(mut self) -> Option<Connection> {
        let conn = self.conn.take();
        self.pool.handle.detach();
        conn
    }
}

impl Deref for PoolConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        // `conn` only `None` on drop or detach
        self.conn.as_ref().expect("pool connection taken")
    }
}

impl DerefMut for PoolConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pool connection taken")
    }
}

impl Drop for PoolConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.handle.release(conn);
        }
    }
}

impl fmt::Debug for PoolConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("conn", &self.conn)
            .finish()
    }
}

impl PgTransport for PoolConnection {
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        (**self).poll_flush(cx)
    }

    fn poll_recv<B: BackendProtocol>(&mut self, cx: &mut Context) -> Poll<Result<B>> {
        (**self).poll_recv(cx)
    }

    fn poll_ready(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        (**self).poll_ready(cx)
    }

    fn ready_request(&mut self) {
        (**self).ready_request();
    }

    fn send<F: FrontendProtocol>(&mut self, message: F) {
        (**self).send(message);
    }

    fn send_startup(&mut self, startup: frontend::Startup) {
        (**self).send_startup(startup);
    }

    fn transaction_status(&self) -> TransactionStatus {
        PgTransport::transaction_status(&**self)
    }

    fn cache_enabled(&self) -> bool {
        (**self).cache_enabled()
    }

    fn get_stmt(&mut self, sql: &str) -> Option<Statement> {
        (**self).get_stmt(sql)
    }

    fn add_stmt(&mut self, stmt: Statement) {
        (**self).add_stmt(stmt);
    }

    fn remove_stmt(&mut self, sql: &str) -> Option<Statement> {
        (**self).remove_stmt(sql)
    }

    fn has_stmt_name(&self, name: &str) -> bool {
        (**self).has_stmt_name(name)
    }
}

/// An error when borrowing connection from [`Pool`].
///
/// Only the borrow request that observes the error fails.
pub enum PoolError {
    /// Too many borrowers are already waiting.
    WaitQueueFull,
    /// Pool is closed.
    Closed,
}

impl std::error::Error for PoolError { }

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitQueueFull => f.write_str("pool wait queue is full"),
            Self::Closed => f.write_str("pool is closed"),
        }
    }
}

impl fmt::Debug for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
