//! Connection shared between tasks.
use std::{fmt, pin::Pin, sync::Arc};
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore, watch};

use super::Connection;
use crate::{
    Result,
    error::Closed,
    executor::Executor,
    transport::{PgTransport, delegate_transport},
};

/// A clonable handle to a single [`Connection`].
///
/// Callers are serviced one at a time, in the order they request the connection.
///
/// # Example
///
/// ```no_run
/// # async fn app(conn: pglink::Connection) -> pglink::Result<()> {
/// let shared = pglink::connection::SharedConnection::new(conn);
///
/// let handle = shared.clone();
/// tokio::spawn(async move {
///     pglink::execute("insert into post(name) values('foo')", &handle).execute().await
/// });
///
/// let posts: Vec<(String,)> = pglink::query("select name from post", &shared).fetch_all().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SharedConnection {
    gate: Arc<Semaphore>,
    conn: Arc<Mutex<Option<Connection>>>,
    close_rx: watch::Receiver<bool>,
}

impl SharedConnection {
    pub fn new(conn: Connection) -> SharedConnection {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            close_rx: conn.close_notify.subscribe(),
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Wait for the connection.
    pub fn acquire(&self) -> SharedFuture {
        let gate = self.gate.clone();
        let conn = self.conn.clone();
        Box::pin(async move {
            let permit = gate.acquire_owned().await.map_err(|_| Closed)?;
            let conn = OwnedMutexGuard::try_map(conn.lock_owned().await, Option::as_mut)
                .map_err(|_| Closed)?;
            Ok(SharedGuard { conn, _permit: permit })
        })
    }

    /// Close the connection.
    ///
    /// Every caller still waiting for the connection fails with
    /// [`Closed`][crate::error::Closed], then the connection is closed after
    /// the current caller is done, and finally [`closed`][Self::closed] resolves.
    pub async fn close(&self) -> Result<()> {
        self.gate.close();
        let conn = self.conn.lock().await.take();
        match conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }

    /// Resolves when the connection is closed.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.close_rx.clone();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }

    /// Returns `true` if the connection is closed or closing.
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed() || *self.close_rx.borrow()
    }
}

impl From<Connection> for SharedConnection {
    fn from(conn: Connection) -> Self {
        Self::new(conn)
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Future returned by [`SharedConnection::acquire`].
pub type SharedFuture = Pin<Box<dyn Future<Output = Result<SharedGuard>> + Send + 'static>>;

/// Exclusive access to a [`SharedConnection`].
pub struct SharedGuard {
    conn: OwnedMappedMutexGuard<Option<Connection>, Connection>,
    _permit: OwnedSemaphorePermit,
}

delegate_transport!(SharedGuard, conn);

impl std::ops::Deref for SharedGuard {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl std::ops::DerefMut for SharedGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl fmt::Debug for SharedGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.conn, f)
    }
}

impl Executor for &SharedConnection {
    type Transport = SharedGuard;

    type Future = SharedFuture;

    fn connection(self) -> Self::Future {
        self.acquire()
    }
}

impl Executor for SharedConnection {
    type Transport = SharedGuard;

    type Future = SharedFuture;

    fn connection(self) -> Self::Future {
        self.acquire()
    }
}
