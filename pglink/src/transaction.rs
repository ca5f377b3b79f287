//! The [`Transaction`] type.
use crate::{
    Result,
    executor::Executor,
    postgres::frontend,
    query::simple::simple_exec,
    transport::{PgTransport, PgTransportExt, delegate_transport},
};

/// Current transaction status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    #[default]
    Idle,
    /// In a transaction block.
    Active,
    /// In a failed transaction block, queries will be rejected until block is ended.
    Failed,
}

impl TransactionStatus {
    /// Status from `ReadyForQuery` indicator.
    pub fn from_indicator(tx_status: u8) -> Option<Self> {
        match tx_status {
            b'I' => Some(Self::Idle),
            b'T' => Some(Self::Active),
            b'E' => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Begin a transaction.
///
/// See [`Transaction`] for details.
pub async fn begin<E: Executor>(exe: E) -> Result<Transaction<E::Transport>> {
    let mut io = exe.connection().await?;
    io.ready().await?;
    simple_exec(&mut io, "BEGIN").await?;
    Ok(Transaction::new(io))
}

/// An RAII implementation of transaction scope.
///
/// To begin a transaction, use [`begin`] function.
///
/// To commit transaction, use [`Transaction::commit`].
///
/// If not commited, when this structure is dropped, transaction will be rolled back.
///
/// # Example
///
/// ```no_run
/// # async fn test(mut conn: pglink::Connection) -> pglink::Result<()> {
/// let mut tx = pglink::begin(&mut conn).await?;
///
/// pglink::execute("insert into post(name) values('foo')", &mut tx)
///     .execute()
///     .await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct Transaction<IO: PgTransport> {
    io: IO,
    done: bool,
}

impl<IO> Transaction<IO>
where
    IO: PgTransport
{
    pub(crate) fn new(io: IO) -> Self {
        Self { io, done: false }
    }

    /// Commit transaction.
    ///
    /// Committing a failed transaction returns
    /// [`TransactionFailed`][crate::error::TransactionFailed], and the
    /// transaction is rolled back on drop.
    pub async fn commit(mut self) -> Result<()> {
        simple_exec(&mut self.io, "COMMIT").await?;
        self.done = true;
        Ok(())
    }

    /// Rollback transaction.
    pub async fn rollback(mut self) -> Result<()> {
        self.done = true;
        simple_exec(&mut self.io, "ROLLBACK").await?;
        Ok(())
    }

    /// Transaction status of the underlying connection.
    pub fn status(&self) -> TransactionStatus {
        self.io.transaction_status()
    }
}

impl<IO> Drop for Transaction<IO>
where
    IO: PgTransport
{
    fn drop(&mut self) {
        if !self.done {
            self.io.send(frontend::Query { sql: "ROLLBACK" });
            self.io.ready_request();
        }
    }
}

delegate_transport!(impl<IO: PgTransport> Transaction<IO>, io);

impl<IO: PgTransport> std::fmt::Debug for Transaction<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("status", &self.io.transaction_status())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indicator() {
        assert_eq!(TransactionStatus::from_indicator(b'I'), Some(TransactionStatus::Idle));
        assert_eq!(TransactionStatus::from_indicator(b'T'), Some(TransactionStatus::Active));
        assert_eq!(TransactionStatus::from_indicator(b'E'), Some(TransactionStatus::Failed));
        assert_eq!(TransactionStatus::from_indicator(b'?'), None);
    }
}
