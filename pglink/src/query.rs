//! Query API types.
use std::marker::PhantomData;

use crate::{
    Result, Row,
    encode::{Encode, Tuple},
    executor::Executor,
    row::RowResult,
    sql::Sql,
    types::Value,
};

mod batch;
mod cursor;
mod fetch;
pub(crate) mod ops;
pub(crate) mod simple;

pub use cursor::{Cursor, RowStream, StreamControl};
pub use fetch::{Execute, FetchAll, FetchOne, FetchOptional, FetchStream};
pub use simple::SimpleQueryResult;

/// Entrypoint of the query API.
///
/// # Example
///
/// ```no_run
/// # async fn app(mut conn: pglink::Connection) -> pglink::Result<()> {
/// let posts: Vec<(i32, String)> = pglink::query("select id, name from post where id > $1", &mut conn)
///     .bind(10)
///     .fetch_all()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub fn query<SQL, Exe, R>(sql: SQL, exe: Exe) -> Query<SQL, Exe, R> {
    Query { sql, exe, params: Vec::new(), _p: PhantomData }
}

/// Same as [`query`] with [`Row`] as the output.
pub fn query_row<SQL, Exe>(sql: SQL, exe: Exe) -> Query<SQL, Exe, Row> {
    Query { sql, exe, params: Vec::new(), _p: PhantomData }
}

/// Same as [`query`] with no output, intended for [`Query::execute`].
pub fn execute<SQL, Exe>(sql: SQL, exe: Exe) -> Query<SQL, Exe, ()> {
    Query { sql, exe, params: Vec::new(), _p: PhantomData }
}

/// The query API.
///
/// Parameters are validated against the types described by the server
/// before the statement is executed.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Query<SQL, Exe, R> {
    sql: SQL,
    exe: Exe,
    params: Vec<Value>,
    _p: PhantomData<fn() -> R>,
}

impl<SQL, Exe, R> Query<SQL, Exe, R> {
    /// Bind query parameter.
    pub fn bind<V: Encode>(mut self, value: V) -> Self {
        self.params.push(value.encode());
        self
    }

    /// Bind every value in tuple as parameters.
    pub fn bind_tuple(mut self, tuple: impl Into<Tuple>) -> Self {
        self.params.extend(Into::<Tuple>::into(tuple).into_values());
        self
    }
}

impl<SQL, Exe, R> Query<SQL, Exe, R>
where
    SQL: Sql,
    Exe: Executor,
{
    /// Fetch rows using [`Stream`][futures_core::Stream] api.
    ///
    /// The returned `Stream` should be polled until completion, otherwise
    /// the rest of the rows are discarded before next query.
    ///
    /// If [`FromRow`][crate::FromRow] implementation returns error,
    /// the error is yielded and the stream ends.
    pub fn fetch(self) -> FetchStream<SQL, Exe::Future, Exe::Transport, R> {
        FetchStream::new(self.sql, self.exe.connection(), self.params, 0)
    }

    /// Fetch all rows into [`Vec`].
    pub fn fetch_all(self) -> FetchAll<SQL, Exe::Future, Exe::Transport, R> {
        FetchAll::new(self.sql, self.exe.connection(), self.params)
    }

    /// Fetch one row.
    ///
    /// Returns [`RowNotFound`][crate::row::RowNotFound] error if no row is returned.
    pub fn fetch_one(self) -> FetchOne<SQL, Exe::Future, Exe::Transport, R> {
        FetchOne::new(self.sql, self.exe.connection(), self.params)
    }

    /// Optionally fetch one row.
    pub fn fetch_optional(self) -> FetchOptional<SQL, Exe::Future, Exe::Transport, R> {
        FetchOptional::new(self.sql, self.exe.connection(), self.params)
    }

    /// Execute statement and return number of rows affected.
    pub fn execute(self) -> Execute<SQL, Exe::Future, Exe::Transport> {
        Execute::new(self.sql, self.exe.connection(), self.params)
    }

    /// Open a server side cursor.
    ///
    /// See [`Cursor`] for details.
    pub async fn cursor(self) -> Result<Cursor<Exe::Transport>> {
        let io = self.exe.connection().await?;
        Cursor::open(io, self.sql, self.params).await
    }

    /// Execute the statement once for every tuple.
    ///
    /// Parameters bound with [`bind`][Query::bind] are ignored. Every tuple
    /// is validated before the first execution.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # async fn app(mut conn: pglink::Connection) -> pglink::Result<()> {
    /// let results = pglink::execute("insert into post(id, name) values($1, $2)", &mut conn)
    ///     .batch([(1, "foo"), (2, "bar")])
    ///     .await?;
    /// assert_eq!(results.len(), 2);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn batch<T>(self, tuples: impl IntoIterator<Item = T>) -> Result<Vec<RowResult>>
    where
        T: Into<Tuple>,
    {
        let tuples = tuples.into_iter().map(Into::into).collect();
        let io = self.exe.connection().await?;
        batch::batch(io, self.sql, tuples).await
    }
}

impl<SQL, Exe, R> IntoFuture for Query<SQL, Exe, R>
where
    SQL: Sql + Unpin,
    Exe: Executor,
{
    type Output = Result<RowResult>;

    type IntoFuture = Execute<SQL, Exe::Future, Exe::Transport>;

    fn into_future(self) -> Self::IntoFuture {
        self.execute()
    }
}

impl<SQL: Sql, Exe, R> std::fmt::Debug for Query<SQL, Exe, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sql", &self.sql.sql())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
