//! Asynchronous Postgres client
//!
//! # Examples
//!
//! Single connection:
//!
//! ```no_run
//! use pglink::Connection;
//!
//! # async fn app() -> pglink::Result<()> {
//! let mut conn = Connection::connect_env().await?;
//!
//! let res = pglink::query::<_, _, (i32, String)>("SELECT 420, $1", &mut conn)
//!     .bind("Foo")
//!     .fetch_one()
//!     .await?;
//!
//! assert_eq!(res.0, 420);
//! assert_eq!(res.1.as_str(), "Foo");
//! # Ok(())
//! # }
//! ```
//!
//! Database Pooling:
//!
//! ```no_run
//! use pglink::Pool;
//!
//! # async fn app() -> pglink::Result<()> {
//! let pool = Pool::connect_env().await?;
//!
//! pglink::execute("CREATE TEMP TABLE foo(id int)", &pool)
//!     .execute()
//!     .await?;
//!
//! let mut handles = vec![];
//!
//! for i in 0..14 {
//!     let pool = pool.clone();
//!     let t = tokio::spawn(async move {
//!         pglink::execute("INSERT INTO foo(id) VALUES($1)", &pool)
//!             .bind(i)
//!             .execute()
//!             .await
//!     });
//!     handles.push(t);
//! }
//!
//! for h in handles {
//!     h.await.unwrap()?;
//! }
//!
//! let foos = pglink::query::<_, _, (i32,)>("SELECT * FROM foo", &pool)
//!     .fetch_all()
//!     .await?;
//!
//! assert_eq!(foos.len(), 14);
//!
//! # Ok(())
//! # }
//! ```
//!
//! Transaction:
//!
//! ```no_run
//! # async fn app(pool: pglink::Pool) -> pglink::Result<()> {
//! let mut tx = pglink::begin(&pool).await?;
//!
//! pglink::execute("INSERT INTO foo(id) VALUES($1)", &mut tx)
//!     .bind(1)
//!     .execute()
//!     .await?;
//!
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
mod io;
mod net;
mod ext;

// Protocol
pub mod postgres;

// Encoding
pub mod types;
pub mod encode;

// Component
pub mod statement;
pub mod sql;
pub mod row;

// Operation
pub mod transport;
pub mod executor;
pub mod query;
pub mod transaction;
pub mod copy;

// Connection
pub mod connection;
pub mod pool;
pub mod pubsub;

pub mod error;


pub use encode::{Encode, Tuple};
pub use row::{Row, FromRow, Decode, DecodeError};
pub use sql::SqlExt;
pub use types::Value;

pub use executor::Executor;
pub use connection::{Connection, Config};
pub use net::AsyncStream;
pub use pool::{Pool, PoolConfig};
#[doc(inline)]
pub use query::{query, query_row, execute};
pub use transaction::begin;
pub use copy::{copy_in, copy_out};
pub use error::{Error, Result};
