//! Prepared statement and its cache.
use lru::LruCache;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    Result,
    executor::Executor,
    postgres::{Oid, backend, frontend},
    row::RowDescriptor,
    transport::{PgTransport, PgTransportExt},
};

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const NAME_LEN: usize = 7;

/// Number of distinct names, counters wrap at this value.
const NAME_SPACE: u64 = 36u64.pow(NAME_LEN as u32);

/// Default number of cached statement per connection.
pub const DEFAULT_CACHE_CAPACITY: usize = 24;

/// Fixed width server side object name.
///
/// Names are rendered from a counter with digits then uppercase letters,
/// so names sort in the order they are issued.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Id([u8; NAME_LEN]);

impl Id {
    pub(crate) fn unnamed() -> Self {
        Self([b'?'; NAME_LEN])
    }

    /// Render the `n`th name.
    ///
    /// Only the lower `36^7` counts are distinct, `n` wraps so the name after
    /// `ZZZZZZZ` is `0000000` again. Caller must not reuse a name still prepared.
    pub fn from_counter(n: u64) -> Self {
        let mut n = n % NAME_SPACE;
        let mut buf = [b'0'; NAME_LEN];
        for slot in buf.iter_mut().rev() {
            *slot = ALPHABET[(n % 36) as usize];
            n /= 36;
        }
        Self(buf)
    }

    pub(crate) fn next(atomic: &AtomicU64) -> Self {
        Self::from_counter(atomic.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_str(&self) -> &str {
        if self.is_unnamed() {
            return "";
        }
        // SAFETY: constructed only from ascii alphabet and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }

    pub fn is_unnamed(&self) -> bool {
        self.0[0] == b'?'
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

macro_rules! delegate {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(Id);

        impl $name {
            pub(crate) fn unnamed() -> Self {
                Self(Id::unnamed())
            }

            pub(crate) fn next() -> Self {
                static ID: AtomicU64 = AtomicU64::new(0);
                Self(Id::next(&ID))
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

delegate!(StatementName);
delegate!(PortalName);

/// A parsed statement, with its parameter types and result columns.
///
/// Cloning is cheap, and a statement is never evicted from the cache
/// while a clone is alive.
#[derive(Clone)]
pub struct Statement {
    inner: Arc<Inner>,
}

struct Inner {
    name: StatementName,
    sql: String,
    params: Vec<Oid>,
    columns: Arc<RowDescriptor>,
}

impl Statement {
    pub(crate) fn new(
        name: StatementName,
        sql: String,
        params: Vec<Oid>,
        columns: RowDescriptor,
    ) -> Statement {
        Statement {
            inner: Arc::new(Inner { name, sql, params, columns: Arc::new(columns) }),
        }
    }

    /// Server side name, empty for unnamed statement.
    pub fn name(&self) -> &str {
        self.inner.name.as_str()
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    /// Parameter types as described by the server.
    pub fn params(&self) -> &[Oid] {
        &self.inner.params
    }

    /// Result columns, empty if statement returns no rows.
    pub fn columns(&self) -> &RowDescriptor {
        &self.inner.columns
    }

    pub(crate) fn descriptor(&self) -> &Arc<RowDescriptor> {
        &self.inner.columns
    }

    pub fn is_unnamed(&self) -> bool {
        self.inner.name.is_unnamed()
    }

    fn in_use(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }

    /// Deallocate statement and remove it from the connection cache.
    pub async fn close<E: Executor>(self, exe: E) -> Result<()> {
        let mut io = exe.connection().await?;
        io.ready().await?;
        io.remove_stmt(self.sql());

        if self.is_unnamed() {
            return Ok(());
        }

        io.send(frontend::Close { variant: b'S', name: self.name() });
        io.send(frontend::Sync);
        io.flush().await?;
        io.recv::<backend::CloseComplete>().await?;
        io.recv::<backend::ReadyForQuery>().await?;
        Ok(())
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("name", &self.inner.name)
            .field("sql", &self.inner.sql)
            .field("params", &self.inner.params)
            .finish()
    }
}

/// Statement cache keyed by the exact sql string.
///
/// Capacity is enforced on insert by evicting the least recently used
/// statement that is not in use, so cache may temporarily grow past it.
pub(crate) struct StatementCache {
    cache: LruCache<String, Statement>,
    capacity: usize,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self { cache: LruCache::unbounded(), capacity }
    }

    pub fn get(&mut self, sql: &str) -> Option<Statement> {
        self.cache.get(sql).cloned()
    }

    /// Insert statement, returns evicted statements which should be closed.
    pub fn insert(&mut self, stmt: Statement) -> Vec<Statement> {
        let mut evicted = Vec::new();

        if let Some(old) = self.cache.put(stmt.sql().to_owned(), stmt) {
            evicted.push(old);
        }

        while self.cache.len() > self.capacity {
            let lru = self
                .cache
                .iter()
                .rev()
                .find(|(_, stmt)| !stmt.in_use())
                .map(|(sql, _)| sql.clone());
            let Some(sql) = lru else {
                break;
            };
            evicted.extend(self.cache.pop(&sql));
        }

        evicted
    }

    pub fn remove(&mut self, sql: &str) -> Option<Statement> {
        self.cache.pop(sql)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.cache.iter().any(|(_, stmt)| stmt.name() == name)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("len", &self.cache.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn stmt(sql: &str) -> Statement {
        Statement::new(StatementName::next(), sql.into(), vec![], RowDescriptor::default())
    }

    #[test]
    fn name_rollover() {
        assert_eq!(Id::from_counter(0).as_str(), "0000000");
        assert_eq!(Id::from_counter(9).as_str(), "0000009");
        assert_eq!(Id::from_counter(10).as_str(), "000000A");
        assert_eq!(Id::from_counter(35).as_str(), "000000Z");
        assert_eq!(Id::from_counter(36).as_str(), "0000010");
        assert_eq!(Id::from_counter(36 * 36 - 1).as_str(), "00000ZZ");
        assert_eq!(Id::from_counter(36 * 36).as_str(), "0000100");
    }

    #[test]
    fn name_wraps_after_last() {
        assert_eq!(Id::from_counter(NAME_SPACE - 1).as_str(), "ZZZZZZZ");
        assert_eq!(Id::from_counter(NAME_SPACE), Id::from_counter(0));
        assert_eq!(Id::from_counter(NAME_SPACE + 37).as_str(), "0000011");
        assert_eq!(Id::from_counter(u64::MAX).as_str().len(), 7);
    }

    #[test]
    fn cached_name_is_found() {
        let mut cache = StatementCache::new(2);
        let cached = stmt("SELECT 1");
        let name = cached.name().to_owned();
        cache.insert(cached);
        assert!(cache.contains_name(&name));
        assert!(!cache.contains_name(""));

        cache.remove("SELECT 1");
        assert!(!cache.contains_name(&name));
    }

    #[test]
    fn unnamed_is_empty() {
        assert_eq!(StatementName::unnamed().as_str(), "");
        assert!(!StatementName::next().is_unnamed());
    }

    proptest! {
        #[test]
        fn names_are_ordered(n in 0u64..36u64.pow(7) - 1) {
            let a = Id::from_counter(n);
            let b = Id::from_counter(n + 1);
            prop_assert_eq!(a.as_str().len(), 7);
            prop_assert!(a.as_str().bytes().all(|e| e.is_ascii_digit() || e.is_ascii_uppercase()));
            prop_assert!(a.as_str() < b.as_str());
        }
    }

    #[test]
    fn eviction_skips_in_use() {
        let mut cache = StatementCache::new(2);
        let first = stmt("SELECT 1");
        assert!(cache.insert(first.clone()).is_empty());
        assert!(cache.insert(stmt("SELECT 2")).is_empty());

        let evicted = cache.insert(stmt("SELECT 3"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].sql(), "SELECT 2");

        drop(first);
        let evicted = cache.insert(stmt("SELECT 4"));
        assert_eq!(evicted[0].sql(), "SELECT 1");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn all_in_use_grows() {
        let mut cache = StatementCache::new(0);
        let held = stmt("SELECT 1");
        assert!(cache.insert(held.clone()).is_empty());
        assert_eq!(cache.len(), 1);
        drop(held);
        assert_eq!(cache.insert(stmt("SELECT 2")).len(), 2);
        assert_eq!(cache.len(), 0);
    }
}
