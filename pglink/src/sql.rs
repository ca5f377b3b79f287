//! Sql string operation.

/// Type that represent sql string.
pub trait Sql {
    /// Returns sql string.
    fn sql(&self) -> &str;

    /// Return `true` if statement should be cached.
    fn persistent(&self) -> bool;
}

impl Sql for &str {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

impl Sql for String {
    fn sql(&self) -> &str {
        self
    }

    fn persistent(&self) -> bool {
        true
    }
}

/// Sql string which is parsed as unnamed statement and never cached.
#[derive(Debug, Clone, Copy)]
pub struct SqlOnce<'sql>(&'sql str);

impl Sql for SqlOnce<'_> {
    fn sql(&self) -> &str {
        self.0
    }

    fn persistent(&self) -> bool {
        false
    }
}

/// Extension trait for easier statement caching config.
pub trait SqlExt<'a> {
    /// Disable statement caching.
    fn once(self) -> SqlOnce<'a>;
}

impl<'a> SqlExt<'a> for &'a str {
    fn once(self) -> SqlOnce<'a> {
        SqlOnce(self)
    }
}

impl<'a> SqlExt<'a> for SqlOnce<'a> {
    fn once(self) -> SqlOnce<'a> {
        self
    }
}

/// Returns `true` if statement ends a failed transaction block.
///
/// While transaction is failed, postgres ignores every other command.
pub(crate) fn ends_failed_transaction(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|e: char| e.is_ascii_whitespace() || e == ';')
        .next()
        .unwrap_or_default();
    keyword.eq_ignore_ascii_case("ROLLBACK") || keyword.eq_ignore_ascii_case("ABORT")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rollback_keyword() {
        assert!(ends_failed_transaction("ROLLBACK"));
        assert!(ends_failed_transaction("  rollback to savepoint a"));
        assert!(ends_failed_transaction("abort;"));
        assert!(!ends_failed_transaction("ROLLBACKS"));
        assert!(!ends_failed_transaction("SELECT 1"));
        assert!(!SqlExt::once("SELECT 1").persistent());
    }
}
