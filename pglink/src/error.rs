//! `pglink` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    common::unit_error,
    connection::{AuthError, ConfigError},
    encode::EncodeError,
    pool::PoolError,
    postgres::{DatabaseError, ProtocolError, Severity, SqlState},
    row::{DecodeError, RowNotFound},
};

/// A specialized [`Result`] type for `pglink` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pglink` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Add context to the error message.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Returns `true` if the connection is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed(_))
    }

    /// Returns `true` if the error left the connection unusable.
    pub fn is_fatal(&self) -> bool {
        match &self.kind {
            ErrorKind::Protocol(_) | ErrorKind::Io(_) | ErrorKind::Auth(_) | ErrorKind::Closed(_) => true,
            ErrorKind::Database(db) => matches!(db.severity(), Severity::Fatal | Severity::Panic),
            _ => false,
        }
    }

    /// Returns the SQLSTATE code if error is reported by the database.
    pub fn code(&self) -> Option<&SqlState> {
        match &self.kind {
            ErrorKind::Database(db) => Some(db.code()),
            _ => None,
        }
    }

    /// Returns the database error, if any.
    pub fn as_database(&self) -> Option<&DatabaseError> {
        match &self.kind {
            ErrorKind::Database(db) => Some(db),
            _ => None,
        }
    }
}

/// All possible error kind from `pglink` library.
pub enum ErrorKind {
    Config(ConfigError),
    Protocol(ProtocolError),
    Io(io::Error),
    Database(DatabaseError),
    Decode(DecodeError),
    Encode(EncodeError),
    Auth(AuthError),
    Pool(PoolError),
    RowNotFound(RowNotFound),
    EmptyQuery(EmptyQuery),
    TransactionFailed(TransactionFailed),
    CopyAborted(CopyAborted),
    Closed(Closed),
}

unit_error! {
    /// Query string is empty.
    pub struct EmptyQuery("query string is empty");
}

unit_error! {
    /// Statement rejected because the current transaction is aborted.
    ///
    /// Only `ROLLBACK` is accepted until the transaction block ends.
    pub struct TransactionFailed("current transaction is aborted, commands ignored until end of transaction block");
}

unit_error! {
    /// `COPY` was aborted by an earlier error.
    pub struct CopyAborted("copy aborted");
}

unit_error! {
    /// Connection is closed.
    pub struct Closed("connection closed");
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ConfigError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<DatabaseError>e => ErrorKind::Database(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<EncodeError>e => ErrorKind::Encode(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<PoolError>e => ErrorKind::Pool(e));
from!(<RowNotFound>e => ErrorKind::RowNotFound(e));
from!(<EmptyQuery>e => ErrorKind::EmptyQuery(e));
from!(<TransactionFailed>e => ErrorKind::TransactionFailed(e));
from!(<CopyAborted>e => ErrorKind::CopyAborted(e));
from!(<Closed>e => ErrorKind::Closed(e));

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Encode(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Pool(e) => e.fmt(f),
            Self::RowNotFound(e) => e.fmt(f),
            Self::EmptyQuery(e) => e.fmt(f),
            Self::TransactionFailed(e) => e.fmt(f),
            Self::CopyAborted(e) => e.fmt(f),
            Self::Closed(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification() {
        let err = Error::from(Closed);
        assert!(err.is_closed());
        assert!(err.is_fatal());
        assert!(err.code().is_none());

        let err = Error::from(TransactionFailed);
        assert!(!err.is_fatal());

        let err = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)).context("reading");
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("reading: "));
    }
}
