//! Error reported by the database server.
use bytes::{Buf, Bytes};
use std::fmt;

use super::{ProtocolError, SqlState};
use crate::{common::ByteStr, ext::BytesExt};

/// Severity of an [`ErrorResponse`][super::ErrorResponse] or [`NoticeResponse`][super::NoticeResponse].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
    Panic,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl Severity {
    fn parse(s: &str) -> Option<Severity> {
        let s = match s {
            "ERROR" => Severity::Error,
            "FATAL" => Severity::Fatal,
            "PANIC" => Severity::Panic,
            "WARNING" => Severity::Warning,
            "NOTICE" => Severity::Notice,
            "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "LOG" => Severity::Log,
            _ => return None,
        };
        Some(s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
            Severity::Panic => "PANIC",
            Severity::Warning => "WARNING",
            Severity::Notice => "NOTICE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Log => "LOG",
        }
    }
}

/// Fields of an error or notice reported by the server.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Clone)]
pub struct DatabaseError {
    severity: Severity,
    code: SqlState,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
    internal_position: Option<u32>,
    internal_query: Option<ByteStr>,
    where_: Option<ByteStr>,
    schema: Option<ByteStr>,
    table: Option<ByteStr>,
    column: Option<ByteStr>,
    datatype: Option<ByteStr>,
    constraint: Option<ByteStr>,
    file: Option<ByteStr>,
    line: Option<u32>,
    routine: Option<ByteStr>,
}

impl DatabaseError {
    /// Parse the identified fields of an `ErrorResponse` or `NoticeResponse` body.
    pub fn parse(mut body: Bytes) -> Result<DatabaseError, ProtocolError> {
        let mut severity = None;
        let mut localized = None;
        let mut code = None;
        let mut message = None;
        let mut me = DatabaseError {
            severity: Severity::Error,
            code: SqlState::INTERNAL_ERROR,
            message: ByteStr::default(),
            detail: None,
            hint: None,
            position: None,
            internal_position: None,
            internal_query: None,
            where_: None,
            schema: None,
            table: None,
            column: None,
            datatype: None,
            constraint: None,
            file: None,
            line: None,
            routine: None,
        };

        loop {
            if !body.has_remaining() {
                return Err(ProtocolError::malformed("error fields not terminated"));
            }
            let field = body.get_u8();
            if field == b'\0' {
                break;
            }
            let value = body.get_nul_bytestr()?;
            match field {
                b'V' => severity = Severity::parse(&value),
                b'S' => localized = Severity::parse(&value),
                b'C' => code = SqlState::from_code(&value),
                b'M' => message = Some(value),
                b'D' => me.detail = Some(value),
                b'H' => me.hint = Some(value),
                b'P' => me.position = value.parse().ok(),
                b'p' => me.internal_position = value.parse().ok(),
                b'q' => me.internal_query = Some(value),
                b'W' => me.where_ = Some(value),
                b's' => me.schema = Some(value),
                b't' => me.table = Some(value),
                b'c' => me.column = Some(value),
                b'd' => me.datatype = Some(value),
                b'n' => me.constraint = Some(value),
                b'F' => me.file = Some(value),
                b'L' => me.line = value.parse().ok(),
                b'R' => me.routine = Some(value),
                // frontends should silently ignore fields of unrecognized type
                _ => {}
            }
        }

        me.severity = severity.or(localized).unwrap_or(Severity::Error);
        me.code = code.ok_or(ProtocolError::malformed("error missing sqlstate code"))?;
        me.message = message.ok_or(ProtocolError::malformed("error missing message"))?;
        Ok(me)
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &SqlState {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An optional secondary error message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// An optional suggestion what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Error cursor position as an index into the original query string, counting from 1 in characters.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    pub fn internal_position(&self) -> Option<u32> {
        self.internal_position
    }

    pub fn internal_query(&self) -> Option<&str> {
        self.internal_query.as_deref()
    }

    /// Context in which the error occurred, presented as a call stack traceback.
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }
}

impl std::error::Error for DatabaseError { }

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.severity.as_str(), self.code, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_fields() {
        let body = Bytes::from_static(
            b"SERROR\0VERROR\0C23505\0Mduplicate key value\0Dkey (id)=(1) exists\0P12\0nusers_pkey\0Zfuture\0\0",
        );
        let err = DatabaseError::parse(body).unwrap();
        assert_eq!(err.severity(), Severity::Error);
        assert_eq!(err.code(), &SqlState::UNIQUE_VIOLATION);
        assert_eq!(err.message(), "duplicate key value");
        assert_eq!(err.detail(), Some("key (id)=(1) exists"));
        assert_eq!(err.position(), Some(12));
        assert_eq!(err.constraint(), Some("users_pkey"));
        assert_eq!(err.hint(), None);
    }

    #[test]
    fn missing_terminator() {
        let body = Bytes::from_static(b"SERROR\0C42601\0Msyntax\0");
        assert!(DatabaseError::parse(body).is_err());
    }
}
