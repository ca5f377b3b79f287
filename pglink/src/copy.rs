//! Bulk transfer with `COPY`.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-COPY>
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll, ready},
};

use crate::{
    Result,
    common::verbose,
    encode::{EncodeError, Tuple},
    error::CopyAborted,
    executor::Executor,
    postgres::{BackendMessage, PgFormat, ProtocolError, backend, frontend},
    query::ops::check_failed_transaction,
    transport::{PgTransport, PgTransportExt},
    types::Value,
};

/// Pending row data is sent once it grows past this size.
const CHUNK_SIZE: usize = 8 * 1024;

/// Row serialization of [`CopyIn::write_row`].
///
/// The server reports both `text` and `csv` as text format, so it must be
/// set to match the `FORMAT` option of the statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowFormat {
    /// Backslash escapes, `\N` for NULL.
    #[default]
    Text,
    /// Quoted fields, unquoted empty field for NULL.
    Csv,
}

/// Start `COPY ... FROM STDIN`.
///
/// # Example
///
/// ```no_run
/// # async fn app(mut conn: pglink::Connection) -> pglink::Result<()> {
/// let mut copy = pglink::copy_in("copy post(id, name) from stdin", &mut conn).await?;
/// copy.write_row((1, "foo")).await?;
/// copy.write_row((2, "bar")).await?;
/// let rows = copy.finish().await?;
/// assert_eq!(rows, 2);
/// # Ok(())
/// # }
/// ```
pub async fn copy_in<E: Executor>(sql: &str, exe: E) -> Result<CopyIn<E::Transport>> {
    let mut io = exe.connection().await?;
    io.ready().await?;
    check_failed_transaction(&io, sql)?;

    io.send(frontend::Query { sql });
    io.flush().await?;

    let response = match io.recv::<BackendMessage>().await? {
        BackendMessage::CopyInResponse(backend::CopyInResponse(response)) => response,
        f => {
            io.ready_request();
            Err(ProtocolError::unexpected_phase(f.msgtype(), "copy in"))?
        },
    };

    verbose!(columns = response.column_formats.len(), "copy in");

    Ok(CopyIn {
        io,
        format: response.format,
        columns: response.column_formats.len(),
        row_format: RowFormat::Text,
        delimiter: '\t',
        pending: BytesMut::new(),
        line: String::new(),
        done: false,
    })
}

/// Start `COPY ... TO STDOUT`.
///
/// # Example
///
/// ```no_run
/// # async fn app(mut conn: pglink::Connection) -> pglink::Result<()> {
/// use futures::StreamExt;
///
/// let mut copy = pglink::copy_out("copy post to stdout", &mut conn).await?;
/// while let Some(chunk) = copy.next().await {
///     print!("{}", String::from_utf8_lossy(&chunk?));
/// }
/// println!("{} rows", copy.rows_affected());
/// # Ok(())
/// # }
/// ```
pub async fn copy_out<E: Executor>(sql: &str, exe: E) -> Result<CopyOut<E::Transport>> {
    let mut io = exe.connection().await?;
    io.ready().await?;
    check_failed_transaction(&io, sql)?;

    io.send(frontend::Query { sql });
    io.flush().await?;

    let response = match io.recv::<BackendMessage>().await? {
        BackendMessage::CopyOutResponse(backend::CopyOutResponse(response)) => response,
        f => {
            io.ready_request();
            Err(ProtocolError::unexpected_phase(f.msgtype(), "copy out"))?
        },
    };

    Ok(CopyOut {
        io,
        format: response.format,
        rows_affected: 0,
        done: false,
    })
}

/// An in progress `COPY ... FROM STDIN`.
///
/// Dropping before [`finish`][CopyIn::finish] aborts the copy, nothing is committed.
pub struct CopyIn<IO: PgTransport> {
    io: IO,
    format: PgFormat,
    columns: usize,
    row_format: RowFormat,
    delimiter: char,
    pending: BytesMut,
    line: String,
    done: bool,
}

impl<IO: PgTransport> CopyIn<IO> {
    /// Overall copy format requested by the statement.
    pub fn format(&self) -> PgFormat {
        self.format
    }

    /// Number of columns to be copied.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Set the row serialization used by [`write_row`][CopyIn::write_row].
    ///
    /// Also resets the delimiter to the postgres default of the format.
    pub fn set_row_format(&mut self, format: RowFormat) {
        self.row_format = format;
        self.delimiter = match format {
            RowFormat::Text => '\t',
            RowFormat::Csv => ',',
        };
    }

    /// Set the field delimiter used by [`write_row`][CopyIn::write_row].
    ///
    /// Must match the `DELIMITER` option of the statement.
    pub fn set_delimiter(&mut self, delimiter: char) {
        self.delimiter = delimiter;
    }

    /// Send raw data, framing is up to the caller.
    pub async fn send(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        if self.done {
            return Err(CopyAborted.into());
        }
        self.send_pending();
        self.io.send(frontend::CopyData { data: data.as_ref() });
        self.io.flush().await?;
        Ok(())
    }

    /// Serialize and send one row, see [`RowFormat`].
    ///
    /// A row with wrong number of values aborts the copy.
    pub async fn write_row(&mut self, row: impl Into<Tuple>) -> Result<()> {
        if self.done {
            return Err(CopyAborted.into());
        }

        if self.format != PgFormat::Text {
            return Err(EncodeError::CopyFormat.into());
        }

        let row: Tuple = row.into();
        if row.len() != self.columns {
            self.abort("row does not match the number of columns");
            return Err(EncodeError::Count { expected: self.columns, found: row.len() }.into());
        }

        self.line.clear();
        for (i, value) in row.values().iter().enumerate() {
            if i != 0 {
                self.line.push(self.delimiter);
            }
            match self.row_format {
                RowFormat::Text => write_field(value, self.delimiter, &mut self.line),
                RowFormat::Csv => write_csv_field(value, self.delimiter, &mut self.line),
            }
        }
        self.line.push('\n');
        self.pending.extend_from_slice(self.line.as_bytes());

        if self.pending.len() >= CHUNK_SIZE {
            self.send_pending();
            self.io.flush().await?;
        }

        Ok(())
    }

    /// Complete the copy, returns number of rows copied.
    pub async fn finish(mut self) -> Result<u64> {
        if self.done {
            return Err(CopyAborted.into());
        }
        self.done = true;
        self.send_pending();
        self.io.send(frontend::CopyDone);
        self.io.flush().await?;

        let cmd = self.io.recv::<backend::CommandComplete>().await?;
        self.io.recv::<backend::ReadyForQuery>().await?;

        Ok(cmd.rows_affected())
    }

    /// Abort the copy with an error message, nothing is committed.
    pub async fn fail(mut self, message: &str) -> Result<()> {
        if !self.done {
            self.abort(message);
        }
        self.io.ready().await
    }

    fn abort(&mut self, message: &str) {
        verbose!("abort copy in: {message}");
        self.done = true;
        self.pending.clear();
        self.io.send(frontend::CopyFail { message });
        self.io.ready_request();
    }

    fn send_pending(&mut self) {
        if !self.pending.is_empty() {
            let data = self.pending.split().freeze();
            self.io.send(frontend::CopyData { data: &data });
        }
    }
}

/// Text format field, `\N` for NULL.
fn write_field(value: &Value, delimiter: char, out: &mut String) {
    if value.is_null() {
        out.push_str("\\N");
        return;
    }

    let mut text = String::new();
    value.write_text(&mut text);

    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == delimiter => {
                out.push('\\');
                out.push(ch);
            },
            ch => out.push(ch),
        }
    }
}

/// Csv field, quoted when it could be misread.
fn write_csv_field(value: &Value, delimiter: char, out: &mut String) {
    if value.is_null() {
        return;
    }

    let mut text = String::new();
    value.write_text(&mut text);

    let quote = text.is_empty()
        || text == "\\."
        || text.contains(|ch| matches!(ch, '"' | '\n' | '\r') || ch == delimiter);
    if !quote {
        out.push_str(&text);
        return;
    }

    out.push('"');
    for ch in text.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
}

impl<IO: PgTransport> Drop for CopyIn<IO> {
    fn drop(&mut self) {
        if !self.done {
            self.abort("COPY aborted by client");
        }
    }
}

impl<IO: PgTransport> fmt::Debug for CopyIn<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyIn")
            .field("format", &self.format)
            .field("columns", &self.columns)
            .field("row_format", &self.row_format)
            .field("done", &self.done)
            .finish()
    }
}

/// An in progress `COPY ... TO STDOUT`.
///
/// Yields data as sent by the server, in text format each chunk is one row.
pub struct CopyOut<IO: PgTransport> {
    io: IO,
    format: PgFormat,
    rows_affected: u64,
    done: bool,
}

impl<IO: PgTransport> CopyOut<IO> {
    /// Overall copy format requested by the statement.
    pub fn format(&self) -> PgFormat {
        self.format
    }

    /// Number of rows copied, only available after the stream ends.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

impl<IO: PgTransport> Stream for CopyOut<IO> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        while !me.done {
            use BackendMessage::*;
            let message = match ready!(me.io.poll_recv(cx)) {
                Ok(ok) => ok,
                Err(err) => {
                    me.done = true;
                    return Poll::Ready(Some(Err(err)));
                },
            };
            match message {
                CopyData(data) => return Poll::Ready(Some(Ok(data.data))),
                CopyDone(_) => { },
                CommandComplete(cmd) => me.rows_affected = cmd.rows_affected(),
                ReadyForQuery(_) => me.done = true,
                f => {
                    me.done = true;
                    me.io.ready_request();
                    let err = ProtocolError::unexpected_phase(f.msgtype(), "copy out");
                    return Poll::Ready(Some(Err(err.into())));
                },
            }
        }

        Poll::Ready(None)
    }
}

impl<IO: PgTransport> Drop for CopyOut<IO> {
    fn drop(&mut self) {
        if !self.done {
            self.io.ready_request();
        }
    }
}

impl<IO: PgTransport> fmt::Debug for CopyOut<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOut")
            .field("format", &self.format)
            .field("rows_affected", &self.rows_affected)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn field(value: Value) -> String {
        let mut out = String::new();
        write_field(&value, '\t', &mut out);
        out
    }

    #[test]
    fn text_field_escape() {
        assert_eq!(field(Value::Null), "\\N");
        assert_eq!(field(Value::Int4(-7)), "-7");
        assert_eq!(field(Value::Text("a\tb\nc\\".into())), "a\\tb\\nc\\\\");
        assert_eq!(field(Value::Bool(true)), "t");
    }

    fn csv(value: Value) -> String {
        let mut out = String::new();
        write_csv_field(&value, ',', &mut out);
        out
    }

    #[test]
    fn csv_field_quoting() {
        assert_eq!(csv(Value::Null), "");
        assert_eq!(csv(Value::Text("".into())), "\"\"");
        assert_eq!(csv(Value::Int4(12)), "12");
        assert_eq!(csv(Value::Text("plain \\N".into())), "plain \\N");
        assert_eq!(csv(Value::Text("a,b".into())), "\"a,b\"");
        assert_eq!(csv(Value::Text("say \"hi\"".into())), "\"say \"\"hi\"\"\"");
        assert_eq!(csv(Value::Text("two\nlines".into())), "\"two\nlines\"");
        assert_eq!(csv(Value::Text("\\.".into())), "\"\\.\"");
    }

    #[test]
    fn text_field_custom_delimiter() {
        let mut out = String::new();
        write_field(&Value::Text("a,b".into()), ',', &mut out);
        assert_eq!(out, "a\\,b");
    }
}
