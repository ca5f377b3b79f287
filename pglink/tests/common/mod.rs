//! Scripted postgres backend over an in-memory stream.
#![allow(dead_code)]
use bytes::{Buf, BufMut, Bytes, BytesMut};
use pglink::{
    Config, Connection,
    connection::{ConnectFuture, Connector},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc,
};

pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const INT8: u32 = 20;

pub fn config() -> Config {
    Config::new().set_user("alice").set_password("secret").set_dbname("app")
}

/// Connect a client to a backend that accepts without password.
pub async fn connect() -> (Connection, Backend) {
    connect_with(config()).await
}

pub async fn connect_with(config: Config) -> (Connection, Backend) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut backend = Backend::new(server);
    let (conn, ()) = tokio::join!(Connection::connect_stream(client, &config), async {
        backend.startup().await;
        backend.auth_ok().await;
        backend.ready_startup().await;
    });
    (conn.unwrap(), backend)
}

/// A [`Connector`] which hands the backend of every new connection to the test.
///
/// Each backend must [`accept`][Backend::accept] for the connection to complete.
pub fn connector() -> (impl Connector, mpsc::UnboundedReceiver<Backend>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connector = move || -> ConnectFuture {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _ = tx.send(Backend::new(server));
        Box::pin(async move { Connection::connect_stream(client, &config()).await })
    };
    (connector, rx)
}

/// Wait for the next connection of [`connector`] and complete its startup.
pub async fn accept(backends: &mut mpsc::UnboundedReceiver<Backend>) -> Backend {
    let mut backend = backends.recv().await.unwrap();
    backend.accept().await;
    backend
}

/// A frontend message.
#[derive(Debug)]
pub struct Message {
    pub tag: u8,
    pub body: Bytes,
}

impl Message {
    /// Body as nul terminated strings.
    pub fn strings(&self) -> Vec<String> {
        self.body
            .split(|b| *b == 0)
            .map(|e| String::from_utf8_lossy(e).into_owned())
            .collect()
    }

    /// Parameter values of a `Bind` message.
    pub fn bind_params(&self) -> Vec<Option<Vec<u8>>> {
        let mut body = self.body.clone();
        for _ in 0..2 {
            let nul = body.iter().position(|b| *b == 0).unwrap();
            body.advance(nul + 1);
        }
        let formats = body.get_u16() as usize;
        body.advance(formats * 2);
        let len = body.get_u16();
        (0..len)
            .map(|_| match body.get_i32() {
                -1 => None,
                n => Some(body.split_to(n as usize).to_vec()),
            })
            .collect()
    }

    /// The first nul terminated string in the body.
    pub fn first_string(&self) -> String {
        self.strings().remove(0)
    }
}

pub struct Backend {
    io: DuplexStream,
    buf: BytesMut,
}

impl Backend {
    pub fn new(io: DuplexStream) -> Self {
        Self { io, buf: BytesMut::new() }
    }

    async fn fill(&mut self, n: usize) {
        while self.buf.len() < n {
            let read = self.io.read_buf(&mut self.buf).await.unwrap();
            assert_ne!(read, 0, "frontend closed the stream");
        }
    }

    /// Read the startup packet, returns its parameters.
    pub async fn startup(&mut self) -> Vec<(String, String)> {
        self.fill(4).await;
        let len = u32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
        self.fill(len).await;
        let mut body = self.buf.split_to(len).freeze();
        body.advance(4);
        assert_eq!(body.get_u32(), 196608, "protocol version 3.0");

        let mut parts = body
            .split(|b| *b == 0)
            .map(|e| String::from_utf8_lossy(e).into_owned())
            .filter(|e| !e.is_empty())
            .collect::<Vec<_>>()
            .into_iter();

        let mut params = vec![];
        while let (Some(k), Some(v)) = (parts.next(), parts.next()) {
            params.push((k, v));
        }
        params
    }

    /// Complete startup without password.
    pub async fn accept(&mut self) {
        self.startup().await;
        self.auth_ok().await;
        self.ready_startup().await;
    }

    /// Read next frontend message.
    pub async fn recv(&mut self) -> Message {
        self.fill(5).await;
        let tag = self.buf[0];
        let len = u32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
        self.fill(1 + len).await;
        self.buf.advance(5);
        let body = self.buf.split_to(len - 4).freeze();
        Message { tag, body }
    }

    /// Read next frontend message and assert its tag.
    pub async fn expect(&mut self, tag: u8) -> Message {
        let msg = self.recv().await;
        assert_eq!(msg.tag as char, tag as char, "unexpected frontend message {msg:?}");
        msg
    }

    /// Read until `tag` is received, returns tags of every message read.
    pub async fn until(&mut self, tag: u8) -> Vec<u8> {
        let mut tags = vec![];
        loop {
            let msg = self.recv().await;
            tags.push(msg.tag);
            if msg.tag == tag {
                return tags;
            }
        }
    }

    /// Returns `true` if frontend closed the stream, ignoring pending message.
    pub async fn is_eof(&mut self) -> bool {
        let mut buf = [0u8; 64];
        loop {
            match self.io.read(&mut buf).await {
                Ok(0) | Err(_) => return true,
                Ok(_) => continue,
            }
        }
    }

    pub async fn send(&mut self, tag: u8, body: &[u8]) {
        let mut out = BytesMut::with_capacity(5 + body.len());
        out.put_u8(tag);
        out.put_u32(4 + body.len() as u32);
        out.put_slice(body);
        self.io.write_all(&out).await.unwrap();
    }

    // ===== Messages =====

    pub async fn auth(&mut self, code: u32, data: &[u8]) {
        let mut body = BytesMut::new();
        body.put_u32(code);
        body.put_slice(data);
        self.send(b'R', &body).await;
    }

    pub async fn auth_ok(&mut self) {
        self.auth(0, &[]).await;
    }

    /// ParameterStatus, BackendKeyData and ReadyForQuery.
    pub async fn ready_startup(&mut self) {
        self.parameter_status("server_version", "17.0").await;
        self.parameter_status("client_encoding", "UTF8").await;
        let mut key = BytesMut::new();
        key.put_u32(4242);
        key.put_u32(7);
        self.send(b'K', &key).await;
        self.ready(b'I').await;
    }

    pub async fn parameter_status(&mut self, name: &str, value: &str) {
        let mut body = BytesMut::new();
        put_str(&mut body, name);
        put_str(&mut body, value);
        self.send(b'S', &body).await;
    }

    pub async fn ready(&mut self, status: u8) {
        self.send(b'Z', &[status]).await;
    }

    pub async fn parse_complete(&mut self) {
        self.send(b'1', &[]).await;
    }

    pub async fn bind_complete(&mut self) {
        self.send(b'2', &[]).await;
    }

    pub async fn close_complete(&mut self) {
        self.send(b'3', &[]).await;
    }

    pub async fn no_data(&mut self) {
        self.send(b'n', &[]).await;
    }

    pub async fn portal_suspended(&mut self) {
        self.send(b's', &[]).await;
    }

    pub async fn empty_query(&mut self) {
        self.send(b'I', &[]).await;
    }

    pub async fn parameter_description(&mut self, oids: &[u32]) {
        let mut body = BytesMut::new();
        body.put_u16(oids.len() as u16);
        for oid in oids {
            body.put_u32(*oid);
        }
        self.send(b't', &body).await;
    }

    pub async fn row_description(&mut self, fields: &[(&str, u32)]) {
        let mut body = BytesMut::new();
        body.put_u16(fields.len() as u16);
        for (name, oid) in fields {
            put_str(&mut body, name);
            body.put_u32(0);
            body.put_i16(0);
            body.put_u32(*oid);
            body.put_i16(-1);
            body.put_i32(-1);
            body.put_u16(0);
        }
        self.send(b'T', &body).await;
    }

    pub async fn data_row(&mut self, values: &[Option<&[u8]>]) {
        let mut body = BytesMut::new();
        body.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value);
                },
                None => body.put_i32(-1),
            }
        }
        self.send(b'D', &body).await;
    }

    pub async fn command_complete(&mut self, tag: &str) {
        let mut body = BytesMut::new();
        put_str(&mut body, tag);
        self.send(b'C', &body).await;
    }

    pub async fn error(&mut self, severity: &str, code: &str, message: &str) {
        self.error_like(b'E', severity, code, message).await;
    }

    pub async fn notice(&mut self, message: &str) {
        self.error_like(b'N', "NOTICE", "00000", message).await;
    }

    async fn error_like(&mut self, tag: u8, severity: &str, code: &str, message: &str) {
        let mut body = BytesMut::new();
        body.put_u8(b'S');
        put_str(&mut body, severity);
        body.put_u8(b'V');
        put_str(&mut body, severity);
        body.put_u8(b'C');
        put_str(&mut body, code);
        body.put_u8(b'M');
        put_str(&mut body, message);
        body.put_u8(0);
        self.send(tag, &body).await;
    }

    pub async fn notification(&mut self, process_id: u32, channel: &str, payload: &str) {
        let mut body = BytesMut::new();
        body.put_u32(process_id);
        put_str(&mut body, channel);
        put_str(&mut body, payload);
        self.send(b'A', &body).await;
    }

    pub async fn copy_in_response(&mut self, columns: u16) {
        self.copy_response(b'G', columns).await;
    }

    pub async fn copy_out_response(&mut self, columns: u16) {
        self.copy_response(b'H', columns).await;
    }

    async fn copy_response(&mut self, tag: u8, columns: u16) {
        let mut body = BytesMut::new();
        body.put_u8(0);
        body.put_u16(columns);
        for _ in 0..columns {
            body.put_u16(0);
        }
        self.send(tag, &body).await;
    }

    pub async fn copy_data(&mut self, data: &[u8]) {
        self.send(b'd', data).await;
    }

    pub async fn copy_done(&mut self) {
        self.send(b'c', &[]).await;
    }

    // ===== Exchanges =====

    /// Respond to `Parse`, `Describe` and `Flush` of a statement.
    ///
    /// Returns the statement name.
    pub async fn describe(&mut self, params: &[u32], fields: &[(&str, u32)]) -> String {
        let parse = self.expect(b'P').await;
        self.expect(b'D').await;
        self.expect(b'H').await;
        self.parse_complete().await;
        self.parameter_description(params).await;
        if fields.is_empty() {
            self.no_data().await;
        } else {
            self.row_description(fields).await;
        }
        parse.first_string()
    }

    /// Read `Bind`, `Execute` and `Sync`, returns the `Bind` message.
    pub async fn bind_execute_sync(&mut self) -> Message {
        let bind = self.expect(b'B').await;
        self.expect(b'E').await;
        self.expect(b'S').await;
        bind
    }

    /// Read a simple query, returns its sql.
    pub async fn simple_query(&mut self) -> String {
        self.expect(b'Q').await.first_string()
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

pub fn int4(v: i32) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}
