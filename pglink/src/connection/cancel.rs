//! Query cancellation.
//!
//! <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-CANCELING-REQUESTS>
use bytes::BytesMut;
use tokio::io::AsyncWriteExt;

use super::{Config, ConfigError};
use crate::{
    Result,
    net::{AsyncStream, Socket},
    postgres::frontend::CancelRequest,
};

/// A token to cancel the query currently being processed by a connection.
///
/// Cancellation is best effort, the backend does not reply whether the query
/// is cancelled. If it is, the running query returns an error with
/// `query_canceled` code.
///
/// ```no_run
/// # async fn app(mut conn: pglink::Connection) -> pglink::Result<()> {
/// let token = conn.cancel_token().unwrap();
///
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
///     token.cancel().await
/// });
///
/// let result = pglink::execute("select pg_sleep(10)", &mut conn).execute().await;
/// assert!(result.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CancelToken {
    config: Option<Config>,
    process_id: u32,
    secret_key: u32,
}

impl CancelToken {
    pub(crate) fn new(config: Option<Config>, process_id: u32, secret_key: u32) -> Self {
        Self { config, process_id, secret_key }
    }

    /// The target backend process id.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Send cancel request over a new connection to the same server.
    pub async fn cancel(&self) -> Result<()> {
        let Some(config) = &self.config else {
            return Err(ConfigError::new("no server address to send cancel request").into());
        };

        let socket = match config.socket() {
            Some(dir) => Socket::connect_socket(&format!("{dir}/.s.PGSQL.{}", config.port())).await?,
            None => Socket::connect_tcp(config.host(), config.port()).await?,
        };

        self.send(socket).await
    }

    /// Send cancel request over an already established stream.
    pub async fn cancel_with<S: AsyncStream>(&self, stream: S) -> Result<()> {
        self.send(Socket::from_stream(stream)).await
    }

    async fn send(&self, mut socket: Socket) -> Result<()> {
        let mut buf = BytesMut::with_capacity(16);
        CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        }
        .write(&mut buf);

        socket.write_all(&buf).await?;
        socket.flush().await?;
        socket.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("process_id", &self.process_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn request_layout() {
        let (client, mut server) = tokio::io::duplex(64);
        let token = CancelToken::new(None, 7, 42);

        token.cancel_with(client).await.unwrap();

        let mut buf = vec![];
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..4], &16u32.to_be_bytes());
        assert_eq!(&buf[4..8], &CancelRequest::CODE.to_be_bytes());
        assert_eq!(&buf[8..12], &7u32.to_be_bytes());
        assert_eq!(&buf[12..], &42u32.to_be_bytes());
    }

    #[tokio::test]
    async fn no_address() {
        let token = CancelToken::new(None, 7, 42);
        let err = token.cancel().await.unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Config(_)));
    }
}
