use std::{fmt, sync::Arc};

use super::Pool;
use crate::{
    Result,
    connection::{Config, Connector},
};

const DEFAULT_MAX_SIZE: usize = 10;

/// Pool configuration builder.
#[derive(Clone)]
pub struct PoolConfig {
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) max_size: usize,
    pub(crate) max_wait_queue: Option<usize>,
}

impl PoolConfig {
    /// Create config which creates connection using `connector`.
    ///
    /// [`Config`] itself is a [`Connector`].
    pub fn new(connector: impl Connector) -> PoolConfig {
        Self {
            connector: Arc::new(connector),
            max_size: DEFAULT_MAX_SIZE,
            max_wait_queue: None,
        }
    }

    /// Create config with connection config from environment variables.
    ///
    /// See [`Config::from_env`].
    pub fn from_env() -> Result<PoolConfig> {
        Ok(Self::new(Config::from_env()?))
    }

    /// Returns the connector.
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    /// Set max number of live connections, default to 10.
    ///
    /// A value of 0 is treated as 1.
    pub fn max_size(mut self, value: usize) -> Self {
        self.max_size = value.max(1);
        self
    }

    /// Set max number of borrowers waiting for a connection.
    ///
    /// A borrow request beyond this bound fails immediately. Unbounded by default.
    pub fn max_wait_queue(mut self, value: usize) -> Self {
        self.max_wait_queue = Some(value);
        self
    }

    /// Create [`Pool`] and try to create one connection.
    pub async fn connect(self) -> Result<Pool> {
        Pool::connect_with(self).await
    }

    /// Create [`Pool`] without trying to create connection.
    pub fn connect_lazy(self) -> Pool {
        Pool::connect_lazy_with(self)
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_size", &self.max_size)
            .field("max_wait_queue", &self.max_wait_queue)
            .finish_non_exhaustive()
    }
}
