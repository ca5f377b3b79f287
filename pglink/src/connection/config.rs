//! Postgres configuration.
use std::{borrow::Cow, env::var, fmt, pin::Pin};

use super::Connection;
use crate::{Result, statement::DEFAULT_CACHE_CAPACITY};

/// Postgres connection config.
///
/// Connection url parsing and TLS are left to the caller, an established
/// stream can be used with [`Connection::connect_stream`].
#[derive(Clone)]
pub struct Config {
    pub(crate) user: String,
    pub(crate) password: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) socket: Option<String>,
    pub(crate) dbname: Option<String>,
    pub(crate) application_name: Option<String>,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) statement_cache: bool,
    pub(crate) cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "postgres".into(),
            password: None,
            host: "localhost".into(),
            port: 5432,
            socket: None,
            dbname: None,
            application_name: None,
            params: Vec::new(),
            statement_cache: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Create config with default value, connecting to `localhost:5432` as `postgres`.
    pub fn new() -> Config {
        Config::default()
    }

    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `PGUSER`
    /// - `PGPASSWORD`, or the legacy `PGPASS`
    /// - `PGHOST`, a value starting with `/` is a unix socket directory
    /// - `PGPORT`
    /// - `PGDATABASE`
    /// - `PGAPPNAME`
    ///
    /// Missing variable fallback to default value.
    pub fn from_env() -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Ok(user) = var("PGUSER") {
            config.user = user;
        }
        config.password = var("PGPASSWORD").or_else(|_| var("PGPASS")).ok();
        match var("PGHOST") {
            Ok(host) if host.starts_with('/') => config.socket = Some(host),
            Ok(host) => config.host = host,
            Err(_) => {}
        }
        if let Ok(port) = var("PGPORT") {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::new(format!("invalid PGPORT: {port:?}")))?;
        }
        config.dbname = var("PGDATABASE").ok();
        config.application_name = var("PGAPPNAME").ok();

        Ok(config)
    }

    /// The database user name to connect as.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The database user name to connect as.
    pub fn set_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Authentication password.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Authentication password.
    pub fn set_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Unix socket directory, takes precedence over host.
    pub fn socket(&self) -> Option<&str> {
        self.socket.as_deref()
    }

    /// Unix socket directory, takes precedence over host.
    ///
    /// The socket path is `{dir}/.s.PGSQL.{port}`.
    pub fn set_socket(mut self, dir: impl Into<String>) -> Self {
        self.socket = Some(dir.into());
        self
    }

    /// The database to connect to. Defaults to the user name.
    pub fn dbname(&self) -> &str {
        self.dbname.as_deref().unwrap_or(&self.user)
    }

    /// The database to connect to. Defaults to the user name.
    pub fn set_dbname(mut self, dbname: impl Into<String>) -> Self {
        self.dbname = Some(dbname.into());
        self
    }

    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    pub fn set_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Additional run-time parameter sent at startup.
    pub fn add_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Enable or disable prepared statement caching, enabled by default.
    ///
    /// When disabled, every statement is parsed as unnamed statement.
    pub fn set_statement_cache(mut self, enabled: bool) -> Self {
        self.statement_cache = enabled;
        self
    }

    /// Maximum number of cached statement, default to 24.
    pub fn set_statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn statement_cache(&self) -> bool {
        self.statement_cache
    }

    pub fn statement_cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Startup parameters, text is always exchanged as utf8.
    pub(crate) fn startup_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.params.len() + 2);
        params.push(("client_encoding".to_owned(), "UTF8".to_owned()));
        if let Some(name) = &self.application_name {
            params.push(("application_name".to_owned(), name.clone()));
        }
        params.extend(self.params.iter().cloned());
        params
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.user.is_empty() {
            return Err(ConfigError::new("user is empty"));
        }
        if self.socket.is_none() && self.host.is_empty() {
            return Err(ConfigError::new("host is empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("socket", &self.socket)
            .field("dbname", &self.dbname())
            .field("application_name", &self.application_name)
            .field("statement_cache", &self.statement_cache)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection>> + Send + 'static>>;

/// A type that can create new [`Connection`].
///
/// [`Pool`][crate::Pool] and [`Subscriber`][crate::pubsub::Subscriber] create
/// connection only using this trait.
pub trait Connector: Send + Sync + 'static {
    /// Create new connection.
    fn connect(&self) -> ConnectFuture;
}

impl Connector for Config {
    fn connect(&self) -> ConnectFuture {
        Box::pin(Connection::connect_with(self.clone()))
    }
}

impl<F> Connector for F
where
    F: Fn() -> ConnectFuture + Send + Sync + 'static,
{
    fn connect(&self) -> ConnectFuture {
        self()
    }
}

/// Error when configuration is invalid.
pub struct ConfigError {
    reason: Cow<'static,str>,
}

impl ConfigError {
    pub(crate) fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self { reason: reason.into() }
    }
}

impl std::error::Error for ConfigError { }

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_defaults() {
        let config = Config::new().set_user("app").set_application_name("svc").add_param("TimeZone", "UTC");
        assert_eq!(config.dbname(), "app");
        assert_eq!(config.port(), 5432);
        assert_eq!(
            config.startup_params(),
            [
                ("client_encoding".to_owned(), "UTF8".to_owned()),
                ("application_name".to_owned(), "svc".to_owned()),
                ("TimeZone".to_owned(), "UTC".to_owned()),
            ]
        );
        assert!(config.validate().is_ok());
        assert!(Config::new().set_user("").validate().is_err());
    }

    #[test]
    fn password_is_hidden() {
        let config = Config::new().set_password("secret");
        assert!(!format!("{config:?}").contains("secret"));
    }
}
