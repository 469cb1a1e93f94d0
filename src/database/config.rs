//! Pool configuration and connection URL assembly.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::DatabaseError;

/// Default upper bound on pooled connections.
const DEFAULT_CONNECTION_LIMIT: u32 = 10;

/// Default time a request waits for a free connection, in milliseconds.
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;

/// Which database server the pool talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Mysql,
    Postgres,
    Sqlite,
}

impl Driver {
    fn scheme(self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Options recognized when creating a connection pool.
///
/// Keys use the camelCase names accepted by the host's configuration
/// (`useTransactions`, `connectionLimit`, ...). Any key not listed here is kept
/// in [`options`](Self::options) and forwarded to the driver as a URL query
/// parameter without interpretation.
///
/// # Examples
///
/// ```
/// use rttp_sql::database::PoolConfig;
///
/// let config: PoolConfig = serde_json::from_value(serde_json::json!({
///     "host": "localhost",
///     "user": "root",
///     "password": "",
///     "database": "test",
///     "useTransactions": true,
///     "charset": "utf8mb4"
/// }))
/// .unwrap();
///
/// assert!(config.use_transactions);
/// assert_eq!(config.connection_limit, 10);
/// assert_eq!(config.options["charset"], "utf8mb4");
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default)]
    pub driver: Driver,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    pub database: String,

    /// Wrap every request in a transaction that is committed or rolled back
    /// depending on the response.
    #[serde(default)]
    pub use_transactions: bool,

    #[serde(default = "default_connection_limit")]
    pub connection_limit: u32,

    /// Milliseconds to wait for a free connection before failing the request.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: u64,

    #[serde(flatten)]
    pub options: BTreeMap<String, Value>,
}

fn default_host() -> String {
    "localhost".to_owned()
}

fn default_connection_limit() -> u32 {
    DEFAULT_CONNECTION_LIMIT
}

fn default_acquire_timeout() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

impl PoolConfig {
    /// Creates a config for `database` on `driver` with every other option at its default.
    pub fn new(driver: Driver, database: impl Into<String>) -> Self {
        Self {
            driver,
            host: default_host(),
            port: None,
            user: None,
            password: None,
            database: database.into(),
            use_transactions: false,
            connection_limit: DEFAULT_CONNECTION_LIMIT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_MS,
            options: BTreeMap::new(),
        }
    }

    /// Sets the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the login credentials.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Enables or disables per-request transactions.
    #[must_use]
    pub fn use_transactions(mut self, enabled: bool) -> Self {
        self.use_transactions = enabled;
        self
    }

    /// Adds a pass-through driver option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn acquire_wait(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout)
    }

    /// Assembles the connection URL handed to the driver.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Config`] when the database name is empty, the
    /// connection limit is zero, or the resulting URL is malformed.
    pub fn connection_url(&self) -> Result<Url, DatabaseError> {
        if self.database.is_empty() {
            return Err(DatabaseError::Config("`database` must not be empty".into()));
        }
        if self.connection_limit == 0 {
            return Err(DatabaseError::Config(
                "`connectionLimit` must be at least 1".into(),
            ));
        }

        let mut url = match self.driver {
            Driver::Sqlite => self.sqlite_url()?,
            Driver::Mysql | Driver::Postgres => self.server_url()?,
        };

        if !self.options.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.options {
                match value {
                    Value::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }

        Ok(url)
    }

    fn server_url(&self) -> Result<Url, DatabaseError> {
        let base = format!("{}://{}", self.driver.scheme(), self.host);
        let mut url = Url::parse(&base)
            .map_err(|e| DatabaseError::Config(format!("invalid host {:?}: {e}", self.host)))?;

        let invalid = |field: &str| DatabaseError::Config(format!("cannot set {field} on {base}"));
        if let Some(port) = self.port {
            url.set_port(Some(port)).map_err(|()| invalid("port"))?;
        }
        if let Some(user) = self.user.as_deref().filter(|u| !u.is_empty()) {
            url.set_username(user).map_err(|()| invalid("user"))?;
        }
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|()| invalid("password"))?;
        }
        url.set_path(&format!("/{}", self.database));

        Ok(url)
    }

    fn sqlite_url(&self) -> Result<Url, DatabaseError> {
        let in_memory = self.database == ":memory:";
        let raw = if in_memory {
            "sqlite::memory:".to_owned()
        } else {
            format!("sqlite://{}", self.database)
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| DatabaseError::Config(format!("invalid sqlite path: {e}")))?;
        if !in_memory && !self.options.contains_key("mode") {
            url.query_pairs_mut().append_pair("mode", "rwc");
        }
        Ok(url)
    }
}
