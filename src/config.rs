//! Configuration handling for database access.
//!
//! `AccessConfig` describes one database (driver, address, credentials, pool
//! size) and can be built in code or deserialized. `Config` is the CLI layer
//! on top of it, parsed from arguments and environment variables.

use crate::error::{DbError, DbResult};
use crate::models::{Credentials, DatabaseType};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_POOL_SIZE: usize = 1;
pub const DEFAULT_COUNTER_TASKS: usize = 10;
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// Connection settings for one database.
#[derive(Clone, Deserialize)]
pub struct AccessConfig {
    /// Driver identifier: `mysql`, `mariadb`, `postgres`, `postgresql` or `sqlite`
    pub driver: String,
    /// URL scheme used to qualify a bare address
    pub scheme: String,
    /// Fully qualified URL, or a bare address such as `localhost:3306/test`
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Contains sensitive data - never log
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl AccessConfig {
    pub fn new(driver: impl Into<String>, scheme: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            scheme: scheme.into(),
            url: url.into(),
            user: None,
            password: None,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }

    /// MySQL preset, e.g. `AccessConfig::mysql("localhost:3306/test")`.
    pub fn mysql(url: impl Into<String>) -> Self {
        Self::new("mysql", "mysql", url)
    }

    pub fn postgres(url: impl Into<String>) -> Self {
        Self::new("postgres", "postgres", url)
    }

    /// SQLite preset; `url` may be a plain file path.
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self::new("sqlite", "sqlite", url)
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Database flavour named by `driver`, if it is one sqlx supports.
    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_driver_id(&self.driver)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }

    /// The connection URL, qualified with `scheme://` when needed.
    ///
    /// A URL already containing `://` or starting with `<scheme>:` is used
    /// as-is. Otherwise it is prefixed, and when it carries no query string
    /// the driver's UTF-8 charset parameter is appended.
    pub fn full_url(&self) -> String {
        let url = self.url.trim();
        let scheme = self.scheme.trim();
        let qualified = url.contains("://")
            || url
                .to_lowercase()
                .starts_with(&format!("{}:", scheme.to_lowercase()));
        if qualified {
            return url.to_string();
        }

        let mut full = format!("{}://{}", scheme, url);
        if !url.contains('?') {
            if let Some(param) = self
                .database_type()
                .and_then(|db| db.default_charset_param())
            {
                full.push('?');
                full.push_str(param);
            }
        }
        full
    }

    /// Validate settings and return an error if invalid.
    pub fn validate(&self) -> DbResult<()> {
        if self.driver.trim().is_empty() {
            return Err(DbError::invalid_argument("driver must not be empty"));
        }
        if self.scheme.trim().is_empty() {
            return Err(DbError::invalid_argument("scheme must not be empty"));
        }
        if self.url.trim().is_empty() {
            return Err(DbError::invalid_argument("url must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(DbError::invalid_argument(
                "pool_size must be greater than 0",
            ));
        }
        Url::parse(&self.full_url())
            .map_err(|e| DbError::invalid_argument(format!("Invalid URL: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for AccessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessConfig")
            .field("driver", &self.driver)
            .field("scheme", &self.scheme)
            .field("url", &crate::models::mask_url(&self.url))
            .field("user", &self.user)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

/// Command-line configuration for the `db-access` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-access",
    about = "Run queries, updates and transactions through a bounded connection pool",
    version
)]
pub struct Config {
    /// Driver identifier (mysql, mariadb, postgres, postgresql, sqlite)
    #[arg(long, default_value = "mysql", env = "DB_ACCESS_DRIVER")]
    pub driver: String,

    /// URL scheme used to qualify a bare address (defaults to the driver's)
    #[arg(long, env = "DB_ACCESS_SCHEME")]
    pub scheme: Option<String>,

    /// Database URL or bare address, e.g. localhost:3306/test
    #[arg(short = 'u', long, value_name = "URL", env = "DB_ACCESS_URL")]
    pub url: String,

    /// Database user
    #[arg(long, env = "DB_ACCESS_USER")]
    pub user: Option<String>,

    /// Database password
    #[arg(long, env = "DB_ACCESS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE, env = "DB_ACCESS_POOL_SIZE")]
    pub pool_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = DEFAULT_LOG_LEVEL, env = "DB_ACCESS_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_ACCESS_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a query and print the rows as JSON lines
    Query { sql: String },
    /// Run an auto-committed statement
    Execute { sql: String },
    /// Print connection metadata as JSON
    Metadata,
    /// Increment a shared counter from concurrent transactions and verify the total
    Counter {
        /// Number of concurrent incrementing transactions
        #[arg(long, default_value_t = DEFAULT_COUNTER_TASKS)]
        tasks: usize,
    },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Connection settings described by the CLI.
    pub fn access_config(&self) -> DbResult<AccessConfig> {
        let scheme = match &self.scheme {
            Some(scheme) => scheme.clone(),
            None => DatabaseType::from_driver_id(&self.driver)
                .map(|db| db.default_scheme().to_string())
                .ok_or_else(|| {
                    DbError::invalid_argument(format!("Unknown driver: {}", self.driver))
                })?,
        };

        let mut access = AccessConfig::new(&self.driver, scheme, &self.url)
            .with_pool_size(self.pool_size);
        access.user = self.user.clone();
        access.password = self.password.clone();
        access.validate()?;
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_url_prefixes_bare_mysql_address() {
        let config = AccessConfig::mysql("localhost:3306/test");
        assert_eq!(
            config.full_url(),
            "mysql://localhost:3306/test?charset=utf8mb4"
        );
    }

    #[test]
    fn test_full_url_keeps_existing_query() {
        let config = AccessConfig::mysql("localhost/test?ssl-mode=disabled");
        assert_eq!(config.full_url(), "mysql://localhost/test?ssl-mode=disabled");
    }

    #[test]
    fn test_full_url_leaves_qualified_urls_alone() {
        let config = AccessConfig::mysql("mysql://root@db:3306/app");
        assert_eq!(config.full_url(), "mysql://root@db:3306/app");

        let config = AccessConfig::sqlite("sqlite::memory:");
        assert_eq!(config.full_url(), "sqlite::memory:");
    }

    #[test]
    fn test_full_url_without_charset_param() {
        assert_eq!(
            AccessConfig::postgres("localhost/app").full_url(),
            "postgres://localhost/app"
        );
        assert_eq!(
            AccessConfig::sqlite("/tmp/app.db").full_url(),
            "sqlite:///tmp/app.db"
        );
    }

    #[test]
    fn test_validate_rejects_zero_pool_size() {
        let config = AccessConfig::sqlite("sqlite::memory:").with_pool_size(0);
        assert!(matches!(
            config.validate(),
            Err(DbError::InvalidArgument { .. })
        ));
        assert!(AccessConfig::sqlite("sqlite::memory:").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        assert!(AccessConfig::mysql("  ").validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults_pool_size() {
        let config: AccessConfig = serde_json::from_str(
            r#"{"driver": "mysql", "scheme": "mysql", "url": "localhost/test", "user": "root"}"#,
        )
        .unwrap();
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.credentials().user.as_deref(), Some("root"));
        assert!(config.password.is_none());
    }

    #[test]
    fn test_debug_masks_password_in_url() {
        let config = AccessConfig::postgres("postgres://app:secret@db/app");
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_cli_builds_access_config() {
        let config = Config::parse_from([
            "db-access",
            "--driver",
            "mariadb",
            "--url",
            "localhost:3306/test",
            "--pool-size",
            "4",
            "counter",
            "--tasks",
            "25",
        ]);
        let access = config.access_config().unwrap();
        assert_eq!(access.scheme, "mysql");
        assert_eq!(access.pool_size, 4);
        assert!(matches!(config.command, Command::Counter { tasks: 25 }));
    }

    #[test]
    fn test_cli_rejects_unknown_driver() {
        let config = Config::parse_from(["db-access", "--driver", "oracle", "--url", "x", "metadata"]);
        assert!(config.access_config().is_err());
    }
}
