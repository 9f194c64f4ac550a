//! sqlx-backed connection handles.
//!
//! Uses database-specific connection types (MySqlConnection, PgConnection,
//! SqliteConnection) rather than `AnyConnection` to keep full type support for
//! callers that run queries on a leased handle.

use crate::db::handle::ConnectionHandle;
use crate::db::macros::with_connection;
use crate::error::{PoolError, PoolResult};
use crate::models::{ConnectOptions, DatabaseType};
use sqlx::{
    ConnectOptions as _, Connection, MySqlConnection, PgConnection, SqliteConnection,
    mysql::MySqlConnectOptions, postgres::PgConnectOptions, sqlite::SqliteConnectOptions,
};
use std::str::FromStr;
use tracing::{debug, warn};

/// Database-specific connection.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// A pooled sqlx session, opened from [`ConnectOptions`].
pub struct SqlHandle {
    options: ConnectOptions,
    connection: Option<DbConnection>,
}

impl SqlHandle {
    /// The live connection, if open. Use this to run queries on a leased handle.
    pub fn connection_mut(&mut self) -> Option<&mut DbConnection> {
        self.connection.as_mut()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Build sqlx options, from the source URL when there is one, and connect.
    async fn connect_session(options: &ConnectOptions) -> Result<DbConnection, sqlx::Error> {
        let url = options.connection_string.as_deref();
        match options.driver {
            DatabaseType::MySQL => {
                let opts = match url {
                    Some(url) => MySqlConnectOptions::from_str(url)?,
                    None => {
                        let mut opts = MySqlConnectOptions::new()
                            .host(&options.host)
                            .username(&options.username)
                            .database(&options.database);
                        if let Some(port) = options.port {
                            opts = opts.port(port);
                        }
                        if let Some(password) = &options.password {
                            opts = opts.password(password);
                        }
                        opts
                    }
                };
                opts.charset("utf8mb4")
                    .connect()
                    .await
                    .map(DbConnection::MySql)
            }
            DatabaseType::PostgreSQL => {
                let opts = match url {
                    Some(url) => PgConnectOptions::from_str(url)?,
                    None => {
                        let mut opts = PgConnectOptions::new()
                            .host(&options.host)
                            .username(&options.username)
                            .database(&options.database);
                        if let Some(port) = options.port {
                            opts = opts.port(port);
                        }
                        if let Some(password) = &options.password {
                            opts = opts.password(password);
                        }
                        opts
                    }
                };
                opts.connect().await.map(DbConnection::Postgres)
            }
            DatabaseType::SQLite => {
                // URL parameters (mode, cache, ...) apply; the decoded path wins.
                let opts = match url {
                    Some(url) => SqliteConnectOptions::from_str(url)?,
                    None => SqliteConnectOptions::new(),
                };
                opts.filename(&options.database)
                    .create_if_missing(true)
                    .connect()
                    .await
                    .map(DbConnection::SQLite)
            }
        }
    }

    async fn connect(options: &ConnectOptions) -> PoolResult<DbConnection> {
        let attempt = Self::connect_session(options);
        match tokio::time::timeout(options.connect_timeout, attempt).await {
            Ok(result) => result.map_err(PoolError::from),
            Err(_) => Err(PoolError::database(format!(
                "Connecting to {} timed out after {}s",
                options.masked_url(),
                options.connect_timeout.as_secs()
            ))),
        }
    }
}

impl std::fmt::Debug for SqlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlHandle")
            .field("options", &self.options)
            .field("open", &self.connection.is_some())
            .finish()
    }
}

impl ConnectionHandle for SqlHandle {
    type Options = ConnectOptions;

    fn new(options: &ConnectOptions) -> Self {
        Self {
            options: options.clone(),
            connection: None,
        }
    }

    async fn open(&mut self) -> PoolResult<()> {
        if let Err(e) = self.close().await {
            debug!(error = %e, "Ignoring close error before reopen");
        }
        let connection = Self::connect(&self.options).await?;
        debug!(target_db = %self.options.masked_url(), "Opened database session");
        self.connection = Some(connection);
        Ok(())
    }

    async fn close(&mut self) -> PoolResult<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        with_connection!(connection, c => c.close().await).map_err(PoolError::from)
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    async fn probe(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        let result = with_connection!(connection, c => {
            sqlx::query("SELECT 1").execute(c).await.map(|_| ())
        });
        if let Err(e) = &result {
            warn!(error = %e, target_db = %self.options.masked_url(), "Liveness probe failed");
        }
        result.is_ok()
    }

    async fn apply_session_settings(&mut self) -> PoolResult<()> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(PoolError::database(
                "Cannot apply session settings to a closed connection",
            ));
        };
        for statement in &self.options.init_statements {
            with_connection!(&mut *connection, c => {
                sqlx::Executor::execute(c, sqlx::raw_sql(statement)).await.map(|_| ())
            })?;
        }
        Ok(())
    }
}
