//! Database dispatch macros for reducing code duplication.
//!
//! sqlx exposes one connection type per backend. These macros generate the
//! per-backend match arms so the same body runs against whichever one is live.

/// Run the same expression against whichever backend a `DbConnection` holds.
///
/// The body is expanded once per variant, so it may call backend-specific
/// methods as long as every backend provides them.
///
/// # Example
///
/// ```ignore
/// let alive = with_connection!(conn, c => sqlx::query("SELECT 1").execute(c).await.is_ok());
/// ```
macro_rules! with_connection {
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            $crate::db::sql_handle::DbConnection::MySql($c) => $body,
            $crate::db::sql_handle::DbConnection::Postgres($c) => $body,
            $crate::db::sql_handle::DbConnection::SQLite($c) => $body,
        }
    };
}

pub(crate) use with_connection;
