//! Dispatch over the per-dialect `DbConnection` variants.

/// Expands to a `match` on a `DbConnection`, one arm per listed variant.
///
/// ```ignore
/// impl_db_dispatch!(&mut self.inner, {
///     MySql(c) => c.execute(sql).await.map(|r| r.rows_affected()),
///     Postgres(c) => c.execute(sql).await.map(|r| r.rows_affected()),
///     SQLite(c) => c.execute(sql).await.map(|r| r.rows_affected()),
/// })
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $($crate::db::driver::DbConnection::$variant($c) => $body,)+
        }
    };
}

pub use impl_db_dispatch;
