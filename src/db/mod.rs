use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{QueryBuilder, Sqlite};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::*;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT    NOT NULL,
    price    REAL    NOT NULL CHECK (price >= 0),
    quantity INTEGER NOT NULL CHECK (quantity >= 0)
)
"#;

/// Future returned by a [`Database::with_connection`] body.
pub type ScopedFuture<'c, T> = Pin<Box<dyn Future<Output = AppResult<T>> + Send + 'c>>;

/// Handle to the product store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    /// Held for the whole of a write scope. A deferred transaction that reads
    /// and then writes fails with SQLITE_BUSY if another writer committed
    /// after its read snapshot was taken.
    writer: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if needed) the SQLite file at `path` and make sure the
    /// schema exists.
    pub async fn connect(path: &Path, max_connections: u32) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        };
        db.init_schema().await?;
        Ok(db)
    }

    /// Idempotent; safe on every start.
    pub async fn init_schema(&self) -> AppResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Run `f` inside one transaction on a pooled connection.
    ///
    /// Commits when `f` returns `Ok`. On `Err` (or if the future is dropped)
    /// the transaction rolls back; the connection goes back to the pool on
    /// every path.
    pub async fn with_connection<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> ScopedFuture<'c, T>,
    {
        let mut tx = self.pool.begin().await?;
        let out = f(&mut *tx).await?;
        tx.commit().await?;
        Ok(out)
    }

    /// [`with_connection`](Self::with_connection) for scopes that write.
    /// Write scopes run one at a time; read scopes are never blocked.
    pub async fn with_write_connection<F, T>(&self, f: F) -> AppResult<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> ScopedFuture<'c, T>,
    {
        let _writer = self.writer.lock().await;
        self.with_connection(f).await
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ── Products ──────────────────────────────────────────────────────────────────

pub async fn fetch_all_products(conn: &mut SqliteConnection) -> AppResult<Vec<Product>> {
    let products = sqlx::query_as::<_, Product>(
        "SELECT id, name, price, quantity FROM products ORDER BY id ASC",
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(products)
}

pub async fn fetch_product_by_id(conn: &mut SqliteConnection, id: i64) -> AppResult<Product> {
    sqlx::query_as::<_, Product>("SELECT id, name, price, quantity FROM products WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(AppError::product_not_found)
}

pub async fn product_exists(conn: &mut SqliteConnection, id: i64) -> AppResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM products WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

pub async fn insert_product(
    conn: &mut SqliteConnection,
    payload: &CreateProduct,
) -> AppResult<Product> {
    let result = sqlx::query("INSERT INTO products (name, price, quantity) VALUES (?, ?, ?)")
        .bind(&payload.name)
        .bind(payload.price)
        .bind(payload.quantity)
        .execute(&mut *conn)
        .await?;

    fetch_product_by_id(conn, result.last_insert_rowid()).await
}

/// `UPDATE products SET <col> = ?, ... WHERE id = ?` over exactly the given
/// fields, or `None` when there is nothing to set.
pub fn build_update(id: i64, fields: Vec<FieldValue>) -> Option<QueryBuilder<'static, Sqlite>> {
    if fields.is_empty() {
        return None;
    }

    let mut qb = QueryBuilder::new("UPDATE products SET ");
    let mut set = qb.separated(", ");
    for field in fields {
        set.push(format!("{} = ", field.column()));
        match field {
            FieldValue::Name(name) => set.push_bind_unseparated(name),
            FieldValue::Price(price) => set.push_bind_unseparated(price),
            FieldValue::Quantity(quantity) => set.push_bind_unseparated(quantity),
        };
    }
    qb.push(" WHERE id = ").push_bind(id);
    Some(qb)
}

/// Partial update. The caller is expected to have checked existence; a
/// payload with nothing to set leaves the row untouched.
pub async fn update_product_fields(
    conn: &mut SqliteConnection,
    id: i64,
    payload: &UpdateProduct,
) -> AppResult<Product> {
    match build_update(id, payload.assignments()) {
        Some(mut qb) => {
            debug!(sql = qb.sql(), "Applying partial update");
            qb.build().execute(&mut *conn).await?;
        }
        None => debug!(id, "Nothing to update"),
    }

    fetch_product_by_id(conn, id).await
}

pub async fn delete_product(conn: &mut SqliteConnection, id: i64) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::product_not_found());
    }
    Ok(())
}

pub async fn total_balance(conn: &mut SqliteConnection) -> AppResult<Balance> {
    let sum: Option<f64> = sqlx::query_scalar("SELECT SUM(price * quantity) FROM products")
        .fetch_one(&mut *conn)
        .await?;
    Ok(Balance::from_sum(sum))
}
