use super::model::{OrderChanges, OrderRow};
use crate::model::MutationEvent;
use crate::recipient::TokenStore;
use crate::worker::MutationHook;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {}", normalized))?;
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL, create its parent
/// directory and ask sqlx to create the file. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = crate::config::expand_home(path_part);
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn row_to_order(row: SqliteRow) -> OrderRow {
    OrderRow {
        id: row.get("id"),
        customer: row.get("customer"),
        status: row.get("status"),
        total: row.get("total"),
    }
}

async fn fetch_order<'e, E>(executor: E, id: &str) -> Result<Option<OrderRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT id, customer, status, total FROM orders WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(row_to_order))
}

#[instrument(skip_all, fields(order_id = %id))]
pub async fn insert_order(pool: &Pool, id: &str, customer: &str, total: i64) -> Result<OrderRow> {
    let row = sqlx::query(
        "INSERT INTO orders (id, customer, total) VALUES (?, ?, ?) RETURNING id, customer, status, total",
    )
    .bind(id)
    .bind(customer)
    .bind(total)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert order {}", id))?;
    Ok(row_to_order(row))
}

pub async fn get_order(pool: &Pool, id: &str) -> Result<Option<OrderRow>> {
    fetch_order(pool, id).await
}

/// Apply `changes` to an order, commit, then fire `hook` with the
/// before/after snapshots. The write's result never depends on the hook.
#[instrument(skip_all, fields(order_id = %id))]
pub async fn update_order(
    pool: &Pool,
    id: &str,
    changes: &OrderChanges,
    hook: &dyn MutationHook,
) -> Result<OrderRow> {
    let mut tx = pool.begin().await?;
    let original = fetch_order(&mut *tx, id)
        .await?
        .ok_or_else(|| anyhow!("order {} not found", id))?;
    if changes.is_empty() {
        return Ok(original);
    }

    sqlx::query(
        "UPDATE orders SET customer = COALESCE(?, customer), status = COALESCE(?, status), \
         total = COALESCE(?, total), updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(changes.customer.as_deref())
    .bind(changes.status.as_deref())
    .bind(changes.total)
    .bind(id)
    .execute(&mut *tx)
    .await
    .context("failed to update order")?;

    let current = fetch_order(&mut *tx, id)
        .await?
        .ok_or_else(|| anyhow!("order {} vanished during update", id))?;
    tx.commit().await?;

    let event = MutationEvent {
        entity_id: current.id.clone(),
        owner_id: Some(current.customer.clone()),
        original_fields: original.snapshot(hook.status_field(), hook.owner_field()).fields,
        current_fields: current.snapshot(hook.status_field(), hook.owner_field()).fields,
    };
    hook.on_mutation(&event);
    Ok(current)
}

#[instrument(skip_all, fields(owner_id = %owner_id))]
pub async fn upsert_device_token(pool: &Pool, owner_id: &str, token: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(anyhow!("owner id must be non-empty"));
    }
    sqlx::query(
        "INSERT INTO device_tokens (owner_id, token) VALUES (?, ?) \
         ON CONFLICT(owner_id) DO UPDATE SET token = excluded.token, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(owner_id)
    .bind(token)
    .execute(pool)
    .await
    .context("failed to store device token")?;
    Ok(())
}

pub async fn token_for_owner(pool: &Pool, owner_id: &str) -> Result<Option<String>> {
    let token = sqlx::query_scalar::<_, String>("SELECT token FROM device_tokens WHERE owner_id = ?")
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .context("failed to read device token")?;
    Ok(token)
}

pub async fn delete_device_token(pool: &Pool, owner_id: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM device_tokens WHERE owner_id = ?")
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Token store backed by the `device_tokens` table.
#[derive(Debug, Clone)]
pub struct SqliteTokenStore {
    pool: Pool,
}

impl SqliteTokenStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn lookup_by_owner(&self, owner_id: &str) -> Result<Option<String>> {
        let token = token_for_owner(&self.pool, owner_id).await?;
        debug!(owner_id, found = token.is_some(), "device token lookup");
        Ok(token)
    }
}
