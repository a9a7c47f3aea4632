use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::{GoalListError, Result};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
pub type SqlitePool = Pool<SqliteAsyncConn>;
pub type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Shared handle on the SQLite database. Cloning is cheap; every store holds one.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: String,
}

impl Database {
    pub async fn open(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let sqlite_path = sqlite_path.as_ref();
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new(sqlite_path);
        let pool: SqlitePool = Pool::builder()
            .build(manager)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        tracing::debug!(db_path = sqlite_path, "Opened goal list database");
        Ok(Self {
            pool,
            path: sqlite_path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        apply_connection_pragmas_async(&mut conn).await?;
        Ok(conn)
    }
}

fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        }
    }
    Ok(())
}

async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        apply_connection_pragmas_sync(&mut conn)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
        Ok::<_, GoalListError>(())
    })
    .await
    .map_err(|e| GoalListError::Runtime(e.to_string()))??;
    Ok(())
}

// SQLite keeps foreign key enforcement per connection, so every checkout turns it on.
fn apply_connection_pragmas_sync(conn: &mut SqliteConnection) -> Result<()> {
    for pragma in ["PRAGMA busy_timeout = 5000", "PRAGMA foreign_keys = ON"] {
        diesel::RunQueryDsl::execute(diesel::sql_query(pragma), conn)
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
    }
    Ok(())
}

async fn apply_connection_pragmas_async(conn: &mut SqliteAsyncConn) -> Result<()> {
    for pragma in ["PRAGMA busy_timeout = 5000", "PRAGMA foreign_keys = ON"] {
        diesel_async::RunQueryDsl::execute(diesel::sql_query(pragma), conn)
            .await
            .map_err(|e| GoalListError::Runtime(e.to_string()))?;
    }
    Ok(())
}

pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
