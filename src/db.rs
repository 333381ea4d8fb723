//! Store connection lifecycle: open the pool, migrate, ping, close.

use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge};
use sea_orm::{
    sqlx::sqlite::SqliteJournalMode, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, DatabaseTransaction, DbBackend, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

pub type DbPool = DatabaseConnection;

/// Pool tuning, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
    /// Statement logging through sqlx; off in production.
    pub sqlx_logging: bool,
    /// How long a SQLite connection waits for another writer's lock.
    pub sqlite_busy_timeout: Duration,
}

impl PoolSettings {
    /// Single-connection pool, the shape SQLite needs for transactional tests.
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
            sqlx_logging: false,
            sqlite_busy_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for PoolSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
            sqlx_logging: !cfg.is_production(),
            sqlite_busy_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

pub async fn connect(settings: &PoolSettings) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .connect_timeout(settings.connect_timeout)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .sqlx_logging(settings.sqlx_logging);
    if is_sqlite_url(&settings.url) {
        // WAL lets readers proceed while one connection holds the write lock.
        let busy_timeout = settings.sqlite_busy_timeout;
        options.map_sqlx_sqlite_opts(move |opts| {
            opts.journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(busy_timeout)
        });
    }

    gauge!("nursery_db.max_connections", settings.max_connections as f64);

    let pool = Database::connect(options).await.map_err(|e| {
        error!(error = %e, "could not open database pool");
        ServiceError::DatabaseError(e)
    })?;
    info!(
        max_connections = settings.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    connect(&PoolSettings::from(cfg)).await
}

fn is_sqlite_url(url: &str) -> bool {
    url.starts_with("sqlite:")
}

/// Opens a transaction that is going to write.
///
/// SQLite transactions start deferred: one that reads first and writes later
/// fails with `SQLITE_BUSY` when another connection committed in between.
/// Taking the write lock up front makes concurrent writers queue on the busy
/// timeout instead. Other backends rely on the conditional updates alone.
pub async fn begin_write(pool: &DbPool) -> Result<DatabaseTransaction, ServiceError> {
    let txn = pool.begin().await?;
    if txn.get_database_backend() == DbBackend::Sqlite {
        txn.execute_unprepared("UPDATE catalog_items SET stock = stock WHERE 0")
            .await?;
    }
    Ok(txn)
}

/// Applies every pending embedded migration.
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    match crate::migrator::Migrator::up(pool, None).await {
        Ok(()) => {
            info!(elapsed = ?started.elapsed(), "migrations applied");
            Ok(())
        }
        Err(e) => {
            error!(elapsed = ?started.elapsed(), error = %e, "migrations failed");
            Err(ServiceError::DatabaseError(e))
        }
    }
}

/// Round-trip to the store, used by the health endpoint.
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let started = Instant::now();
    let result = pool.ping().await;
    let elapsed = started.elapsed();

    match result {
        Ok(()) => {
            debug!(?elapsed, "database ping ok");
            gauge!("nursery_db.ping_latency_ms", elapsed.as_millis() as f64);
            Ok(())
        }
        Err(e) => {
            error!(?elapsed, error = %e, "database ping failed");
            counter!("nursery_db.ping_failures", 1);
            Err(ServiceError::DatabaseError(e))
        }
    }
}

pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("closing database pool");
    pool.close().await.map_err(ServiceError::DatabaseError)
}
