use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{Result, StoreConfig};

/// An open transaction. Dropping it without calling `commit` rolls it back.
pub type Tx = Transaction<'static, Postgres>;

/// PostgreSQL-backed transactional store.
///
/// Constructed once at process start and handed to every component by
/// clone; clones share the same pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Wraps an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool and verifies connectivity.
    ///
    /// Callers beyond `max_connections` wait for a free connection until
    /// `acquire_timeout` instead of failing immediately.
    #[tracing::instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = Self::pool_options(config)
            .connect(&config.database_url)
            .await?;
        tracing::info!("connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Builds a pool that only connects on first use.
    pub fn connect_lazy(config: &StoreConfig) -> Result<Self> {
        let pool = Self::pool_options(config).connect_lazy(&config.database_url)?;
        Ok(Self { pool })
    }

    fn pool_options(config: &StoreConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the embedded database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("database migrations applied");
        Ok(())
    }

    /// Starts a transaction on a pooled connection.
    pub async fn begin(&self) -> Result<Tx> {
        Ok(self.pool.begin().await?)
    }

    /// Checks that the database answers a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Closes every pooled connection. Further operations fail.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("connection pool closed");
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
