//! Connection pool setup.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::ports::PersistenceError;

/// Opens a pool sized by `config`, running migrations if configured to.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, PersistenceError> {
    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(config.idle_timeout())
        .max_lifetime(config.max_lifetime())
        .connect(&config.url)
        .await
        .map_err(|e| PersistenceError::database(format!("Failed to connect: {}", e)))?;

    if config.run_migrations {
        run_migrations(&pool).await?;
    }

    tracing::info!(
        max_connections = config.max_connections,
        migrated = config.run_migrations,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Applies the bundled schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), PersistenceError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PersistenceError::database(format!("Failed to run migrations: {}", e)))
}
