use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

/// Opens a connection pool and runs pending migrations against it.
///
/// Use [`with_pool`] instead when the pool is shared with another
/// subsystem that already ran migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Wraps an existing pool without running migrations again.
#[must_use]
pub fn with_pool(pool: PgPool) -> PgPool {
    pool
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
