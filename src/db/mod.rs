pub mod models;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Pool size covers the scan's concurrent pairs plus the HTTP handlers.
pub async fn create_pool(database_url: &str, scan_concurrency: usize) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections((scan_concurrency + 4) as u32)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
