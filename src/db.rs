use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use std::str::FromStr;
use tokio_postgres::NoTls;

use crate::error::AppError;

pub async fn init_pool(database_url: &str) -> Result<Pool, AppError> {
    let pg_config = tokio_postgres::Config::from_str(database_url)
        .map_err(|e| AppError::Config(format!("DATABASE_URL parse: {e}")))?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(16)
        .build()
        .map_err(|e| AppError::StartServer(format!("pool: {e}")))
}

pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client
        .batch_execute(include_str!("../migrations/0001_init.sql"))
        .await?;
    Ok(())
}
