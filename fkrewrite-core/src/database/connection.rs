use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::time::Duration;

/// Opens a connection suitable for running rewrite steps.
///
/// The pool is pinned to a single connection: `PRAGMA foreign_keys` is
/// connection-scoped, and the rebuild relies on it staying off for every
/// statement of the step.
pub async fn establish_connection(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url);

    opt.max_connections(1)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(5))
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug);

    Database::connect(opt).await
}

pub fn get_database_url(database_path: Option<&str>) -> String {
    match database_path {
        Some(":memory:") => "sqlite::memory:".to_string(),
        Some(path) if path.starts_with("sqlite:") => path.to_string(),
        Some(path) => format!("sqlite://{}?mode=rwc", path),
        None => "sqlite://app.db?mode=rwc".to_string(),
    }
}
