use std::path::Path;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

/// Single-connection SQLite database for tests.
///
/// Connection-scoped pragmas only hold when every statement runs on the
/// same connection, so the pool is capped at one.
pub struct TestDb {
    url: String,
}

impl TestDb {
    pub fn new_in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
        }
    }

    pub fn new_file(path: impl AsRef<Path>) -> Self {
        Self {
            url: format!("sqlite://{}?mode=rwc", path.as_ref().display()),
        }
    }

    pub async fn connect(&self) -> Result<DatabaseConnection, DbErr> {
        let mut options = ConnectOptions::new(self.url.clone());
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        Database::connect(options).await
    }
}
