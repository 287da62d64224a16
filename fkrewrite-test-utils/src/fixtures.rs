//! Schema fixtures modelled on an SSH connection store
//!
//! `ssh_connections` references `users` (always `CASCADE`) and `ssh_keys`
//! (action chosen by the test). Helpers read the catalog back so tests can
//! assert on what SQLite itself reports.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};

pub const USERS: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)";

pub const SSH_KEYS: &str = "CREATE TABLE ssh_keys (id INTEGER PRIMARY KEY, name TEXT)";

pub const HOST_INDEX: &str = "CREATE INDEX ix_ssh_connections_host ON ssh_connections (host)";

/// `ssh_connections` as first shipped, with `ssh_key_id` using `on_delete`.
pub fn ssh_connections(on_delete: &str) -> String {
    format!(
        "CREATE TABLE ssh_connections (
            id INTEGER PRIMARY KEY,
            user_id INTEGER REFERENCES users(id) ON DELETE CASCADE,
            ssh_key_id INTEGER,
            host TEXT NOT NULL,
            username TEXT NOT NULL,
            port INTEGER DEFAULT 22 NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP NOT NULL,
            FOREIGN KEY (ssh_key_id) REFERENCES ssh_keys(id) ON DELETE {}
        )",
        on_delete
    )
}

/// Columns later migrations add to `ssh_connections`.
pub const DRIFT_COLUMNS: [&str; 2] = [
    "ALTER TABLE ssh_connections ADD COLUMN use_sftp_mode BOOLEAN NOT NULL DEFAULT 1",
    "ALTER TABLE ssh_connections ADD COLUMN ssh_path_prefix TEXT",
];

pub const SEED_ROWS: [&str; 6] = [
    "INSERT INTO users (id, email) VALUES (1, 'ops@example.com')",
    "INSERT INTO ssh_keys (id, name) VALUES (1, 'deploy')",
    "INSERT INTO ssh_keys (id, name) VALUES (2, 'backup')",
    "INSERT INTO ssh_connections (id, user_id, ssh_key_id, host, username) VALUES (1, 1, 1, 'web-1', 'deploy')",
    "INSERT INTO ssh_connections (id, user_id, ssh_key_id, host, username) VALUES (2, 1, 2, 'db-1', 'backup')",
    "INSERT INTO ssh_connections (id, user_id, ssh_key_id, host, username) VALUES (3, 1, NULL, 'bastion', 'root')",
];

pub async fn exec_all<S: AsRef<str>>(db: &DatabaseConnection, statements: &[S]) -> Result<(), DbErr> {
    for sql in statements {
        db.execute_unprepared(sql.as_ref()).await?;
    }
    Ok(())
}

/// Parent tables, `ssh_connections` with the given action, the host index and
/// three seeded connections.
pub async fn seed_ssh_schema(db: &DatabaseConnection, on_delete: &str) -> Result<(), DbErr> {
    exec_all(
        db,
        &[
            USERS.to_string(),
            SSH_KEYS.to_string(),
            ssh_connections(on_delete),
            HOST_INDEX.to_string(),
        ],
    )
    .await?;
    exec_all(db, &SEED_ROWS).await
}

async fn query_strings(
    db: &DatabaseConnection,
    sql: &str,
    value: &str,
    column: &str,
) -> Result<Vec<String>, DbErr> {
    let rows = db
        .query_all(Statement::from_sql_and_values(
            db.get_database_backend(),
            sql,
            [value.into()],
        ))
        .await?;
    rows.iter().map(|r| r.try_get::<String>("", column)).collect()
}

/// `(from, table, on_delete)` for every foreign key of `table`.
pub async fn foreign_keys(
    db: &DatabaseConnection,
    table: &str,
) -> Result<Vec<(String, String, String)>, DbErr> {
    let rows = db
        .query_all(Statement::from_sql_and_values(
            db.get_database_backend(),
            "SELECT * FROM pragma_foreign_key_list(?) ORDER BY id",
            [table.into()],
        ))
        .await?;
    rows.iter()
        .map(|r| -> Result<(String, String, String), DbErr> {
            Ok((
                r.try_get::<String>("", "from")?,
                r.try_get::<String>("", "table")?,
                r.try_get::<String>("", "on_delete")?,
            ))
        })
        .collect()
}

/// `ON DELETE` action of the foreign key on `table.column`.
pub async fn on_delete_of(
    db: &DatabaseConnection,
    table: &str,
    column: &str,
) -> Result<Option<String>, DbErr> {
    Ok(foreign_keys(db, table)
        .await?
        .into_iter()
        .find(|(from, _, _)| from == column)
        .map(|(_, _, action)| action))
}

pub async fn column_names(db: &DatabaseConnection, table: &str) -> Result<Vec<String>, DbErr> {
    query_strings(
        db,
        "SELECT name FROM pragma_table_info(?) ORDER BY cid",
        table,
        "name",
    )
    .await
}

pub async fn index_names(db: &DatabaseConnection, table: &str) -> Result<Vec<String>, DbErr> {
    query_strings(
        db,
        "SELECT name FROM pragma_index_list(?) ORDER BY name",
        table,
        "name",
    )
    .await
}

pub async fn object_exists(db: &DatabaseConnection, kind: &str, name: &str) -> Result<bool, DbErr> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            db.get_database_backend(),
            "SELECT name FROM sqlite_master WHERE type = ? AND name = ?",
            [kind.into(), name.into()],
        ))
        .await?;
    Ok(row.is_some())
}

pub async fn table_sql(db: &DatabaseConnection, table: &str) -> Result<Option<String>, DbErr> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            db.get_database_backend(),
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            [table.into()],
        ))
        .await?;
    row.map(|r| r.try_get::<String>("", "sql")).transpose()
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> Result<i64, DbErr> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            format!("SELECT COUNT(*) AS n FROM \"{}\"", table),
        ))
        .await?;
    match row {
        Some(row) => row.try_get::<i64>("", "n"),
        None => Ok(0),
    }
}

pub async fn foreign_keys_enabled(db: &DatabaseConnection) -> Result<bool, DbErr> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "PRAGMA foreign_keys".to_string(),
        ))
        .await?;
    match row {
        Some(row) => Ok(row.try_get::<i32>("", "foreign_keys")? != 0),
        None => Ok(false),
    }
}
