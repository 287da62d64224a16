use fkrewrite::errors::RewriteError;
use fkrewrite::rewrite::{
    ConstraintRewrite, PlanPreview, RebuildOptions, RebuildStage, RewriteOutcome, SatisfiedReason,
};
use fkrewrite::schema::{IndexSpec, ReferentialAction, RewriteSpec};
use fkrewrite_test_utils::fixtures::{
    self, column_names, count_rows, exec_all, foreign_keys_enabled, index_names, object_exists,
    on_delete_of, seed_ssh_schema, table_sql,
};
use fkrewrite_test_utils::TestDb;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};

async fn setup(on_delete: &str) -> DatabaseConnection {
    let db = TestDb::new_in_memory().connect().await.unwrap();
    seed_ssh_schema(&db, on_delete).await.unwrap();
    db
}

fn set_null_step() -> ConstraintRewrite {
    ConstraintRewrite::new(RewriteSpec::new(
        "ssh_connections",
        "ssh_key_id",
        ReferentialAction::SetNull,
    ))
}

async fn ssh_key_of(db: &DatabaseConnection, connection_id: i64) -> Option<i64> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            db.get_database_backend(),
            "SELECT ssh_key_id FROM ssh_connections WHERE id = ?",
            [connection_id.into()],
        ))
        .await
        .unwrap()
        .expect("connection row");
    row.try_get::<Option<i64>>("", "ssh_key_id").unwrap()
}

#[tokio::test]
async fn test_cascade_is_rewritten_to_set_null() {
    let db = setup("CASCADE").await;

    let outcome = set_null_step().upgrade(&db).await.unwrap();
    match outcome {
        RewriteOutcome::Rewritten { previous, report } => {
            assert_eq!(previous, ReferentialAction::Cascade);
            assert_eq!(report.rows_copied, 3);
            assert!(report.transactional);
            assert!(report
                .indexes
                .contains(&"ix_ssh_connections_ssh_key_id".to_string()));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(
        on_delete_of(&db, "ssh_connections", "ssh_key_id").await.unwrap(),
        Some("SET NULL".to_string())
    );
    assert_eq!(
        on_delete_of(&db, "ssh_connections", "user_id").await.unwrap(),
        Some("CASCADE".to_string())
    );
    assert!(!object_exists(&db, "table", "ssh_connections_new").await.unwrap());
    assert!(foreign_keys_enabled(&db).await.unwrap());

    let indexes = index_names(&db, "ssh_connections").await.unwrap();
    assert!(indexes.contains(&"ix_ssh_connections_ssh_key_id".to_string()));
    assert!(indexes.contains(&"ix_ssh_connections_host".to_string()));

    db.execute_unprepared("DELETE FROM ssh_keys WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(count_rows(&db, "ssh_connections").await.unwrap(), 3);
    assert_eq!(ssh_key_of(&db, 1).await, None);
    assert_eq!(ssh_key_of(&db, 2).await, Some(2));
}

#[tokio::test]
async fn test_second_upgrade_is_a_no_op() {
    let db = setup("CASCADE").await;
    let step = set_null_step();

    step.upgrade(&db).await.unwrap();
    let before = table_sql(&db, "ssh_connections").await.unwrap();
    let indexes_before = index_names(&db, "ssh_connections").await.unwrap();

    let outcome = step.upgrade(&db).await.unwrap();
    assert_eq!(
        outcome,
        RewriteOutcome::AlreadySatisfied {
            reason: SatisfiedReason::AlreadyDesired
        }
    );
    assert_eq!(table_sql(&db, "ssh_connections").await.unwrap(), before);
    assert_eq!(
        index_names(&db, "ssh_connections").await.unwrap(),
        indexes_before
    );
}

#[tokio::test]
async fn test_already_desired_table_is_left_untouched() {
    let db = setup("SET NULL").await;
    let before = table_sql(&db, "ssh_connections").await.unwrap();

    let outcome = set_null_step().upgrade(&db).await.unwrap();
    assert_eq!(
        outcome,
        RewriteOutcome::AlreadySatisfied {
            reason: SatisfiedReason::AlreadyDesired
        }
    );
    assert_eq!(table_sql(&db, "ssh_connections").await.unwrap(), before);
    // No side effects at all, not even the required index
    assert!(!index_names(&db, "ssh_connections")
        .await
        .unwrap()
        .contains(&"ix_ssh_connections_ssh_key_id".to_string()));
}

#[tokio::test]
async fn test_every_prior_action_is_rewritten() {
    for (declared, expected) in [
        ("NO ACTION", ReferentialAction::NoAction),
        ("RESTRICT", ReferentialAction::Restrict),
        ("SET DEFAULT", ReferentialAction::SetDefault),
    ] {
        let db = setup(declared).await;

        match set_null_step().upgrade(&db).await.unwrap() {
            RewriteOutcome::Rewritten { previous, .. } => assert_eq!(previous, expected),
            other => panic!("{} was not rewritten: {:?}", declared, other),
        }
        assert_eq!(
            on_delete_of(&db, "ssh_connections", "ssh_key_id").await.unwrap(),
            Some("SET NULL".to_string())
        );
        assert_eq!(
            on_delete_of(&db, "ssh_connections", "user_id").await.unwrap(),
            Some("CASCADE".to_string())
        );
    }
}

#[tokio::test]
async fn test_columns_added_by_later_migrations_survive() {
    let db = setup("CASCADE").await;
    exec_all(&db, &fixtures::DRIFT_COLUMNS).await.unwrap();
    db.execute_unprepared(
        "UPDATE ssh_connections SET ssh_path_prefix = '/srv', use_sftp_mode = 0 WHERE id = 2",
    )
    .await
    .unwrap();

    set_null_step().upgrade(&db).await.unwrap();

    assert_eq!(
        column_names(&db, "ssh_connections").await.unwrap(),
        vec![
            "id",
            "user_id",
            "ssh_key_id",
            "host",
            "username",
            "port",
            "created_at",
            "use_sftp_mode",
            "ssh_path_prefix",
        ]
    );

    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT use_sftp_mode, ssh_path_prefix FROM ssh_connections WHERE id = 2".to_string(),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.try_get::<i32>("", "use_sftp_mode").unwrap(), 0);
    assert_eq!(
        row.try_get::<Option<String>>("", "ssh_path_prefix").unwrap(),
        Some("/srv".to_string())
    );

    // Defaults and NOT NULL carry over
    db.execute_unprepared(
        "INSERT INTO ssh_connections (id, host, username) VALUES (10, 'new-host', 'admin')",
    )
    .await
    .unwrap();
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT use_sftp_mode, port FROM ssh_connections WHERE id = 10".to_string(),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.try_get::<i32>("", "use_sftp_mode").unwrap(), 1);
    assert_eq!(row.try_get::<i32>("", "port").unwrap(), 22);
    assert!(db
        .execute_unprepared("INSERT INTO ssh_connections (id, username) VALUES (11, 'x')")
        .await
        .is_err());
}

#[tokio::test]
async fn test_stale_scratch_table_is_replaced() {
    let db = setup("CASCADE").await;
    db.execute_unprepared("CREATE TABLE ssh_connections_new (junk TEXT)")
        .await
        .unwrap();

    let outcome = set_null_step().upgrade(&db).await.unwrap();
    assert!(matches!(outcome, RewriteOutcome::Rewritten { .. }));
    assert!(!object_exists(&db, "table", "ssh_connections_new").await.unwrap());
    assert!(!column_names(&db, "ssh_connections")
        .await
        .unwrap()
        .contains(&"junk".to_string()));
    assert_eq!(count_rows(&db, "ssh_connections").await.unwrap(), 3);
}

#[tokio::test]
async fn test_missing_table_is_reported() {
    let db = TestDb::new_in_memory().connect().await.unwrap();

    let err = set_null_step().upgrade(&db).await.unwrap_err();
    assert!(matches!(err, RewriteError::SchemaNotFound(ref t) if t == "ssh_connections"));
    assert!(err.is_pre_rebuild());
}

#[tokio::test]
async fn test_missing_column_and_constraint_are_satisfied() {
    let db = setup("CASCADE").await;

    let missing_column = ConstraintRewrite::new(RewriteSpec::new(
        "ssh_connections",
        "jump_host_id",
        ReferentialAction::SetNull,
    ));
    assert_eq!(
        missing_column.upgrade(&db).await.unwrap(),
        RewriteOutcome::AlreadySatisfied {
            reason: SatisfiedReason::ColumnMissing
        }
    );

    let no_constraint = ConstraintRewrite::new(RewriteSpec::new(
        "ssh_connections",
        "host",
        ReferentialAction::SetNull,
    ));
    assert_eq!(
        no_constraint.upgrade(&db).await.unwrap(),
        RewriteOutcome::AlreadySatisfied {
            reason: SatisfiedReason::ConstraintMissing
        }
    );
}

#[tokio::test]
async fn test_unique_constraints_and_partial_indexes_are_kept() {
    let db = TestDb::new_in_memory().connect().await.unwrap();
    exec_all(
        &db,
        &[
            fixtures::SSH_KEYS,
            "CREATE TABLE deployments (
                id INTEGER PRIMARY KEY,
                ssh_key_id INTEGER REFERENCES ssh_keys(id) ON DELETE CASCADE,
                host TEXT NOT NULL,
                path TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                UNIQUE (host, path)
            )",
            "CREATE INDEX ix_deployments_active_host ON deployments (host) WHERE active = 1",
            "CREATE INDEX ix_deployments_lower_path ON deployments (lower(path))",
            "INSERT INTO ssh_keys (id, name) VALUES (1, 'deploy')",
            "INSERT INTO deployments (id, ssh_key_id, host, path) VALUES (1, 1, 'web-1', '/srv/app')",
        ],
    )
    .await
    .unwrap();

    let step = ConstraintRewrite::new(RewriteSpec::new(
        "deployments",
        "ssh_key_id",
        ReferentialAction::SetNull,
    ));
    step.upgrade(&db).await.unwrap();

    let indexes = index_names(&db, "deployments").await.unwrap();
    for expected in [
        "ix_deployments_active_host",
        "ix_deployments_lower_path",
        "ix_deployments_ssh_key_id",
    ] {
        assert!(indexes.contains(&expected.to_string()), "missing {}", expected);
    }
    assert!(indexes.iter().any(|name| name.starts_with("sqlite_autoindex_deployments")));

    let partial = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT sql FROM sqlite_master WHERE name = 'ix_deployments_active_host'".to_string(),
        ))
        .await
        .unwrap()
        .unwrap()
        .try_get::<String>("", "sql")
        .unwrap();
    assert!(partial.contains("WHERE active = 1"));

    assert!(db
        .execute_unprepared(
            "INSERT INTO deployments (id, host, path) VALUES (2, 'web-1', '/srv/app')"
        )
        .await
        .is_err());
}

#[tokio::test]
async fn test_required_indexes_can_be_customised() {
    let db = setup("CASCADE").await;
    let spec = RewriteSpec::new("ssh_connections", "ssh_key_id", ReferentialAction::SetNull)
        .with_required_indexes(vec![IndexSpec {
            name: "ux_ssh_connections_host_user".into(),
            columns: vec!["host".into(), "username".into()],
            unique: true,
        }])
        .preserve_existing_indexes(false);

    ConstraintRewrite::new(spec).upgrade(&db).await.unwrap();

    assert_eq!(
        index_names(&db, "ssh_connections").await.unwrap(),
        vec!["ux_ssh_connections_host_user".to_string()]
    );
}

#[tokio::test]
async fn test_autoincrement_is_kept() {
    let db = TestDb::new_in_memory().connect().await.unwrap();
    exec_all(
        &db,
        &[
            fixtures::SSH_KEYS,
            "CREATE TABLE key_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ssh_key_id INTEGER REFERENCES ssh_keys(id) ON DELETE CASCADE,
                action TEXT NOT NULL
            )",
            "INSERT INTO ssh_keys (id, name) VALUES (1, 'deploy')",
            "INSERT INTO key_audit (ssh_key_id, action) VALUES (1, 'created')",
            "INSERT INTO key_audit (ssh_key_id, action) VALUES (1, 'rotated')",
        ],
    )
    .await
    .unwrap();

    ConstraintRewrite::new(RewriteSpec::new(
        "key_audit",
        "ssh_key_id",
        ReferentialAction::SetNull,
    ))
    .upgrade(&db)
    .await
    .unwrap();

    let sql = table_sql(&db, "key_audit").await.unwrap().unwrap();
    assert!(sql.to_uppercase().contains("AUTOINCREMENT"));

    db.execute_unprepared("INSERT INTO key_audit (action) VALUES ('orphaned')")
        .await
        .unwrap();
    let max_id = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT MAX(id) AS id FROM key_audit".to_string(),
        ))
        .await
        .unwrap()
        .unwrap()
        .try_get::<i64>("", "id")
        .unwrap();
    assert_eq!(max_id, 3);
}

#[tokio::test]
async fn test_check_constraint_is_rejected_without_side_effects() {
    let db = TestDb::new_in_memory().connect().await.unwrap();
    exec_all(
        &db,
        &[
            fixtures::SSH_KEYS,
            "CREATE TABLE tunnels (
                id INTEGER PRIMARY KEY,
                ssh_key_id INTEGER REFERENCES ssh_keys(id) ON DELETE CASCADE,
                port INTEGER NOT NULL CHECK (port > 0)
            )",
        ],
    )
    .await
    .unwrap();
    let before = table_sql(&db, "tunnels").await.unwrap();

    let err = ConstraintRewrite::new(RewriteSpec::new(
        "tunnels",
        "ssh_key_id",
        ReferentialAction::SetNull,
    ))
    .upgrade(&db)
    .await
    .unwrap_err();

    match &err {
        RewriteError::UnsupportedTable { table, reasons } => {
            assert_eq!(table, "tunnels");
            assert!(reasons.iter().any(|r| r.contains("CHECK")));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_pre_rebuild());
    assert_eq!(table_sql(&db, "tunnels").await.unwrap(), before);
    assert!(!object_exists(&db, "table", "tunnels_new").await.unwrap());
}

#[tokio::test]
async fn test_non_transactional_rebuild() {
    let db = setup("CASCADE").await;

    let outcome = set_null_step()
        .with_options(RebuildOptions {
            transactional: false,
        })
        .upgrade(&db)
        .await
        .unwrap();

    match outcome {
        RewriteOutcome::Rewritten { report, .. } => {
            assert!(!report.transactional);
            assert_eq!(report.rows_copied, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        on_delete_of(&db, "ssh_connections", "ssh_key_id").await.unwrap(),
        Some("SET NULL".to_string())
    );
    assert!(foreign_keys_enabled(&db).await.unwrap());
}

#[tokio::test]
async fn test_composite_primary_key() {
    let db = TestDb::new_in_memory().connect().await.unwrap();
    exec_all(
        &db,
        &[
            fixtures::USERS,
            fixtures::SSH_KEYS,
            "CREATE TABLE key_grants (
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                ssh_key_id INTEGER NOT NULL REFERENCES ssh_keys(id) ON DELETE CASCADE,
                granted_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (ssh_key_id, user_id)
            )",
            "INSERT INTO users (id, email) VALUES (1, 'ops@example.com')",
            "INSERT INTO ssh_keys (id, name) VALUES (1, 'deploy')",
            "INSERT INTO key_grants (user_id, ssh_key_id) VALUES (1, 1)",
        ],
    )
    .await
    .unwrap();

    ConstraintRewrite::new(RewriteSpec::new(
        "key_grants",
        "ssh_key_id",
        ReferentialAction::Restrict,
    ))
    .upgrade(&db)
    .await
    .unwrap();

    assert_eq!(
        on_delete_of(&db, "key_grants", "ssh_key_id").await.unwrap(),
        Some("RESTRICT".to_string())
    );
    assert_eq!(
        on_delete_of(&db, "key_grants", "user_id").await.unwrap(),
        Some("CASCADE".to_string())
    );

    let pk = db
        .query_all(Statement::from_string(
            db.get_database_backend(),
            "SELECT name FROM pragma_table_info('key_grants') WHERE pk > 0 ORDER BY pk".to_string(),
        ))
        .await
        .unwrap()
        .iter()
        .map(|r| r.try_get::<String>("", "name").unwrap())
        .collect::<Vec<_>>();
    assert_eq!(pk, vec!["ssh_key_id", "user_id"]);

    assert!(db
        .execute_unprepared("INSERT INTO key_grants (user_id, ssh_key_id) VALUES (1, 1)")
        .await
        .is_err());
    assert!(db
        .execute_unprepared("DELETE FROM ssh_keys WHERE id = 1")
        .await
        .is_err());
}

#[tokio::test]
async fn test_reference_to_implicit_parent_key() {
    let db = TestDb::new_in_memory().connect().await.unwrap();
    exec_all(
        &db,
        &[
            fixtures::SSH_KEYS,
            "CREATE TABLE key_notes (
                id INTEGER PRIMARY KEY,
                ssh_key_id INTEGER REFERENCES ssh_keys ON DELETE CASCADE,
                body TEXT
            )",
            "INSERT INTO ssh_keys (id, name) VALUES (1, 'deploy')",
            "INSERT INTO key_notes (id, ssh_key_id, body) VALUES (1, 1, 'rotate monthly')",
        ],
    )
    .await
    .unwrap();

    ConstraintRewrite::new(RewriteSpec::new(
        "key_notes",
        "ssh_key_id",
        ReferentialAction::SetNull,
    ))
    .upgrade(&db)
    .await
    .unwrap();

    db.execute_unprepared("DELETE FROM ssh_keys WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(count_rows(&db, "key_notes").await.unwrap(), 1);
}

#[tokio::test]
async fn test_interrupted_rebuild_is_completed() {
    let db = setup("CASCADE").await;
    let scratch = fixtures::ssh_connections("SET NULL").replacen(
        "CREATE TABLE ssh_connections (",
        "CREATE TABLE ssh_connections_new (",
        1,
    );
    // State left by a crash between dropping the original and the rename
    exec_all(
        &db,
        &[
            scratch.as_str(),
            "INSERT INTO ssh_connections_new SELECT * FROM ssh_connections",
            "DROP TABLE ssh_connections",
        ],
    )
    .await
    .unwrap();

    let step = set_null_step();
    let outcome = step.upgrade(&db).await.unwrap();
    assert_eq!(
        outcome,
        RewriteOutcome::Recovered {
            indexes: vec!["ix_ssh_connections_ssh_key_id".to_string()]
        }
    );
    assert!(!object_exists(&db, "table", "ssh_connections_new").await.unwrap());
    assert_eq!(count_rows(&db, "ssh_connections").await.unwrap(), 3);
    assert!(index_names(&db, "ssh_connections")
        .await
        .unwrap()
        .contains(&"ix_ssh_connections_ssh_key_id".to_string()));

    assert!(matches!(
        step.upgrade(&db).await.unwrap(),
        RewriteOutcome::AlreadySatisfied { .. }
    ));
}

#[tokio::test]
async fn test_triggers_and_views_survive() {
    let db = setup("CASCADE").await;
    exec_all(
        &db,
        &[
            "CREATE TABLE connection_audit (connection_id INTEGER, host TEXT)",
            "CREATE TRIGGER trg_ssh_connections_audit AFTER UPDATE OF host ON ssh_connections
             BEGIN
                INSERT INTO connection_audit (connection_id, host) VALUES (NEW.id, NEW.host);
             END",
            "CREATE VIEW v_connection_hosts AS SELECT id, host FROM ssh_connections",
        ],
    )
    .await
    .unwrap();

    match set_null_step().upgrade(&db).await.unwrap() {
        RewriteOutcome::Rewritten { report, .. } => {
            assert_eq!(report.triggers, vec!["trg_ssh_connections_audit".to_string()]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert!(object_exists(&db, "trigger", "trg_ssh_connections_audit")
        .await
        .unwrap());
    db.execute_unprepared("UPDATE ssh_connections SET host = 'web-2' WHERE id = 1")
        .await
        .unwrap();
    assert_eq!(count_rows(&db, "connection_audit").await.unwrap(), 1);
    assert_eq!(count_rows(&db, "v_connection_hosts").await.unwrap(), 3);
}

#[tokio::test]
async fn test_existing_orphans_do_not_block_the_rewrite() {
    let db = setup("CASCADE").await;
    exec_all(
        &db,
        &[
            "PRAGMA foreign_keys = OFF",
            "INSERT INTO ssh_connections (id, user_id, ssh_key_id, host, username) VALUES (4, 42, 1, 'ghost', 'nobody')",
            "PRAGMA foreign_keys = ON",
        ],
    )
    .await
    .unwrap();

    let step = set_null_step();
    match step.upgrade(&db).await.unwrap() {
        RewriteOutcome::Rewritten { report, .. } => assert_eq!(report.rows_copied, 4),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        on_delete_of(&db, "ssh_connections", "ssh_key_id").await.unwrap(),
        Some("SET NULL".to_string())
    );
    assert_eq!(count_rows(&db, "ssh_connections").await.unwrap(), 4);
    assert!(foreign_keys_enabled(&db).await.unwrap());

    assert_eq!(
        step.upgrade(&db).await.unwrap(),
        RewriteOutcome::AlreadySatisfied {
            reason: SatisfiedReason::AlreadyDesired
        }
    );
}

#[tokio::test]
async fn test_nocase_unique_index_keeps_its_collation() {
    let db = setup("CASCADE").await;
    db.execute_unprepared(
        "CREATE UNIQUE INDEX ux_ssh_connections_host ON ssh_connections (host COLLATE NOCASE)",
    )
    .await
    .unwrap();

    set_null_step().upgrade(&db).await.unwrap();

    let sql = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            "SELECT sql FROM sqlite_master WHERE name = 'ux_ssh_connections_host'".to_string(),
        ))
        .await
        .unwrap()
        .unwrap()
        .try_get::<String>("", "sql")
        .unwrap();
    assert!(sql.contains("COLLATE NOCASE"));

    assert!(db
        .execute_unprepared(
            "INSERT INTO ssh_connections (id, user_id, host, username) VALUES (9, 1, 'WEB-1', 'ops')"
        )
        .await
        .is_err());
}

#[tokio::test]
async fn test_pooled_connections_never_cascade_into_children() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("pooled.db").display());
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(5)
        .min_connections(5)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();

    seed_ssh_schema(&db, "CASCADE").await.unwrap();
    exec_all(
        &db,
        &[
            "CREATE TABLE sessions (
                id INTEGER PRIMARY KEY,
                connection_id INTEGER REFERENCES ssh_connections(id) ON DELETE CASCADE
            )",
            "INSERT INTO sessions (id, connection_id) VALUES (1, 1), (2, 2), (3, 3)",
        ],
    )
    .await
    .unwrap();

    for _ in 0..3 {
        match set_null_step().upgrade(&db).await {
            Ok(_) => {}
            Err(RewriteError::RebuildFailure { stage, .. }) => {
                assert_eq!(stage, RebuildStage::DropOriginal)
            }
            Err(other) => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(count_rows(&db, "sessions").await.unwrap(), 3);
        assert_eq!(count_rows(&db, "ssh_connections").await.unwrap(), 3);
    }
}

#[tokio::test]
async fn test_plan_is_a_dry_run() {
    let db = setup("CASCADE").await;
    let before = table_sql(&db, "ssh_connections").await.unwrap();

    match set_null_step().plan(&db).await.unwrap() {
        PlanPreview::Rewrite { previous, plan } => {
            assert_eq!(previous, ReferentialAction::Cascade);
            assert_eq!(plan.statements[0].stage, RebuildStage::DropStaleScratch);
            let sql = plan.sql();
            assert!(sql.iter().any(|s| s.contains("ON DELETE SET NULL")));
            assert!(sql.iter().any(|s| s.contains("ix_ssh_connections_host")));
        }
        other => panic!("unexpected preview: {:?}", other),
    }
    assert_eq!(table_sql(&db, "ssh_connections").await.unwrap(), before);

    set_null_step().upgrade(&db).await.unwrap();
    assert!(matches!(
        set_null_step().plan(&db).await.unwrap(),
        PlanPreview::Skip(SatisfiedReason::AlreadyDesired)
    ));
}

#[tokio::test]
async fn test_downgrade_keeps_the_rewritten_action() {
    let db = setup("CASCADE").await;
    let step = set_null_step();
    step.upgrade(&db).await.unwrap();

    step.downgrade(&db).await.unwrap();
    assert_eq!(
        on_delete_of(&db, "ssh_connections", "ssh_key_id").await.unwrap(),
        Some("SET NULL".to_string())
    );
}

#[tokio::test]
async fn test_file_backed_database() {
    let dir = tempfile::tempdir().unwrap();
    let test_db = TestDb::new_file(dir.path().join("app.db"));
    {
        let db = test_db.connect().await.unwrap();
        seed_ssh_schema(&db, "CASCADE").await.unwrap();
        set_null_step().upgrade(&db).await.unwrap();
        db.close().await.unwrap();
    }

    let db = test_db.connect().await.unwrap();
    assert_eq!(
        on_delete_of(&db, "ssh_connections", "ssh_key_id").await.unwrap(),
        Some("SET NULL".to_string())
    );
    assert_eq!(count_rows(&db, "ssh_connections").await.unwrap(), 3);
}
