use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::backends::InjectedFailure;
use crate::config::MigratorConfig;
use crate::error::{DriverError, MigrateError, VersionKind};
use crate::lock::MIGRATION_LOCK_ID;
use crate::migrations::{MigrationDirection, MigrationState};
use crate::observer::MigrationEvent;

#[tokio::test]
async fn test_create_table_file_round_trip() {
    let db = MemoryDatabase::new();
    let source = MemoryMigrationSource::new().with_file(
        "db/001_create_table.sql",
        "CREATE TABLE t(x int);\n---- create above / drop below ----\nDROP TABLE t;\n",
    );
    let mut migrator = migrator_with_source(&db, source).await;

    assert_eq!(migrator.load_migrations("db").unwrap(), 1);
    let migration = migrator.migrations().get(0).unwrap();
    assert_eq!(migration.sequence, 1);
    assert!(migration.up_sql.contains("CREATE TABLE"));
    assert!(migration.down_sql.contains("DROP TABLE"));

    let result = migrator.migrate_to(1).await.unwrap();
    assert_eq!((result.from_version, result.to_version), (0, 1));
    assert_eq!(db.version(VERSION_TABLE), Some(1));
    assert_eq!(db.executed(), strings(&["CREATE TABLE t(x int);"]));

    migrator.migrate_to(0).await.unwrap();
    assert_eq!(db.version(VERSION_TABLE), Some(0));
    assert_eq!(
        db.executed(),
        strings(&["CREATE TABLE t(x int);", "DROP TABLE t;"])
    );
}

#[tokio::test]
async fn test_full_round_trip_reverts_in_reverse_order() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    let up = migrator.migrate().await.unwrap();
    assert_eq!(up.step_count(), 3);
    assert_eq!(
        up.steps.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(up.steps.iter().all(|s| s.direction == MigrationDirection::Up));

    let down = migrator.migrate_to(0).await.unwrap();
    assert_eq!(
        down.steps.iter().map(|s| s.sequence).collect::<Vec<_>>(),
        vec![3, 2, 1]
    );
    assert_eq!(
        down.steps.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![2, 1, 0]
    );

    assert_eq!(db.version(VERSION_TABLE), Some(0));
    assert_eq!(
        db.executed(),
        strings(&[WIDGETS_UP, NAME_UP, INDEX_UP, INDEX_DOWN, NAME_DOWN, WIDGETS_DOWN])
    );
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_irreversible_migration_stops_backward_run() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    migrator.append_migration("001_create_widgets.sql", WIDGETS_UP, WIDGETS_DOWN);
    migrator.append_migration("002_backfill.sql", "update widgets set id = id + 1;", "");
    migrator.append_migration("003_add_name.sql", NAME_UP, NAME_DOWN);

    migrator.migrate().await.unwrap();

    let err = migrator.migrate_to(0).await.unwrap_err();
    match err {
        MigrateError::IrreversibleMigration { sequence, name } => {
            assert_eq!(sequence, 2);
            assert_eq!(name, "002_backfill.sql");
        }
        other => panic!("Expected irreversible migration error, got {:?}", other),
    }

    // Step 3 was reverted before the run reached step 2
    assert_eq!(db.version(VERSION_TABLE), Some(2));
    assert_eq!(db.executed().last().map(String::as_str), Some(NAME_DOWN));
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_repeated_migrate_to_runs_no_steps() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    migrator.migrate_to(2).await.unwrap();
    let executed = db.executed();
    let resets = db.session_resets();

    let again = migrator.migrate_to(2).await.unwrap();
    assert_eq!(again.step_count(), 0);
    assert_eq!((again.from_version, again.to_version), (2, 2));
    assert_eq!(db.executed(), executed);
    assert_eq!(db.session_resets(), resets);
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_out_of_range_targets_are_rejected() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    for target in [-1, 4] {
        match migrator.migrate_to(target).await.unwrap_err() {
            MigrateError::BadVersion { kind, version, max } => {
                assert_eq!(kind, VersionKind::Destination);
                assert_eq!(version, target);
                assert_eq!(max, 3);
            }
            other => panic!("Expected bad version error, got {:?}", other),
        }
    }

    assert!(db.executed().is_empty());
    assert_eq!(db.version(VERSION_TABLE), Some(0));
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_out_of_range_current_version_is_rejected() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);
    db.set_version(VERSION_TABLE, 9);

    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(
        err,
        MigrateError::BadVersion {
            kind: VersionKind::Current,
            version: 9,
            max: 3
        }
    ));
    assert!(db.executed().is_empty());
}

#[tokio::test]
async fn test_concurrent_runs_apply_each_step_once() {
    let db = MemoryDatabase::new();
    let mut first = migrator_for(&db).await;
    let mut second = migrator_for(&db).await;
    append_widgets(&mut first);
    append_widgets(&mut second);

    let (a, b) = tokio::join!(first.migrate(), second.migrate());
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut step_counts = vec![a.step_count(), b.step_count()];
    step_counts.sort();
    assert_eq!(step_counts, vec![0, 3]);

    assert_eq!(db.version(VERSION_TABLE), Some(3));
    assert_eq!(db.executed(), strings(&[WIDGETS_UP, NAME_UP, INDEX_UP]));
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_database_error_is_wrapped_and_step_rolled_back() {
    let db = MemoryDatabase::new();
    db.inject_failure(
        "create index",
        InjectedFailure::Database {
            code: "42P07".to_string(),
            message: "relation \"widgets_name_idx\" already exists".to_string(),
        },
    );
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    let err = migrator.migrate().await.unwrap_err();
    match &err {
        MigrateError::Migration { name, sql, source } => {
            assert_eq!(name, "003_index_name.sql");
            assert_eq!(sql, INDEX_UP);
            assert_eq!(source.code(), Some("42P07"));
        }
        other => panic!("Expected migration error, got {:?}", other),
    }
    assert_eq!(
        err.database_error().map(|e| e.message()),
        Some("relation \"widgets_name_idx\" already exists")
    );

    // Earlier steps stay committed
    assert_eq!(db.version(VERSION_TABLE), Some(2));
    assert_eq!(db.executed(), strings(&[WIDGETS_UP, NAME_UP]));
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_version_update_failure_rolls_back_statement() {
    let db = MemoryDatabase::new();
    db.inject_failure(
        "set version",
        InjectedFailure::Connection("connection reset by peer".to_string()),
    );
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(err, MigrateError::Driver(DriverError::Other(_))));
    assert!(err.database_error().is_none());

    assert_eq!(db.version(VERSION_TABLE), Some(0));
    assert!(db.executed().is_empty());
    assert_eq!(db.rolled_back(), strings(&[WIDGETS_UP]));
}

#[tokio::test]
async fn test_disabled_transactions_keep_partial_step() {
    let db = MemoryDatabase::new();
    db.inject_failure(
        "set version",
        InjectedFailure::Connection("connection reset by peer".to_string()),
    );
    let options = MigratorOptions {
        disable_tx: true,
        ..MigratorOptions::default()
    };
    let mut migrator = Migrator::with_options(db.connect(), VERSION_TABLE, options)
        .await
        .unwrap();
    migrator.append_migration(
        "001_concurrent_index.sql",
        "create index concurrently widgets_id_idx on widgets(id);",
        "",
    );

    assert!(migrator.migrate().await.is_err());
    assert_eq!(
        db.executed(),
        strings(&["create index concurrently widgets_id_idx on widgets(id);"])
    );
    assert!(db.rolled_back().is_empty());
    assert_eq!(db.version(VERSION_TABLE), Some(0));
}

#[tokio::test]
async fn test_cancellation_between_steps() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    let token = migrator.cancellation_token().clone();
    migrator.on_start(move |event| {
        if event.sequence == 2 {
            token.cancel();
        }
    });

    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(err, MigrateError::Cancelled));
    assert_eq!(db.version(VERSION_TABLE), Some(1));
    assert_eq!(db.executed(), strings(&[WIDGETS_UP]));
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_cancellation_interrupts_hung_statement() {
    let db = MemoryDatabase::new();
    db.inject_failure("add column", InjectedFailure::Hang);
    let token = CancellationToken::new();
    let mut migrator = migrator_for(&db)
        .await
        .with_cancellation_token(token.clone());
    append_widgets(&mut migrator);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(err, MigrateError::Cancelled));
    assert_eq!(db.interrupts(), 1);
    assert_eq!(db.version(VERSION_TABLE), Some(1));
    assert_eq!(db.rolled_back(), Vec::<String>::new());
    assert!(!db.is_locked(MIGRATION_LOCK_ID));

    // Reads after cancellation fail without touching the session
    assert!(matches!(
        migrator.current_version().await,
        Err(MigrateError::Cancelled)
    ));
    assert_eq!(db.interrupts(), 1);
}

#[tokio::test]
async fn test_release_failure_is_reported_after_successful_run() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);
    db.inject_failure(
        "pg_advisory_unlock",
        InjectedFailure::Connection("connection reset by peer".to_string()),
    );

    let err = migrator.migrate().await.unwrap_err();
    assert!(matches!(err, MigrateError::Driver(DriverError::Other(_))));
    assert_eq!(db.version(VERSION_TABLE), Some(3));
}

#[tokio::test]
async fn test_step_failure_wins_over_release_failure() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);
    db.inject_failure(
        "create index",
        InjectedFailure::Database {
            code: "42P07".to_string(),
            message: "relation \"widgets_name_idx\" already exists".to_string(),
        },
    );
    db.inject_failure(
        "pg_advisory_unlock",
        InjectedFailure::Connection("connection reset by peer".to_string()),
    );

    let err = migrator.migrate().await.unwrap_err();
    assert!(
        matches!(err, MigrateError::Migration { ref name, .. } if name == "003_index_name.sql")
    );
    assert_eq!(db.version(VERSION_TABLE), Some(2));
}

#[tokio::test]
async fn test_bootstrap_creates_version_table_once() {
    let db = MemoryDatabase::new();
    assert_eq!(db.version(VERSION_TABLE), None);

    let mut migrator = migrator_for(&db).await;
    assert_eq!(db.version(VERSION_TABLE), Some(0));
    assert_eq!(migrator.current_version().await.unwrap(), 0);

    db.set_version(VERSION_TABLE, 2);
    let mut again = migrator_for(&db).await;
    assert_eq!(again.current_version().await.unwrap(), 2);
    assert!(!db.is_locked(MIGRATION_LOCK_ID));
}

#[tokio::test]
async fn test_unqualified_version_table() {
    let db = MemoryDatabase::new();
    let mut migrator = Migrator::new(db.connect(), "schema_version").await.unwrap();
    append_widgets(&mut migrator);

    migrator.migrate_to(1).await.unwrap();
    assert_eq!(db.version("schema_version"), Some(1));
    assert_eq!(migrator.version_table().schema(), None);
}

#[tokio::test]
async fn test_observers_receive_step_details() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    migrator.on_start(move |event: &MigrationEvent<'_>| {
        recorded.lock().push((
            event.sequence,
            event.name.to_string(),
            event.direction,
            event.sql.to_string(),
        ));
    });

    migrator.migrate_to(2).await.unwrap();
    migrator.migrate_to(0).await.unwrap();

    let up = MigrationDirection::Up;
    let down = MigrationDirection::Down;
    assert_eq!(
        *events.lock(),
        vec![
            (1, "001_create_widgets.sql".to_string(), up, WIDGETS_UP.to_string()),
            (2, "002_add_name.sql".to_string(), up, NAME_UP.to_string()),
            (2, "002_add_name.sql".to_string(), down, NAME_DOWN.to_string()),
            (1, "001_create_widgets.sql".to_string(), down, WIDGETS_DOWN.to_string()),
        ]
    );
}

#[tokio::test]
async fn test_session_reset_after_every_step() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    append_widgets(&mut migrator);

    migrator.migrate().await.unwrap();
    assert_eq!(db.session_resets(), 3);
}

#[tokio::test]
async fn test_status_reports_applied_and_pending() {
    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;
    migrator.append_migration("001_create_widgets.sql", WIDGETS_UP, WIDGETS_DOWN);
    migrator.append_migration("002_backfill.sql", "update widgets set id = id + 1;", "");

    migrator.migrate_to(1).await.unwrap();
    let status = migrator.status().await.unwrap();

    assert_eq!(status.len(), 2);
    assert_eq!(status[0].state, MigrationState::Applied);
    assert!(status[0].reversible);
    assert_eq!(status[1].state, MigrationState::Pending);
    assert!(!status[1].reversible);
}

#[tokio::test]
async fn test_from_config_uses_table_and_lock_key() {
    let db = MemoryDatabase::new();
    let config = MigratorConfig {
        version_table: "app.versions".to_string(),
        lock_key: 42,
        ..MigratorConfig::default()
    };

    let mut migrator = Migrator::from_config(db.connect(), &config).await.unwrap();
    assert_eq!(migrator.options().lock_key, 42);
    append_widgets(&mut migrator);

    migrator.migrate().await.unwrap();
    assert_eq!(db.version("app.versions"), Some(3));
    assert_eq!(db.version(VERSION_TABLE), None);
}
