use std::fs;

use super::*;
use crate::error::MigrateError;
use crate::templates::TemplateData;

fn widget_files() -> MemoryMigrationSource {
    MemoryMigrationSource::new()
        .with_file(
            "db/001_create_widgets.sql",
            "create table {{ schema }}.widgets(id int primary key);\n\
             ---- create above / drop below ----\n\
             drop table {{ schema }}.widgets;",
        )
        .with_file(
            "db/002_audit_widgets.sql",
            "{% include \"shared/audit.sql\" %}",
        )
        .with_file(
            "db/shared/audit.sql",
            "create trigger widgets_audit after update on {{ schema }}.widgets \
             for each row execute function audit();",
        )
        .with_file("db/README.md", "Run with elif migrate")
}

#[tokio::test]
async fn test_load_assigns_sequences_in_file_order() {
    let db = MemoryDatabase::new();
    let data = TemplateData::new();
    data.insert("schema", "app");
    let mut migrator = migrator_with_source(&db, widget_files()).await.with_data(data);

    assert_eq!(migrator.load_migrations("db").unwrap(), 2);

    let names: Vec<_> = migrator
        .migrations()
        .iter()
        .map(|m| (m.sequence, m.name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![(1, "001_create_widgets.sql"), (2, "002_audit_widgets.sql")]
    );

    let audit = migrator.migrations().get(1).unwrap();
    assert!(audit.up_sql.contains("on app.widgets"));
    assert!(!audit.is_reversible());

    migrator.migrate().await.unwrap();
    assert_eq!(db.version(VERSION_TABLE), Some(2));
    assert_eq!(
        db.executed().first().map(String::as_str),
        Some("create table app.widgets(id int primary key);")
    );
}

#[tokio::test]
async fn test_initial_data_from_map() {
    let db = MemoryDatabase::new();
    let mut map = serde_json::Map::new();
    map.insert("schema".to_string(), serde_json::Value::from("tenant_a"));
    let mut migrator = migrator_with_source(&db, widget_files())
        .await
        .with_data(TemplateData::from_map(map));

    migrator.load_migrations("db").unwrap();

    assert_eq!(
        migrator.migrations().get(0).unwrap().down_sql,
        "drop table tenant_a.widgets;"
    );
    assert_eq!(
        migrator.data().get("schema"),
        Some(serde_json::Value::from("tenant_a"))
    );
}

#[tokio::test]
async fn test_failed_load_registers_nothing() {
    let db = MemoryDatabase::new();
    let source = MemoryMigrationSource::new()
        .with_file("db/001_create_widgets.sql", "create table widgets(id int);")
        .with_file("db/002_broken.sql", "select {{ missing_value }};");
    let mut migrator = migrator_with_source(&db, source).await;

    let err = migrator.load_migrations("db").unwrap_err();
    assert!(matches!(err, MigrateError::Render { ref name, .. } if name == "002_broken.sql"));
    assert!(migrator.migrations().is_empty());
}

#[tokio::test]
async fn test_gap_fails_before_rendering() {
    let db = MemoryDatabase::new();
    let source = MemoryMigrationSource::new()
        .with_file("db/001_create_widgets.sql", "create table widgets(id int);")
        .with_file("db/003_add_name.sql", "{{ not rendered }}");
    let mut migrator = migrator_with_source(&db, source).await;

    let err = migrator.load_migrations("db").unwrap_err();
    assert!(matches!(err, MigrateError::MissingMigration(2)));
    assert!(migrator.migrations().is_empty());
}

#[tokio::test]
async fn test_set_data_carries_into_later_files() {
    let db = MemoryDatabase::new();
    let source = MemoryMigrationSource::new()
        .with_file(
            "db/001_schema.sql",
            "{{ set_data(key=\"owner\", value=\"app_owner\") }}create schema app;",
        )
        .with_file("db/002_owner.sql", "alter schema app owner to {{ owner }};");
    let mut migrator = migrator_with_source(&db, source).await;

    migrator.load_migrations("db").unwrap();

    assert_eq!(
        migrator.migrations().get(1).unwrap().up_sql,
        "alter schema app owner to app_owner;"
    );
    assert_eq!(
        migrator.data().get("owner"),
        Some(serde_json::Value::from("app_owner"))
    );
}

#[tokio::test]
async fn test_loads_from_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("001_create_widgets.sql"),
        "create table widgets(id int);\n---- create above / drop below ----\ndrop table widgets;\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("002_add_name.sql"),
        "alter table widgets add column name text;",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "not a migration").unwrap();

    let db = MemoryDatabase::new();
    let mut migrator = migrator_for(&db).await;

    assert_eq!(migrator.load_migrations(dir.path()).unwrap(), 2);
    assert_eq!(
        migrator.migrations().get(0).unwrap().down_sql,
        "drop table widgets;"
    );

    migrator.migrate().await.unwrap();
    migrator.migrate_to(1).await.unwrap_err();
    assert_eq!(db.version(VERSION_TABLE), Some(2));
}
