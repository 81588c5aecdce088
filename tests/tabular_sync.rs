use anyhow::Result;
use rust_tabular_sync::{
    add_column, count_rows, create_or_replace_table, delete_by_keys, delete_rows, drop_table, ensure_table,
    fetch_as_dataset, insert_rows, table_exists, try_fetch_as_dataset, update_cell, upsert_by_key, ColumnConstraint,
    ColumnDefinition, ColumnType, Dataset, Decimal, Engine, EngineConfig, ErrorKind, FetchRequest, IfExists,
    IndexDefinition, RowFilter, SyncError, TableDefinition, Value,
};
use tempfile::NamedTempFile;

// Route tracing output through the test harness; RUST_LOG picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn people() -> Dataset {
    Dataset::from_records(vec![
        vec![("id", Value::from(1)), ("name", Value::from("Alice"))],
        vec![("id", Value::from(2)), ("name", Value::from("Bob"))],
    ])
    .unwrap()
}

// Helper creating an in-memory engine holding the `users` table
fn create_test_engine() -> Result<Engine> {
    init_tracing();
    let engine = Engine::open_in_memory()?;
    create_or_replace_table(&engine, &people(), "users", IfExists::Replace)?;
    Ok(engine)
}

// Helper creating a file-backed engine; the file lives as long as the handle
fn create_temp_engine() -> Result<(Engine, NamedTempFile)> {
    init_tracing();
    let temp_file = NamedTempFile::new()?;
    let path = temp_file.path().to_str().unwrap().to_string();
    let engine = Engine::open(EngineConfig::new(path).with_max_connections(2))?;
    Ok((engine, temp_file))
}

fn names(engine: &Engine) -> Vec<Value> {
    let dataset = fetch_as_dataset(engine, "users", &FetchRequest::new().order_by("id", true));
    dataset.column_values("name").unwrap().into_iter().cloned().collect()
}

#[tokio::test]
async fn test_round_trip() {
    test_round_trip_impl().unwrap();
}

fn test_round_trip_impl() -> Result<()> {
    let engine = create_test_engine()?;
    let fetched = fetch_as_dataset(&engine, "users", &FetchRequest::new());

    let original = people();
    assert_eq!(fetched.len(), original.len());
    assert_eq!(fetched.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
    assert_eq!(fetched.columns(), original.columns());
    for name in ["id", "name"] {
        assert_eq!(fetched.column_values(name), original.column_values(name));
    }
    Ok(())
}

#[tokio::test]
async fn test_alice_and_bob() {
    test_alice_and_bob_impl().unwrap();
}

fn test_alice_and_bob_impl() -> Result<()> {
    let engine = create_test_engine()?;
    assert_eq!(count_rows(&engine, "users")?, 2);

    let changes = Dataset::from_records(vec![vec![("id", Value::from(2)), ("name", Value::from("Bobby"))]])?;
    let modified = upsert_by_key(&engine, &changes, "users", &["id"])?;
    assert_eq!(modified, 1);
    assert_eq!(names(&engine), vec![Value::from("Alice"), Value::from("Bobby")]);

    let deleted = delete_rows(&engine, "users", &RowFilter::new().with_condition("id", 1))?;
    assert_eq!(deleted, 1);
    let remaining = fetch_as_dataset(&engine, "users", &FetchRequest::new());
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining.row(0).unwrap().get("id"), Some(&Value::Integer(2)));
    Ok(())
}

#[test]
fn insert_is_additive() -> Result<()> {
    let engine = create_test_engine()?;
    let before = count_rows(&engine, "users")?;
    let more = Dataset::from_records(vec![
        vec![("name", Value::from("Carol")), ("id", Value::from(3))],
        vec![("name", Value::from("Dave")), ("id", Value::from(4))],
        vec![("name", Value::from("Eve")), ("id", Value::from(5))],
    ])?;
    assert_eq!(insert_rows(&engine, &more, "users")?, 3);
    assert_eq!(count_rows(&engine, "users")?, before + more.len());

    let empty = Dataset::with_schema([("id", ColumnType::BigInt)])?;
    assert_eq!(insert_rows(&engine, &empty, "users")?, 0);
    assert_eq!(count_rows(&engine, "users")?, before + more.len());
    Ok(())
}

#[test]
fn insert_rejects_unknown_columns() -> Result<()> {
    let engine = create_test_engine()?;
    let stray = Dataset::from_records(vec![vec![("id", Value::from(9)), ("age", Value::from(40))]])?;
    let err = insert_rows(&engine, &stray, "users").unwrap_err();
    assert!(matches!(err, SyncError::SchemaMismatch { ref column, .. } if column == "age"));
    assert_eq!(count_rows(&engine, "users")?, 2);
    Ok(())
}

#[test]
fn insert_into_missing_table_is_schema_error() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    let err = insert_rows(&engine, &people(), "nowhere").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    Ok(())
}

#[test]
fn empty_delete_condition_deletes_nothing() -> Result<()> {
    let engine = create_test_engine()?;
    assert_eq!(delete_rows(&engine, "users", &RowFilter::new())?, 0);
    assert_eq!(count_rows(&engine, "users")?, 2);
    Ok(())
}

#[test]
fn upsert_without_matches_changes_nothing() -> Result<()> {
    let engine = create_test_engine()?;
    let changes = Dataset::from_records(vec![vec![("id", Value::from(42)), ("name", Value::from("Zed"))]])?;
    assert_eq!(upsert_by_key(&engine, &changes, "users", &["id"])?, 0);
    // Update-only: the unmatched row is not inserted.
    assert_eq!(count_rows(&engine, "users")?, 2);
    assert_eq!(names(&engine), vec![Value::from("Alice"), Value::from("Bob")]);
    Ok(())
}

#[test]
fn upsert_requires_match_columns_in_dataset() -> Result<()> {
    let engine = create_test_engine()?;
    let err = upsert_by_key(&engine, &people(), "users", &["email"]).unwrap_err();
    assert!(matches!(err, SyncError::InvalidDataset(_)));
    let none: [&str; 0] = [];
    assert_eq!(
        upsert_by_key(&engine, &people(), "users", &none).unwrap_err().kind(),
        ErrorKind::Schema
    );
    Ok(())
}

#[test]
fn upsert_updates_every_row_sharing_a_key() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    let staff = Dataset::from_records(vec![
        vec![("team", Value::from("red")), ("lead", Value::from("Ann"))],
        vec![("team", Value::from("red")), ("lead", Value::from("Ann"))],
        vec![("team", Value::from("blue")), ("lead", Value::from("Bo"))],
    ])?;
    create_or_replace_table(&engine, &staff, "staff", IfExists::Replace)?;

    let change = Dataset::from_records(vec![vec![("team", Value::from("red")), ("lead", Value::from("Cy"))]])?;
    assert_eq!(upsert_by_key(&engine, &change, "staff", &["team"])?, 2);
    Ok(())
}

#[test]
fn update_cell_reports_whether_rows_matched() -> Result<()> {
    let engine = create_test_engine()?;
    assert!(update_cell(&engine, "users", &RowFilter::new().with_condition("id", 1), "name", "Alicia")?);
    assert!(!update_cell(&engine, "users", &RowFilter::new().with_condition("id", 99), "name", "Nobody")?);
    assert!(!update_cell(&engine, "users", &RowFilter::new(), "name", "Everyone")?);
    assert_eq!(names(&engine), vec![Value::from("Alicia"), Value::from("Bob")]);

    let err = update_cell(&engine, "users", &RowFilter::new().with_condition("id", 1), "email", "a@x").unwrap_err();
    assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    Ok(())
}

#[test]
fn null_conditions_match_null_cells() -> Result<()> {
    let engine = create_test_engine()?;
    let orphan = Dataset::from_records(vec![vec![("id", Value::from(3)), ("name", Value::Null)]])?;
    insert_rows(&engine, &orphan, "users")?;
    assert_eq!(delete_rows(&engine, "users", &RowFilter::new().with_condition("name", Value::Null))?, 1);
    assert_eq!(count_rows(&engine, "users")?, 2);
    Ok(())
}

#[test]
fn add_column_twice_is_duplicate() -> Result<()> {
    let engine = create_test_engine()?;
    add_column(&engine, "users", "email", &ColumnType::Varchar(255))?;

    let err = add_column(&engine, "users", "email", &ColumnType::Varchar(255)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);

    // The first call's column is still there and usable.
    assert!(update_cell(&engine, "users", &RowFilter::new().with_condition("id", 2), "email", "bob@example.com")?);
    let fetched = fetch_as_dataset(&engine, "users", &FetchRequest::new().columns(["email"]).order_by("id", true));
    assert_eq!(
        fetched.column_values("email").unwrap(),
        vec![&Value::Null, &Value::from("bob@example.com")]
    );
    Ok(())
}

#[test]
fn add_column_to_missing_table_is_schema_error() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    let err = add_column(&engine, "ghost", "x", &ColumnType::Int).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    Ok(())
}

#[test]
fn drop_table_is_idempotent() -> Result<()> {
    let engine = create_test_engine()?;
    drop_table(&engine, "users")?;
    assert!(!table_exists(&engine, "users")?);
    drop_table(&engine, "users")?;
    drop_table(&engine, "never_existed")?;
    Ok(())
}

#[test]
fn replace_mode_recreates_the_table() -> Result<()> {
    let engine = create_test_engine()?;
    let scores = Dataset::from_records(vec![vec![("id", Value::from(7)), ("score", Value::from(0.5))]])?;
    assert_eq!(create_or_replace_table(&engine, &scores, "users", IfExists::Replace)?, 1);

    let fetched = fetch_as_dataset(&engine, "users", &FetchRequest::new());
    assert_eq!(fetched.column_names().collect::<Vec<_>>(), vec!["id", "score"]);
    assert_eq!(fetched.len(), 1);
    Ok(())
}

#[test]
fn decimals_round_trip_at_their_own_scale() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    let prices = Dataset::from_records(vec![
        vec![("p", Value::from("1.5".parse::<Decimal>()?))],
        vec![("p", Value::from("2.25".parse::<Decimal>()?))],
    ])?;
    create_or_replace_table(&engine, &prices, "prices", IfExists::Replace)?;

    let fetched = fetch_as_dataset(&engine, "prices", &FetchRequest::new());
    let scale = match fetched.columns()[0].column_type {
        ColumnType::Decimal { scale, .. } => scale,
        ref other => panic!("expected a decimal column, got {}", other),
    };
    assert_eq!(scale, 2);
    let values: Vec<String> = fetched
        .column_values("p")
        .unwrap()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(values, vec!["1.50", "2.25"]);
    Ok(())
}

#[test]
fn append_and_fail_modes() -> Result<()> {
    let engine = create_test_engine()?;
    let more = Dataset::from_records(vec![vec![("id", Value::from(3)), ("name", Value::from("Carol"))]])?;

    assert_eq!(create_or_replace_table(&engine, &more, "users", IfExists::Append)?, 1);
    assert_eq!(count_rows(&engine, "users")?, 3);

    let err = create_or_replace_table(&engine, &more, "users", IfExists::Fail).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert_eq!(count_rows(&engine, "users")?, 3);

    let err = create_or_replace_table(&engine, &more, "absent", IfExists::Append).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(!table_exists(&engine, "absent")?);

    assert_eq!(create_or_replace_table(&engine, &more, "fresh", IfExists::Fail)?, 1);
    Ok(())
}

#[test]
fn create_without_columns_is_rejected() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    let err = create_or_replace_table(&engine, &Dataset::default(), "t", IfExists::Replace).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(!table_exists(&engine, "t")?);
    Ok(())
}

fn accounts() -> TableDefinition {
    TableDefinition::new("accounts")
        .with_column(ColumnDefinition::new("id", ColumnType::Int))
        .with_column(ColumnDefinition::new("email", ColumnType::Varchar(255)).with_constraint(ColumnConstraint::NotNull))
        .with_primary_key(["id"])
        .with_index(IndexDefinition::new("idx_accounts_email", ["email"]).unique())
}

#[test]
fn constraint_violation_rolls_back_the_batch() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    assert!(ensure_table(&engine, &accounts())?);
    assert!(!ensure_table(&engine, &accounts())?);

    let first = Dataset::from_records(vec![vec![("id", Value::from(1)), ("email", Value::from("a@x"))]])?;
    insert_rows(&engine, &first, "accounts")?;

    let batch = Dataset::from_records(vec![
        vec![("id", Value::from(2)), ("email", Value::from("b@x"))],
        vec![("id", Value::from(1)), ("email", Value::from("c@x"))],
    ])?;
    let err = insert_rows(&engine, &batch, "accounts").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert_eq!(count_rows(&engine, "accounts")?, 1);

    let duplicate_email =
        Dataset::from_records(vec![vec![("id", Value::from(3)), ("email", Value::from("a@x"))]])?;
    let err = create_or_replace_table(&engine, &duplicate_email, "accounts", IfExists::Append).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Constraint);
    assert_eq!(count_rows(&engine, "accounts")?, 1);
    Ok(())
}

#[test]
fn delete_by_keys_reports_actual_count() -> Result<()> {
    let engine = create_test_engine()?;
    let deleted = delete_by_keys(&engine, "users", "id", &[Value::from(1), Value::from(5), Value::from(6)])?;
    assert_eq!(deleted, 1);
    assert_eq!(count_rows(&engine, "users")?, 1);
    assert_eq!(delete_by_keys(&engine, "users", "id", &[])?, 0);

    let err = delete_by_keys(&engine, "users", "uuid", &[Value::from(2)]).unwrap_err();
    assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    Ok(())
}

#[test]
fn fetch_applies_where_projection_and_paging() -> Result<()> {
    let engine = create_test_engine()?;
    let more = Dataset::from_records(vec![
        vec![("id", Value::from(3)), ("name", Value::from("Carol"))],
        vec![("id", Value::from(4)), ("name", Value::from("Dave"))],
    ])?;
    insert_rows(&engine, &more, "users")?;

    let request = FetchRequest::new()
        .columns(["name"])
        .where_expression("id >= 2")
        .order_by("id", false)
        .limit(2);
    let fetched = fetch_as_dataset(&engine, "users", &request);
    assert_eq!(fetched.column_names().collect::<Vec<_>>(), vec!["name"]);
    assert_eq!(
        fetched.column_values("name").unwrap(),
        vec![&Value::from("Dave"), &Value::from("Carol")]
    );

    let bob = fetch_as_dataset(
        &engine,
        "users",
        &FetchRequest::new().filter(RowFilter::new().with_condition("name", "Bob")),
    );
    assert_eq!(bob.len(), 1);
    assert_eq!(bob.row(0).unwrap().get("id"), Some(&Value::Integer(2)));

    let tail = fetch_as_dataset(&engine, "users", &FetchRequest::new().order_by("id", true).offset(3));
    assert_eq!(tail.len(), 1);
    Ok(())
}

#[test]
fn failed_fetch_yields_empty_dataset() -> Result<()> {
    let engine = create_test_engine()?;
    let broken = FetchRequest::new().where_expression("id >>> 1");
    assert!(fetch_as_dataset(&engine, "users", &broken).is_empty());
    assert_eq!(try_fetch_as_dataset(&engine, "users", &broken).unwrap_err().kind(), ErrorKind::Query);

    assert!(fetch_as_dataset(&engine, "ghost", &FetchRequest::new()).is_empty());
    assert_eq!(
        try_fetch_as_dataset(&engine, "ghost", &FetchRequest::new()).unwrap_err().kind(),
        ErrorKind::Schema
    );
    Ok(())
}

#[test]
fn table_exists_tracks_ddl() -> Result<()> {
    let engine = Engine::open_in_memory()?;
    assert!(!table_exists(&engine, "users")?);
    create_or_replace_table(&engine, &people(), "users", IfExists::Fail)?;
    assert!(table_exists(&engine, "users")?);
    Ok(())
}

#[test]
fn schema_cache_follows_ddl() -> Result<()> {
    let engine = create_test_engine()?;
    // Warm the cache, then change the table underneath it.
    fetch_as_dataset(&engine, "users", &FetchRequest::new());
    assert!(engine.cached_schema("users").is_some());

    add_column(&engine, "users", "age", &ColumnType::Int)?;
    assert!(engine.cached_schema("users").is_none());
    assert!(update_cell(&engine, "users", &RowFilter::new().with_condition("id", 1), "age", 31)?);
    assert!(engine.cached_schema("users").unwrap().contains("age"));
    Ok(())
}

#[tokio::test]
async fn test_file_backed_engine() {
    test_file_backed_engine_impl().unwrap();
}

fn test_file_backed_engine_impl() -> Result<()> {
    let (engine, temp_file) = create_temp_engine()?;
    create_or_replace_table(&engine, &people(), "users", IfExists::Replace)?;
    drop(engine);

    // A second handle on the same file sees the committed rows.
    let reopened = Engine::open(EngineConfig::new(temp_file.path().to_str().unwrap()))?;
    assert_eq!(count_rows(&reopened, "users")?, 2);
    assert_eq!(names(&reopened), vec![Value::from("Alice"), Value::from("Bob")]);
    Ok(())
}

#[test]
fn unreachable_database_is_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("db.sqlite");
    let err = Engine::open(EngineConfig::new(path.to_str().unwrap())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[test]
fn concurrent_writers_share_a_file() -> Result<()> {
    let (engine, _temp_file) = create_temp_engine()?;
    create_or_replace_table(&engine, &people(), "users", IfExists::Replace)?;
    let engine = std::sync::Arc::new(engine);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = std::sync::Arc::clone(&engine);
            std::thread::spawn(move || {
                let row = Dataset::from_records(vec![vec![
                    ("id", Value::from(100 + i)),
                    ("name", Value::from(format!("worker-{}", i))),
                ]])?;
                insert_rows(&engine, &row, "users")
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap()?, 1);
    }
    assert_eq!(count_rows(&engine, "users")?, 6);
    Ok(())
}
