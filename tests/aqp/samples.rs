use approxsql::{AqpConfig, AqpSession, QueryResult, Row, SampleCatalog, SampleKind, TableName, Value};
use approxsql_test_utils::MockDbms;

use crate::common::{assert_error_contains, column, orders_dbms, session_over};

#[test]
fn test_show_samples_lists_registrations() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    session.execute("CREATE 5% UNIFORM SAMPLES OF orders").unwrap();

    let shown = session.execute("SHOW SAMPLES OF orders").unwrap();
    assert_eq!(
        shown.columns,
        vec![
            "original_table",
            "sample_table",
            "kind",
            "ratio",
            "columns",
            "sample_rows",
            "original_rows"
        ]
    );
    assert_eq!(
        column(&shown, "sample_table"),
        vec![
            Value::string("aqp.orders_uniform_0100"),
            Value::string("aqp.orders_uniform_0500")
        ]
    );
    assert_eq!(
        column(&shown, "sample_rows"),
        vec![Value::Int64(10_000), Value::Int64(50_000)]
    );

    let everything = session.execute("SHOW SAMPLES").unwrap();
    assert_eq!(everything.num_rows(), 2);
    let other = session.execute("SHOW SAMPLES OF lineitem").unwrap();
    assert_eq!(other.num_rows(), 0);
}

#[test]
fn test_drop_samples_by_kind() {
    let dbms = orders_dbms().with_table_size("aqp.aqp_temp_t1_3", 12_000);
    let mut session = session_over(dbms, AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    session
        .execute("CREATE 1% UNIVERSE SAMPLE OF orders ON custkey")
        .unwrap();
    assert_eq!(session.catalog().all_samples().len(), 2);

    let dropped = session.execute("DROP UNIVERSE SAMPLES OF orders").unwrap();
    crate::assert_result_eq!(dropped, [["aqp.orders_universe_0100_custkey"]]);
    assert!(!session.dbms().has_table("aqp.orders_universe_0100_custkey"));

    let remaining = session.catalog().samples_for(&TableName::bare("orders"));
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, SampleKind::Uniform);

    session.execute("DROP SAMPLES OF orders").unwrap();
    assert!(session.catalog().all_samples().is_empty());
    assert_error_contains(session.execute("DROP SAMPLES OF orders"), &["not found"]);
}

#[test]
fn test_create_uses_default_ratio_and_schema() {
    let config = AqpConfig {
        default_sample_ratio: 0.05,
        sample_schema: Some("samples".to_string()),
        ..AqpConfig::default()
    };
    let dbms = MockDbms::new()
        .with_table_size("orders", 1_000_000)
        .with_table_size("samples.aqp_temp_t1_1", 50_000);
    let mut session = session_over(dbms, config);

    session.execute("CREATE SAMPLE OF orders").unwrap();

    let samples = session.catalog().all_samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(
        samples[0].sample_table,
        TableName::new(Some("samples"), "orders_uniform_0500")
    );
    assert!(session.dbms().has_table("samples.orders_uniform_0500"));
}

#[test]
fn test_failed_create_registers_nothing() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    let before = session.dbms().live_tables();
    // count, drop temp, then the CREATE of the temp table fails
    session.dbms().fail_on(3);

    assert_error_contains(
        session.execute("CREATE 1% SAMPLE OF orders"),
        &["injected failure"],
    );
    assert_eq!(session.dbms().live_tables(), before);
    assert!(session.catalog().all_samples().is_empty());
}

#[test]
fn test_create_persists_catalog_rows() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    assert!(session.dbms().has_table("aqp.aqp_meta_size"));
    assert!(session.dbms().has_table("aqp.aqp_meta_name"));

    let inserts: Vec<String> = session
        .dbms()
        .statements()
        .into_iter()
        .filter(|s| s.starts_with("INSERT INTO aqp.aqp_meta_name"))
        .collect();
    assert_eq!(inserts.len(), 1);
    assert!(inserts[0].contains("'orders_uniform_0100', 'uniform', 0.01"));
}

#[test]
fn test_set_meta_schema_reloads_catalog() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();

    session.execute("SET meta_schema = aqp_meta").unwrap();

    assert!(session.dbms().has_table("aqp_meta.aqp_meta_size"));
    assert_eq!(session.catalog().size_table().to_string(), "aqp_meta.aqp_meta_size");
    assert!(session.catalog().all_samples().is_empty());
}

#[test]
fn test_invalid_settings_are_rejected() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    assert_error_contains(session.execute("SET no_such_key = 1"), &["unknown configuration key"]);
    assert_error_contains(session.execute("SET preferred_sample_ratio = 2"), &["(0, 1]"]);
    session.execute("SET bootstrap = uda").unwrap();
    assert_error_contains(session.execute("SET bootstrap.trials = 0"), &["trials"]);
    assert!((session.config().preferred_sample_ratio - 0.01).abs() < 1e-12);
}

#[test]
fn test_invalid_config_fails_session() {
    let config = AqpConfig {
        partition_count: 0,
        ..AqpConfig::default()
    };
    assert_error_contains(AqpSession::new(MockDbms::new(), config), &["partition_count"]);
}

#[test]
fn test_refresh_picks_up_samples_built_elsewhere() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    assert!(session.catalog().all_samples().is_empty());

    // another session registered a 1% sample of orders
    session.dbms().respond(
        "SELECT schemaname",
        QueryResult::new(
            vec![],
            vec![Row::new(vec![
                "aqp".into(),
                "orders_uniform_0100".into(),
                10_000i64.into(),
                1_000_000i64.into(),
            ])],
        ),
    );
    session.dbms().respond(
        "SELECT originalschemaname",
        QueryResult::new(
            vec![],
            vec![Row::new(vec![
                "".into(),
                "orders".into(),
                "aqp".into(),
                "orders_uniform_0100".into(),
                "uniform".into(),
                0.01f64.into(),
                "".into(),
            ])],
        ),
    );
    assert!(!session.rewrite("SELECT SUM(amount) FROM orders").unwrap().changed);

    let refreshed = session.execute("REFRESH").unwrap();
    crate::assert_result_eq!(refreshed, [[1i64]]);
    assert_eq!(session.catalog().samples_for(&TableName::bare("orders")).len(), 1);
    let t = session.rewrite("SELECT SUM(amount) FROM orders").unwrap();
    assert!(t.changed);
    assert!(t.sql.contains("100 * SUM(amount)"), "{}", t.sql);
}

#[test]
fn test_show_config_reflects_set() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("SET bootstrap.trials = 20").unwrap();
    session.execute("SET sample_type = universe").unwrap();

    let shown = session.execute("SHOW CONFIG").unwrap();
    assert_eq!(shown.columns, vec!["key", "value"]);
    let keys = column(&shown, "key");
    let values = column(&shown, "value");
    let value_of = |key: &str| {
        let position = keys.iter().position(|k| *k == Value::string(key)).unwrap();
        values[position].clone()
    };
    assert_eq!(value_of("bootstrap.trials"), Value::string("20"));
    assert_eq!(value_of("sample_type"), Value::string("universe"));
    assert_eq!(value_of("preferred_sample_ratio"), Value::string("0.01"));
    assert_eq!(shown.num_rows(), AqpConfig::default().entries().len());
    assert!(session.dbms().statements().iter().all(|s| !s.contains("CONFIG")));
}
