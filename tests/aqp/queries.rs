use approxsql::{AqpConfig, BootstrapMethod, QueryResult, Row, Value};

use crate::common::{assert_error_contains, assert_float_eq, orders_dbms, session_over};

const SUM_QUERY: &str = "SELECT SUM(amount) FROM orders";

#[test]
fn test_uniform_sum_end_to_end() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    let created = session.execute("CREATE 1% UNIFORM SAMPLE OF orders").unwrap();
    crate::assert_result_eq!(
        created,
        [["aqp.orders_uniform_0100", 10_000i64, 1_000_000i64]]
    );

    let t = session.rewrite(SUM_QUERY).unwrap();
    assert!(t.changed);
    assert_eq!(
        t.sql,
        "SELECT vt1.expr1 AS expr1 FROM (SELECT 100 * SUM(amount) AS expr1 \
         FROM aqp.orders_uniform_0100 AS orders) AS vt1"
    );
}

#[test]
fn test_preferred_ratio_wins_over_registration_order() {
    let config = AqpConfig {
        preferred_sample_ratio: 0.05,
        ..AqpConfig::default()
    };
    let mut session = session_over(orders_dbms(), config);
    session.execute("CREATE 1% UNIFORM SAMPLE OF orders").unwrap();
    session.execute("CREATE 5% UNIFORM SAMPLE OF orders").unwrap();

    let t = session.rewrite(SUM_QUERY).unwrap();
    assert_eq!(t.samples.len(), 1);
    assert_float_eq(t.samples[0].ratio, 0.05, 1e-12);
    assert!(t.sql.contains("20 * SUM(amount)"), "{}", t.sql);
    assert!(t.sql.contains("aqp.orders_uniform_0500"), "{}", t.sql);
}

#[test]
fn test_select_runs_rewritten_sql() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    session.dbms().clear_statements();

    session.execute(SUM_QUERY).unwrap();

    let statements = session.dbms().statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("FROM aqp.orders_uniform_0100 AS orders"));
}

#[test]
fn test_without_samples_runs_exactly() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.dbms().clear_statements();
    session.execute(SUM_QUERY).unwrap();
    assert_eq!(session.dbms().statements(), vec![SUM_QUERY]);
}

#[test]
fn test_bypass_set_at_runtime() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    session.execute("SET bypass = true").unwrap();
    assert!(session.config().bypass);
    session.dbms().clear_statements();

    session.execute(SUM_QUERY).unwrap();
    assert_eq!(session.dbms().statements(), vec![SUM_QUERY]);
}

#[test]
fn test_windowed_query_is_not_partially_rewritten() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    let sql = "SELECT status, SUM(amount) AS total, RANK() OVER (ORDER BY status) AS r \
               FROM orders GROUP BY status";
    let t = session.rewrite(sql).unwrap();
    assert!(!t.changed);
    assert_eq!(t.sql, sql);
}

#[test]
fn test_passthrough_runs_verbatim() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.dbms().clear_statements();
    session.execute("INSERT INTO orders VALUES (1, 2.5)").unwrap();
    assert_eq!(
        session.dbms().statements(),
        vec!["INSERT INTO orders VALUES (1, 2.5)"]
    );
}

#[test]
fn test_rewrite_only_takes_select() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    assert_error_contains(session.rewrite("DROP TABLE orders"), &["only SELECT"]);
    assert_error_contains(session.rewrite("SELECT SUM(amount FROM orders"), &["parse"]);
}

#[test]
fn test_aliases_restart_every_statement() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    let first = session.rewrite(SUM_QUERY).unwrap();
    let second = session.rewrite(SUM_QUERY).unwrap();
    assert_eq!(first.sql, second.sql);
    assert_eq!(session.state().statement_count(), 3);
}

#[test]
fn test_confidence_intervals_from_replicas() {
    let mut session = session_over(orders_dbms(), AqpConfig::default());
    session.execute("CREATE 1% SAMPLE OF orders").unwrap();
    session.execute("SET bootstrap.method = on_the_fly").unwrap();
    session.execute("SET bootstrap.trials = 4").unwrap();

    let t = session
        .rewrite("SELECT SUM(amount) AS total FROM orders")
        .unwrap();
    assert_eq!(t.bootstrap, BootstrapMethod::OnTheFly);
    assert_eq!(t.trials, 4);
    let total = t.aggregate("total").unwrap();
    assert_eq!(
        total.replica_names(),
        vec!["total_trial1", "total_trial2", "total_trial3", "total_trial4"]
    );

    let result = QueryResult::new(
        vec![
            "total".to_string(),
            "total_trial1".to_string(),
            "total_trial2".to_string(),
            "total_trial3".to_string(),
            "total_trial4".to_string(),
        ],
        vec![Row::new(vec![
            Value::Float64(100.0),
            Value::Float64(90.0),
            Value::Float64(95.0),
            Value::Float64(105.0),
            Value::Float64(110.0),
        ])],
    );
    let intervals = session.confidence_intervals(&t, &result, 0).unwrap();
    assert_eq!(intervals.len(), 1);
    let interval = &intervals[0].interval;
    assert_eq!(intervals[0].output_name, "total");
    assert_float_eq(interval.estimate, 100.0, 1e-9);
    assert!(interval.lower >= 90.0 && interval.lower < 100.0);
    assert!(interval.upper > 100.0 && interval.upper <= 110.0);
    assert_float_eq(interval.confidence, 0.95, 1e-12);
    assert!(interval.std_error > 0.0);

    assert_error_contains(
        session.confidence_intervals(&t, &QueryResult::empty(), 0),
        &["no column total"],
    );
}
