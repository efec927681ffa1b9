use approxsql_common::{
    AqpConfig, BootstrapMethod, InMemoryCatalog, SampleKind, SampleParam, SampleSizeInfo, TableName,
};
use approxsql_ir::{AggregateKind, AliasGenerator};

use crate::{TransformedQuery, transform};

fn sample(table: &str, kind: SampleKind, columns: &[&str], ratio: f64) -> SampleParam {
    SampleParam::new(
        TableName::bare(table),
        kind,
        columns.iter().map(|c| c.to_string()).collect(),
        ratio,
        None,
    )
    .unwrap()
}

fn orders_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new().with_sample(
        sample("orders", SampleKind::Uniform, &[], 0.01),
        SampleSizeInfo::new(10_000, 1_000_000),
    )
}

fn with_bootstrap(method: BootstrapMethod, trials: usize) -> AqpConfig {
    let mut config = AqpConfig::default();
    config.bootstrap.method = method;
    config.bootstrap.trials = trials;
    config
}

fn run(sql: &str, catalog: &InMemoryCatalog, config: &AqpConfig) -> TransformedQuery {
    let relation = approxsql_parser::parse_and_build(sql, &mut AliasGenerator::default()).unwrap();
    transform(sql, &relation, catalog, config).unwrap()
}

#[test]
fn test_uniform_sum_is_scaled() {
    let t = run("SELECT SUM(amount) FROM orders", &orders_catalog(), &AqpConfig::default());
    assert!(t.changed);
    assert_eq!(
        t.sql,
        "SELECT vt1.expr1 AS expr1 FROM (SELECT 100 * SUM(amount) AS expr1 \
         FROM aqp.orders_uniform_0100 AS orders) AS vt1"
    );
    assert_eq!(t.samples.len(), 1);
    assert_eq!(t.original_columns, 1);
    assert_eq!(t.aggregates[0].kind, AggregateKind::Sum);
    assert!(!t.has_replicas());
}

#[test]
fn test_factor_falls_back_to_ratio() {
    let catalog = InMemoryCatalog::new().with_sample(
        sample("orders", SampleKind::Uniform, &[], 0.05),
        SampleSizeInfo::new(0, 0),
    );
    let mut config = AqpConfig::default();
    config.preferred_sample_ratio = 0.05;
    let t = run("SELECT COUNT(*) AS n FROM orders", &catalog, &config);
    assert!(t.sql.contains("20 * COUNT(*) AS n"), "{}", t.sql);
}

#[test]
fn test_avg_is_not_scaled() {
    let t = run(
        "SELECT AVG(amount) AS mean, SUM(amount) / COUNT(*) AS ratio FROM orders",
        &orders_catalog(),
        &AqpConfig::default(),
    );
    assert!(t.sql.contains("AVG(amount) AS mean"), "{}", t.sql);
    assert!(t.sql.contains("100 * SUM(amount) / (100 * COUNT(*)) AS ratio"), "{}", t.sql);
    assert_eq!(t.aggregates[1].kind, AggregateKind::Other);
}

#[test]
fn test_windowed_item_runs_exactly() {
    let sql = "SELECT status, SUM(amount) AS total, RANK() OVER (ORDER BY status) AS r \
               FROM orders GROUP BY status";
    let t = run(sql, &orders_catalog(), &AqpConfig::default());
    assert!(!t.changed);
    assert_eq!(t.sql, sql);
    assert!(t.samples.is_empty());
}

#[test]
fn test_unchanged_queries_keep_their_text() {
    let catalog = orders_catalog();
    let config = with_bootstrap(BootstrapMethod::Stored, 2);
    for sql in [
        "SELECT amount FROM orders WHERE amount > 10",
        "SELECT MAX(amount) FROM orders",
        "SELECT SUM(DISTINCT amount) FROM orders",
        "SELECT COUNT(*) FROM customer",
        "SELECT SUM(amount) FROM orders",
    ] {
        let t = run(sql, &catalog, &config);
        assert!(!t.changed, "{} should run exactly", sql);
        assert_eq!(t.sql, sql);
        assert_eq!(t.original_sql, sql);
    }
}

#[test]
fn test_stratified_uses_row_probability() {
    let catalog = InMemoryCatalog::new().with_sample(
        sample("orders", SampleKind::Stratified, &["status"], 0.01),
        SampleSizeInfo::new(5_000, 1_000_000),
    );
    let t = run(
        "SELECT status, SUM(amount) AS total, COUNT(*) AS n FROM orders GROUP BY status",
        &catalog,
        &AqpConfig::default(),
    );
    assert!(t.changed);
    assert_eq!(
        t.sql,
        "SELECT vt1.status AS status, vt1.total AS total, vt1.n AS n FROM (SELECT status AS status, \
         SUM(amount / orders.__sampling_prob) AS total, SUM(1 / orders.__sampling_prob) AS n \
         FROM aqp.orders_stratified_0100_status AS orders GROUP BY status) AS vt1"
    );
    assert_eq!(t.aggregates.len(), 2);
    assert_eq!(t.aggregates[0].output_name, "total");
}

#[test]
fn test_universe_join_counts_factor_once() {
    let catalog = InMemoryCatalog::new()
        .with_sample(
            sample("orders", SampleKind::Universe, &["orderkey"], 0.01),
            SampleSizeInfo::new(1_000, 100_000),
        )
        .with_sample(
            sample("lineitem", SampleKind::Universe, &["orderkey"], 0.01),
            SampleSizeInfo::new(4_000, 400_000),
        );
    let t = run(
        "SELECT COUNT(*) FROM orders o, lineitem l WHERE o.orderkey = l.orderkey",
        &catalog,
        &AqpConfig::default(),
    );
    assert_eq!(
        t.sql,
        "SELECT vt1.expr1 AS expr1 FROM (SELECT 100 * COUNT(*) AS expr1 \
         FROM aqp.orders_universe_0100_orderkey AS o \
         INNER JOIN aqp.lineitem_universe_0100_orderkey AS l ON o.orderkey = l.orderkey) AS vt1"
    );
    assert_eq!(t.samples.len(), 2);
}

#[test]
fn test_count_distinct_is_low_confidence() {
    let t = run(
        "SELECT COUNT(DISTINCT custkey) AS customers FROM orders",
        &orders_catalog(),
        &AqpConfig::default(),
    );
    assert!(t.changed);
    assert!(t.sql.contains("COUNT(DISTINCT custkey) AS customers"));
    let column = t.aggregate("customers").unwrap();
    assert_eq!(column.kind, AggregateKind::CountDistinct);
    assert!(column.low_confidence);
}

#[test]
fn test_on_the_fly_replicas_reach_the_outer_query() {
    let t = run(
        "SELECT status, COUNT(*) AS n FROM orders GROUP BY status ORDER BY n DESC LIMIT 5",
        &orders_catalog(),
        &with_bootstrap(BootstrapMethod::OnTheFly, 1),
    );
    assert_eq!(
        t.sql,
        "SELECT vt1.status AS status, vt1.n AS n, vt1.n_trial1 AS n_trial1 FROM (SELECT status AS status, \
         100 * COUNT(*) AS n, 100 * SUM(poisson_weight(1)) AS n_trial1 \
         FROM aqp.orders_uniform_0100 AS orders GROUP BY status) AS vt1 ORDER BY n DESC LIMIT 5"
    );
    assert_eq!(t.bootstrap, BootstrapMethod::OnTheFly);
    assert_eq!(t.original_columns, 2);
    assert_eq!(t.aggregates[0].replicas, 2..3);
}

#[test]
fn test_replica_ranges_follow_original_columns() {
    let t = run(
        "SELECT SUM(amount) AS total, AVG(amount) AS mean, MAX(amount) AS top FROM orders",
        &orders_catalog(),
        &with_bootstrap(BootstrapMethod::Uda, 3),
    );
    assert_eq!(t.trials, 3);
    let total = t.aggregate("total").unwrap();
    let mean = t.aggregate("mean").unwrap();
    let top = t.aggregate("top").unwrap();
    assert_eq!(total.replicas, 3..6);
    assert_eq!(mean.replicas, 6..9);
    assert!(top.replicas.is_empty());
    assert!(t.sql.contains("100 * bootstrap_sum(amount, 2) AS total_trial2"), "{}", t.sql);
    assert!(t.sql.contains("bootstrap_avg(amount, 3) AS mean_trial3"), "{}", t.sql);
}

#[test]
fn test_stored_replicas_need_weight_columns() {
    let config = with_bootstrap(BootstrapMethod::Stored, 2);
    let missing = run("SELECT SUM(amount) AS total FROM orders", &orders_catalog(), &config);
    assert!(!missing.changed);

    let stored = sample("orders", SampleKind::Uniform, &[], 0.01);
    let catalog = orders_catalog().with_columns(
        stored.sample_table.clone(),
        &[("amount", "DOUBLE"), ("__weight_1", "INTEGER"), ("__weight_2", "INTEGER")],
    );
    let t = run("SELECT SUM(amount) AS total FROM orders", &catalog, &config);
    assert!(t.changed);
    assert!(
        t.sql.contains("100 * SUM(amount * orders.__weight_1) AS total_trial1"),
        "{}",
        t.sql
    );
    assert_eq!(t.aggregate("total").unwrap().replica_names(), vec!["total_trial1", "total_trial2"]);
}

#[test]
fn test_stored_replicas_over_universe_sample() {
    let config = with_bootstrap(BootstrapMethod::Stored, 2);
    let universe = sample("orders", SampleKind::Universe, &["custkey"], 0.01);
    let catalog = InMemoryCatalog::new()
        .with_sample(universe.clone(), SampleSizeInfo::new(10_000, 1_000_000))
        .with_columns(
            universe.sample_table.clone(),
            &[
                ("custkey", "BIGINT"),
                ("amount", "DOUBLE"),
                ("__sampling_prob", "DOUBLE"),
                ("__partition", "INTEGER"),
                ("__weight_1", "INTEGER"),
                ("__weight_2", "INTEGER"),
            ],
        );

    let t = run("SELECT SUM(amount) AS total FROM orders", &catalog, &config);
    assert!(t.changed, "{}", t.sql);
    assert_eq!(t.samples[0].kind, SampleKind::Universe);
    assert!(
        t.sql.contains("100 * SUM(amount * orders.__weight_2) AS total_trial2"),
        "{}",
        t.sql
    );
}

#[test]
fn test_bypass_skips_selection() {
    let mut config = AqpConfig::default();
    config.bypass = true;
    let t = run("SELECT SUM(amount) FROM orders", &orders_catalog(), &config);
    assert!(!t.changed);
}
