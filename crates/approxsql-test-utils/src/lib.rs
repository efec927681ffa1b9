#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;

use approxsql::AqpSession;
use approxsql_common::{
    AqpConfig, Error, InMemoryCatalog, QueryResult, Result, Row, SampleKind, SampleParam,
    SampleSizeInfo, TableName, Value,
};
use approxsql_sampler::{Dbms, columns_query};

/// In-memory stand-in for an engine. Records every statement, answers
/// queries from canned results keyed by SQL prefix, can fail on a chosen
/// statement, and tracks which tables exist.
#[derive(Default)]
pub struct MockDbms {
    statements: RefCell<Vec<String>>,
    responses: RefCell<Vec<(String, QueryResult)>>,
    fail_on: Cell<Option<usize>>,
    tables: RefCell<BTreeSet<String>>,
}

impl MockDbms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every query starting with `prefix` (ignoring case) with
    /// `result`. The longest matching prefix wins.
    pub fn respond(&self, prefix: impl Into<String>, result: QueryResult) {
        self.responses.borrow_mut().push((prefix.into(), result));
    }

    pub fn with_response(self, prefix: impl Into<String>, result: QueryResult) -> Self {
        self.respond(prefix, result);
        self
    }

    pub fn with_table_size(self, table: &str, rows: u64) -> Self {
        self.with_response(format!("SELECT COUNT(*) FROM {}", table), scalar(rows))
    }

    pub fn with_columns(self, table: &TableName, columns: &[(&str, &str)]) -> Self {
        let rows = columns
            .iter()
            .map(|(name, data_type)| Row::new(vec![Value::string(*name), Value::string(*data_type)]))
            .collect();
        self.with_response(
            columns_query(table),
            QueryResult::new(vec!["column_name".to_string(), "data_type".to_string()], rows),
        )
    }

    pub fn with_table(self, table: &str) -> Self {
        self.tables.borrow_mut().insert(table.to_lowercase());
        self
    }

    /// Makes the `n`th statement from now (1-based) fail.
    pub fn fail_on(&self, n: usize) {
        self.fail_on.set(Some(self.statements.borrow().len() + n));
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.borrow().clone()
    }

    pub fn statement_count(&self) -> usize {
        self.statements.borrow().len()
    }

    pub fn clear_statements(&self) {
        self.statements.borrow_mut().clear();
        self.fail_on.set(None);
    }

    pub fn live_tables(&self) -> BTreeSet<String> {
        self.tables.borrow().clone()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.borrow().contains(&table.to_lowercase())
    }

    fn run(&self, sql: &str) -> Result<()> {
        let index = {
            let mut statements = self.statements.borrow_mut();
            statements.push(sql.to_string());
            statements.len()
        };
        if self.fail_on.get() == Some(index) {
            return Err(Error::execution(sql, "injected failure"));
        }
        self.track(sql);
        Ok(())
    }

    fn track(&self, sql: &str) {
        let words: Vec<String> = sql.split_whitespace().map(str::to_uppercase).collect();
        let original: Vec<&str> = sql.split_whitespace().collect();
        let name_at = |i: usize| {
            original
                .get(i)
                .map(|n| n.trim_end_matches('(').to_lowercase())
        };
        match words.as_slice() {
            [create, table, if_, not, exists, ..]
                if create == "CREATE" && table == "TABLE" && if_ == "IF" && not == "NOT" && exists == "EXISTS" =>
            {
                if let Some(name) = name_at(5) {
                    self.tables.borrow_mut().insert(name);
                }
            }
            [create, table, ..] if create == "CREATE" && table == "TABLE" => {
                if let Some(name) = name_at(2) {
                    self.tables.borrow_mut().insert(name);
                }
            }
            [drop, table, if_, exists, ..] if drop == "DROP" && table == "TABLE" && if_ == "IF" && exists == "EXISTS" => {
                if let Some(name) = name_at(4) {
                    self.tables.borrow_mut().remove(&name);
                }
            }
            [drop, table, ..] if drop == "DROP" && table == "TABLE" => {
                if let Some(name) = name_at(2) {
                    self.tables.borrow_mut().remove(&name);
                }
            }
            _ => {}
        }
    }

    fn canned(&self, sql: &str) -> QueryResult {
        let upper = sql.to_uppercase();
        self.responses
            .borrow()
            .iter()
            .filter(|(prefix, _)| upper.starts_with(&prefix.to_uppercase()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, result)| result.clone())
            .unwrap_or_default()
    }
}

impl Dbms for MockDbms {
    fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.run(sql)?;
        Ok(self.canned(sql))
    }

    fn execute_update(&self, sql: &str) -> Result<()> {
        self.run(sql)
    }
}

/// One-row, one-column result.
pub fn scalar(value: impl Into<Value>) -> QueryResult {
    QueryResult::new(vec!["value".to_string()], vec![Row::new(vec![value.into()])])
}

pub fn uniform_sample(table: &str, ratio: f64) -> SampleParam {
    SampleParam::new(TableName::parse(table), SampleKind::Uniform, vec![], ratio, None)
        .expect("valid uniform sample")
}

pub fn universe_sample(table: &str, column: &str, ratio: f64) -> SampleParam {
    SampleParam::new(
        TableName::parse(table),
        SampleKind::Universe,
        vec![column.to_string()],
        ratio,
        None,
    )
    .expect("valid universe sample")
}

pub fn stratified_sample(table: &str, columns: &[&str], ratio: f64) -> SampleParam {
    SampleParam::new(
        TableName::parse(table),
        SampleKind::Stratified,
        columns.iter().map(|c| c.to_string()).collect(),
        ratio,
        None,
    )
    .expect("valid stratified sample")
}

/// Catalog whose samples record `original_rows * ratio` sample rows.
pub fn catalog_with(original_rows: u64, samples: &[SampleParam]) -> InMemoryCatalog {
    samples.iter().fold(InMemoryCatalog::new(), |catalog, sample| {
        let sample_rows = (original_rows as f64 * sample.ratio).round() as u64;
        catalog.with_sample(sample.clone(), SampleSizeInfo::new(sample_rows, original_rows))
    })
}

/// `orders` with 1,000,000 rows and a 1% uniform sample of 10,000 rows.
pub fn orders_catalog() -> InMemoryCatalog {
    catalog_with(1_000_000, &[uniform_sample("orders", 0.01)])
}

pub fn mock_session(config: AqpConfig) -> AqpSession<MockDbms> {
    AqpSession::new(MockDbms::new(), config).expect("session over an empty catalog")
}

pub fn assert_float_eq(actual: f64, expected: f64, epsilon: f64) {
    let diff = (actual - expected).abs();
    assert!(
        diff < epsilon,
        "Float values not equal within epsilon: actual={}, expected={}, diff={}, epsilon={}",
        actual,
        expected,
        diff,
        epsilon
    );
}

pub fn assert_error_contains<T>(result: Result<T>, keywords: &[&str]) {
    match result {
        Ok(_) => panic!("Expected error but got Ok result"),
        Err(e) => {
            let error_msg = e.to_string().to_lowercase();
            let found = keywords
                .iter()
                .any(|keyword| error_msg.contains(&keyword.to_lowercase()));
            assert!(
                found,
                "Error message '{}' does not contain any of the expected keywords: {:?}",
                e, keywords
            );
        }
    }
}
