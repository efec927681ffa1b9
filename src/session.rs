use approxsql_common::{
    AqpConfig, Error, QueryResult, Result, Row, SampleCatalog, SampleParam, TableName, Value,
};
use approxsql_ir::AliasGenerator;
use approxsql_parser::{AqpStatement, CreateSample, DropSample, build_relation, parse_statement};
use approxsql_rewriter::{ColumnInterval, IntervalMethod, TransformedQuery, intervals, transform};
use approxsql_sampler::{Dbms, EngineCatalog, SampleBuilder, TempNames, drop_samples};
use rand::Rng;

/// Per-session mutable state. Nothing here is shared between sessions.
#[derive(Debug, Clone)]
pub struct SessionState {
    statements: u64,
    aliases: AliasGenerator,
    temps: TempNames,
}

impl SessionState {
    pub fn new() -> Self {
        let session_id = format!("{:08x}", rand::thread_rng().r#gen::<u32>());
        Self::with_session_id(session_id)
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            statements: 0,
            aliases: AliasGenerator::default(),
            temps: TempNames::new(session_id),
        }
    }

    pub fn session_id(&self) -> &str {
        self.temps.session_id()
    }

    /// Top-level statements seen so far.
    pub fn statement_count(&self) -> u64 {
        self.statements
    }

    fn begin_statement(&mut self) {
        self.statements += 1;
        self.aliases.reset();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// A session over one engine.
///
/// The session owns the engine adapter, its [`AqpConfig`] and the sample
/// catalog stored in the engine's meta tables. Statements run one at a
/// time; create one session per thread.
///
/// # Statements
///
/// | Statement | Effect |
/// |-----------|--------|
/// | `SELECT ...` | Rewritten against a sample when one applies, else run exactly |
/// | `CREATE [<pct>%] [kind] SAMPLE OF t [ON cols]` | Builds and registers a sample |
/// | `DROP [kind] SAMPLES OF t` | Drops samples and their catalog rows |
/// | `SHOW SAMPLES [OF t]` | Lists registered samples |
/// | `SHOW CONFIG` | Lists every configuration field and its value |
/// | `SET key = value` | Changes one configuration field |
/// | `REFRESH [SAMPLES]` | Reloads the sample catalog from the engine |
///
/// Any other statement is handed to the engine verbatim.
pub struct AqpSession<D: Dbms> {
    dbms: D,
    config: AqpConfig,
    catalog: EngineCatalog,
    state: SessionState,
}

impl<D: Dbms> AqpSession<D> {
    /// Validates `config` and loads the sample catalog, creating the meta
    /// tables when missing.
    pub fn new(dbms: D, config: AqpConfig) -> Result<Self> {
        Self::with_state(dbms, config, SessionState::new())
    }

    pub fn with_state(dbms: D, config: AqpConfig, state: SessionState) -> Result<Self> {
        config.validate()?;
        let mut catalog = EngineCatalog::new(&config);
        catalog.refresh(&dbms)?;
        Ok(Self {
            dbms,
            config,
            catalog,
            state,
        })
    }

    pub fn config(&self) -> &AqpConfig {
        &self.config
    }

    pub fn catalog(&self) -> &EngineCatalog {
        &self.catalog
    }

    pub fn dbms(&self) -> &D {
        &self.dbms
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Reloads the sample catalog from the engine.
    pub fn refresh_catalog(&mut self) -> Result<()> {
        self.catalog.refresh(&self.dbms)
    }

    /// Executes one statement.
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.state.begin_statement();
        match parse_statement(sql)? {
            AqpStatement::Select(query) => {
                let relation = build_relation(&query, &mut self.state.aliases)?;
                let transformed = transform(sql, &relation, &self.catalog, &self.config)?;
                self.run_query(&transformed.sql)
            }
            AqpStatement::CreateSample(create) => self.create_sample(create),
            AqpStatement::DropSample(drop) => self.drop_sample(drop),
            AqpStatement::ShowSamples { table } => Ok(self.show_samples(table.as_ref())),
            AqpStatement::ShowConfig => Ok(self.show_config()),
            AqpStatement::Set { key, value } => self.set(&key, &value),
            AqpStatement::Refresh => {
                self.refresh_catalog()?;
                Ok(QueryResult::new(
                    vec!["samples".to_string()],
                    vec![Row::new(vec![Value::from(self.catalog.all_samples().len() as u64)])],
                ))
            }
            AqpStatement::Passthrough(statement) => self.run_query(&statement),
        }
    }

    /// Rewrites a SELECT without executing it.
    pub fn rewrite(&mut self, sql: &str) -> Result<TransformedQuery> {
        self.state.begin_statement();
        match parse_statement(sql)? {
            AqpStatement::Select(query) => {
                let relation = build_relation(&query, &mut self.state.aliases)?;
                transform(sql, &relation, &self.catalog, &self.config)
            }
            _ => Err(Error::unsupported_query("only SELECT statements can be rewritten")),
        }
    }

    /// Rewrites and executes a SELECT, returning the rewrite alongside the
    /// result so replicate columns can be read back.
    pub fn query(&mut self, sql: &str) -> Result<(TransformedQuery, QueryResult)> {
        let transformed = self.rewrite(sql)?;
        let result = self.run_query(&transformed.sql)?;
        Ok((transformed, result))
    }

    /// Percentile bootstrap intervals of one result row.
    pub fn confidence_intervals(
        &self,
        transformed: &TransformedQuery,
        result: &QueryResult,
        row: usize,
    ) -> Result<Vec<ColumnInterval>> {
        intervals(transformed, result, row, IntervalMethod::Percentile)
    }

    /// Engine failures always carry the SQL that caused them.
    fn run_query(&self, sql: &str) -> Result<QueryResult> {
        log::trace!("{}", sql);
        self.dbms.execute(sql).map_err(|e| match e {
            Error::Execution { .. } => e,
            other => Error::execution(sql, other.to_string()),
        })
    }

    fn create_sample(&mut self, create: CreateSample) -> Result<QueryResult> {
        let ratio = create.ratio.unwrap_or(self.config.default_sample_ratio);
        let sample = SampleParam::new(
            create.table,
            create.kind,
            create.columns,
            ratio,
            self.config.sample_schema.as_deref(),
        )?;
        let mut registry = self.catalog.registry(&self.dbms);
        let size = SampleBuilder::new(&self.dbms, &self.config, &mut self.state.temps)
            .build(&sample, &mut registry)?;
        Ok(QueryResult::new(
            vec![
                "sample_table".to_string(),
                "sample_rows".to_string(),
                "original_rows".to_string(),
            ],
            vec![Row::new(vec![
                Value::string(sample.sample_table.to_string()),
                Value::from(size.sample_rows),
                Value::from(size.original_rows),
            ])],
        ))
    }

    fn drop_sample(&mut self, drop: DropSample) -> Result<QueryResult> {
        let mut registry = self.catalog.registry(&self.dbms);
        let dropped = drop_samples(&self.dbms, &mut registry, &drop.table, drop.kind)?;
        Ok(QueryResult::new(
            vec!["dropped".to_string()],
            dropped
                .iter()
                .map(|s| Row::new(vec![Value::string(s.sample_table.to_string())]))
                .collect(),
        ))
    }

    fn show_samples(&self, table: Option<&TableName>) -> QueryResult {
        let samples = match table {
            Some(table) => self.catalog.samples_for(table),
            None => self.catalog.all_samples(),
        };
        let rows = samples
            .iter()
            .map(|sample| {
                let size = self.catalog.size_info_of(sample);
                Row::new(vec![
                    Value::string(sample.original.to_string()),
                    Value::string(sample.sample_table.to_string()),
                    Value::string(sample.kind.as_str()),
                    Value::Float64(sample.ratio),
                    Value::string(sample.columns_csv()),
                    Value::from(size.map(|s| s.sample_rows)),
                    Value::from(size.map(|s| s.original_rows)),
                ])
            })
            .collect();
        QueryResult::new(
            [
                "original_table",
                "sample_table",
                "kind",
                "ratio",
                "columns",
                "sample_rows",
                "original_rows",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            rows,
        )
    }

    fn show_config(&self) -> QueryResult {
        QueryResult::new(
            vec!["key".to_string(), "value".to_string()],
            self.config
                .entries()
                .into_iter()
                .map(|(key, value)| Row::new(vec![Value::string(key), Value::string(value)]))
                .collect(),
        )
    }

    fn set(&mut self, key: &str, value: &str) -> Result<QueryResult> {
        let previous = self.config.clone();
        self.config.set(key, value)?;
        log::debug!("set {} = {}", key, value);
        let meta_moved = previous.meta_schema != self.config.meta_schema
            || previous.meta_size_table != self.config.meta_size_table
            || previous.meta_name_table != self.config.meta_name_table;
        if meta_moved {
            let mut catalog = EngineCatalog::new(&self.config);
            if let Err(e) = catalog.refresh(&self.dbms) {
                self.config = previous;
                return Err(e);
            }
            self.catalog = catalog;
        }
        Ok(QueryResult::empty())
    }
}
