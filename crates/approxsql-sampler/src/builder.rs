//! Materializes uniform, universe and stratified samples with their
//! inclusion-probability columns and registers them.

use approxsql_common::{
    AqpConfig, BootstrapMethod, Error, GROUP_SIZE_COLUMN, PARTITION_COLUMN, Result,
    SAMPLING_PROB_COLUMN, SampleKind, SampleParam, SampleRegistry, SampleSizeInfo, TableName,
    weight_column,
};
use approxsql_ir::{Expr, OrderByItem, Relation, SelectItem, WindowSpec, conjunction};
use approxsql_rewriter::poisson_weight_case;
use indexmap::IndexMap;

use crate::dbms::Dbms;

/// Hash buckets of the universe key domain.
pub const UNIVERSE_BUCKETS: u32 = 10_000;

pub const NULL_STRING_SENTINEL: &str = "__aqp_null__";
pub const NULL_TIMESTAMP_SENTINEL: &str = "1900-01-01 00:00:00";
pub const NULL_NUMBER_SENTINEL: i64 = -9_999_999_999;

const TEMP_PREFIX: &str = "aqp_temp";
const RANK_COLUMN: &str = "__rank";
const SAMPLE_COUNT_COLUMN: &str = "__sample_count";
const DRAW_PREFIX: &str = "__draw";

/// `round(N * r)`, the row target of a uniform sample.
pub fn uniform_target_size(original_rows: u64, ratio: f64) -> u64 {
    (original_rows as f64 * ratio).round() as u64
}

/// Buckets below this bound belong to a universe sample of `ratio`.
pub fn universe_threshold(ratio: f64) -> u32 {
    (ratio * UNIVERSE_BUCKETS as f64).round() as u32
}

/// Rows reserved for every stratum: `floor(N * r / groups)`. Zero means
/// every stratum yields no rows.
pub fn stratum_budget(original_rows: u64, ratio: f64, group_count: u64) -> u64 {
    if group_count == 0 {
        return 0;
    }
    (original_rows as f64 * ratio / group_count as f64).floor() as u64
}

fn observed_probability(sample_rows: u64, original_rows: u64) -> f64 {
    if original_rows == 0 {
        0.0
    } else {
        sample_rows as f64 / original_rows as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullDomain {
    Text,
    Timestamp,
    Number,
}

impl NullDomain {
    fn of(data_type: &str) -> Self {
        let data_type = data_type.to_lowercase();
        if data_type.contains("char") || data_type.contains("str") || data_type.contains("text") {
            NullDomain::Text
        } else if data_type.contains("time") || data_type.contains("date") {
            NullDomain::Timestamp
        } else {
            NullDomain::Number
        }
    }

    fn sentinel(self) -> Expr {
        match self {
            NullDomain::Text => Expr::string(NULL_STRING_SENTINEL),
            NullDomain::Timestamp => Expr::cast(Expr::string(NULL_TIMESTAMP_SENTINEL), "TIMESTAMP"),
            NullDomain::Number => Expr::int(NULL_NUMBER_SENTINEL),
        }
    }
}

/// Group key that equi-joins NULL with NULL.
pub fn null_safe_key(qualifier: &str, column: &str, data_type: &str) -> Expr {
    let value = Expr::qualified(qualifier, column);
    Expr::case_when(
        vec![(Expr::is_null(value.clone()), NullDomain::of(data_type).sentinel())],
        Some(value),
    )
}

fn null_safe_join(left: &str, right: &str, columns: &[String], types: &IndexMap<String, String>) -> Option<Expr> {
    conjunction(
        columns
            .iter()
            .map(|c| {
                let data_type = types.get(c).map(String::as_str).unwrap_or_default();
                Expr::equals(
                    null_safe_key(left, c, data_type),
                    null_safe_key(right, c, data_type),
                )
            })
            .collect(),
    )
}

/// Issues `<schema>.aqp_temp_<session>_<n>` names for one session.
#[derive(Debug, Clone)]
pub struct TempNames {
    session_id: String,
    issued: usize,
}

impl TempNames {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            issued: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn next(&mut self, schema: Option<&str>) -> TableName {
        self.issued += 1;
        TableName::new(
            schema,
            &format!("{}_{}_{}", TEMP_PREFIX, self.session_id, self.issued),
        )
    }
}

/// Drops every table it still tracks when it goes out of scope.
pub struct TempTableGuard<'a> {
    dbms: &'a dyn Dbms,
    tables: Vec<TableName>,
}

impl<'a> TempTableGuard<'a> {
    pub fn new(dbms: &'a dyn Dbms) -> Self {
        Self {
            dbms,
            tables: Vec::new(),
        }
    }

    pub fn track(&mut self, table: TableName) {
        if !self.tables.contains(&table) {
            self.tables.push(table);
        }
    }

    /// Drops `table` now and stops tracking it.
    pub fn release(&mut self, table: &TableName) -> Result<()> {
        self.dbms.drop_table(table)?;
        self.tables.retain(|t| t != table);
        Ok(())
    }

    /// Stops tracking `table` without dropping it.
    pub fn keep(&mut self, table: &TableName) {
        self.tables.retain(|t| t != table);
    }

    pub fn tracked(&self) -> &[TableName] {
        &self.tables
    }
}

impl Drop for TempTableGuard<'_> {
    fn drop(&mut self) {
        for table in self.tables.drain(..).rev() {
            log::trace!("dropping {}", table);
            if let Err(e) = self.dbms.drop_table(&table) {
                log::warn!("cannot drop {} during cleanup: {}", table, e);
            }
        }
    }
}

pub struct SampleBuilder<'a> {
    dbms: &'a dyn Dbms,
    config: &'a AqpConfig,
    temps: &'a mut TempNames,
}

impl<'a> SampleBuilder<'a> {
    pub fn new(dbms: &'a dyn Dbms, config: &'a AqpConfig, temps: &'a mut TempNames) -> Self {
        Self {
            dbms,
            config,
            temps,
        }
    }

    /// Builds `sample` under its permanent name and registers it. On failure
    /// every table created on the way is dropped and nothing is registered.
    pub fn build(
        &mut self,
        sample: &SampleParam,
        registry: &mut dyn SampleRegistry,
    ) -> Result<SampleSizeInfo> {
        log::info!("building {}", sample);
        let original_rows = self.dbms.get_table_size(&sample.original)?;
        if original_rows == 0 {
            return Err(Error::sample_build(format!(
                "{} has no rows to sample",
                sample.original
            )));
        }
        if registry
            .all_samples()
            .iter()
            .any(|s| s.sample_table == sample.sample_table)
        {
            registry.unregister(sample)?;
        }

        let mut guard = TempTableGuard::new(self.dbms);
        let (staged, sample_rows) = match sample.kind {
            SampleKind::Uniform => self.build_uniform(&mut guard, sample, original_rows)?,
            SampleKind::Universe => self.build_universe(&mut guard, sample, original_rows)?,
            SampleKind::Stratified => self.build_stratified(&mut guard, sample, original_rows)?,
        };
        guard.track(sample.sample_table.clone());
        self.dbms.move_table(&staged, &sample.sample_table)?;
        guard.keep(&staged);
        let size = SampleSizeInfo::new(sample_rows, original_rows);
        registry.register(sample.clone(), size)?;
        guard.keep(&sample.sample_table);
        drop(guard);

        log::info!(
            "built {} with {} of {} rows",
            sample.sample_table,
            sample_rows,
            original_rows
        );
        Ok(size)
    }

    fn temp(&mut self, sample: &SampleParam) -> TableName {
        self.temps.next(sample.sample_table.schema.as_deref())
    }

    fn materialize(&self, guard: &mut TempTableGuard<'_>, table: &TableName, source: &Relation) -> Result<()> {
        self.dbms.drop_table(table)?;
        guard.track(table.clone());
        self.dbms.create_table_as(table, source)
    }

    fn random(&self, sample: &SampleParam) -> Expr {
        Expr::raw(self.dbms.random_number_expression(sample))
    }

    fn columns_of(&self, table: &TableName) -> Result<IndexMap<String, String>> {
        let columns = self.dbms.get_columns(table)?;
        if columns.is_empty() {
            return Err(Error::sample_build(format!("cannot read the columns of {}", table)));
        }
        Ok(columns)
    }

    /// Materializes `items` over `from` into a fresh temp table. `names` are
    /// the output column names of `items`; with stored bootstrap they are
    /// re-selected next to `trials` Poisson(1) weight columns.
    fn stage(
        &mut self,
        guard: &mut TempTableGuard<'_>,
        sample: &SampleParam,
        from: Relation,
        mut items: Vec<SelectItem>,
        names: Vec<String>,
    ) -> Result<TableName> {
        let bootstrap = &self.config.bootstrap;
        let source = if bootstrap.method == BootstrapMethod::Stored {
            items.extend((1..=bootstrap.trials).map(|trial| {
                SelectItem::aliased(self.random(sample), format!("{}{}", DRAW_PREFIX, trial))
            }));
            let mut outer: Vec<SelectItem> = names
                .into_iter()
                .map(|c| SelectItem::new(Expr::column(c)))
                .collect();
            outer.extend((1..=bootstrap.trials).map(|trial| {
                SelectItem::aliased(
                    poisson_weight_case(Expr::column(format!("{}{}", DRAW_PREFIX, trial))),
                    weight_column(trial),
                )
            }));
            from.select(items).with_alias("d").select(outer)
        } else {
            from.select(items)
        };
        let staged = self.temp(sample);
        self.materialize(guard, &staged, &source)?;
        Ok(staged)
    }

    /// Columns of the original table, read only when weights are stored.
    fn carried_columns(&self, sample: &SampleParam) -> Result<Vec<String>> {
        if self.config.bootstrap.method != BootstrapMethod::Stored {
            return Ok(Vec::new());
        }
        Ok(self.columns_of(&sample.original)?.into_keys().collect())
    }

    fn build_uniform(
        &mut self,
        guard: &mut TempTableGuard<'_>,
        sample: &SampleParam,
        original_rows: u64,
    ) -> Result<(TableName, u64)> {
        let target = uniform_target_size(original_rows, sample.ratio);
        let picked = self.temp(sample);
        let subset = Relation::table(sample.original.clone())
            .order_by(vec![OrderByItem::new(self.random(sample))])
            .limit(target);
        self.materialize(guard, &picked, &subset)?;
        let sample_rows = self.dbms.get_table_size(&picked)?;

        let mut names = self.carried_columns(sample)?;
        names.push(SAMPLING_PROB_COLUMN.to_string());
        let items = vec![
            SelectItem::new(Expr::wildcard()),
            SelectItem::aliased(
                Expr::float(observed_probability(sample_rows, original_rows)),
                SAMPLING_PROB_COLUMN,
            ),
        ];
        let staged = self.stage(guard, sample, Relation::table(picked.clone()), items, names)?;
        guard.release(&picked)?;
        Ok((staged, sample_rows))
    }

    fn build_universe(
        &mut self,
        guard: &mut TempTableGuard<'_>,
        sample: &SampleParam,
        original_rows: u64,
    ) -> Result<(TableName, u64)> {
        let column = sample
            .columns
            .first()
            .ok_or_else(|| Error::sample_build("universe samples need a key column"))?;
        let key = self.dbms.quote(column);
        let picked = self.temp(sample);
        let subset = Relation::table(sample.original.clone()).filter(Expr::lt(
            Expr::raw(self.dbms.mod_of_hash(&key, UNIVERSE_BUCKETS)),
            Expr::int(i64::from(universe_threshold(sample.ratio))),
        ));
        self.materialize(guard, &picked, &subset)?;

        let sample_rows = self.dbms.get_table_size(&picked)?;
        let mut names = self.carried_columns(sample)?;
        names.extend([SAMPLING_PROB_COLUMN.to_string(), PARTITION_COLUMN.to_string()]);
        let items = vec![
            SelectItem::new(Expr::wildcard()),
            SelectItem::aliased(
                Expr::float(observed_probability(sample_rows, original_rows)),
                SAMPLING_PROB_COLUMN,
            ),
            SelectItem::aliased(
                Expr::raw(self.dbms.mod_of_hash(&key, self.config.partition_count)),
                PARTITION_COLUMN,
            ),
        ];
        let staged = self.stage(guard, sample, Relation::table(picked.clone()), items, names)?;
        guard.release(&picked)?;
        Ok((staged, sample_rows))
    }

    fn build_stratified(
        &mut self,
        guard: &mut TempTableGuard<'_>,
        sample: &SampleParam,
        original_rows: u64,
    ) -> Result<(TableName, u64)> {
        let types = self.columns_of(&sample.original)?;
        if let Some(missing) = sample.columns.iter().find(|c| !types.contains_key(*c)) {
            return Err(Error::sample_build(format!(
                "{} has no column {}",
                sample.original, missing
            )));
        }
        let keys: Vec<Expr> = sample.columns.iter().map(|c| Expr::column(c.clone())).collect();
        let key_items = || keys.iter().cloned().map(SelectItem::new).collect::<Vec<_>>();

        let groups = self.temp(sample);
        let mut group_items = key_items();
        group_items.push(SelectItem::aliased(Expr::count_star(), GROUP_SIZE_COLUMN));
        let group_sizes = Relation::table(sample.original.clone())
            .group_by(keys.clone())
            .aggregate(group_items);
        self.materialize(guard, &groups, &group_sizes)?;
        let group_count = self.dbms.get_table_size(&groups)?;

        let budget = stratum_budget(original_rows, sample.ratio, group_count);
        if budget == 0 {
            log::warn!(
                "{} groups of {} leave no room at ratio {}; every stratum is empty",
                group_count,
                sample.original,
                sample.ratio
            );
        }

        let ranked = self.temp(sample);
        let rank = Expr::Function {
            name: "ROW_NUMBER".to_string(),
            args: vec![],
            distinct: false,
            over: Some(WindowSpec::Inline {
                partition_by: keys.clone(),
                order_by: vec![OrderByItem::new(self.random(sample))],
            }),
        };
        let all_columns: Vec<SelectItem> = types
            .keys()
            .map(|c| SelectItem::new(Expr::column(c.clone())))
            .collect();
        let reserved = Relation::table(sample.original.clone())
            .select(vec![
                SelectItem::new(Expr::wildcard()),
                SelectItem::aliased(rank, RANK_COLUMN),
            ])
            .with_alias("r")
            .filter(Expr::lt_eq(
                Expr::column(RANK_COLUMN),
                Expr::int(i64::try_from(budget).unwrap_or(i64::MAX)),
            ))
            .select(all_columns);
        self.materialize(guard, &ranked, &reserved)?;

        let mut count_items = key_items();
        count_items.push(SelectItem::aliased(Expr::count_star(), SAMPLE_COUNT_COLUMN));
        let counts = Relation::table(ranked.clone())
            .group_by(keys.clone())
            .aggregate(count_items)
            .with_alias("c");
        let mut items: Vec<SelectItem> = types
            .keys()
            .map(|c| SelectItem::new(Expr::qualified("s", c.clone())))
            .collect();
        items.push(SelectItem::aliased(
            Expr::div(
                Expr::cast(Expr::qualified("c", SAMPLE_COUNT_COLUMN), "DOUBLE"),
                Expr::cast(Expr::qualified("g", GROUP_SIZE_COLUMN), "DOUBLE"),
            ),
            SAMPLING_PROB_COLUMN,
        ));
        items.push(SelectItem::aliased(
            Expr::raw(self.dbms.mod_of_rand(self.config.partition_count)),
            PARTITION_COLUMN,
        ));
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.extend([SAMPLING_PROB_COLUMN.to_string(), PARTITION_COLUMN.to_string()]);
        let joined = Relation::table(ranked.clone())
            .with_alias("s")
            .join(counts, null_safe_join("s", "c", &sample.columns, &types))
            .join(
                Relation::table(groups.clone()).with_alias("g"),
                null_safe_join("s", "g", &sample.columns, &types),
            );
        let staged = self.stage(guard, sample, joined, items, names)?;
        let sample_rows = self.dbms.get_table_size(&staged)?;

        guard.release(&ranked)?;
        guard.release(&groups)?;
        Ok((staged, sample_rows))
    }
}

/// Drops the samples of `table`, optionally of one kind, and removes
/// their catalog rows.
pub fn drop_samples(
    dbms: &dyn Dbms,
    registry: &mut dyn SampleRegistry,
    table: &TableName,
    kind: Option<SampleKind>,
) -> Result<Vec<SampleParam>> {
    let matching: Vec<SampleParam> = registry
        .samples_for(table)
        .into_iter()
        .filter(|s| kind.is_none_or(|k| s.kind == k))
        .collect();
    if matching.is_empty() {
        return Err(Error::sample_not_found(match kind {
            Some(kind) => format!("{} sample of {}", kind, table),
            None => format!("sample of {}", table),
        }));
    }
    for sample in &matching {
        dbms.drop_table(&sample.sample_table)?;
        registry.unregister(sample)?;
        log::info!("dropped {}", sample);
    }
    Ok(matching)
}
