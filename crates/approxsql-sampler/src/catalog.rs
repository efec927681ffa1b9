//! Sample catalog persisted in two engine meta tables: a size registry
//! and a name registry.

use std::collections::HashMap;
use std::str::FromStr;

use approxsql_common::{
    AqpConfig, Error, InMemoryCatalog, Result, Row, SampleCatalog, SampleKind, SampleParam,
    SampleRegistry, SampleSizeInfo, TableName, Value,
};
use approxsql_ir::Expr;
use indexmap::IndexMap;

use crate::dbms::Dbms;

/// Catalog loaded from the engine's meta tables and cached in memory.
#[derive(Debug, Clone)]
pub struct EngineCatalog {
    size_table: TableName,
    name_table: TableName,
    cache: InMemoryCatalog,
}

impl EngineCatalog {
    pub fn new(config: &AqpConfig) -> Self {
        Self {
            size_table: TableName::new(Some(&config.meta_schema), &config.meta_size_table),
            name_table: TableName::new(Some(&config.meta_schema), &config.meta_name_table),
            cache: InMemoryCatalog::new(),
        }
    }

    pub fn size_table(&self) -> &TableName {
        &self.size_table
    }

    pub fn name_table(&self) -> &TableName {
        &self.name_table
    }

    /// Creates the meta tables when missing and reloads both registries,
    /// plus the column types of every sample table.
    pub fn refresh(&mut self, dbms: &dyn Dbms) -> Result<()> {
        dbms.create_meta_tables(&self.size_table, &self.name_table)?;

        let sql = format!(
            "SELECT schemaname, tablename, samplesize, originaltablesize FROM {}",
            dbms.quote_table(&self.size_table)
        );
        log::trace!("{}", sql);
        let sizes: HashMap<TableName, SampleSizeInfo> = dbms
            .execute(&sql)?
            .rows
            .iter()
            .filter_map(parse_size_row)
            .collect();

        let sql = format!(
            "SELECT originalschemaname, originaltablename, sampleschemaname, sampletablename, \
             sampletype, samplingratio, columnnames FROM {}",
            dbms.quote_table(&self.name_table)
        );
        log::trace!("{}", sql);
        let names = dbms.execute(&sql)?;

        let mut cache = InMemoryCatalog::new();
        for row in &names.rows {
            let Some(sample) = parse_name_row(row) else {
                log::warn!("skipping malformed sample catalog row {:?}", row.values());
                continue;
            };
            let size = sizes.get(&sample.sample_table).copied();
            if size.is_none() {
                log::warn!("no size recorded for {}", sample.sample_table);
            }
            match dbms.get_columns(&sample.sample_table) {
                Ok(columns) if !columns.is_empty() => {
                    cache.set_columns(sample.sample_table.clone(), columns)
                }
                Ok(_) => {}
                Err(e) => log::warn!("cannot read columns of {}: {}", sample.sample_table, e),
            }
            cache.insert(sample, size);
        }
        log::debug!("loaded {} samples from {}", cache.len(), self.name_table);
        self.cache = cache;
        Ok(())
    }

    /// Write access that persists every change through `dbms`.
    pub fn registry<'a>(&'a mut self, dbms: &'a dyn Dbms) -> EngineRegistry<'a> {
        EngineRegistry { catalog: self, dbms }
    }
}

fn text(row: &Row, index: usize) -> Option<String> {
    match row.get(index)? {
        Value::Null => None,
        value => Some(value.to_string().to_lowercase()),
    }
}

fn table_name(schema: Option<String>, table: String) -> TableName {
    TableName::new(schema.as_deref().filter(|s| !s.is_empty()), &table)
}

fn parse_size_row(row: &Row) -> Option<(TableName, SampleSizeInfo)> {
    let table = table_name(text(row, 0), text(row, 1)?);
    let sample_rows = u64::try_from(row.get(2)?.as_i64()?).ok()?;
    let original_rows = u64::try_from(row.get(3)?.as_i64()?).ok()?;
    Some((table, SampleSizeInfo::new(sample_rows, original_rows)))
}

fn parse_name_row(row: &Row) -> Option<SampleParam> {
    let original = table_name(text(row, 0), text(row, 1)?);
    let sample_table = table_name(text(row, 2), text(row, 3)?);
    let kind = SampleKind::from_str(&text(row, 4)?).ok()?;
    let ratio = row.get(5)?.as_f64()?;
    let columns = text(row, 6)
        .map(|csv| SampleParam::parse_columns_csv(&csv))
        .unwrap_or_default();
    Some(SampleParam::from_parts(original, kind, columns, ratio, sample_table))
}

fn table_match(schema_column: &str, table_column: &str, table: &TableName) -> Expr {
    Expr::and(
        Expr::equals(
            Expr::column(schema_column),
            Expr::string(table.schema.clone().unwrap_or_default()),
        ),
        Expr::equals(Expr::column(table_column), Expr::string(table.table.clone())),
    )
}

/// [`SampleRegistry`] over an [`EngineCatalog`] bound to one engine.
pub struct EngineRegistry<'a> {
    catalog: &'a mut EngineCatalog,
    dbms: &'a dyn Dbms,
}

impl EngineRegistry<'_> {
    fn delete_rows(&self, sample: &SampleParam) -> Result<()> {
        self.dbms.delete_rows(
            &self.catalog.size_table,
            &table_match("schemaname", "tablename", &sample.sample_table),
        )?;
        self.dbms.delete_rows(
            &self.catalog.name_table,
            &table_match("sampleschemaname", "sampletablename", &sample.sample_table),
        )
    }
}

impl SampleCatalog for EngineRegistry<'_> {
    fn samples_for(&self, table: &TableName) -> Vec<SampleParam> {
        self.catalog.samples_for(table)
    }

    fn column_types(&self, table: &TableName) -> Option<IndexMap<String, String>> {
        self.catalog.column_types(table)
    }

    fn size_info_of(&self, sample: &SampleParam) -> Option<SampleSizeInfo> {
        self.catalog.size_info_of(sample)
    }

    fn all_samples(&self) -> Vec<SampleParam> {
        self.catalog.all_samples()
    }
}

impl SampleRegistry for EngineRegistry<'_> {
    /// Writes the size row, then the name row. A failed name row takes its
    /// size row back out.
    fn register(&mut self, sample: SampleParam, size: SampleSizeInfo) -> Result<()> {
        self.delete_rows(&sample)?;
        let table = &sample.sample_table;
        self.dbms.insert_row(
            &self.catalog.size_table,
            &[
                Value::string(table.schema.clone().unwrap_or_default()),
                Value::string(table.table.clone()),
                Value::from(size.sample_rows),
                Value::from(size.original_rows),
            ],
        )?;
        let name_row = [
            Value::string(sample.original.schema.clone().unwrap_or_default()),
            Value::string(sample.original.table.clone()),
            Value::string(table.schema.clone().unwrap_or_default()),
            Value::string(table.table.clone()),
            Value::string(sample.kind.as_str()),
            Value::from(sample.ratio),
            Value::string(sample.columns_csv()),
        ];
        if let Err(e) = self.dbms.insert_row(&self.catalog.name_table, &name_row) {
            if let Err(cleanup) = self.delete_rows(&sample) {
                log::warn!("cannot remove size row of {}: {}", table, cleanup);
            }
            return Err(e);
        }

        match self.dbms.get_columns(table) {
            Ok(columns) if !columns.is_empty() => {
                self.catalog.cache.set_columns(table.clone(), columns)
            }
            Ok(_) => {}
            Err(e) => log::warn!("cannot read columns of {}: {}", table, e),
        }
        self.catalog.cache.insert(sample, Some(size));
        Ok(())
    }

    fn unregister(&mut self, sample: &SampleParam) -> Result<()> {
        if !self
            .catalog
            .all_samples()
            .iter()
            .any(|s| s.sample_table == sample.sample_table)
        {
            return Err(Error::sample_not_found(sample.sample_table.to_string()));
        }
        self.delete_rows(sample)?;
        self.catalog.cache.unregister(sample)
    }
}

impl SampleCatalog for EngineCatalog {
    fn samples_for(&self, table: &TableName) -> Vec<SampleParam> {
        self.cache.samples_for(table)
    }

    fn column_types(&self, table: &TableName) -> Option<IndexMap<String, String>> {
        self.cache.column_types(table)
    }

    fn size_info_of(&self, sample: &SampleParam) -> Option<SampleSizeInfo> {
        self.cache.size_info_of(sample)
    }

    fn all_samples(&self) -> Vec<SampleParam> {
        self.cache.all_samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>) -> Row {
        Row::new(values)
    }

    #[test]
    fn test_parse_name_row() {
        let sample = parse_name_row(&row(vec![
            Value::string("TPCH"),
            Value::string("orders"),
            Value::string("tpch_aqp"),
            Value::string("orders_stratified_0100_status"),
            Value::string("stratified"),
            Value::Float64(0.01),
            Value::string("status"),
        ]))
        .unwrap();
        assert_eq!(sample.original, TableName::new(Some("tpch"), "orders"));
        assert_eq!(sample.kind, SampleKind::Stratified);
        assert_eq!(sample.columns, vec!["status"]);
        assert_eq!(
            sample.sample_table,
            TableName::new(Some("tpch_aqp"), "orders_stratified_0100_status")
        );
    }

    #[test]
    fn test_parse_rows_reject_malformed() {
        assert!(parse_name_row(&row(vec![Value::string("x")])).is_none());
        let bad_kind = row(vec![
            Value::Null,
            Value::string("orders"),
            Value::string("aqp"),
            Value::string("s"),
            Value::string("reservoir"),
            Value::Float64(0.1),
            Value::Null,
        ]);
        assert!(parse_name_row(&bad_kind).is_none());

        let (table, size) = parse_size_row(&row(vec![
            Value::string(""),
            Value::string("orders"),
            Value::Int64(10),
            Value::Int64(1000),
        ]))
        .unwrap();
        assert_eq!(table, TableName::bare("orders"));
        assert_eq!(size, SampleSizeInfo::new(10, 1000));
        assert!(parse_size_row(&row(vec![Value::Null, Value::string("t"), Value::Int64(-1), Value::Int64(3)])).is_none());
    }

    #[test]
    fn test_table_match_condition() {
        let cond = table_match("schemaname", "tablename", &TableName::new(Some("aqp"), "orders_uniform_0100"));
        assert_eq!(
            cond.to_string(),
            "schemaname = 'aqp' AND tablename = 'orders_uniform_0100'"
        );
    }
}
