use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

lazy_static! {
    static ref NON_IDENT: Regex =
        Regex::new(r"[^a-z0-9_]+").expect("NON_IDENT pattern is valid");
}

/// Schema used for samples of tables that have no schema of their own.
pub const DEFAULT_SAMPLE_SCHEMA: &str = "aqp";

pub const SAMPLE_SCHEMA_SUFFIX: &str = "_aqp";

/// Per-row inclusion probability column of every sample table.
pub const SAMPLING_PROB_COLUMN: &str = "__sampling_prob";

pub const PARTITION_COLUMN: &str = "__partition";

pub const GROUP_SIZE_COLUMN: &str = "__group_size";

/// Name of the stored replicate-weight column for 1-based `trial`.
pub fn weight_column(trial: usize) -> String {
    format!("__weight_{}", trial)
}

/// Lower-cased identifier of a table, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            schema: schema
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase()),
            table: table.to_lowercase(),
        }
    }

    pub fn bare(table: &str) -> Self {
        Self::new(None, table)
    }

    /// Parses `table` or `schema.table`. Longer names keep their last two parts.
    pub fn parse(name: &str) -> Self {
        let parts: Vec<&str> = name.split('.').map(str::trim).collect();
        match parts.as_slice() {
            [table] => Self::bare(table),
            [.., schema, table] => Self::new(Some(schema), table),
            [] => Self::bare(name),
        }
    }

    pub fn with_schema(&self, schema: &str) -> Self {
        Self::new(Some(schema), &self.table)
    }

    /// Matches a column qualifier against this table's name, ignoring case.
    pub fn matches_qualifier(&self, qualifier: &str) -> bool {
        let qualifier = qualifier.to_lowercase();
        qualifier == self.table || qualifier == self.to_string()
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Uniform,
    Stratified,
    Universe,
}

impl SampleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Uniform => "uniform",
            SampleKind::Stratified => "stratified",
            SampleKind::Universe => "universe",
        }
    }

    /// Kinds whose estimates scale by a single constant instead of a per-row probability.
    pub fn has_constant_probability(&self) -> bool {
        matches!(self, SampleKind::Uniform | SampleKind::Universe)
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "uniform" => Ok(SampleKind::Uniform),
            "stratified" => Ok(SampleKind::Stratified),
            "universe" => Ok(SampleKind::Universe),
            other => Err(Error::invalid_config(format!("unknown sample kind '{}'", other))),
        }
    }
}

/// A registered (or to-be-built) sample of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleParam {
    pub original: TableName,
    pub kind: SampleKind,
    #[serde(default)]
    pub columns: Vec<String>,
    pub ratio: f64,
    pub sample_table: TableName,
}

impl SampleParam {
    /// Validates the parameters and derives the physical sample table name.
    pub fn new(
        original: TableName,
        kind: SampleKind,
        columns: Vec<String>,
        ratio: f64,
        sample_schema: Option<&str>,
    ) -> Result<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(Error::invalid_config(format!(
                "sampling ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        let columns: Vec<String> = columns.iter().map(|c| c.to_lowercase()).collect();
        match kind {
            SampleKind::Uniform if !columns.is_empty() => {
                return Err(Error::invalid_config(
                    "uniform samples take no columns".to_string(),
                ));
            }
            SampleKind::Universe if columns.len() != 1 => {
                return Err(Error::invalid_config(format!(
                    "universe samples need exactly one key column, got {}",
                    columns.len()
                )));
            }
            SampleKind::Stratified if columns.is_empty() => {
                return Err(Error::invalid_config(
                    "stratified samples need at least one column".to_string(),
                ));
            }
            _ => {}
        }

        let schema = match sample_schema {
            Some(schema) => schema.to_lowercase(),
            None => default_sample_schema(&original),
        };
        let sample_table = TableName::new(
            Some(&schema),
            &sample_table_name(&original, kind, &columns, ratio),
        );
        Ok(Self {
            original,
            kind,
            columns,
            ratio,
            sample_table,
        })
    }

    /// Rebuilds a parameter from persisted catalog fields without re-deriving its name.
    pub fn from_parts(
        original: TableName,
        kind: SampleKind,
        columns: Vec<String>,
        ratio: f64,
        sample_table: TableName,
    ) -> Self {
        Self {
            original,
            kind,
            columns: columns.iter().map(|c| c.to_lowercase()).collect(),
            ratio,
            sample_table,
        }
    }

    pub fn columns_csv(&self) -> String {
        self.columns.join(",")
    }

    pub fn parse_columns_csv(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase)
            .collect()
    }
}

impl fmt::Display for SampleParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sample of {} ({:.2}%",
            self.kind,
            self.original,
            self.ratio * 100.0
        )?;
        if !self.columns.is_empty() {
            write!(f, " on {}", self.columns.join(", "))?;
        }
        write!(f, ") -> {}", self.sample_table)
    }
}

pub fn default_sample_schema(original: &TableName) -> String {
    match &original.schema {
        Some(schema) => format!("{}{}", schema, SAMPLE_SCHEMA_SUFFIX),
        None => DEFAULT_SAMPLE_SCHEMA.to_string(),
    }
}

fn sample_table_name(original: &TableName, kind: SampleKind, columns: &[String], ratio: f64) -> String {
    let basis_points = (ratio * 10_000.0).round() as u64;
    let mut name = format!("{}_{}_{:04}", original.table, kind, basis_points);
    for column in columns {
        name.push('_');
        name.push_str(column);
    }
    NON_IDENT.replace_all(&name.to_lowercase(), "_").into_owned()
}

/// Row counts captured when a sample is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSizeInfo {
    pub sample_rows: u64,
    pub original_rows: u64,
}

impl SampleSizeInfo {
    pub fn new(sample_rows: u64, original_rows: u64) -> Self {
        Self {
            sample_rows,
            original_rows,
        }
    }

    /// Sample row count over original row count.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.original_rows == 0 || self.sample_rows == 0 {
            None
        } else {
            Some(self.sample_rows as f64 / self.original_rows as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_parse() {
        assert_eq!(TableName::parse("orders"), TableName::bare("orders"));
        assert_eq!(
            TableName::parse("Sales.Orders"),
            TableName::new(Some("sales"), "orders")
        );
        assert_eq!(
            TableName::parse("db.sales.orders").to_string(),
            "sales.orders"
        );
    }

    #[test]
    fn test_table_name_qualifier() {
        let name = TableName::new(Some("tpch"), "lineitem");
        assert!(name.matches_qualifier("LINEITEM"));
        assert!(name.matches_qualifier("tpch.lineitem"));
        assert!(!name.matches_qualifier("l"));
    }

    #[test]
    fn test_sample_kind_from_str() {
        assert_eq!("UNIFORM".parse::<SampleKind>().unwrap(), SampleKind::Uniform);
        assert_eq!(" universe ".parse::<SampleKind>().unwrap(), SampleKind::Universe);
        assert!("reservoir".parse::<SampleKind>().is_err());
    }

    #[test]
    fn test_sample_name_is_deterministic() {
        let a = SampleParam::new(
            TableName::new(Some("tpch"), "orders"),
            SampleKind::Stratified,
            vec!["O_OrderStatus".to_string()],
            0.01,
            None,
        )
        .unwrap();
        let b = SampleParam::new(
            TableName::new(Some("tpch"), "orders"),
            SampleKind::Stratified,
            vec!["o_orderstatus".to_string()],
            0.01,
            None,
        )
        .unwrap();
        assert_eq!(a.sample_table, b.sample_table);
        assert_eq!(
            a.sample_table.to_string(),
            "tpch_aqp.orders_stratified_0100_o_orderstatus"
        );
    }

    #[test]
    fn test_sample_schema_override() {
        let p = SampleParam::new(
            TableName::bare("orders"),
            SampleKind::Uniform,
            vec![],
            0.05,
            Some("Samples"),
        )
        .unwrap();
        assert_eq!(p.sample_table.to_string(), "samples.orders_uniform_0500");
    }

    #[test]
    fn test_sample_param_validation() {
        let orders = TableName::bare("orders");
        assert!(SampleParam::new(orders.clone(), SampleKind::Uniform, vec![], 0.0, None).is_err());
        assert!(SampleParam::new(orders.clone(), SampleKind::Uniform, vec![], 1.5, None).is_err());
        assert!(SampleParam::new(orders.clone(), SampleKind::Uniform, vec![], 1.0, None).is_ok());
        assert!(
            SampleParam::new(orders.clone(), SampleKind::Universe, vec![], 0.1, None).is_err()
        );
        assert!(
            SampleParam::new(orders.clone(), SampleKind::Stratified, vec![], 0.1, None).is_err()
        );
        assert!(
            SampleParam::new(
                orders,
                SampleKind::Uniform,
                vec!["id".to_string()],
                0.1,
                None
            )
            .is_err()
        );
    }

    #[test]
    fn test_columns_csv_round_trip() {
        let cols = SampleParam::parse_columns_csv(" a, B ,,c");
        assert_eq!(cols, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(
            SampleSizeInfo::new(10_000, 1_000_000).compression_ratio(),
            Some(0.01)
        );
        assert_eq!(SampleSizeInfo::new(0, 100).compression_ratio(), None);
        assert_eq!(SampleSizeInfo::new(10, 0).compression_ratio(), None);
    }
}
