//! Read and write access to the registry of available samples.

use std::path::Path;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{SampleKind, SampleParam, SampleSizeInfo, TableName};

/// What the sample selector and rewriter need to know about registered samples.
pub trait SampleCatalog {
    /// Samples registered for `table`, in registration order.
    fn samples_for(&self, table: &TableName) -> Vec<SampleParam>;

    /// Ordered column name to type map of `table`, when known.
    fn column_types(&self, table: &TableName) -> Option<IndexMap<String, String>>;

    fn size_info_of(&self, sample: &SampleParam) -> Option<SampleSizeInfo>;

    fn all_samples(&self) -> Vec<SampleParam>;
}

/// Mutating side of the catalog, used by the sample builder.
pub trait SampleRegistry: SampleCatalog {
    fn register(&mut self, sample: SampleParam, size: SampleSizeInfo) -> Result<()>;

    fn unregister(&mut self, sample: &SampleParam) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
struct CatalogEntry {
    sample: SampleParam,
    size: Option<SampleSizeInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    entries: Vec<CatalogEntry>,
    columns: FxHashMap<TableName, IndexMap<String, String>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sample(mut self, sample: SampleParam, size: SampleSizeInfo) -> Self {
        self.insert(sample, Some(size));
        self
    }

    pub fn with_columns(mut self, table: TableName, columns: &[(&str, &str)]) -> Self {
        self.set_columns(
            table,
            columns
                .iter()
                .map(|(n, t)| (n.to_lowercase(), t.to_string()))
                .collect(),
        );
        self
    }

    pub fn insert(&mut self, sample: SampleParam, size: Option<SampleSizeInfo>) {
        self.entries
            .retain(|e| e.sample.sample_table != sample.sample_table);
        self.entries.push(CatalogEntry { sample, size });
    }

    pub fn set_columns(&mut self, table: TableName, columns: IndexMap<String, String>) {
        self.columns.insert(table, columns);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.columns.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reads the offline catalog format:
    ///
    /// ```toml
    /// [[samples]]
    /// original = "tpch.orders"
    /// kind = "uniform"
    /// ratio = 0.01
    /// sample_rows = 15000
    /// original_rows = 1500000
    ///
    /// [[tables]]
    /// name = "tpch.orders"
    /// columns = { o_orderkey = "bigint", o_totalprice = "double" }
    /// ```
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(content).map_err(|e| Error::catalog(e.to_string()))?;
        let mut catalog = Self::new();
        for entry in file.samples {
            let original = TableName::parse(&entry.original);
            let sample = match entry.sample_table {
                Some(name) => SampleParam::from_parts(
                    original,
                    entry.kind,
                    entry.columns,
                    entry.ratio,
                    TableName::parse(&name),
                ),
                None => SampleParam::new(
                    original,
                    entry.kind,
                    entry.columns,
                    entry.ratio,
                    entry.sample_schema.as_deref(),
                )?,
            };
            let size = match (entry.sample_rows, entry.original_rows) {
                (Some(s), Some(o)) => Some(SampleSizeInfo::new(s, o)),
                _ => None,
            };
            catalog.insert(sample, size);
        }
        for table in file.tables {
            catalog.set_columns(
                TableName::parse(&table.name),
                table
                    .columns
                    .into_iter()
                    .map(|(n, t)| (n.to_lowercase(), t))
                    .collect(),
            );
        }
        Ok(catalog)
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CatalogFile {
    #[serde(default)]
    samples: Vec<CatalogFileSample>,
    #[serde(default)]
    tables: Vec<CatalogFileTable>,
}

#[derive(Debug, Deserialize, Serialize)]
struct CatalogFileSample {
    original: String,
    kind: SampleKind,
    #[serde(default)]
    columns: Vec<String>,
    ratio: f64,
    sample_table: Option<String>,
    sample_schema: Option<String>,
    sample_rows: Option<u64>,
    original_rows: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct CatalogFileTable {
    name: String,
    columns: IndexMap<String, String>,
}

impl SampleCatalog for InMemoryCatalog {
    fn samples_for(&self, table: &TableName) -> Vec<SampleParam> {
        self.entries
            .iter()
            .filter(|e| &e.sample.original == table)
            .map(|e| e.sample.clone())
            .collect()
    }

    fn column_types(&self, table: &TableName) -> Option<IndexMap<String, String>> {
        self.columns.get(table).cloned()
    }

    fn size_info_of(&self, sample: &SampleParam) -> Option<SampleSizeInfo> {
        self.entries
            .iter()
            .find(|e| e.sample.sample_table == sample.sample_table)
            .and_then(|e| e.size)
    }

    fn all_samples(&self) -> Vec<SampleParam> {
        self.entries.iter().map(|e| e.sample.clone()).collect()
    }
}

impl SampleRegistry for InMemoryCatalog {
    fn register(&mut self, sample: SampleParam, size: SampleSizeInfo) -> Result<()> {
        self.insert(sample, Some(size));
        Ok(())
    }

    fn unregister(&mut self, sample: &SampleParam) -> Result<()> {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.sample.sample_table != sample.sample_table);
        if self.entries.len() == before {
            return Err(Error::sample_not_found(sample.sample_table.to_string()));
        }
        self.columns.remove(&sample.sample_table);
        Ok(())
    }
}
