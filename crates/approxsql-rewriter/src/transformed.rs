use std::ops::Range;

use approxsql_common::{AqpConfig, BootstrapMethod, SampleParam};
use approxsql_ir::AggregateKind;

/// Metadata of one aggregated select item.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateColumn {
    /// 0-based position in the aggregate select list.
    pub position: usize,
    pub kind: AggregateKind,
    /// The item as written, before scaling.
    pub expr: String,
    pub output_name: String,
    /// Set for estimates without an unbiased scaling, such as COUNT(DISTINCT).
    pub low_confidence: bool,
    /// Output column indices of the bootstrap replicas; empty when none.
    pub replicas: Range<usize>,
}

impl AggregateColumn {
    pub fn replica_names(&self) -> Vec<String> {
        (1..=self.replicas.len())
            .map(|trial| replica_name(&self.output_name, trial))
            .collect()
    }
}

pub fn replica_name(output_name: &str, trial: usize) -> String {
    format!("{}_trial{}", output_name, trial)
}

/// Result of rewriting one query. When `changed` is false, `sql` is the
/// original text and must be executed as is.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedQuery {
    pub original_sql: String,
    pub sql: String,
    pub samples: Vec<SampleParam>,
    pub aggregates: Vec<AggregateColumn>,
    pub trials: usize,
    pub bootstrap: BootstrapMethod,
    pub confidence: f64,
    pub original_columns: usize,
    pub changed: bool,
}

impl TransformedQuery {
    pub fn unchanged(original_sql: impl Into<String>, config: &AqpConfig) -> Self {
        let original_sql = original_sql.into();
        Self {
            sql: original_sql.clone(),
            original_sql,
            samples: Vec::new(),
            aggregates: Vec::new(),
            trials: 0,
            bootstrap: BootstrapMethod::Identical,
            confidence: config.bootstrap.confidence,
            original_columns: 0,
            changed: false,
        }
    }

    pub fn has_replicas(&self) -> bool {
        self.aggregates.iter().any(|a| !a.replicas.is_empty())
    }

    pub fn aggregate(&self, output_name: &str) -> Option<&AggregateColumn> {
        self.aggregates
            .iter()
            .find(|a| a.output_name.eq_ignore_ascii_case(output_name))
    }
}
