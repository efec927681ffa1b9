//! Common types, errors, configuration and the sample catalog for approxsql.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use catalog::{InMemoryCatalog, SampleCatalog, SampleRegistry};
pub use config::{AqpConfig, BootstrapConfig, BootstrapMethod, SampleTypePreference};
pub use error::{Error, Result};
pub use result::{QueryResult, Row, Value};
pub use types::{
    GROUP_SIZE_COLUMN, PARTITION_COLUMN, SAMPLING_PROB_COLUMN, SampleKind, SampleParam,
    SampleSizeInfo, TableName, weight_column,
};
