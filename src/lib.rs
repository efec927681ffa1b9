//! approxsql - approximate query processing over precomputed samples.
//!
//! approxsql sits between a client and a SQL warehouse. Aggregate queries are
//! answered from pre-built samples of the queried tables and scaled back to
//! population estimates, optionally with bootstrap replicas for confidence
//! intervals. Everything else reaches the warehouse unchanged.
//!
//! # Architecture
//!
//! The query processing pipeline is:
//! ```text
//! SQL String → Parser → Relation tree → Sample Selector → Approximate Rewriter → SQL Emitter → Dbms
//! ```
//!
//! An [`AqpSession`] owns one engine adapter (any [`Dbms`]), a configuration
//! and the engine-backed sample catalog.
//!
//! # Example
//!
//! ```rust,ignore
//! use approxsql::{AqpConfig, AqpSession};
//!
//! let mut session = AqpSession::new(my_dbms, AqpConfig::default())?;
//!
//! // Build a 1% uniform sample of orders
//! session.execute("CREATE 1% UNIFORM SAMPLE OF orders")?;
//!
//! // Answered from the sample, scaled by 100
//! let result = session.execute("SELECT SUM(amount) FROM orders")?;
//! ```

mod session;

pub use approxsql_common::{
    AqpConfig, BootstrapConfig, BootstrapMethod, Error, InMemoryCatalog, QueryResult, Result, Row,
    SampleCatalog, SampleKind, SampleParam, SampleRegistry, SampleSizeInfo, SampleTypePreference,
    TableName, Value,
};
pub use approxsql_ir::{AliasGenerator, Relation};
pub use approxsql_parser::{AqpStatement, parse_and_build, parse_statement};
pub use approxsql_rewriter::{
    AggregateColumn, ColumnInterval, ConfidenceInterval, IntervalMethod, TransformedQuery,
    transform,
};
pub use approxsql_sampler::{Dbms, EngineCatalog};
pub use session::{AqpSession, SessionState};
