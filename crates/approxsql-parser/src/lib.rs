//! SQL front-end for approxsql: statement classification and the builder
//! that turns a parsed SELECT into a relation tree.

mod builder;
mod expr_builder;
mod statement;


use approxsql_common::{Error, Result};
use approxsql_ir::{AliasGenerator, Relation};
pub use builder::{RelationBuilder, SelectList, TableSources, search_join_condition};
pub use sqlparser::ast::Query;
pub use statement::{AqpStatement, CreateSample, DropSample, parse_statement};

/// Parses text that must be a single SELECT.
pub fn parse_query(sql: &str) -> Result<Box<Query>> {
    match parse_statement(sql)? {
        AqpStatement::Select(query) => Ok(query),
        other => Err(Error::unsupported_query(format!(
            "expected a SELECT statement, got {}",
            statement_name(&other)
        ))),
    }
}

pub fn build_relation(query: &Query, aliases: &mut AliasGenerator) -> Result<Relation> {
    RelationBuilder::new(aliases).build_query(query)
}

/// Parses and builds in one step.
pub fn parse_and_build(sql: &str, aliases: &mut AliasGenerator) -> Result<Relation> {
    let query = parse_query(sql)?;
    build_relation(&query, aliases)
}

fn statement_name(statement: &AqpStatement) -> &'static str {
    match statement {
        AqpStatement::Select(_) => "SELECT",
        AqpStatement::CreateSample(_) => "CREATE SAMPLE",
        AqpStatement::DropSample(_) => "DROP SAMPLE",
        AqpStatement::ShowSamples { .. } => "SHOW SAMPLES",
        AqpStatement::ShowConfig => "SHOW CONFIG",
        AqpStatement::Set { .. } => "SET",
        AqpStatement::Refresh => "REFRESH",
        AqpStatement::Passthrough(_) => "a non-query statement",
    }
}
