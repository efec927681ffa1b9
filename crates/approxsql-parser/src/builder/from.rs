use approxsql_common::{Error, Result, TableName};
use approxsql_ir::{BinaryOp, Expr, Relation};
use sqlparser::ast;

use super::RelationBuilder;
use crate::expr_builder::build_expr;

/// Joined FROM sources plus the WHERE conjuncts no join consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSources {
    pub relation: Relation,
    pub residual: Vec<Expr>,
}

/// Finds the first equality conjunct linking `new_names` to an earlier
/// source. Earlier sources are tried in declared order.
pub fn search_join_condition(
    conjuncts: &[Expr],
    joined_names: &[Vec<String>],
    new_names: &[String],
) -> Option<usize> {
    let refs = |e: &Expr, names: &[String]| names.iter().any(|n| e.references_qualifier(n));
    for earlier in joined_names {
        for (idx, conjunct) in conjuncts.iter().enumerate() {
            if let Expr::BinaryOp {
                left,
                op: BinaryOp::Eq,
                right,
            } = conjunct.unnest()
            {
                let links = (refs(left, new_names) && refs(right, earlier))
                    || (refs(left, earlier) && refs(right, new_names));
                if links {
                    return Some(idx);
                }
            }
        }
    }
    None
}

impl RelationBuilder<'_> {
    pub(super) fn build_table_sources(
        &mut self,
        from: &[ast::TableWithJoins],
        conjuncts: Vec<Expr>,
    ) -> Result<TableSources> {
        let mut residual = conjuncts;
        let mut joined_names: Vec<Vec<String>> = Vec::new();
        let mut relation: Option<Relation> = None;

        for source in from {
            let (right, names) = self.build_table_factor(&source.relation)?;
            relation = Some(attach(relation, right, names, None, &mut residual, &mut joined_names));

            for join in &source.joins {
                let on = match &join.join_operator {
                    ast::JoinOperator::Inner(ast::JoinConstraint::On(condition)) => {
                        Some(build_expr(condition)?)
                    }
                    ast::JoinOperator::Inner(ast::JoinConstraint::None) => None,
                    ast::JoinOperator::Inner(ast::JoinConstraint::Using(_)) => {
                        return Err(Error::unsupported_query("JOIN ... USING"));
                    }
                    ast::JoinOperator::Inner(ast::JoinConstraint::Natural) => {
                        return Err(Error::unsupported_query("NATURAL JOIN"));
                    }
                    other => {
                        return Err(Error::unsupported_query(format!(
                            "non-inner join {:?}",
                            other
                        )));
                    }
                };
                if on.as_ref().is_some_and(Expr::contains_window) {
                    return Err(Error::unsupported_query("window function in JOIN condition"));
                }
                let (right, names) = self.build_table_factor(&join.relation)?;
                relation = Some(attach(relation, right, names, on, &mut residual, &mut joined_names));
            }
        }

        match relation {
            Some(relation) => Ok(TableSources { relation, residual }),
            None => Err(Error::unsupported_query("SELECT without FROM")),
        }
    }

    /// Builds one FROM item and returns the names its columns may be qualified by.
    fn build_table_factor(&mut self, factor: &ast::TableFactor) -> Result<(Relation, Vec<String>)> {
        match factor {
            ast::TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    return Err(Error::unsupported_query(format!("table function {}", name)));
                }
                let table = table_name(name)?;
                let mut names = vec![table.table.clone()];
                let alias = match alias {
                    Some(alias) => {
                        if !alias.columns.is_empty() {
                            return Err(Error::unsupported_query("column aliases on a table"));
                        }
                        self.aliases.reserve(&alias.name.value);
                        names.push(alias.name.value.to_lowercase());
                        Some(alias.name.value.clone())
                    }
                    None => None,
                };
                Ok((Relation::Single { table, alias }, names))
            }
            ast::TableFactor::Derived {
                lateral,
                subquery,
                alias,
            } => {
                if *lateral {
                    return Err(Error::unsupported_query("LATERAL"));
                }
                let alias = match alias {
                    Some(alias) => {
                        if !alias.columns.is_empty() {
                            return Err(Error::unsupported_query("column aliases on a derived table"));
                        }
                        self.aliases.reserve(&alias.name.value);
                        alias.name.value.clone()
                    }
                    None => self.aliases.next_alias(),
                };
                let relation = self.build_query(subquery)?.with_alias(alias.clone());
                Ok((relation, vec![alias.to_lowercase()]))
            }
            ast::TableFactor::NestedJoin { .. } => {
                Err(Error::unsupported_query("parenthesized joins"))
            }
            other => Err(Error::unsupported_query(format!("table factor {}", other))),
        }
    }
}

fn table_name(name: &ast::ObjectName) -> Result<TableName> {
    let parts: Vec<&str> = name.0.iter().map(|ident| ident.value.as_str()).collect();
    match parts.as_slice() {
        [table] => Ok(TableName::bare(*table)),
        [.., schema, table] => Ok(TableName::new(Some(*schema), *table)),
        [] => Err(Error::parse_error("empty table name")),
    }
}

fn attach(
    existing: Option<Relation>,
    right: Relation,
    names: Vec<String>,
    on: Option<Expr>,
    residual: &mut Vec<Expr>,
    joined_names: &mut Vec<Vec<String>>,
) -> Relation {
    let Some(left) = existing else {
        joined_names.push(names);
        return right;
    };
    let condition = on.or_else(|| {
        search_join_condition(residual, joined_names, &names).map(|idx| residual.remove(idx))
    });
    joined_names.push(names);
    left.join(right, condition)
}
