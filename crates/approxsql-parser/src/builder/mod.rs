mod from;
mod select_list;

use approxsql_common::{Error, Result};
use approxsql_ir::{AliasGenerator, Expr, Literal, OrderByItem, Relation, SelectItem};
use sqlparser::ast;

pub use from::{TableSources, search_join_condition};
pub use select_list::SelectList;

use crate::expr_builder::build_expr;

/// Builds relation trees from parsed queries. Generated aliases come from the
/// session's sequence, so the builder borrows it for the statement's lifetime.
pub struct RelationBuilder<'a> {
    aliases: &'a mut AliasGenerator,
}

/// A built SELECT block before ORDER BY and LIMIT are applied.
struct SelectBlock {
    relation: Relation,
    items: Vec<SelectItem>,
    aggregated: bool,
}

impl<'a> RelationBuilder<'a> {
    pub fn new(aliases: &'a mut AliasGenerator) -> Self {
        Self { aliases }
    }

    pub fn build_query(&mut self, query: &ast::Query) -> Result<Relation> {
        if query.with.is_some() {
            return Err(Error::unsupported_query("WITH clauses"));
        }
        if query.offset.is_some() {
            return Err(Error::unsupported_query("OFFSET"));
        }
        if query.fetch.is_some() {
            return Err(Error::unsupported_query("FETCH"));
        }
        if !query.limit_by.is_empty() {
            return Err(Error::unsupported_query("LIMIT BY"));
        }
        if !query.locks.is_empty() {
            return Err(Error::unsupported_query("locking clauses"));
        }

        let block = match query.body.as_ref() {
            ast::SetExpr::Select(select) => self.build_select(select)?,
            ast::SetExpr::Query(inner) => {
                if query.order_by.is_some() || query.limit.is_some() {
                    return Err(Error::unsupported_query(
                        "ORDER BY or LIMIT around a parenthesized query",
                    ));
                }
                return self.build_query(inner);
            }
            ast::SetExpr::SetOperation { op, .. } => {
                return Err(Error::unsupported_query(format!("set operation {}", op)));
            }
            other => {
                return Err(Error::unsupported_query(format!("query body {}", other)));
            }
        };

        let mut relation = block.relation;
        if let Some(order_by) = &query.order_by {
            let items = self.build_order_by(&order_by.exprs, &block.items, block.aggregated)?;
            relation = relation.order_by(items);
        }
        if let Some(limit) = &query.limit {
            relation = relation.limit(limit_value(limit)?);
        }
        Ok(relation)
    }

    fn build_select(&mut self, select: &ast::Select) -> Result<SelectBlock> {
        if select.distinct.is_some() {
            return Err(Error::unsupported_query("SELECT DISTINCT"));
        }
        if select.top.is_some() {
            return Err(Error::unsupported_query("TOP"));
        }
        if select.having.is_some() {
            return Err(Error::unsupported_query("HAVING"));
        }
        if select.qualify.is_some() {
            return Err(Error::unsupported_query("QUALIFY"));
        }
        if select.into.is_some() {
            return Err(Error::unsupported_query("SELECT INTO"));
        }
        if !select.lateral_views.is_empty() {
            return Err(Error::unsupported_query("LATERAL VIEW"));
        }
        if !select.named_window.is_empty() {
            return Err(Error::unsupported_query("named windows"));
        }
        if select.from.is_empty() {
            return Err(Error::unsupported_query("SELECT without FROM"));
        }

        let items = select_list::build_select_items(&select.projection)?;

        let conjuncts = match &select.selection {
            Some(selection) => {
                let condition = build_expr(selection)?;
                if condition.contains_window() {
                    return Err(Error::unsupported_query("window function in WHERE"));
                }
                if condition.contains_aggregate() {
                    return Err(Error::unsupported_query("aggregate function in WHERE"));
                }
                approxsql_ir::split_conjuncts(&condition)
            }
            None => Vec::new(),
        };

        let TableSources { relation, residual } = self.build_table_sources(&select.from, conjuncts)?;
        let mut relation = match approxsql_ir::conjunction(residual) {
            Some(condition) => relation.filter(condition),
            None => relation,
        };

        let group_by = select_list::resolve_group_by(&select.group_by, &items)?;
        if !group_by.is_empty() {
            relation = relation.group_by(group_by);
        }

        let SelectList {
            items,
            has_aggregate,
        } = select_list::classify(items);

        if !has_aggregate {
            return Ok(SelectBlock {
                relation: relation.select(items.clone()),
                items,
                aggregated: false,
            });
        }

        let named = select_list::name_aggregate_items(&items)?;
        let alias = self.aliases.next_alias();
        let projected = named
            .iter()
            .filter_map(|item| item.alias.as_ref())
            .map(|name| SelectItem::aliased(Expr::qualified(alias.clone(), name.clone()), name.clone()))
            .collect();
        Ok(SelectBlock {
            relation: relation.aggregate(named).with_alias(alias).select(projected),
            items,
            aggregated: true,
        })
    }

    fn build_order_by(
        &mut self,
        exprs: &[ast::OrderByExpr],
        items: &[SelectItem],
        aggregated: bool,
    ) -> Result<Vec<OrderByItem>> {
        let mut order_by = Vec::with_capacity(exprs.len());
        for entry in exprs {
            if entry.nulls_first.is_some() {
                return Err(Error::unsupported_query("NULLS FIRST/LAST"));
            }
            if entry.with_fill.is_some() {
                return Err(Error::unsupported_query("WITH FILL"));
            }
            let expr = build_expr(&entry.expr)?;
            let expr = if aggregated {
                select_list::resolve_aggregate_order_key(&expr, items)?
            } else {
                expr
            };
            order_by.push(OrderByItem {
                expr,
                asc: entry.asc,
            });
        }
        Ok(order_by)
    }
}

fn limit_value(limit: &ast::Expr) -> Result<u64> {
    match build_expr(limit)? {
        Expr::Literal(Literal::Integer(n)) if n >= 0 => Ok(n as u64),
        _ => Err(Error::unsupported_query(format!(
            "LIMIT must be a non-negative integer literal, got {}",
            limit
        ))),
    }
}
