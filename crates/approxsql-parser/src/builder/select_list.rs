use approxsql_common::{Error, Result};
use approxsql_ir::{Expr, Literal, SelectItem};
use sqlparser::ast;

use crate::expr_builder::build_expr;

/// A converted select list and whether any item aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectList {
    pub items: Vec<SelectItem>,
    pub has_aggregate: bool,
}

pub(super) fn build_select_items(projection: &[ast::SelectItem]) -> Result<Vec<SelectItem>> {
    projection
        .iter()
        .map(|item| match item {
            ast::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::new(build_expr(expr)?)),
            ast::SelectItem::ExprWithAlias { expr, alias } => {
                Ok(SelectItem::aliased(build_expr(expr)?, alias.value.clone()))
            }
            ast::SelectItem::QualifiedWildcard(kind, _) => Ok(SelectItem::new(Expr::Wildcard {
                table: Some(kind.to_string()),
            })),
            ast::SelectItem::Wildcard(_) => Ok(SelectItem::new(Expr::wildcard())),
        })
        .collect()
}

pub(super) fn classify(items: Vec<SelectItem>) -> SelectList {
    let has_aggregate = items.iter().any(|item| item.expr.contains_aggregate());
    SelectList {
        items,
        has_aggregate,
    }
}

/// Gives every item of an aggregate list its output name as alias.
pub(super) fn name_aggregate_items(items: &[SelectItem]) -> Result<Vec<SelectItem>> {
    let mut seen: Vec<String> = Vec::with_capacity(items.len());
    let mut named = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        if matches!(item.expr, Expr::Wildcard { .. }) {
            return Err(Error::unsupported_query("wildcard in an aggregate select list"));
        }
        let name = item.output_name(position);
        let key = name.to_lowercase();
        if seen.contains(&key) {
            return Err(Error::unsupported_query(format!(
                "duplicate output column {} in an aggregate query",
                name
            )));
        }
        seen.push(key);
        named.push(SelectItem::aliased(item.expr.clone(), name));
    }
    Ok(named)
}

pub(super) fn resolve_group_by(group_by: &ast::GroupByExpr, items: &[SelectItem]) -> Result<Vec<Expr>> {
    let exprs = match group_by {
        ast::GroupByExpr::All(_) => return Err(Error::unsupported_query("GROUP BY ALL")),
        ast::GroupByExpr::Expressions(exprs, modifiers) => {
            if !modifiers.is_empty() {
                return Err(Error::unsupported_query("GROUP BY modifiers"));
            }
            exprs
        }
    };

    let mut resolved = Vec::with_capacity(exprs.len());
    for expr in exprs {
        let expr = resolve_item_reference(build_expr(expr)?, items, "GROUP BY")?;
        if expr.contains_window() {
            return Err(Error::unsupported_query("window function in GROUP BY"));
        }
        if expr.contains_aggregate() {
            return Err(Error::unsupported_query("aggregate function in GROUP BY"));
        }
        resolved.push(expr);
    }
    Ok(resolved)
}

/// Maps an ordinal or a select-item alias to that item's expression.
fn resolve_item_reference(expr: Expr, items: &[SelectItem], clause: &str) -> Result<Expr> {
    match &expr {
        Expr::Literal(Literal::Integer(ordinal)) => {
            let index = usize::try_from(*ordinal)
                .ok()
                .and_then(|n| n.checked_sub(1))
                .filter(|&i| i < items.len())
                .ok_or_else(|| {
                    Error::unsupported_query(format!("{} position {} is out of range", clause, ordinal))
                })?;
            Ok(items[index].expr.clone())
        }
        Expr::Column { table: None, name } => {
            let aliased = items.iter().find(|item| {
                item.alias
                    .as_deref()
                    .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
            });
            match aliased {
                Some(item) if item.expr.column_name().is_none_or(|c| !c.eq_ignore_ascii_case(name)) => {
                    Ok(item.expr.clone())
                }
                _ => Ok(expr),
            }
        }
        _ => Ok(expr),
    }
}

/// Resolves an ORDER BY key of an aggregate query to the output column it
/// sorts on.
pub(super) fn resolve_aggregate_order_key(expr: &Expr, items: &[SelectItem]) -> Result<Expr> {
    if let Expr::Literal(Literal::Integer(ordinal)) = expr {
        let index = usize::try_from(*ordinal)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .filter(|&i| i < items.len())
            .ok_or_else(|| {
                Error::unsupported_query(format!("ORDER BY position {} is out of range", ordinal))
            })?;
        return Ok(Expr::column(items[index].output_name(index)));
    }

    if let Some(position) = items.iter().position(|item| item.expr == *expr) {
        return Ok(Expr::column(items[position].output_name(position)));
    }

    if let Expr::Column { name, .. } = expr.unnest() {
        if let Some(position) = items
            .iter()
            .enumerate()
            .position(|(i, item)| item.output_name(i).eq_ignore_ascii_case(name))
        {
            return Ok(Expr::column(items[position].output_name(position)));
        }
    }

    if expr.contains_aggregate() {
        Err(Error::unsupported_query(format!(
            "ORDER BY aggregate {} is not in the select list",
            expr
        )))
    } else {
        Err(Error::unsupported_query(format!(
            "ORDER BY key {} is not in the select list of an aggregate query",
            expr
        )))
    }
}
