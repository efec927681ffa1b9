//! Serializes relation trees and expressions back to SQL text.

use std::fmt;

use crate::alias::AliasGenerator;
use crate::expr::{BinaryOp, Expr, Literal, OrderByItem, UnaryOp, WindowSpec};
use crate::relation::{JoinKind, Relation, SelectItem};

const FALLBACK_ALIAS_PREFIX: &str = "sq";

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Quotes an identifier part only when it is not a plain identifier.
pub fn quote_ident(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn quote_path(path: &str) -> String {
    path.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn format_float(v: f64) -> String {
    if v.is_finite() {
        format!("{}", v)
    } else {
        "NULL".to_string()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{}", format_float(v.into_inner())),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Literal::Boolean(true) => write!(f, "TRUE"),
            Literal::Boolean(false) => write!(f, "FALSE"),
            Literal::Null => write!(f, "NULL"),
        }
    }
}

fn binary_operand(expr: &Expr, parent: BinaryOp, is_right: bool) -> String {
    if let Expr::BinaryOp { op, .. } = expr {
        let lower = op.precedence() < parent.precedence();
        let same_level = op.precedence() == parent.precedence()
            && is_right
            && !(parent.is_associative() && *op == parent);
        if lower || same_level {
            return format!("({})", expr);
        }
    }
    expr.to_string()
}

fn wrapped_operand(expr: &Expr) -> String {
    match expr {
        Expr::BinaryOp { .. } | Expr::IsNull { .. } => format!("({})", expr),
        other => other.to_string(),
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn order_by_list(items: &[OrderByItem]) -> String {
    items
        .iter()
        .map(|item| match item.asc {
            Some(true) => format!("{} ASC", item.expr),
            Some(false) => format!("{} DESC", item.expr),
            None => item.expr.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Inline {
                partition_by,
                order_by,
            } => {
                let mut parts = Vec::new();
                if !partition_by.is_empty() {
                    parts.push(format!("PARTITION BY {}", join_exprs(partition_by)));
                }
                if !order_by.is_empty() {
                    parts.push(format!("ORDER BY {}", order_by_list(order_by)));
                }
                write!(f, "({})", parts.join(" "))
            }
            WindowSpec::Verbatim(text) => write!(f, "{}", text),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { table: Some(t), name } => {
                write!(f, "{}.{}", quote_path(t), quote_ident(name))
            }
            Expr::Column { table: None, name } => write!(f, "{}", quote_ident(name)),
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Function {
                name,
                args,
                distinct,
                over,
            } => {
                write!(f, "{}(", name)?;
                if *distinct {
                    write!(f, "DISTINCT ")?;
                }
                write!(f, "{})", join_exprs(args))?;
                if let Some(window) = over {
                    write!(f, " OVER {}", window)?;
                }
                Ok(())
            }
            Expr::BinaryOp { left, op, right } => write!(
                f,
                "{} {} {}",
                binary_operand(left, *op, false),
                op.as_sql(),
                binary_operand(right, *op, true)
            ),
            Expr::UnaryOp { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {}", wrapped_operand(expr)),
                UnaryOp::Minus => write!(f, "-{}", wrapped_operand(expr)),
                UnaryOp::Plus => write!(f, "+{}", wrapped_operand(expr)),
            },
            Expr::IsNull { expr, negated } => write!(
                f,
                "{} IS {}NULL",
                wrapped_operand(expr),
                if *negated { "NOT " } else { "" }
            ),
            Expr::Case {
                operand,
                when_then,
                else_result,
            } => {
                write!(f, "CASE")?;
                if let Some(op) = operand {
                    write!(f, " {}", op)?;
                }
                for (when, then) in when_then {
                    write!(f, " WHEN {} THEN {}", when, then)?;
                }
                if let Some(e) = else_result {
                    write!(f, " ELSE {}", e)?;
                }
                write!(f, " END")
            }
            Expr::Cast { expr, data_type } => write!(f, "CAST({} AS {})", expr, data_type),
            Expr::Nested(inner) => write!(f, "({})", inner),
            Expr::Wildcard { table: Some(t) } => write!(f, "{}.*", quote_path(t)),
            Expr::Wildcard { table: None } => write!(f, "*"),
            Expr::Verbatim { sql, .. } => write!(f, "{}", sql),
        }
    }
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{} AS {}", self.expr, quote_ident(alias)),
            None => write!(f, "{}", self.expr),
        }
    }
}

/// Writes relation trees as SQL. Derived tables without an alias get one
/// from a fallback sequence local to the emitter.
pub struct SqlEmitter {
    fallback: AliasGenerator,
}

impl Default for SqlEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlEmitter {
    pub fn new() -> Self {
        Self {
            fallback: AliasGenerator::new(FALLBACK_ALIAS_PREFIX),
        }
    }

    pub fn emit(&mut self, relation: &Relation) -> String {
        self.query(relation)
    }

    fn query(&mut self, relation: &Relation) -> String {
        match relation {
            Relation::Single { .. } | Relation::Sampled { .. } | Relation::Joined { .. } => {
                format!("SELECT * FROM {}", self.from_item(relation))
            }
            Relation::Filtered { .. } | Relation::Grouped { .. } => {
                self.select_block(&[], relation)
            }
            Relation::Aggregated { source, items, .. }
            | Relation::Projected { source, items, .. } => self.select_block(items, source),
            Relation::Ordered {
                source, order_by, ..
            } => {
                let inner = match source.as_ref() {
                    Relation::Ordered { .. } | Relation::Limited { .. } => {
                        format!("SELECT * FROM {}", self.derived(source))
                    }
                    other => self.query(other),
                };
                format!("{} ORDER BY {}", inner, order_by_list(order_by))
            }
            Relation::Limited { source, limit, .. } => {
                let inner = match source.as_ref() {
                    Relation::Limited { .. } => format!("SELECT * FROM {}", self.derived(source)),
                    other => self.query(other),
                };
                format!("{} LIMIT {}", inner, limit)
            }
        }
    }

    /// `SELECT items FROM .. WHERE .. GROUP BY ..`, folding un-aliased
    /// Grouped and Filtered nodes into clauses of one block.
    fn select_block(&mut self, items: &[SelectItem], source: &Relation) -> String {
        let mut current = source;
        let mut group_by: &[Expr] = &[];
        if let Relation::Grouped {
            source,
            group_by: exprs,
            alias: None,
        } = current
        {
            group_by = exprs.as_slice();
            current = source.as_ref();
        }
        let mut filters: Vec<&Expr> = Vec::new();
        while let Relation::Filtered {
            source,
            condition,
            alias: None,
        } = current
        {
            filters.push(condition);
            current = source.as_ref();
        }
        filters.reverse();

        let select_list = if items.is_empty() {
            "*".to_string()
        } else {
            items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", select_list, self.from_item(current));
        if !filters.is_empty() {
            let conditions: Vec<String> = filters
                .iter()
                .map(|c| binary_operand(c, BinaryOp::And, false))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&join_exprs(group_by));
        }
        sql
    }

    fn from_item(&mut self, relation: &Relation) -> String {
        match relation {
            Relation::Single { table, alias } => {
                table_reference(&table.to_string(), &table.table, alias.as_deref())
            }
            Relation::Sampled { sample, alias } => table_reference(
                &sample.sample_table.to_string(),
                &sample.sample_table.table,
                alias.as_deref(),
            ),
            Relation::Joined {
                left,
                right,
                condition,
                kind,
                ..
            } => {
                let left_sql = self.from_item(left);
                let right_sql = match right.as_ref() {
                    Relation::Joined { .. } => format!("({})", self.from_item(right)),
                    other => self.from_item(other),
                };
                match (kind, condition) {
                    (JoinKind::Inner, Some(cond)) => {
                        format!("{} INNER JOIN {} ON {}", left_sql, right_sql, cond)
                    }
                    (JoinKind::Inner, None) | (JoinKind::Cross, _) => {
                        format!("{} CROSS JOIN {}", left_sql, right_sql)
                    }
                }
            }
            other => self.derived(other),
        }
    }

    fn derived(&mut self, relation: &Relation) -> String {
        let alias = match relation.alias() {
            Some(alias) => alias.to_string(),
            None => self.fallback.next_alias(),
        };
        format!("({}) AS {}", self.query(relation), quote_ident(&alias))
    }
}

fn table_reference(path: &str, table: &str, alias: Option<&str>) -> String {
    match alias {
        Some(alias) if !alias.eq_ignore_ascii_case(table) => {
            format!("{} AS {}", quote_path(path), quote_ident(alias))
        }
        _ => quote_path(path),
    }
}

impl Relation {
    pub fn to_sql(&self) -> String {
        SqlEmitter::new().emit(self)
    }
}
