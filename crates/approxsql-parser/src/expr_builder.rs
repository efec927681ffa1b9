use std::ops::ControlFlow;

use approxsql_common::{Error, Result};
use approxsql_ir::{AggregateKind, BinaryOp, Expr, UnaryOp, WindowSpec};
use sqlparser::ast::{self, visit_expressions};

/// Converts a sqlparser expression. Shapes the IR does not model are kept
/// verbatim, with aggregate and window usage recorded.
pub(crate) fn build_expr(expr: &ast::Expr) -> Result<Expr> {
    match expr {
        ast::Expr::Identifier(ident) => Ok(Expr::column(ident.value.clone())),
        ast::Expr::CompoundIdentifier(parts) => {
            let names: Vec<&str> = parts.iter().map(|p| p.value.as_str()).collect();
            match names.split_last() {
                Some((name, [])) => Ok(Expr::column(*name)),
                Some((name, qualifier)) => Ok(Expr::qualified(qualifier.join("."), *name)),
                None => Err(Error::parse_error("empty compound identifier")),
            }
        }
        ast::Expr::Value(value) => Ok(build_value(value).unwrap_or_else(|| verbatim(expr))),
        ast::Expr::BinaryOp { left, op, right } => match binary_op(op) {
            Some(op) => Ok(Expr::binary(build_expr(left)?, op, build_expr(right)?)),
            None => Ok(verbatim(expr)),
        },
        ast::Expr::UnaryOp { op, expr: inner } => {
            let op = match op {
                ast::UnaryOperator::Not => UnaryOp::Not,
                ast::UnaryOperator::Minus => UnaryOp::Minus,
                ast::UnaryOperator::Plus => UnaryOp::Plus,
                _ => return Ok(verbatim(expr)),
            };
            Ok(Expr::UnaryOp {
                op,
                expr: Box::new(build_expr(inner)?),
            })
        }
        ast::Expr::Nested(inner) => Ok(Expr::Nested(Box::new(build_expr(inner)?))),
        ast::Expr::IsNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(build_expr(inner)?),
            negated: false,
        }),
        ast::Expr::IsNotNull(inner) => Ok(Expr::IsNull {
            expr: Box::new(build_expr(inner)?),
            negated: true,
        }),
        ast::Expr::Function(func) => build_function(func, expr),
        _ => Ok(verbatim(expr)),
    }
}

fn build_value(value: &ast::Value) -> Option<Expr> {
    match value {
        ast::Value::Number(n, _) => {
            if let Ok(v) = n.parse::<i64>() {
                Some(Expr::int(v))
            } else {
                n.parse::<f64>().ok().map(Expr::float)
            }
        }
        ast::Value::SingleQuotedString(s) => Some(Expr::string(s.clone())),
        ast::Value::Boolean(b) => Some(Expr::Literal(approxsql_ir::Literal::Boolean(*b))),
        ast::Value::Null => Some(Expr::null()),
        _ => None,
    }
}

fn binary_op(op: &ast::BinaryOperator) -> Option<BinaryOp> {
    match op {
        ast::BinaryOperator::Plus => Some(BinaryOp::Plus),
        ast::BinaryOperator::Minus => Some(BinaryOp::Minus),
        ast::BinaryOperator::Multiply => Some(BinaryOp::Multiply),
        ast::BinaryOperator::Divide => Some(BinaryOp::Divide),
        ast::BinaryOperator::Modulo => Some(BinaryOp::Modulo),
        ast::BinaryOperator::StringConcat => Some(BinaryOp::StringConcat),
        ast::BinaryOperator::Eq => Some(BinaryOp::Eq),
        ast::BinaryOperator::NotEq => Some(BinaryOp::NotEq),
        ast::BinaryOperator::Lt => Some(BinaryOp::Lt),
        ast::BinaryOperator::LtEq => Some(BinaryOp::LtEq),
        ast::BinaryOperator::Gt => Some(BinaryOp::Gt),
        ast::BinaryOperator::GtEq => Some(BinaryOp::GtEq),
        ast::BinaryOperator::And => Some(BinaryOp::And),
        ast::BinaryOperator::Or => Some(BinaryOp::Or),
        _ => None,
    }
}

fn build_function(func: &ast::Function, whole: &ast::Expr) -> Result<Expr> {
    if func.filter.is_some() || !func.within_group.is_empty() {
        return Ok(verbatim(whole));
    }
    let (args, distinct) = match &func.args {
        ast::FunctionArguments::None => (Vec::new(), false),
        ast::FunctionArguments::Subquery(_) => return Ok(verbatim(whole)),
        ast::FunctionArguments::List(list) => {
            if !list.clauses.is_empty() {
                return Ok(verbatim(whole));
            }
            let distinct = matches!(
                list.duplicate_treatment,
                Some(ast::DuplicateTreatment::Distinct)
            );
            let mut args = Vec::with_capacity(list.args.len());
            for arg in &list.args {
                match arg {
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Expr(e)) => {
                        args.push(build_expr(e)?)
                    }
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::Wildcard) => {
                        args.push(Expr::wildcard())
                    }
                    ast::FunctionArg::Unnamed(ast::FunctionArgExpr::QualifiedWildcard(name)) => {
                        args.push(Expr::Wildcard {
                            table: Some(name.to_string()),
                        })
                    }
                    _ => return Ok(verbatim(whole)),
                }
            }
            (args, distinct)
        }
    };
    Ok(Expr::Function {
        name: func.name.to_string(),
        args,
        distinct,
        over: func.over.as_ref().map(|w| WindowSpec::Verbatim(w.to_string())),
    })
}

fn verbatim(expr: &ast::Expr) -> Expr {
    let mut has_aggregate = false;
    let mut has_window = false;
    let _ = visit_expressions(expr, |e| {
        if let ast::Expr::Function(func) = e {
            if func.over.is_some() {
                has_window = true;
            } else if AggregateKind::of(&func.name.to_string(), false).is_aggregate() {
                has_aggregate = true;
            }
        }
        ControlFlow::<()>::Continue(())
    });
    Expr::Verbatim {
        sql: expr.to_string(),
        has_aggregate,
        has_window,
    }
}

#[cfg(test)]
mod tests {
    use sqlparser::dialect::GenericDialect;
    use sqlparser::parser::Parser;

    use super::*;

    fn parse(sql: &str) -> Expr {
        let ast = Parser::new(&GenericDialect {})
            .try_with_sql(sql)
            .unwrap()
            .parse_expr()
            .unwrap();
        build_expr(&ast).unwrap()
    }

    #[test]
    fn test_columns_and_literals() {
        assert_eq!(parse("amount"), Expr::column("amount"));
        assert_eq!(parse("o.amount"), Expr::qualified("o", "amount"));
        assert_eq!(
            parse("tpch.orders.amount"),
            Expr::qualified("tpch.orders", "amount")
        );
        assert_eq!(parse("42"), Expr::int(42));
        assert_eq!(parse("0.5"), Expr::float(0.5));
        assert_eq!(parse("'x'"), Expr::string("x"));
        assert_eq!(parse("NULL"), Expr::null());
    }

    #[test]
    fn test_aggregates() {
        let e = parse("COUNT(DISTINCT c)");
        assert_eq!(e.aggregate_kind(), AggregateKind::CountDistinct);
        assert_eq!(parse("count(*)"), Expr::func("count", vec![Expr::wildcard()]));
        let e = parse("SUM(l_extendedprice * (1 - l_discount))");
        assert_eq!(e.aggregate_kind(), AggregateKind::Sum);
        assert_eq!(e.to_string(), "SUM(l_extendedprice * (1 - l_discount))");
    }

    #[test]
    fn test_window_function_is_marked() {
        let e = parse("SUM(x) OVER (PARTITION BY g)");
        assert!(e.contains_window());
        assert!(!e.contains_aggregate());
        assert_eq!(e.to_string(), "SUM(x) OVER (PARTITION BY g)");
    }

    #[test]
    fn test_unmodeled_shapes_are_verbatim() {
        let e = parse("CASE WHEN SUM(a) > 0 THEN 1 ELSE 0 END");
        match &e {
            Expr::Verbatim {
                has_aggregate,
                has_window,
                ..
            } => {
                assert!(*has_aggregate);
                assert!(!*has_window);
            }
            other => panic!("expected verbatim, got {:?}", other),
        }
        let e = parse("x BETWEEN 1 AND 5");
        assert!(matches!(e, Expr::Verbatim { has_aggregate: false, .. }));
        assert_eq!(e.to_string(), "x BETWEEN 1 AND 5");
    }

    #[test]
    fn test_is_null_and_unary() {
        assert_eq!(parse("x IS NOT NULL").to_string(), "x IS NOT NULL");
        assert_eq!(parse("NOT (a = 1)").to_string(), "NOT (a = 1)");
        assert_eq!(parse("-x").to_string(), "-x");
    }
}
