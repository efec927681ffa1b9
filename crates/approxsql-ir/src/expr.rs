use ordered_float::OrderedFloat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    CountDistinct,
    Other,
    None,
}

impl AggregateKind {
    /// Maps a function name to its aggregate kind. `distinct` only matters for COUNT.
    pub fn of(name: &str, distinct: bool) -> Self {
        match name.to_uppercase().as_str() {
            "COUNT" if distinct => AggregateKind::CountDistinct,
            "COUNT" => AggregateKind::Count,
            "NDV" | "APPROX_COUNT_DISTINCT" => AggregateKind::CountDistinct,
            "SUM" => AggregateKind::Sum,
            "AVG" => AggregateKind::Avg,
            "MIN" | "MAX" | "STDDEV" | "STDDEV_SAMP" | "STDDEV_POP" | "VARIANCE" | "VAR_SAMP"
            | "VAR_POP" | "MEDIAN" => AggregateKind::Other,
            _ => AggregateKind::None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !matches!(self, AggregateKind::None)
    }

    /// Kinds whose estimates scale with the sampling ratio.
    pub fn is_scalable(&self) -> bool {
        matches!(self, AggregateKind::Count | AggregateKind::Sum)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Avg => "AVG",
            AggregateKind::CountDistinct => "COUNT_DISTINCT",
            AggregateKind::Other => "OTHER",
            AggregateKind::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Integer(i64),
    Float(OrderedFloat<f64>),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    StringConcat,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 4,
            BinaryOp::StringConcat => 5,
            BinaryOp::Plus | BinaryOp::Minus => 6,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 7,
        }
    }

    pub(crate) fn is_associative(&self) -> bool {
        matches!(
            self,
            BinaryOp::Plus
                | BinaryOp::Multiply
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::StringConcat
        )
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::StringConcat => "||",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderByItem {
    pub expr: Expr,
    pub asc: Option<bool>,
}

impl OrderByItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, asc: None }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            asc: Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WindowSpec {
    Inline {
        partition_by: Vec<Expr>,
        order_by: Vec<OrderByItem>,
    },
    /// Window text kept as written, e.g. a named window or one with a frame clause.
    Verbatim(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Literal),
    Function {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        over: Option<WindowSpec>,
    },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        when_then: Vec<(Expr, Expr)>,
        else_result: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        data_type: String,
    },
    Nested(Box<Expr>),
    Wildcard {
        table: Option<String>,
    },
    /// SQL this model does not decompose, kept as text.
    Verbatim {
        sql: String,
        has_aggregate: bool,
        has_window: bool,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn int(v: i64) -> Self {
        Expr::Literal(Literal::Integer(v))
    }

    pub fn float(v: f64) -> Self {
        Expr::Literal(Literal::Float(OrderedFloat(v)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(s.into()))
    }

    pub fn null() -> Self {
        Expr::Literal(Literal::Null)
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
            distinct: false,
            over: None,
        }
    }

    pub fn count_star() -> Self {
        Expr::func("COUNT", vec![Expr::Wildcard { table: None }])
    }

    pub fn wildcard() -> Self {
        Expr::Wildcard { table: None }
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Verbatim {
            sql: sql.into(),
            has_aggregate: false,
            has_window: false,
        }
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expr, right: Expr) -> Self {
        Expr::binary(left, BinaryOp::Eq, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Expr::binary(left, BinaryOp::Lt, right)
    }

    pub fn lt_eq(left: Expr, right: Expr) -> Self {
        Expr::binary(left, BinaryOp::LtEq, right)
    }

    pub fn mul(left: Expr, right: Expr) -> Self {
        Expr::binary(left, BinaryOp::Multiply, right)
    }

    pub fn div(left: Expr, right: Expr) -> Self {
        Expr::binary(left, BinaryOp::Divide, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(left, BinaryOp::And, right)
    }

    pub fn cast(expr: Expr, data_type: impl Into<String>) -> Self {
        Expr::Cast {
            expr: Box::new(expr),
            data_type: data_type.into(),
        }
    }

    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn case_when(when_then: Vec<(Expr, Expr)>, else_result: Option<Expr>) -> Self {
        Expr::Case {
            operand: None,
            when_then,
            else_result: else_result.map(Box::new),
        }
    }

    /// Kind of a function call; `None` for anything else.
    pub fn aggregate_kind(&self) -> AggregateKind {
        match self {
            Expr::Function { name, distinct, .. } => AggregateKind::of(name, *distinct),
            _ => AggregateKind::None,
        }
    }

    /// A plain (non-windowed) aggregate call.
    pub fn is_plain_aggregate(&self) -> bool {
        matches!(self, Expr::Function { over: None, .. }) && self.aggregate_kind().is_aggregate()
    }

    pub fn contains_aggregate(&self) -> bool {
        self.any(&mut |e| match e {
            Expr::Verbatim { has_aggregate, .. } => *has_aggregate,
            other => other.is_plain_aggregate(),
        })
    }

    pub fn contains_window(&self) -> bool {
        self.any(&mut |e| match e {
            Expr::Function { over, .. } => over.is_some(),
            Expr::Verbatim { has_window, .. } => *has_window,
            _ => false,
        })
    }

    /// True if `pred` holds for this expression or any sub-expression.
    pub fn any(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|c| c.any(pred))
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Wildcard { .. }
            | Expr::Verbatim { .. } => vec![],
            Expr::Function { args, over, .. } => {
                let mut children: Vec<&Expr> = args.iter().collect();
                if let Some(WindowSpec::Inline {
                    partition_by,
                    order_by,
                }) = over
                {
                    children.extend(partition_by.iter());
                    children.extend(order_by.iter().map(|o| &o.expr));
                }
                children
            }
            Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::UnaryOp { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Nested(expr) => vec![expr.as_ref()],
            Expr::Case {
                operand,
                when_then,
                else_result,
            } => {
                let mut children = Vec::new();
                if let Some(op) = operand {
                    children.push(op.as_ref());
                }
                for (w, t) in when_then {
                    children.push(w);
                    children.push(t);
                }
                if let Some(e) = else_result {
                    children.push(e.as_ref());
                }
                children
            }
        }
    }

    /// Rebuilds the expression top-down. Where `f` returns a replacement the
    /// sub-tree is not descended further.
    pub fn rewrite(&self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self {
            Expr::Column { .. }
            | Expr::Literal(_)
            | Expr::Wildcard { .. }
            | Expr::Verbatim { .. } => self.clone(),
            Expr::Function {
                name,
                args,
                distinct,
                over,
            } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.rewrite(f)).collect(),
                distinct: *distinct,
                over: over.as_ref().map(|w| match w {
                    WindowSpec::Inline {
                        partition_by,
                        order_by,
                    } => WindowSpec::Inline {
                        partition_by: partition_by.iter().map(|p| p.rewrite(f)).collect(),
                        order_by: order_by
                            .iter()
                            .map(|o| OrderByItem {
                                expr: o.expr.rewrite(f),
                                asc: o.asc,
                            })
                            .collect(),
                    },
                    WindowSpec::Verbatim(text) => WindowSpec::Verbatim(text.clone()),
                }),
            },
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.rewrite(f)),
                op: *op,
                right: Box::new(right.rewrite(f)),
            },
            Expr::UnaryOp { op, expr } => Expr::UnaryOp {
                op: *op,
                expr: Box::new(expr.rewrite(f)),
            },
            Expr::IsNull { expr, negated } => Expr::IsNull {
                expr: Box::new(expr.rewrite(f)),
                negated: *negated,
            },
            Expr::Case {
                operand,
                when_then,
                else_result,
            } => Expr::Case {
                operand: operand.as_ref().map(|o| Box::new(o.rewrite(f))),
                when_then: when_then
                    .iter()
                    .map(|(w, t)| (w.rewrite(f), t.rewrite(f)))
                    .collect(),
                else_result: else_result.as_ref().map(|e| Box::new(e.rewrite(f))),
            },
            Expr::Cast { expr, data_type } => Expr::Cast {
                expr: Box::new(expr.rewrite(f)),
                data_type: data_type.clone(),
            },
            Expr::Nested(inner) => Expr::Nested(Box::new(inner.rewrite(f))),
        }
    }

    /// Table qualifiers of all column references, in first-seen order.
    pub fn qualifiers(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        self.any(&mut |e| {
            if let Expr::Column {
                table: Some(table), ..
            } = e
            {
                let table = table.to_lowercase();
                if !seen.contains(&table) {
                    seen.push(table);
                }
            }
            false
        });
        seen
    }

    pub fn references_qualifier(&self, qualifier: &str) -> bool {
        let qualifier = qualifier.to_lowercase();
        self.qualifiers().iter().any(|q| {
            *q == qualifier || q.rsplit('.').next() == Some(qualifier.as_str())
        })
    }

    /// Name of a bare column reference.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Expr::Column { name, .. } => Some(name),
            Expr::Nested(inner) => inner.column_name(),
            _ => None,
        }
    }

    pub fn unnest(&self) -> &Expr {
        match self {
            Expr::Nested(inner) => inner.unnest(),
            other => other,
        }
    }
}

/// Splits a predicate into its AND-ed conjuncts, looking through parentheses.
pub fn split_conjuncts(expr: &Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let mut out = split_conjuncts(left);
            out.extend(split_conjuncts(right));
            out
        }
        Expr::Nested(inner) if matches!(inner.as_ref(), Expr::BinaryOp { op: BinaryOp::And, .. }) => {
            split_conjuncts(inner)
        }
        other => vec![other.clone()],
    }
}

/// AND-s conjuncts back together, or `None` when there are none.
pub fn conjunction(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts.into_iter().reduce(Expr::and)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(arg: Expr) -> Expr {
        Expr::func("SUM", vec![arg])
    }

    #[test]
    fn test_aggregate_kind_mapping() {
        assert_eq!(AggregateKind::of("count", false), AggregateKind::Count);
        assert_eq!(AggregateKind::of("COUNT", true), AggregateKind::CountDistinct);
        assert_eq!(AggregateKind::of("ndv", false), AggregateKind::CountDistinct);
        assert_eq!(AggregateKind::of("Sum", false), AggregateKind::Sum);
        assert_eq!(AggregateKind::of("avg", false), AggregateKind::Avg);
        assert_eq!(AggregateKind::of("max", false), AggregateKind::Other);
        assert_eq!(AggregateKind::of("stddev", false), AggregateKind::Other);
        assert_eq!(AggregateKind::of("substr", false), AggregateKind::None);
        assert!(AggregateKind::Sum.is_scalable());
        assert!(!AggregateKind::Avg.is_scalable());
        assert!(!AggregateKind::None.is_aggregate());
    }

    #[test]
    fn test_contains_aggregate_and_window() {
        let plain = Expr::div(sum(Expr::column("a")), Expr::count_star());
        assert!(plain.contains_aggregate());
        assert!(!plain.contains_window());

        let windowed = Expr::Function {
            name: "SUM".to_string(),
            args: vec![Expr::column("a")],
            distinct: false,
            over: Some(WindowSpec::Verbatim("()".to_string())),
        };
        assert!(!windowed.is_plain_aggregate());
        assert!(!windowed.contains_aggregate());
        assert!(windowed.contains_window());

        let verbatim = Expr::Verbatim {
            sql: "CASE WHEN SUM(a) > 0 THEN 1 END".to_string(),
            has_aggregate: true,
            has_window: false,
        };
        assert!(verbatim.contains_aggregate());
        assert!(!Expr::column("a").contains_aggregate());
    }

    #[test]
    fn test_split_and_join_conjuncts() {
        let a = Expr::equals(Expr::qualified("o", "id"), Expr::qualified("c", "id"));
        let b = Expr::lt(Expr::column("x"), Expr::int(3));
        let c = Expr::is_null(Expr::column("y"));
        let pred = Expr::and(
            a.clone(),
            Expr::Nested(Box::new(Expr::and(b.clone(), c.clone()))),
        );
        let parts = split_conjuncts(&pred);
        assert_eq!(parts, vec![a.clone(), b.clone(), c.clone()]);

        let joined = conjunction(parts).unwrap();
        assert_eq!(split_conjuncts(&joined), vec![a, b, c]);
        assert_eq!(conjunction(vec![]), None);
    }

    #[test]
    fn test_or_is_not_split() {
        let pred = Expr::binary(Expr::column("a"), BinaryOp::Or, Expr::column("b"));
        assert_eq!(split_conjuncts(&pred).len(), 1);
    }

    #[test]
    fn test_qualifiers() {
        let e = Expr::and(
            Expr::equals(Expr::qualified("O", "id"), Expr::qualified("tpch.customer", "id")),
            Expr::equals(Expr::qualified("o", "x"), Expr::int(1)),
        );
        assert_eq!(e.qualifiers(), vec!["o", "tpch.customer"]);
        assert!(e.references_qualifier("customer"));
        assert!(e.references_qualifier("O"));
        assert!(!e.references_qualifier("lineitem"));
    }

    #[test]
    fn test_rewrite_replaces_without_descending() {
        let e = Expr::mul(sum(Expr::column("a")), Expr::int(2));
        let mut calls = 0;
        let out = e.rewrite(&mut |node| {
            if node.aggregate_kind() == AggregateKind::Sum {
                calls += 1;
                Some(Expr::mul(Expr::float(100.0), node.clone()))
            } else {
                None
            }
        });
        assert_eq!(calls, 1);
        assert_eq!(
            out,
            Expr::mul(
                Expr::mul(Expr::float(100.0), sum(Expr::column("a"))),
                Expr::int(2)
            )
        );
    }
}
