use approxsql_common::{SampleParam, TableName};

use crate::expr::{Expr, OrderByItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// Alias if present, else the column name, else `expr<n>` for the
    /// 0-based `position` in its select list.
    pub fn output_name(&self, position: usize) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match self.expr.unnest() {
            Expr::Column { name, .. } => name.clone(),
            Expr::Wildcard { table: Some(t) } => format!("{}.*", t),
            Expr::Wildcard { table: None } => "*".to_string(),
            _ => format!("expr{}", position + 1),
        }
    }
}

/// A relational algebra node. Every node owns its children.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Single {
        table: TableName,
        alias: Option<String>,
    },
    /// Approximate counterpart of `Single`, reading a registered sample.
    Sampled {
        sample: SampleParam,
        alias: Option<String>,
    },
    Filtered {
        source: Box<Relation>,
        condition: Expr,
        alias: Option<String>,
    },
    Joined {
        left: Box<Relation>,
        right: Box<Relation>,
        condition: Option<Expr>,
        kind: JoinKind,
        alias: Option<String>,
    },
    Grouped {
        source: Box<Relation>,
        group_by: Vec<Expr>,
        alias: Option<String>,
    },
    Aggregated {
        source: Box<Relation>,
        items: Vec<SelectItem>,
        alias: Option<String>,
    },
    Projected {
        source: Box<Relation>,
        items: Vec<SelectItem>,
        alias: Option<String>,
    },
    Ordered {
        source: Box<Relation>,
        order_by: Vec<OrderByItem>,
        alias: Option<String>,
    },
    Limited {
        source: Box<Relation>,
        limit: u64,
        alias: Option<String>,
    },
}

impl Relation {
    pub fn table(table: TableName) -> Self {
        Relation::Single { table, alias: None }
    }

    pub fn sampled(sample: SampleParam) -> Self {
        Relation::Sampled {
            sample,
            alias: None,
        }
    }

    pub fn filter(self, condition: Expr) -> Self {
        Relation::Filtered {
            source: Box::new(self),
            condition,
            alias: None,
        }
    }

    /// Inner join on `condition`, or a cross join when there is none.
    pub fn join(self, right: Relation, condition: Option<Expr>) -> Self {
        let kind = if condition.is_some() {
            JoinKind::Inner
        } else {
            JoinKind::Cross
        };
        Relation::Joined {
            left: Box::new(self),
            right: Box::new(right),
            condition,
            kind,
            alias: None,
        }
    }

    pub fn group_by(self, group_by: Vec<Expr>) -> Self {
        Relation::Grouped {
            source: Box::new(self),
            group_by,
            alias: None,
        }
    }

    pub fn aggregate(self, items: Vec<SelectItem>) -> Self {
        Relation::Aggregated {
            source: Box::new(self),
            items,
            alias: None,
        }
    }

    pub fn select(self, items: Vec<SelectItem>) -> Self {
        Relation::Projected {
            source: Box::new(self),
            items,
            alias: None,
        }
    }

    pub fn order_by(self, order_by: Vec<OrderByItem>) -> Self {
        Relation::Ordered {
            source: Box::new(self),
            order_by,
            alias: None,
        }
    }

    pub fn limit(self, limit: u64) -> Self {
        Relation::Limited {
            source: Box::new(self),
            limit,
            alias: None,
        }
    }

    pub fn with_alias(mut self, name: impl Into<String>) -> Self {
        self.set_alias(Some(name.into()));
        self
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            Relation::Single { alias, .. }
            | Relation::Sampled { alias, .. }
            | Relation::Filtered { alias, .. }
            | Relation::Joined { alias, .. }
            | Relation::Grouped { alias, .. }
            | Relation::Aggregated { alias, .. }
            | Relation::Projected { alias, .. }
            | Relation::Ordered { alias, .. }
            | Relation::Limited { alias, .. } => alias.as_deref(),
        }
    }

    pub fn set_alias(&mut self, name: Option<String>) {
        match self {
            Relation::Single { alias, .. }
            | Relation::Sampled { alias, .. }
            | Relation::Filtered { alias, .. }
            | Relation::Joined { alias, .. }
            | Relation::Grouped { alias, .. }
            | Relation::Aggregated { alias, .. }
            | Relation::Projected { alias, .. }
            | Relation::Ordered { alias, .. }
            | Relation::Limited { alias, .. } => *alias = name,
        }
    }

    /// Name other nodes use to qualify this node's columns.
    pub fn reference_name(&self) -> Option<String> {
        match self {
            Relation::Single { table, alias } => {
                Some(alias.clone().unwrap_or_else(|| table.table.clone()))
            }
            Relation::Sampled { sample, alias } => {
                Some(alias.clone().unwrap_or_else(|| sample.sample_table.table.clone()))
            }
            other => other.alias().map(str::to_string),
        }
    }

    pub fn is_table(&self) -> bool {
        matches!(self, Relation::Single { .. } | Relation::Sampled { .. })
    }

    pub fn children(&self) -> Vec<&Relation> {
        match self {
            Relation::Single { .. } | Relation::Sampled { .. } => vec![],
            Relation::Joined { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Relation::Filtered { source, .. }
            | Relation::Grouped { source, .. }
            | Relation::Aggregated { source, .. }
            | Relation::Projected { source, .. }
            | Relation::Ordered { source, .. }
            | Relation::Limited { source, .. } => vec![source.as_ref()],
        }
    }

    /// Base tables in declared order, including those inside derived tables.
    pub fn base_tables(&self) -> Vec<&TableName> {
        match self {
            Relation::Single { table, .. } => vec![table],
            _ => self
                .children()
                .into_iter()
                .flat_map(|c| c.base_tables())
                .collect(),
        }
    }

    pub fn sampled_tables(&self) -> Vec<&SampleParam> {
        match self {
            Relation::Sampled { sample, .. } => vec![sample],
            _ => self
                .children()
                .into_iter()
                .flat_map(|c| c.sampled_tables())
                .collect(),
        }
    }

    /// Output column names. Empty for base tables, whose columns the tree does not know.
    pub fn output_columns(&self) -> Vec<String> {
        match self {
            Relation::Single { .. } | Relation::Sampled { .. } => vec![],
            Relation::Joined { left, right, .. } => {
                let mut columns = left.output_columns();
                columns.extend(right.output_columns());
                columns
            }
            Relation::Aggregated { items, .. } | Relation::Projected { items, .. } => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.output_name(i))
                .collect(),
            Relation::Filtered { source, .. }
            | Relation::Grouped { source, .. }
            | Relation::Ordered { source, .. }
            | Relation::Limited { source, .. } => source.output_columns(),
        }
    }

    /// GROUP BY expressions of the nearest grouping below this node.
    pub fn group_by_exprs(&self) -> &[Expr] {
        match self {
            Relation::Grouped { group_by, .. } => group_by,
            Relation::Single { .. } | Relation::Sampled { .. } | Relation::Joined { .. } => &[],
            Relation::Filtered { source, .. }
            | Relation::Aggregated { source, .. }
            | Relation::Projected { source, .. }
            | Relation::Ordered { source, .. }
            | Relation::Limited { source, .. } => source.group_by_exprs(),
        }
    }
}
