//! Turns an exact relation tree plus chosen samples into an approximate tree.

use approxsql_common::{
    AqpConfig, BootstrapMethod, Error, Result, SAMPLING_PROB_COLUMN, SampleCatalog, SampleKind, SampleParam,
    weight_column,
};
use approxsql_ir::{AggregateKind, Expr, Relation, SelectItem};
use lazy_static::lazy_static;
use regex::Regex;

use crate::bootstrap::{self, ReplicaContext};
use crate::selector::SampleSelection;
use crate::transformed::{AggregateColumn, replica_name};

lazy_static! {
    static ref SCALABLE_CALL: Regex =
        Regex::new(r"(?i)\b(SUM|COUNT|AVG)\s*\(").expect("SCALABLE_CALL pattern is valid");
}

const UNIT_EPSILON: f64 = 1e-12;

/// A plain aggregate call split into kind and argument. `arg` is `None` for
/// `COUNT(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub kind: AggregateKind,
    pub arg: Option<Expr>,
    pub original: Expr,
}

impl AggregateCall {
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        if !expr.is_plain_aggregate() {
            return None;
        }
        let Expr::Function { args, .. } = expr else {
            return None;
        };
        let kind = expr.aggregate_kind();
        let arg = match args.as_slice() {
            [] | [Expr::Wildcard { .. }] if kind == AggregateKind::Count => None,
            [arg] => Some(arg.clone()),
            _ => return None,
        };
        Some(Self {
            kind,
            arg,
            original: expr.clone(),
        })
    }

    /// `1` for `COUNT(*)`, else a 0/1 non-null indicator of the argument.
    pub fn indicator(&self) -> Expr {
        match &self.arg {
            None => Expr::int(1),
            Some(arg) => Expr::case_when(
                vec![(Expr::is_null(arg.clone()), Expr::int(0))],
                Some(Expr::int(1)),
            ),
        }
    }
}

/// Scale applied to SUM and COUNT estimates: a constant factor from
/// constant-probability samples and a per-row inclusion probability from
/// stratified ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaling {
    pub factor: f64,
    pub probability: Option<Expr>,
}

impl Scaling {
    pub fn constant_factor(factor: f64) -> Self {
        Self {
            factor,
            probability: None,
        }
    }

    /// Scaling for the substituted samples, given as (qualifier, sample) pairs.
    pub fn for_samples(sampled: &[(String, SampleParam)], catalog: &dyn SampleCatalog) -> Self {
        let mut factor = 1.0;
        let mut universes: Vec<(&[String], u64)> = Vec::new();
        let mut probabilities = Vec::new();
        for (alias, sample) in sampled {
            match sample.kind {
                SampleKind::Stratified => {
                    probabilities.push(Expr::qualified(alias.clone(), SAMPLING_PROB_COLUMN));
                }
                SampleKind::Universe => {
                    let key = (sample.columns.as_slice(), sample.ratio.to_bits());
                    if universes.contains(&key) {
                        continue;
                    }
                    universes.push(key);
                    factor *= inverse_ratio(sample, catalog);
                }
                SampleKind::Uniform => factor *= inverse_ratio(sample, catalog),
            }
        }
        Self {
            factor,
            probability: probabilities.into_iter().reduce(Expr::mul),
        }
    }

    pub fn is_per_row(&self) -> bool {
        self.probability.is_some()
    }

    pub fn without_factor(&self) -> Self {
        Self {
            factor: 1.0,
            probability: self.probability.clone(),
        }
    }

    pub fn constant(&self, expr: Expr) -> Expr {
        if (self.factor - 1.0).abs() < UNIT_EPSILON {
            expr
        } else {
            Expr::mul(Expr::float(self.factor), expr)
        }
    }

    /// `call(arg / p)` scaled by the constant factor.
    pub fn sum_with(&self, arg: Expr, call: impl FnOnce(Expr) -> Expr) -> Expr {
        let arg = match &self.probability {
            Some(p) => Expr::div(arg, p.clone()),
            None => arg,
        };
        self.constant(call(arg))
    }

    /// Point estimate of a SUM or COUNT call.
    pub fn estimate(&self, call: &AggregateCall) -> Expr {
        if !self.is_per_row() {
            return self.constant(call.original.clone());
        }
        let sum = |arg: Expr| Expr::func("SUM", vec![arg]);
        match (call.kind, &call.arg) {
            (AggregateKind::Sum, Some(arg)) => self.sum_with(arg.clone(), sum),
            (AggregateKind::Count, _) => self.sum_with(call.indicator(), sum),
            _ => call.original.clone(),
        }
    }
}

fn inverse_ratio(sample: &SampleParam, catalog: &dyn SampleCatalog) -> f64 {
    match catalog.size_info_of(sample) {
        Some(size) if size.sample_rows > 0 && size.original_rows > 0 => {
            size.original_rows as f64 / size.sample_rows as f64
        }
        _ => 1.0 / sample.ratio,
    }
}

/// The rewritten tree and what was learned while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutput {
    pub relation: Relation,
    pub samples: Vec<SampleParam>,
    pub aggregates: Vec<AggregateColumn>,
    pub original_columns: usize,
    pub trials: usize,
}

#[derive(Default)]
struct RewriteState {
    samples: Vec<SampleParam>,
    aggregates: Vec<AggregateColumn>,
    /// Replica output names appended by the aggregate, in order.
    replicas: Vec<String>,
    trials: usize,
}

pub struct ApproximateRewriter<'a> {
    catalog: &'a dyn SampleCatalog,
    config: &'a AqpConfig,
}

impl<'a> ApproximateRewriter<'a> {
    pub fn new(catalog: &'a dyn SampleCatalog, config: &'a AqpConfig) -> Self {
        Self { catalog, config }
    }

    /// Fails with `TransformationAborted` whenever a faithful rewrite is not
    /// possible; no partial tree escapes.
    pub fn rewrite(&self, relation: &Relation, selection: &SampleSelection) -> Result<RewriteOutput> {
        if selection.is_empty() {
            return Err(Error::aborted("no samples selected"));
        }
        let original_columns = relation.output_columns().len();
        let mut state = RewriteState::default();
        let rewritten = self.rewrite_outer(relation, selection, &mut state)?;

        let mut offset = original_columns;
        for aggregate in &mut state.aggregates {
            if aggregate.replicas.end > 0 {
                aggregate.replicas = offset..offset + state.trials;
                offset += state.trials;
            }
        }
        Ok(RewriteOutput {
            relation: rewritten,
            samples: state.samples,
            aggregates: state.aggregates,
            original_columns,
            trials: state.trials,
        })
    }

    fn rewrite_outer(
        &self,
        node: &Relation,
        selection: &SampleSelection,
        state: &mut RewriteState,
    ) -> Result<Relation> {
        match node {
            Relation::Limited {
                source,
                limit,
                alias,
            } => Ok(Relation::Limited {
                source: Box::new(self.rewrite_outer(source, selection, state)?),
                limit: *limit,
                alias: alias.clone(),
            }),
            Relation::Ordered {
                source,
                order_by,
                alias,
            } => Ok(Relation::Ordered {
                source: Box::new(self.rewrite_outer(source, selection, state)?),
                order_by: order_by.clone(),
                alias: alias.clone(),
            }),
            Relation::Projected {
                source,
                items,
                alias,
            } => {
                let source = self.rewrite_outer(source, selection, state)?;
                let qualifier = source.reference_name();
                let mut items = items.clone();
                for name in &state.replicas {
                    let column = match &qualifier {
                        Some(q) => Expr::qualified(q.clone(), name.clone()),
                        None => Expr::column(name.clone()),
                    };
                    items.push(SelectItem::aliased(column, name.clone()));
                }
                Ok(Relation::Projected {
                    source: Box::new(source),
                    items,
                    alias: alias.clone(),
                })
            }
            Relation::Aggregated {
                source,
                items,
                alias,
            } => self.rewrite_aggregate(source, items, alias, selection, state),
            _ => Err(Error::aborted("not an aggregate query")),
        }
    }

    fn rewrite_aggregate(
        &self,
        source: &Relation,
        items: &[SelectItem],
        alias: &Option<String>,
        selection: &SampleSelection,
        state: &mut RewriteState,
    ) -> Result<Relation> {
        check_source_chain(source)?;
        for item in items {
            check_item(&item.expr)?;
        }
        if !items.iter().any(|item| has_estimable_aggregate(&item.expr)) {
            return Err(Error::aborted("no SUM, COUNT, AVG or COUNT DISTINCT to estimate"));
        }

        let mut sampled: Vec<(String, SampleParam)> = Vec::new();
        let source = substitute(source, selection, &mut sampled);
        if sampled.is_empty() {
            return Err(Error::aborted("no table under the aggregate has a sample"));
        }
        let scaling = Scaling::for_samples(&sampled, self.catalog);
        log::debug!(
            "scaling by factor {} with per-row probability {}",
            scaling.factor,
            scaling
                .probability
                .as_ref()
                .map_or_else(|| "none".to_string(), |p| p.to_string())
        );

        let mut new_items: Vec<SelectItem> = items
            .iter()
            .map(|item| SelectItem {
                expr: scale_expr(&item.expr, &scaling),
                alias: item.alias.clone(),
            })
            .collect();

        for (position, item) in items.iter().enumerate() {
            let kind = classify(&item.expr);
            if kind == AggregateKind::None {
                continue;
            }
            state.aggregates.push(AggregateColumn {
                position,
                kind,
                expr: item.expr.to_string(),
                output_name: item.output_name(position),
                low_confidence: item
                    .expr
                    .any(&mut |e| e.is_plain_aggregate() && e.aggregate_kind() == AggregateKind::CountDistinct),
                replicas: 0..0,
            });
        }

        let settings = &self.config.bootstrap;
        if let Some(strategy) = bootstrap::strategy(settings.method) {
            if settings.method == BootstrapMethod::Stored {
                self.check_weight_columns(&sampled, settings.trials)?;
            }
            let aliases: Vec<String> = sampled.iter().map(|(a, _)| a.clone()).collect();
            let ctx = ReplicaContext {
                scaling: &scaling,
                sampled_aliases: &aliases,
                config: settings,
            };
            for (position, item) in items.iter().enumerate() {
                let Some(call) = AggregateCall::from_expr(item.expr.unnest()) else {
                    continue;
                };
                if !matches!(call.kind, AggregateKind::Sum | AggregateKind::Count | AggregateKind::Avg) {
                    continue;
                }
                let name = item.output_name(position);
                for trial in 1..=settings.trials {
                    new_items.push(SelectItem::aliased(
                        strategy(&call, trial, &ctx),
                        replica_name(&name, trial),
                    ));
                }
                for trial in 1..=settings.trials {
                    state.replicas.push(replica_name(&name, trial));
                }
                if let Some(aggregate) = state.aggregates.iter_mut().find(|a| a.position == position) {
                    aggregate.replicas = 0..settings.trials;
                }
            }
            state.trials = settings.trials;
        }

        state.samples.extend(sampled.into_iter().map(|(_, sample)| sample));
        Ok(Relation::Aggregated {
            source: Box::new(source),
            items: new_items,
            alias: alias.clone(),
        })
    }

    fn check_weight_columns(&self, sampled: &[(String, SampleParam)], trials: usize) -> Result<()> {
        for (_, sample) in sampled {
            let columns = self.catalog.column_types(&sample.sample_table).ok_or_else(|| {
                Error::aborted(format!("columns of {} are unknown", sample.sample_table))
            })?;
            if let Some(missing) = (1..=trials)
                .map(weight_column)
                .find(|c| !columns.contains_key(c))
            {
                return Err(Error::aborted(format!(
                    "{} has no replicate weight column {}",
                    sample.sample_table, missing
                )));
            }
        }
        Ok(())
    }
}

fn check_source_chain(relation: &Relation) -> Result<()> {
    match relation {
        Relation::Single { .. } | Relation::Sampled { .. } => Ok(()),
        Relation::Filtered { source, .. } | Relation::Grouped { source, .. } => {
            check_source_chain(source)
        }
        Relation::Joined { left, right, .. } => {
            check_source_chain(left)?;
            check_source_chain(right)
        }
        _ => Err(Error::aborted("derived subquery under the aggregate")),
    }
}

fn check_item(expr: &Expr) -> Result<()> {
    if expr.contains_window() {
        return Err(Error::aborted(format!("windowed function in {}", expr)));
    }
    let mut problem: Option<String> = None;
    expr.any(&mut |e| {
        match e {
            Expr::Function {
                name,
                distinct: true,
                ..
            } if e.aggregate_kind() != AggregateKind::CountDistinct => {
                problem = Some(format!("DISTINCT in {}", name));
            }
            Expr::Verbatim {
                sql,
                has_aggregate: true,
                ..
            } if SCALABLE_CALL.is_match(sql) => {
                problem = Some(format!("aggregate inside unsupported expression {}", sql));
            }
            _ => {}
        }
        problem.is_some()
    });
    match problem {
        Some(reason) => Err(Error::aborted(reason)),
        None => Ok(()),
    }
}

fn has_estimable_aggregate(expr: &Expr) -> bool {
    expr.any(&mut |e| {
        e.is_plain_aggregate()
            && matches!(
                e.aggregate_kind(),
                AggregateKind::Sum | AggregateKind::Count | AggregateKind::Avg | AggregateKind::CountDistinct
            )
    })
}

/// Bare aggregate calls keep their kind; anything combining aggregates is OTHER.
pub fn classify(expr: &Expr) -> AggregateKind {
    let inner = expr.unnest();
    if inner.is_plain_aggregate() {
        inner.aggregate_kind()
    } else if expr.contains_aggregate() {
        AggregateKind::Other
    } else {
        AggregateKind::None
    }
}

fn scale_expr(expr: &Expr, scaling: &Scaling) -> Expr {
    expr.rewrite(&mut |e| {
        AggregateCall::from_expr(e)
            .filter(|call| call.kind.is_scalable())
            .map(|call| scaling.estimate(&call))
    })
}

fn substitute(
    relation: &Relation,
    selection: &SampleSelection,
    sampled: &mut Vec<(String, SampleParam)>,
) -> Relation {
    match relation {
        Relation::Single { table, alias } => match selection.get(table) {
            Some(sample) => {
                let alias = alias.clone().unwrap_or_else(|| table.table.clone());
                sampled.push((alias.clone(), sample.clone()));
                Relation::Sampled {
                    sample: sample.clone(),
                    alias: Some(alias),
                }
            }
            None => relation.clone(),
        },
        Relation::Filtered {
            source,
            condition,
            alias,
        } => Relation::Filtered {
            source: Box::new(substitute(source, selection, sampled)),
            condition: condition.clone(),
            alias: alias.clone(),
        },
        Relation::Grouped {
            source,
            group_by,
            alias,
        } => Relation::Grouped {
            source: Box::new(substitute(source, selection, sampled)),
            group_by: group_by.clone(),
            alias: alias.clone(),
        },
        Relation::Joined {
            left,
            right,
            condition,
            kind,
            alias,
        } => Relation::Joined {
            left: Box::new(substitute(left, selection, sampled)),
            right: Box::new(substitute(right, selection, sampled)),
            condition: condition.clone(),
            kind: *kind,
            alias: alias.clone(),
        },
        other => other.clone(),
    }
}
