//! Replica expressions for bootstrap confidence intervals. Every replica
//! aggregates the same rows as the point estimate and differs only in the
//! per-row resampling weight.

use approxsql_common::{BootstrapConfig, BootstrapMethod, weight_column};
use approxsql_ir::{AggregateKind, Expr};

use crate::rewrite::{AggregateCall, Scaling};

/// What a replica strategy may consult besides the aggregate itself.
pub struct ReplicaContext<'a> {
    pub scaling: &'a Scaling,
    /// Qualifiers of the sampled tables, in table order.
    pub sampled_aliases: &'a [String],
    pub config: &'a BootstrapConfig,
}

/// Builds the replica of one aggregate for a 1-based trial.
pub type ReplicaStrategy = fn(&AggregateCall, usize, &ReplicaContext<'_>) -> Expr;

pub fn strategy(method: BootstrapMethod) -> Option<ReplicaStrategy> {
    match method {
        BootstrapMethod::Identical => None,
        BootstrapMethod::Stored => Some(stored_replica),
        BootstrapMethod::Uda => Some(uda_replica),
        BootstrapMethod::OnTheFly => Some(on_the_fly_replica),
    }
}

pub fn stored_replica(call: &AggregateCall, trial: usize, ctx: &ReplicaContext<'_>) -> Expr {
    let column = weight_column(trial);
    let weight = ctx
        .sampled_aliases
        .iter()
        .map(|alias| Expr::qualified(alias.clone(), column.clone()))
        .reduce(Expr::mul)
        .unwrap_or_else(|| Expr::int(1));
    weighted(call, weight, ctx.scaling)
}

pub fn on_the_fly_replica(call: &AggregateCall, trial: usize, ctx: &ReplicaContext<'_>) -> Expr {
    let weight = Expr::func(ctx.config.weight_function.clone(), vec![Expr::int(trial as i64)]);
    weighted(call, weight, ctx.scaling)
}

pub fn uda_replica(call: &AggregateCall, trial: usize, ctx: &ReplicaContext<'_>) -> Expr {
    let prefix = &ctx.config.uda_prefix;
    let trial_arg = Expr::int(trial as i64);
    let sum = |arg: Expr| Expr::func(format!("{}sum", prefix), vec![arg, trial_arg.clone()]);
    let scaling = ctx.scaling;
    match (call.kind, &call.arg) {
        (AggregateKind::Sum, Some(arg)) => scaling.sum_with(arg.clone(), sum),
        (AggregateKind::Count, None) if !scaling.is_per_row() => {
            scaling.constant(Expr::func(format!("{}count", prefix), vec![trial_arg.clone()]))
        }
        (AggregateKind::Count, _) => scaling.sum_with(call.indicator(), sum),
        (AggregateKind::Avg, Some(arg)) if !scaling.is_per_row() => Expr::func(
            format!("{}avg", prefix),
            vec![arg.clone(), trial_arg.clone()],
        ),
        (AggregateKind::Avg, Some(arg)) => {
            let unit = scaling.without_factor();
            Expr::div(
                unit.sum_with(arg.clone(), sum),
                unit.sum_with(call.indicator(), sum),
            )
        }
        _ => call.original.clone(),
    }
}

/// Replica as an ordinary SUM over weighted rows.
fn weighted(call: &AggregateCall, weight: Expr, scaling: &Scaling) -> Expr {
    let sum = |arg: Expr| Expr::func("SUM", vec![arg]);
    match (call.kind, &call.arg) {
        (AggregateKind::Sum, Some(arg)) => scaling.sum_with(Expr::mul(arg.clone(), weight), sum),
        (AggregateKind::Count, None) => scaling.sum_with(weight, sum),
        (AggregateKind::Count, Some(_)) => {
            scaling.sum_with(Expr::mul(call.indicator(), weight), sum)
        }
        (AggregateKind::Avg, Some(arg)) => {
            let unit = scaling.without_factor();
            Expr::div(
                unit.sum_with(Expr::mul(arg.clone(), weight.clone()), sum),
                unit.sum_with(Expr::mul(call.indicator(), weight), sum),
            )
        }
        _ => call.original.clone(),
    }
}

/// Poisson(1) CDF, `P(X <= k)` for k = 0..=5. Inverse-CDF weights map a
/// uniform draw to the first k whose threshold exceeds it.
pub const POISSON_ONE_CDF: [f64; 6] = [
    0.367_879_441_171_442_3,
    0.735_758_882_342_884_6,
    0.919_698_602_928_605_7,
    0.981_011_843_123_846_4,
    0.996_340_153_172_656_6,
    0.999_405_815_182_418_6,
];

/// `CASE WHEN u < c0 THEN 0 WHEN u < c1 THEN 1 ... ELSE 6 END` over a uniform column.
pub fn poisson_weight_case(uniform: Expr) -> Expr {
    let when_then = POISSON_ONE_CDF
        .iter()
        .enumerate()
        .map(|(k, threshold)| (Expr::lt(uniform.clone(), Expr::float(*threshold)), Expr::int(k as i64)))
        .collect();
    Expr::case_when(when_then, Some(Expr::int(POISSON_ONE_CDF.len() as i64)))
}

/// Inverse-CDF Poisson(1) draw of a uniform value, the Rust twin of
/// [`poisson_weight_case`].
pub fn poisson_weight(uniform: f64) -> u32 {
    POISSON_ONE_CDF
        .iter()
        .position(|threshold| uniform < *threshold)
        .unwrap_or(POISSON_ONE_CDF.len()) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(kind: AggregateKind, arg: Option<Expr>) -> AggregateCall {
        let original = match (&kind, &arg) {
            (AggregateKind::Count, None) => Expr::count_star(),
            (_, Some(a)) => Expr::func(kind.as_str(), vec![a.clone()]),
            _ => unreachable!(),
        };
        AggregateCall {
            kind,
            arg,
            original,
        }
    }

    fn context<'a>(scaling: &'a Scaling, aliases: &'a [String], config: &'a BootstrapConfig) -> ReplicaContext<'a> {
        ReplicaContext {
            scaling,
            sampled_aliases: aliases,
            config,
        }
    }

    #[test]
    fn test_stored_replica_uses_weight_columns() {
        let scaling = Scaling::constant_factor(100.0);
        let aliases = vec!["orders".to_string()];
        let config = BootstrapConfig::default();
        let ctx = context(&scaling, &aliases, &config);
        let sum = call(AggregateKind::Sum, Some(Expr::column("amount")));
        assert_eq!(
            stored_replica(&sum, 3, &ctx).to_string(),
            "100 * SUM(amount * orders.__weight_3)"
        );
        let count = call(AggregateKind::Count, None);
        assert_eq!(
            stored_replica(&count, 1, &ctx).to_string(),
            "100 * SUM(orders.__weight_1)"
        );
    }

    #[test]
    fn test_uda_replica() {
        let scaling = Scaling::constant_factor(20.0);
        let config = BootstrapConfig::default();
        let ctx = context(&scaling, &[], &config);
        let sum = call(AggregateKind::Sum, Some(Expr::column("x")));
        assert_eq!(uda_replica(&sum, 2, &ctx).to_string(), "20 * bootstrap_sum(x, 2)");
        let count = call(AggregateKind::Count, None);
        assert_eq!(uda_replica(&count, 2, &ctx).to_string(), "20 * bootstrap_count(2)");
        let avg = call(AggregateKind::Avg, Some(Expr::column("x")));
        assert_eq!(uda_replica(&avg, 7, &ctx).to_string(), "bootstrap_avg(x, 7)");
    }

    #[test]
    fn test_on_the_fly_avg_cancels_factor() {
        let scaling = Scaling::constant_factor(10.0);
        let config = BootstrapConfig::default();
        let ctx = context(&scaling, &[], &config);
        let avg = call(AggregateKind::Avg, Some(Expr::column("x")));
        assert_eq!(
            on_the_fly_replica(&avg, 1, &ctx).to_string(),
            "SUM(x * poisson_weight(1)) / SUM(CASE WHEN x IS NULL THEN 0 ELSE 1 END * poisson_weight(1))"
        );
    }

    #[test]
    fn test_identical_has_no_strategy() {
        assert!(strategy(BootstrapMethod::Identical).is_none());
        assert!(strategy(BootstrapMethod::Uda).is_some());
    }

    #[test]
    fn test_poisson_weight_bounds() {
        assert_eq!(poisson_weight(0.0), 0);
        assert_eq!(poisson_weight(0.5), 1);
        assert_eq!(poisson_weight(0.95), 3);
        assert_eq!(poisson_weight(0.999_999), 6);
        let case = poisson_weight_case(Expr::column("u1")).to_string();
        assert!(case.starts_with("CASE WHEN u1 < 0.367879441"));
        assert!(case.ends_with("ELSE 6 END"));
    }
}
