//! Sample selection, approximate rewriting and bootstrap replicas.

mod bootstrap;
mod confidence;
mod rewrite;
mod selector;
mod transformed;

#[cfg(test)]
mod tests;

use approxsql_common::{AqpConfig, BootstrapMethod, Result, SampleCatalog};
use approxsql_ir::Relation;
pub use bootstrap::{
    POISSON_ONE_CDF, ReplicaContext, ReplicaStrategy, poisson_weight, poisson_weight_case,
    strategy,
};
pub use confidence::{
    ColumnInterval, ConfidenceInterval, IntervalMethod, intervals, normal_interval,
    normal_quantile, percentile_interval, quantile, std_error,
};
pub use rewrite::{AggregateCall, ApproximateRewriter, RewriteOutput, Scaling, classify};
pub use selector::{
    CandidateSet, PREFERRED_BAND, SampleSelection, SelectionScore, TableCandidates, candidates,
    choose_best, group_by_columns, score, select_samples,
};
pub use transformed::{AggregateColumn, TransformedQuery, replica_name};

/// Selects samples for `relation` and rewrites it. Any query that cannot be
/// approximated faithfully comes back unchanged with its original text.
pub fn transform(
    sql: &str,
    relation: &Relation,
    catalog: &dyn SampleCatalog,
    config: &AqpConfig,
) -> Result<TransformedQuery> {
    if config.bypass {
        return Ok(TransformedQuery::unchanged(sql, config));
    }
    let selection = select_samples(
        relation,
        catalog,
        config.sample_type,
        config.preferred_sample_ratio,
    );
    if selection.is_empty() {
        log::debug!("no sample applies; executing exactly");
        return Ok(TransformedQuery::unchanged(sql, config));
    }

    let output = match ApproximateRewriter::new(catalog, config).rewrite(relation, &selection) {
        Ok(output) => output,
        Err(err) if err.is_fallback() => {
            log::debug!("rewrite aborted, executing exactly: {}", err);
            return Ok(TransformedQuery::unchanged(sql, config));
        }
        Err(err) => return Err(err),
    };

    let rewritten = output.relation.to_sql();
    log::trace!("rewritten query: {}", rewritten);
    Ok(TransformedQuery {
        original_sql: sql.to_string(),
        sql: rewritten,
        samples: output.samples,
        aggregates: output.aggregates,
        trials: output.trials,
        bootstrap: if output.trials > 0 {
            config.bootstrap.method
        } else {
            BootstrapMethod::Identical
        },
        confidence: config.bootstrap.confidence,
        original_columns: output.original_columns,
        changed: true,
    })
}
