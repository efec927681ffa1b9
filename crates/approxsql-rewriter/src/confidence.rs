//! Confidence intervals from the bootstrap replicas of an executed query.

use approxsql_common::{Error, QueryResult, Result};

use crate::transformed::TransformedQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntervalMethod {
    /// Empirical quantiles of the replicas.
    #[default]
    Percentile,
    /// Estimate plus or minus a normal quantile times the replica standard error.
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub std_error: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInterval {
    pub output_name: String,
    pub interval: ConfidenceInterval,
    pub low_confidence: bool,
}

/// Replicas an engine returned as NaN or infinite carry no information.
fn finite(replicas: &[f64]) -> Vec<f64> {
    replicas.iter().copied().filter(|v| v.is_finite()).collect()
}

/// Sample standard deviation of the replicas, by Welford's update.
pub fn std_error(replicas: &[f64]) -> Option<f64> {
    if replicas.len() < 2 {
        return None;
    }
    let mut count = 0usize;
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for &x in replicas {
        count += 1;
        let delta = x - mean;
        mean += delta / count as f64;
        m2 += delta * (x - mean);
    }
    Some((m2 / (count - 1) as f64).sqrt())
}

/// Linearly interpolated quantile of sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let idx = pos.floor() as usize;
    let frac = pos - idx as f64;
    Some(if idx + 1 < n {
        sorted[idx] * (1.0 - frac) + sorted[idx + 1] * frac
    } else {
        sorted[idx]
    })
}

pub fn percentile_interval(estimate: f64, replicas: &[f64], confidence: f64) -> Option<ConfidenceInterval> {
    let mut sorted = finite(replicas);
    let std_error = std_error(&sorted)?;
    sorted.sort_by(|a, b| a.total_cmp(b));
    let alpha = 1.0 - confidence;
    Some(ConfidenceInterval {
        estimate,
        lower: quantile(&sorted, alpha / 2.0)?,
        upper: quantile(&sorted, 1.0 - alpha / 2.0)?,
        std_error,
        confidence,
    })
}

pub fn normal_interval(estimate: f64, replicas: &[f64], confidence: f64) -> Option<ConfidenceInterval> {
    let std_error = std_error(&finite(replicas))?;
    let z = normal_quantile(1.0 - (1.0 - confidence) / 2.0);
    Some(ConfidenceInterval {
        estimate,
        lower: estimate - z * std_error,
        upper: estimate + z * std_error,
        std_error,
        confidence,
    })
}

/// Inverse standard normal CDF (Acklam's rational approximation, relative
/// error below 1.2e-9).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Intervals for every replicated aggregate of one result row. Aggregates
/// whose estimate is NULL are skipped.
pub fn intervals(
    transformed: &TransformedQuery,
    result: &QueryResult,
    row: usize,
    method: IntervalMethod,
) -> Result<Vec<ColumnInterval>> {
    let mut out = Vec::new();
    for aggregate in transformed.aggregates.iter().filter(|a| !a.replicas.is_empty()) {
        let estimate = match result.value(row, &aggregate.output_name) {
            Some(value) => value.as_f64(),
            None => {
                return Err(Error::internal(format!(
                    "result row {} has no column {}",
                    row, aggregate.output_name
                )));
            }
        };
        let Some(estimate) = estimate else {
            continue;
        };
        let mut replicas = Vec::with_capacity(aggregate.replicas.len());
        for name in aggregate.replica_names() {
            let value = result.value(row, &name).ok_or_else(|| {
                Error::internal(format!("result row {} has no replica column {}", row, name))
            })?;
            if let Some(v) = value.as_f64() {
                replicas.push(v);
            }
        }
        let interval = match method {
            IntervalMethod::Percentile => percentile_interval(estimate, &replicas, transformed.confidence),
            IntervalMethod::Normal => normal_interval(estimate, &replicas, transformed.confidence),
        };
        if let Some(interval) = interval {
            out.push(ColumnInterval {
                output_name: aggregate.output_name.clone(),
                interval,
                low_confidence: aggregate.low_confidence,
            });
        }
    }
    Ok(out)
}
