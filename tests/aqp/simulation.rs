use approxsql::SampleParam;
use approxsql_rewriter::{POISSON_ONE_CDF, Scaling, poisson_weight};
use approxsql_sampler::{stratum_budget, uniform_target_size};
use approxsql_test_utils::{catalog_with, uniform_sample};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson};

use crate::common::assert_float_eq;

const POPULATION: usize = 100_000;

fn factor_for(sample: &SampleParam) -> f64 {
    let catalog = catalog_with(POPULATION as u64, std::slice::from_ref(sample));
    Scaling::for_samples(&[("orders".to_string(), sample.clone())], &catalog).factor
}

#[test]
fn test_uniform_estimates_converge() {
    let mut rng = StdRng::seed_from_u64(7);
    let amounts: Vec<f64> = (0..POPULATION).map(|_| rng.gen_range(0.0..100.0)).collect();
    let true_sum: f64 = amounts.iter().sum();

    let mut last_error = f64::INFINITY;
    for (ratio, tolerance) in [(0.01, 0.10), (0.1, 0.03), (0.5, 0.01), (1.0, 1e-9)] {
        let sample = uniform_sample("orders", ratio);
        let factor = factor_for(&sample);
        let target = uniform_target_size(POPULATION as u64, ratio) as usize;
        let picked = index::sample(&mut rng, POPULATION, target);

        let estimated_count = factor * picked.len() as f64;
        assert_float_eq(estimated_count, POPULATION as f64, 1e-6);

        let raw_sum: f64 = picked.iter().map(|i| amounts[i]).sum();
        let error = (factor * raw_sum - true_sum).abs() / true_sum;
        assert!(
            error < tolerance,
            "ratio {} off by {:.4} of the true sum",
            ratio,
            error
        );
        if ratio == 1.0 {
            assert!(error <= last_error);
        }
        last_error = error;
    }
}

#[test]
fn test_poisson_weights_match_reference_distribution() {
    const DRAWS: usize = 200_000;
    let mut rng = StdRng::seed_from_u64(11);
    let reference = Poisson::new(1.0).unwrap();

    let mut ours = [0usize; 8];
    let mut theirs = [0usize; 8];
    for _ in 0..DRAWS {
        let w = poisson_weight(rng.r#gen::<f64>()) as usize;
        ours[w.min(7)] += 1;
        let k: f64 = reference.sample(&mut rng);
        theirs[(k as usize).min(7)] += 1;
    }

    for k in 0..=4 {
        let a = ours[k] as f64 / DRAWS as f64;
        let b = theirs[k] as f64 / DRAWS as f64;
        assert!((a - b).abs() < 0.005, "P(W = {}) {} vs {}", k, a, b);
    }
    assert_eq!(ours[7], 0);
}

#[test]
fn test_poisson_thresholds_are_the_cdf() {
    let mut cdf = 0.0;
    let mut pmf = (-1.0f64).exp();
    for (k, threshold) in POISSON_ONE_CDF.iter().enumerate() {
        cdf += pmf;
        assert_float_eq(*threshold, cdf, 1e-12);
        pmf /= (k + 1) as f64;
    }
    assert_eq!(poisson_weight(0.0), 0);
    assert_eq!(poisson_weight(0.5), 1);
    assert_eq!(poisson_weight(0.999_999), POISSON_ONE_CDF.len() as u32);
}

#[test]
fn test_stratum_reservation() {
    let original_rows = 1_000;
    let ratio = 0.01;
    // 11 groups share 10 reserved rows: every stratum rounds down to nothing
    assert_eq!(stratum_budget(original_rows, ratio, 11), 0);

    for groups in 1..=10 {
        assert!(stratum_budget(original_rows, ratio, groups) >= 1, "{} groups", groups);
    }
    assert_eq!(stratum_budget(original_rows, ratio, 4), 2);
}
