//! Divergence measures between stationary distributions.
//!
//! Distributions are compared by state label over the union of both supports,
//! so matrices built from different event populations (and therefore
//! different internings) compare correctly.

use std::collections::{BTreeSet, HashMap};

/// Smoothing mass applied per state before KL, so states present on one side
/// only do not produce infinities.
const SMOOTHING_EPSILON: f64 = 1e-12;

/// Kullback-Leibler divergence D(p || q) in nats, epsilon-smoothed over the
/// union support and renormalized. Zero when the distributions are identical.
pub fn kl_divergence(p: &HashMap<String, f64>, q: &HashMap<String, f64>) -> f64 {
    let support: BTreeSet<&str> = p.keys().chain(q.keys()).map(String::as_str).collect();
    if support.is_empty() {
        return 0.0;
    }

    let smooth = |dist: &HashMap<String, f64>| -> Vec<f64> {
        let raw: Vec<f64> = support
            .iter()
            .map(|&s| dist.get(s).copied().unwrap_or(0.0) + SMOOTHING_EPSILON)
            .collect();
        let total: f64 = raw.iter().sum();
        raw.into_iter().map(|v| v / total).collect()
    };

    let ps = smooth(p);
    let qs = smooth(q);

    ps.iter()
        .zip(qs.iter())
        .map(|(&pi, &qi)| pi * (pi / qi).ln())
        .sum::<f64>()
        .max(0.0)
}

/// Total variation distance: half the L1 distance over the union support.
/// Ranges over [0, 1].
pub fn total_variation(p: &HashMap<String, f64>, q: &HashMap<String, f64>) -> f64 {
    let support: BTreeSet<&str> = p.keys().chain(q.keys()).map(String::as_str).collect();
    0.5 * support
        .iter()
        .map(|&s| {
            let pi = p.get(s).copied().unwrap_or(0.0);
            let qi = q.get(s).copied().unwrap_or(0.0);
            (pi - qi).abs()
        })
        .sum::<f64>()
}
