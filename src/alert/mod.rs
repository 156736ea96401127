//! Alert scoring -- converts flow and divergence signals into scored,
//! explainable alerts.

pub mod manager;

use crate::chain::{Equilibrium, TransitionMatrix};
use crate::perturb::PerturbationReport;
use serde::{Deserialize, Serialize};

/// Severity levels for raised alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A scored, explainable alert. Evidence carries the measurements and the
/// before/after distribution excerpts that justify the score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: uuid::Uuid,
    pub severity: Severity,
    pub verdict: String,
    pub score: f64,
    pub evidence: serde_json::Value,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A signal that crossed its threshold, ready to be persisted as an alert.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub verdict: String,
    pub severity: Severity,
    pub score: f64,
    pub evidence: serde_json::Value,
}

/// Detection thresholds. Scores are measured as multiples of the threshold;
/// anything at or above 1.0 raises an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub kl_threshold: f64,
    pub tvd_threshold: f64,
    /// Share of stationary mass in the top `concentration_top_k` states above
    /// which the flow counts as pathologically concentrated.
    pub concentration_threshold: f64,
    pub concentration_top_k: usize,
    /// Minimum observed transitions before concentration is judged at all.
    pub min_observations: u64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            kl_threshold: 0.1,
            tvd_threshold: 0.05,
            concentration_threshold: 0.5,
            concentration_top_k: 5,
            min_observations: 20,
        }
    }
}

fn severity_for(score: f64) -> Severity {
    if score >= 3.0 {
        Severity::Critical
    } else if score >= 1.5 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Threshold evaluation over analysis and perturbation measurements.
pub struct AlertEngine {
    thresholds: AlertThresholds,
}

impl AlertEngine {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    /// Judge a perturbation report. The score is the worst threshold multiple
    /// across the divergence measures.
    pub fn evaluate_perturbation(&self, report: &PerturbationReport) -> Option<Signal> {
        if report.removed_events == 0 {
            return None;
        }

        let kl_score = report.kl_divergence / self.thresholds.kl_threshold;
        let tvd_score = report.total_variation / self.thresholds.tvd_threshold;
        let score = kl_score.max(tvd_score);
        if score < 1.0 {
            return None;
        }

        let shifted: Vec<_> = report
            .shifted_states
            .iter()
            .map(|s| {
                serde_json::json!({
                    "state": s.state,
                    "before": s.before,
                    "after": s.after,
                })
            })
            .collect();

        Some(Signal {
            verdict: format!("Equilibrium Shift: {}", report.scenario),
            severity: severity_for(score),
            score,
            evidence: serde_json::json!({
                "scenario": report.scenario,
                "kl_divergence": report.kl_divergence,
                "total_variation": report.total_variation,
                "impact_radius": report.impact_radius,
                "removed_events": report.removed_events,
                "shifted_states": shifted,
            }),
        })
    }

    /// Judge stationary mass concentration: a small clique of states holding
    /// an outsized share of the equilibrium is the wash-trading signature.
    pub fn evaluate_concentration(
        &self,
        matrix: &TransitionMatrix,
        equilibrium: &Equilibrium,
    ) -> Option<Signal> {
        if matrix.observations() < self.thresholds.min_observations {
            return None;
        }
        // A chain barely wider than k is concentrated by construction.
        if matrix.state_count() <= 2 * self.thresholds.concentration_top_k {
            return None;
        }

        let share = equilibrium.concentration(self.thresholds.concentration_top_k);
        let score = share / self.thresholds.concentration_threshold;
        if score < 1.0 {
            return None;
        }

        let top: Vec<_> = equilibrium
            .top_states(matrix, self.thresholds.concentration_top_k)
            .into_iter()
            .map(|(state, mass)| serde_json::json!({ "state": state, "mass": mass }))
            .collect();

        Some(Signal {
            verdict: "Stationary Mass Concentration".to_string(),
            severity: severity_for(score),
            score,
            evidence: serde_json::json!({
                "top_k": self.thresholds.concentration_top_k,
                "share": share,
                "threshold": self.thresholds.concentration_threshold,
                "state_count": matrix.state_count(),
                "observations": matrix.observations(),
                "top_states": top,
            }),
        })
    }

    /// Judge drift between two consecutive analysis snapshots of the same
    /// strategy (baseline first, current second).
    pub fn evaluate_drift(
        &self,
        previous: &std::collections::HashMap<String, f64>,
        current: &std::collections::HashMap<String, f64>,
    ) -> Option<Signal> {
        use crate::chain::divergence::{kl_divergence, total_variation};

        let kl = kl_divergence(previous, current);
        let tvd = total_variation(previous, current);
        let score = (kl / self.thresholds.kl_threshold).max(tvd / self.thresholds.tvd_threshold);
        if score < 1.0 {
            return None;
        }

        Some(Signal {
            verdict: "Equilibrium Drift".to_string(),
            severity: severity_for(score),
            score,
            evidence: serde_json::json!({
                "kl_divergence": kl,
                "total_variation": tvd,
                "previous_states": previous.len(),
                "current_states": current.len(),
            }),
        })
    }
}
