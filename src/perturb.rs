//! Perturbation analysis -- equilibrium shift under exclusion scenarios.
//!
//! A scenario hypothetically removes a set of actors and/or entities from the
//! event population. The matrix and equilibrium are rebuilt from the filtered
//! population with the same strategy and solver options, then compared with
//! the baseline. The baseline itself is never mutated, so running the same
//! scenario twice yields identical measurements.

use crate::chain::divergence::{kl_divergence, total_variation};
use crate::chain::{stationary, ChainError, Equilibrium, SolverOptions, TransitionMatrix};
use crate::ingest::Event;
use crate::state::{transitions, StateStrategy};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A named exclusion set applied hypothetically to the event population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub excluded_actors: Vec<String>,
    #[serde(default)]
    pub excluded_entities: Vec<String>,
}

impl Scenario {
    pub fn excludes(&self, event: &Event) -> bool {
        self.excluded_actors.iter().any(|a| a == &event.actor_id)
            || self.excluded_entities.iter().any(|e| e == &event.entity_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerturbOptions {
    /// Minimum stationary mass shift for a state to count as affected.
    pub mass_epsilon: f64,
    /// How many of the largest shifts to carry in the report.
    pub top_shifts: usize,
}

impl Default for PerturbOptions {
    fn default() -> Self {
        Self {
            mass_epsilon: 1e-6,
            top_shifts: 10,
        }
    }
}

/// One state's stationary mass before and after the exclusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateShift {
    pub state: String,
    pub before: f64,
    pub after: f64,
}

/// Measured equilibrium shift for one scenario against one baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerturbationReport {
    pub scenario: String,
    pub removed_events: usize,
    pub baseline_states: usize,
    pub perturbed_states: usize,
    pub kl_divergence: f64,
    pub total_variation: f64,
    /// How many transition hops the equilibrium shift propagated from the
    /// states whose outgoing flows the exclusion touched directly.
    pub impact_radius: u32,
    /// Largest per-state shifts, descending by magnitude.
    pub shifted_states: Vec<StateShift>,
}

/// Rebuild the equilibrium with `scenario` applied and measure the shift from
/// `baseline`. Read-only with respect to the baseline.
#[allow(clippy::too_many_arguments)]
pub fn run_scenario(
    events: &[Event],
    baseline_matrix: &TransitionMatrix,
    baseline: &Equilibrium,
    scenario: &Scenario,
    strategy: StateStrategy,
    idle_gap: Duration,
    solver: &SolverOptions,
    options: &PerturbOptions,
) -> Result<PerturbationReport, ChainError> {
    let kept: Vec<Event> = events
        .iter()
        .filter(|e| !scenario.excludes(e))
        .cloned()
        .collect();
    let removed_events = events.len() - kept.len();

    let perturbed_matrix = TransitionMatrix::from_transitions(&transitions(&kept, strategy, idle_gap));
    let perturbed_dist = match stationary(&perturbed_matrix, solver) {
        Ok(eq) => eq.by_label(&perturbed_matrix),
        // Exclusion emptied the chain: all baseline mass is displaced.
        Err(ChainError::EmptyChain) => HashMap::new(),
        Err(e) => return Err(e),
    };
    let baseline_dist = baseline.by_label(baseline_matrix);

    let kl = kl_divergence(&baseline_dist, &perturbed_dist);
    let tv = total_variation(&baseline_dist, &perturbed_dist);

    let shifted = collect_shifts(&baseline_dist, &perturbed_dist, options);
    let impact_radius = impact_radius(
        baseline_matrix,
        &perturbed_matrix,
        &baseline_dist,
        &perturbed_dist,
        options.mass_epsilon,
    );

    Ok(PerturbationReport {
        scenario: scenario.name.clone(),
        removed_events,
        baseline_states: baseline_matrix.state_count(),
        perturbed_states: perturbed_matrix.state_count(),
        kl_divergence: kl,
        total_variation: tv,
        impact_radius,
        shifted_states: shifted,
    })
}

fn collect_shifts(
    baseline: &HashMap<String, f64>,
    perturbed: &HashMap<String, f64>,
    options: &PerturbOptions,
) -> Vec<StateShift> {
    let mut states: HashSet<&str> = baseline.keys().map(String::as_str).collect();
    states.extend(perturbed.keys().map(String::as_str));

    let mut shifts: Vec<StateShift> = states
        .into_iter()
        .filter_map(|state| {
            let before = baseline.get(state).copied().unwrap_or(0.0);
            let after = perturbed.get(state).copied().unwrap_or(0.0);
            ((before - after).abs() > options.mass_epsilon).then(|| StateShift {
                state: state.to_string(),
                before,
                after,
            })
        })
        .collect();

    shifts.sort_by(|a, b| {
        let da = (a.before - a.after).abs();
        let db = (b.before - b.after).abs();
        db.partial_cmp(&da)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.state.cmp(&b.state))
    });
    shifts.truncate(options.top_shifts);
    shifts
}

/// BFS depth over the baseline graph from the directly touched states to the
/// furthest state whose mass moved more than `mass_epsilon`.
///
/// Directly touched = baseline states whose outgoing counts changed once the
/// exclusion was applied. Returns 0 when nothing was touched or nothing
/// shifted.
fn impact_radius(
    baseline_matrix: &TransitionMatrix,
    perturbed_matrix: &TransitionMatrix,
    baseline_dist: &HashMap<String, f64>,
    perturbed_dist: &HashMap<String, f64>,
    mass_epsilon: f64,
) -> u32 {
    let n = baseline_matrix.state_count();
    if n == 0 {
        return 0;
    }

    // Seed set: rows that differ between the two matrices, compared by label.
    let mut depth: Vec<Option<u32>> = vec![None; n];
    let mut queue = VecDeque::new();
    for ix in 0..n as u32 {
        let label = match baseline_matrix.label(ix) {
            Some(l) => l,
            None => continue,
        };
        let baseline_row = baseline_matrix.row_counts_by_label(ix);
        let perturbed_row = perturbed_matrix
            .index_of(label)
            .map(|pix| perturbed_matrix.row_counts_by_label(pix))
            .unwrap_or_default();
        if baseline_row != perturbed_row {
            depth[ix as usize] = Some(0);
            queue.push_back(ix);
        }
    }

    let shifted = |label: &str| -> bool {
        let before = baseline_dist.get(label).copied().unwrap_or(0.0);
        let after = perturbed_dist.get(label).copied().unwrap_or(0.0);
        (before - after).abs() > mass_epsilon
    };

    let mut radius = 0u32;
    while let Some(ix) = queue.pop_front() {
        let d = depth[ix as usize].unwrap_or(0);
        if let Some(label) = baseline_matrix.label(ix) {
            if shifted(label) {
                radius = radius.max(d);
            }
        }
        for next in baseline_matrix.out_neighbors(ix) {
            if depth[next as usize].is_none() {
                depth[next as usize] = Some(d + 1);
                queue.push_back(next);
            }
        }
    }

    radius
}
