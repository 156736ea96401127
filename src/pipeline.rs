//! Full analysis pipeline: events -> states -> matrix -> equilibrium ->
//! alerts, with a snapshot persisted per run.

use crate::alert::manager::AlertManager;
use crate::alert::AlertEngine;
use crate::chain::{stationary, ChainError, TransitionMatrix};
use crate::config::Config;
use crate::perturb::{run_scenario, PerturbationReport, Scenario};
use crate::state::transitions;
use crate::storage::{self, Pool};
use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Summary of one analysis pass.
#[derive(Debug, Serialize)]
pub struct AnalysisOutcome {
    pub run_id: i64,
    pub event_count: u64,
    pub state_count: usize,
    pub transition_count: usize,
    pub observations: u64,
    pub converged: bool,
    pub iterations: u32,
    pub residual: f64,
    pub top_states: Vec<(String, f64)>,
    pub alerts: Vec<Uuid>,
}

/// Run the full pipeline over the stored event population.
///
/// 1. Load events and derive session-grouped transitions.
/// 2. Accumulate the sparse matrix and solve for the equilibrium.
/// 3. Persist an `analysis_runs` snapshot (also on non-convergence).
/// 4. Route concentration and drift-vs-previous-snapshot signals through the
///    alert engine.
pub async fn run_analysis(pool: &Pool, config: &Config) -> Result<AnalysisOutcome> {
    let pool = pool.clone();
    let config = config.clone();
    tokio::task::spawn_blocking(move || run_analysis_blocking(&pool, &config)).await?
}

fn run_analysis_blocking(pool: &Pool, config: &Config) -> Result<AnalysisOutcome> {
    let strategy = config.strategy()?;
    let events = storage::load_events(pool)?;
    info!(events = events.len(), %strategy, "starting analysis run");

    let pairs = transitions(&events, strategy, config.session_gap());
    let matrix = TransitionMatrix::from_transitions(&pairs);
    let previous = storage::latest_analysis_run(pool, &strategy.to_string())?;

    let equilibrium = match stationary(&matrix, &config.solver_options()) {
        Ok(eq) => eq,
        Err(ChainError::EmptyChain) => {
            anyhow::bail!("no transitions observed; ingest events before analyzing")
        }
        Err(ChainError::NotConverged {
            iterations,
            residual,
            tolerance,
        }) => {
            // Reportable condition, not a crash: persist the failed run so the
            // audit trail shows the solver hit its cap.
            warn!(iterations, residual, tolerance, "equilibrium did not converge");
            let run_id = storage::save_analysis_run(
                pool,
                &strategy.to_string(),
                events.len() as u64,
                matrix.state_count(),
                matrix.transition_count(),
                matrix.observations(),
                iterations,
                false,
                residual,
                &Default::default(),
            )?;
            return Ok(AnalysisOutcome {
                run_id,
                event_count: events.len() as u64,
                state_count: matrix.state_count(),
                transition_count: matrix.transition_count(),
                observations: matrix.observations(),
                converged: false,
                iterations,
                residual,
                top_states: Vec::new(),
                alerts: Vec::new(),
            });
        }
    };

    let distribution = equilibrium.by_label(&matrix);
    let run_id = storage::save_analysis_run(
        pool,
        &strategy.to_string(),
        events.len() as u64,
        matrix.state_count(),
        matrix.transition_count(),
        matrix.observations(),
        equilibrium.iterations,
        true,
        equilibrium.residual,
        &distribution,
    )?;

    let engine = AlertEngine::new(config.alert_thresholds());
    let manager = AlertManager::new(pool.clone());
    let mut alerts = Vec::new();

    if let Some(signal) = engine.evaluate_concentration(&matrix, &equilibrium) {
        alerts.push(manager.record(&signal)?);
    }
    if let Some(prev) = previous.filter(|p| p.converged && !p.stationary.is_empty()) {
        if let Some(signal) = engine.evaluate_drift(&prev.stationary, &distribution) {
            alerts.push(manager.record(&signal)?);
        }
    }

    info!(
        run_id,
        states = matrix.state_count(),
        iterations = equilibrium.iterations,
        alerts = alerts.len(),
        "analysis run complete"
    );

    Ok(AnalysisOutcome {
        run_id,
        event_count: events.len() as u64,
        state_count: matrix.state_count(),
        transition_count: matrix.transition_count(),
        observations: matrix.observations(),
        converged: true,
        iterations: equilibrium.iterations,
        residual: equilibrium.residual,
        top_states: equilibrium.top_states(&matrix, 10),
        alerts,
    })
}

/// Run a stored scenario against a freshly computed baseline, persist the
/// result, and raise an alert when the shift crosses the thresholds.
pub async fn run_stored_scenario(
    pool: &Pool,
    config: &Config,
    name: &str,
) -> Result<PerturbationReport> {
    let scenario = storage::get_scenario(pool, name)?
        .with_context(|| format!("scenario '{}' not found", name))?;
    run_adhoc_scenario(pool, config, scenario).await
}

/// Run an in-memory scenario definition against a fresh baseline.
pub async fn run_adhoc_scenario(
    pool: &Pool,
    config: &Config,
    scenario: Scenario,
) -> Result<PerturbationReport> {
    let pool = pool.clone();
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let strategy = config.strategy()?;
        let events = storage::load_events(&pool)?;

        let pairs = transitions(&events, strategy, config.session_gap());
        let matrix = TransitionMatrix::from_transitions(&pairs);
        let baseline = stationary(&matrix, &config.solver_options())
            .context("baseline equilibrium failed; analyze first to confirm convergence")?;

        let report = run_scenario(
            &events,
            &matrix,
            &baseline,
            &scenario,
            strategy,
            config.session_gap(),
            &config.solver_options(),
            &config.perturb_options(),
        )?;

        storage::save_perturbation_result(&pool, &report)?;

        let engine = AlertEngine::new(config.alert_thresholds());
        if let Some(signal) = engine.evaluate_perturbation(&report) {
            AlertManager::new(pool.clone()).record(&signal)?;
        }

        info!(
            scenario = %report.scenario,
            kl = report.kl_divergence,
            tvd = report.total_variation,
            radius = report.impact_radius,
            "perturbation scenario complete"
        );
        Ok(report)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Event;
    use chrono::{TimeZone, Utc};

    fn test_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pipeline.db");
        let pool = storage::open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn event(actor: &str, entity: &str, action: &str, minute: u32) -> Event {
        Event {
            id: uuid::Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 14, minute, 0).unwrap(),
            actor_id: actor.to_string(),
            entity_id: entity.to_string(),
            action: action.to_string(),
            context: None,
        }
    }

    fn seed_events(pool: &Pool) {
        let events = vec![
            event("alice", "l1", "view", 0),
            event("alice", "l1", "bid", 1),
            event("alice", "l1", "purchase", 2),
            event("bob", "l1", "view", 0),
            event("bob", "l1", "bid", 3),
            event("carol", "l2", "view", 1),
            event("carol", "l2", "bid", 2),
            event("carol", "l1", "view", 4),
        ];
        storage::save_events(pool, &events).unwrap();
    }

    #[tokio::test]
    async fn test_analysis_persists_snapshot() -> Result<()> {
        let (_dir, pool) = test_pool();
        seed_events(&pool);

        let config = Config::default();
        let outcome = run_analysis(&pool, &config).await?;
        assert!(outcome.converged);
        assert!(outcome.state_count > 0);
        assert!(!outcome.top_states.is_empty());

        let run = storage::latest_analysis_run(&pool, "entity-action")?.expect("snapshot stored");
        assert_eq!(run.id, outcome.run_id);
        let total: f64 = run.stationary.values().sum();
        assert!((total - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn test_analysis_without_events_fails_cleanly() {
        let (_dir, pool) = test_pool();
        let config = Config::default();
        let err = run_analysis(&pool, &config).await.unwrap_err();
        assert!(err.to_string().contains("no transitions"));
    }

    #[tokio::test]
    async fn test_nonconvergence_is_recorded_not_fatal() -> Result<()> {
        let (_dir, pool) = test_pool();
        seed_events(&pool);

        let mut config = Config::default();
        config.solver.damping = 1.0;
        config.solver.tolerance = 1e-15;
        config.solver.max_iterations = 1;

        let outcome = run_analysis(&pool, &config).await?;
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.alerts.is_empty());

        let run = storage::latest_analysis_run(&pool, "entity-action")?.unwrap();
        assert!(!run.converged);
        Ok(())
    }

    #[tokio::test]
    async fn test_stored_scenario_runs_end_to_end() -> Result<()> {
        let (_dir, pool) = test_pool();
        seed_events(&pool);

        let scenario = Scenario {
            name: "drop-carol".to_string(),
            excluded_actors: vec!["carol".to_string()],
            excluded_entities: vec![],
        };
        storage::save_scenario(&pool, &scenario)?;

        let config = Config::default();
        let report = run_stored_scenario(&pool, &config, "drop-carol").await?;
        assert_eq!(report.removed_events, 3);
        assert!(report.kl_divergence > 0.0);

        let missing = run_stored_scenario(&pool, &config, "nope").await;
        assert!(missing.is_err());
        Ok(())
    }
}
