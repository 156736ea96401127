//! SQLite storage layer -- schema, queries, migrations.

pub mod schema;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

use crate::ingest::Event;
use chrono::{DateTime, Utc};
use rusqlite::params;
use std::collections::HashMap;
use uuid::Uuid;

/// Save one event. Duplicate event ids are ignored (events are immutable).
pub fn save_event(pool: &Pool, event: &Event) -> Result<()> {
    let conn = pool.get()?;
    insert_event(&conn, event)?;
    Ok(())
}

/// Save a batch of events inside one transaction.
pub fn save_events(pool: &Pool, events: &[Event]) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    for event in events {
        insert_event(&tx, event)?;
    }
    tx.commit()?;
    Ok(())
}

fn insert_event(conn: &rusqlite::Connection, event: &Event) -> Result<()> {
    let context_json = event
        .context
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT OR IGNORE INTO events (event_id, timestamp, actor_id, entity_id, action, context_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.id.to_string(),
            event.timestamp.to_rfc3339(),
            event.actor_id,
            event.entity_id,
            event.action,
            context_json,
        ],
    )?;
    Ok(())
}

/// Load the full event population, oldest first.
pub fn load_events(pool: &Pool) -> Result<Vec<Event>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, actor_id, entity_id, action, context_json
         FROM events ORDER BY timestamp ASC, id ASC",
    )?;

    let rows = stmt.query_map([], |row| {
        let event_id: String = row.get(0)?;
        let timestamp: String = row.get(1)?;
        let context_json: Option<String> = row.get(5)?;
        Ok((
            event_id,
            timestamp,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            context_json,
        ))
    })?;

    let mut events = Vec::new();
    for r in rows {
        let (event_id, timestamp, actor_id, entity_id, action, context_json) = r?;
        let id = Uuid::parse_str(&event_id)
            .with_context(|| format!("corrupt event_id in events table: {}", event_id))?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .with_context(|| format!("corrupt timestamp in events table: {}", timestamp))?
            .with_timezone(&Utc);
        let context = context_json
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .context("corrupt context_json in events table")?;

        events.push(Event {
            id,
            timestamp,
            actor_id,
            entity_id,
            action,
            context,
        });
    }
    Ok(events)
}

pub fn count_events(pool: &Pool) -> Result<u64> {
    let conn = pool.get()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// A stored snapshot of one full analysis pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisRun {
    pub id: i64,
    pub strategy: String,
    pub event_count: u64,
    pub state_count: usize,
    pub transition_count: usize,
    pub observations: u64,
    pub iterations: u32,
    pub converged: bool,
    pub residual: f64,
    pub stationary: HashMap<String, f64>,
    pub created_at: String,
}

#[allow(clippy::too_many_arguments)]
pub fn save_analysis_run(
    pool: &Pool,
    strategy: &str,
    event_count: u64,
    state_count: usize,
    transition_count: usize,
    observations: u64,
    iterations: u32,
    converged: bool,
    residual: f64,
    stationary: &HashMap<String, f64>,
) -> Result<i64> {
    let conn = pool.get()?;
    let stationary_json = serde_json::to_string(stationary)?;
    conn.execute(
        "INSERT INTO analysis_runs
            (strategy, event_count, state_count, transition_count, observations,
             iterations, converged, residual, stationary_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            strategy,
            event_count as i64,
            state_count as i64,
            transition_count as i64,
            observations as i64,
            iterations as i64,
            converged as i64,
            residual,
            stationary_json,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent analysis snapshot for a strategy, if any.
pub fn latest_analysis_run(pool: &Pool, strategy: &str) -> Result<Option<AnalysisRun>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, strategy, event_count, state_count, transition_count, observations,
                iterations, converged, residual, stationary_json, created_at
         FROM analysis_runs WHERE strategy = ?1
         ORDER BY id DESC LIMIT 1",
    )?;

    let mut rows = stmt.query_map(params![strategy], |row| {
        let stationary_json: String = row.get(9)?;
        Ok(AnalysisRun {
            id: row.get(0)?,
            strategy: row.get(1)?,
            event_count: row.get::<_, i64>(2)? as u64,
            state_count: row.get::<_, i64>(3)? as usize,
            transition_count: row.get::<_, i64>(4)? as usize,
            observations: row.get::<_, i64>(5)? as u64,
            iterations: row.get::<_, i64>(6)? as u32,
            converged: row.get::<_, i64>(7)? != 0,
            residual: row.get(8)?,
            stationary: serde_json::from_str(&stationary_json).unwrap_or_default(),
            created_at: row.get(10)?,
        })
    })?;

    match rows.next() {
        Some(run) => Ok(Some(run?)),
        None => Ok(None),
    }
}

use crate::perturb::{PerturbationReport, Scenario};

/// Store a named scenario. The name must be unique.
pub fn save_scenario(pool: &Pool, scenario: &Scenario) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO scenarios (name, excluded_actors_json, excluded_entities_json)
         VALUES (?1, ?2, ?3)",
        params![
            scenario.name,
            serde_json::to_string(&scenario.excluded_actors)?,
            serde_json::to_string(&scenario.excluded_entities)?,
        ],
    )
    .with_context(|| format!("failed to insert scenario '{}'", scenario.name))?;
    Ok(())
}

pub fn get_scenario(pool: &Pool, name: &str) -> Result<Option<Scenario>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT name, excluded_actors_json, excluded_entities_json FROM scenarios WHERE name = ?1",
    )?;
    let mut rows = stmt.query_map(params![name], scenario_from_row)?;
    match rows.next() {
        Some(s) => Ok(Some(s?)),
        None => Ok(None),
    }
}

pub fn list_scenarios(pool: &Pool) -> Result<Vec<Scenario>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT name, excluded_actors_json, excluded_entities_json FROM scenarios ORDER BY name",
    )?;
    let rows = stmt.query_map([], scenario_from_row)?;
    let mut scenarios = Vec::new();
    for r in rows {
        scenarios.push(r?);
    }
    Ok(scenarios)
}

fn scenario_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Scenario> {
    let actors_json: String = row.get(1)?;
    let entities_json: String = row.get(2)?;
    Ok(Scenario {
        name: row.get(0)?,
        excluded_actors: serde_json::from_str(&actors_json).unwrap_or_default(),
        excluded_entities: serde_json::from_str(&entities_json).unwrap_or_default(),
    })
}

pub fn save_perturbation_result(pool: &Pool, report: &PerturbationReport) -> Result<i64> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO perturbation_results
            (scenario, kl_divergence, total_variation, impact_radius, removed_events, report_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            report.scenario,
            report.kl_divergence,
            report.total_variation,
            report.impact_radius as i64,
            report.removed_events as i64,
            serde_json::to_string(report)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("storage.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn event(actor: &str, minute: u32) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 12, minute, 0).unwrap(),
            actor_id: actor.to_string(),
            entity_id: "listing-1".to_string(),
            action: "view".to_string(),
            context: Some(serde_json::json!({ "seller_id": "dana" })),
        }
    }

    #[test]
    fn test_event_roundtrip() -> Result<()> {
        let (_dir, pool) = test_pool();

        let original = event("alice", 3);
        save_event(&pool, &original)?;

        let loaded = load_events(&pool)?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, original.id);
        assert_eq!(loaded[0].timestamp, original.timestamp);
        assert_eq!(loaded[0].actor_id, "alice");
        assert_eq!(loaded[0].context, original.context);
        Ok(())
    }

    #[test]
    fn test_duplicate_event_id_is_ignored() -> Result<()> {
        let (_dir, pool) = test_pool();
        let e = event("alice", 1);
        save_event(&pool, &e)?;
        save_event(&pool, &e)?;
        assert_eq!(count_events(&pool)?, 1);
        Ok(())
    }

    #[test]
    fn test_batch_save_and_ordering() -> Result<()> {
        let (_dir, pool) = test_pool();
        let events = vec![event("alice", 9), event("bob", 2), event("carol", 5)];
        save_events(&pool, &events)?;

        let loaded = load_events(&pool)?;
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].actor_id, "bob");
        assert_eq!(loaded[2].actor_id, "alice");
        Ok(())
    }

    #[test]
    fn test_analysis_run_roundtrip() -> Result<()> {
        let (_dir, pool) = test_pool();

        let mut stationary = HashMap::new();
        stationary.insert("l1:view".to_string(), 0.6);
        stationary.insert("l1:bid".to_string(), 0.4);

        let id = save_analysis_run(&pool, "entity-action", 100, 2, 2, 99, 37, true, 1e-10, &stationary)?;
        assert!(id > 0);

        let run = latest_analysis_run(&pool, "entity-action")?.expect("run should exist");
        assert_eq!(run.id, id);
        assert_eq!(run.state_count, 2);
        assert!(run.converged);
        assert_eq!(run.stationary.get("l1:view"), Some(&0.6));

        // Different strategy has no snapshot.
        assert!(latest_analysis_run(&pool, "action-only")?.is_none());
        Ok(())
    }

    #[test]
    fn test_scenario_roundtrip() -> Result<()> {
        let (_dir, pool) = test_pool();
        let scenario = Scenario {
            name: "wash-ring".to_string(),
            excluded_actors: vec!["w1".into(), "w2".into()],
            excluded_entities: vec![],
        };
        save_scenario(&pool, &scenario)?;

        let loaded = get_scenario(&pool, "wash-ring")?.expect("scenario should exist");
        assert_eq!(loaded.excluded_actors, vec!["w1", "w2"]);
        assert!(get_scenario(&pool, "missing")?.is_none());
        assert_eq!(list_scenarios(&pool)?.len(), 1);

        // Duplicate names are rejected.
        assert!(save_scenario(&pool, &scenario).is_err());
        Ok(())
    }
}
