//! Recurring analysis scheduling -- cron expressions persisted in SQLite.
//!
//! Tasks are either `analyze` (full pipeline run) or `scenario:<name>`
//! (perturbation run of a stored scenario).

use crate::config::Config;
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

/// A scheduler that persists tasks in SQLite and checks for runnable tasks.
#[derive(Clone)]
pub struct Scheduler {
    pool: Pool,
}

impl Scheduler {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Add a new schedule to the database.
    pub async fn add_schedule(&self, name: &str, cron_expr: &str, task: &str) -> Result<()> {
        let _ = CronSchedule::from_str(cron_expr)
            .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", cron_expr, e))?;
        validate_task(task)?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO schedules (name, cron_expr, task, enabled) VALUES (?1, ?2, ?3, 1)",
            rusqlite::params![name, cron_expr, task],
        )
        .context("Failed to insert schedule")?;

        Ok(())
    }

    /// List all schedules as (name, cron, task, enabled).
    pub async fn list(&self) -> Result<Vec<(String, String, String, bool)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT name, cron_expr, task, enabled FROM schedules")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)? != 0,
            ))
        })?;

        let mut list = Vec::new();
        for r in rows {
            list.push(r?);
        }
        Ok(list)
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "DELETE FROM schedules WHERE name = ?1",
            rusqlite::params![name],
        )?;
        if changed == 0 {
            anyhow::bail!("Schedule '{}' not found", name);
        }
        Ok(())
    }

    /// Calculate next run times for all enabled schedules.
    /// This is strictly a dry-run preview, not the execution loop.
    pub async fn preview_next_runs(&self, hours: u64) -> Result<Vec<(String, String, String)>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT name, cron_expr, task FROM schedules WHERE enabled = 1")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let now = Utc::now();
        let end = now + chrono::Duration::hours(hours as i64);
        let mut preview = Vec::new();

        for r in rows {
            let (name, cron_expr, task) = r?;
            if let Ok(schedule) = CronSchedule::from_str(&cron_expr) {
                for next_time in schedule.after(&now) {
                    if next_time > end {
                        break;
                    }
                    preview.push((next_time.to_rfc3339(), name.clone(), task.clone()));
                }
            }
        }

        preview.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(preview)
    }

    /// Schedules whose next occurrence after their last run is already in the
    /// past. Returns (name, task).
    pub async fn check_due_tasks(&self) -> Result<Vec<(String, String)>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT name, cron_expr, task, last_run_at, created_at
             FROM schedules WHERE enabled = 1",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let now = Utc::now();
        let mut due = Vec::new();

        for r in rows {
            let (name, cron_expr, task, last_run_at, created_at) = r?;
            let schedule = match CronSchedule::from_str(&cron_expr) {
                Ok(s) => s,
                Err(e) => {
                    warn!(schedule = %name, error = %e, "skipping schedule with bad cron expression");
                    continue;
                }
            };

            let anchor = last_run_at
                .as_deref()
                .or(Some(created_at.as_str()))
                .and_then(parse_stored_datetime)
                .unwrap_or(now);

            if let Some(next) = schedule.after(&anchor).next() {
                if next <= now {
                    due.push((name, task));
                }
            }
        }

        Ok(due)
    }

    /// Mark a schedule as run. Called BEFORE execution to prevent
    /// double-scheduling.
    pub async fn update_last_run(&self, name: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE schedules SET last_run_at = ?1, updated_at = ?1 WHERE name = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), name],
        )?;
        Ok(())
    }

    /// Append one execution record to the history table.
    pub fn record_history(
        &self,
        name: &str,
        status: &str,
        summary: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO schedule_history (schedule_name, status, result_summary, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                name,
                status,
                summary,
                started_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn validate_task(task: &str) -> Result<()> {
    if task == "analyze" {
        return Ok(());
    }
    if let Some(name) = task.strip_prefix("scenario:") {
        if !name.is_empty() {
            return Ok(());
        }
    }
    anyhow::bail!("Invalid task '{}'. Expected 'analyze' or 'scenario:<name>'", task)
}

fn parse_stored_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Main scheduler execution loop.
/// Polls for due schedules every 30 seconds and runs them in the background.
pub async fn run_scheduler_loop(scheduler: Scheduler, config: Config) {
    info!("Scheduler engine started");

    let mut interval = tokio::time::interval(Duration::from_secs(30));

    loop {
        interval.tick().await;

        let due = match scheduler.check_due_tasks().await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to check due tasks: {}", e);
                continue;
            }
        };

        for (name, task) in due {
            info!(schedule = %name, task = %task, "Task due");

            let scheduler = scheduler.clone();
            let config = config.clone();

            tokio::spawn(async move {
                // Mark as run BEFORE execution to prevent double-scheduling
                if let Err(e) = scheduler.update_last_run(&name).await {
                    error!(schedule = %name, "Failed to update last_run: {}", e);
                    return;
                }

                let started_at = Utc::now();
                let result = execute_task(&scheduler, &config, &task).await;

                let (status, summary) = match &result {
                    Ok(summary) => ("Success", Some(summary.as_str())),
                    Err(e) => {
                        error!(schedule = %name, task = %task, "Scheduled task failed: {}", e);
                        ("Failed", None)
                    }
                };
                if let Err(e) = scheduler.record_history(&name, status, summary, started_at) {
                    error!(schedule = %name, "Failed to record history: {}", e);
                }
            });
        }
    }
}

async fn execute_task(scheduler: &Scheduler, config: &Config, task: &str) -> Result<String> {
    if task == "analyze" {
        let outcome = crate::pipeline::run_analysis(scheduler.pool(), config).await?;
        return Ok(format!(
            "run {} states={} converged={}",
            outcome.run_id, outcome.state_count, outcome.converged
        ));
    }

    if let Some(name) = task.strip_prefix("scenario:") {
        let report = crate::pipeline::run_stored_scenario(scheduler.pool(), config, name).await?;
        return Ok(format!(
            "scenario {} kl={:.4} tvd={:.4}",
            report.scenario, report.kl_divergence, report.total_variation
        ));
    }

    anyhow::bail!("Unknown task '{}'", task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage;

    fn test_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sched.db");
        let pool = storage::open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_add_list_remove() -> Result<()> {
        let (_dir, pool) = test_pool();
        let scheduler = Scheduler::new(pool);

        scheduler.add_schedule("hourly", "0 0 * * * *", "analyze").await?;
        let list = scheduler.list().await?;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].0, "hourly");
        assert!(list[0].3);

        scheduler.remove("hourly").await?;
        assert!(scheduler.list().await?.is_empty());
        assert!(scheduler.remove("hourly").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_cron_is_rejected() {
        let (_dir, pool) = test_pool();
        let scheduler = Scheduler::new(pool);
        assert!(scheduler.add_schedule("x", "not cron", "analyze").await.is_err());
    }

    #[tokio::test]
    async fn test_bad_task_is_rejected() {
        let (_dir, pool) = test_pool();
        let scheduler = Scheduler::new(pool);
        assert!(scheduler
            .add_schedule("x", "0 0 * * * *", "frobnicate")
            .await
            .is_err());
        assert!(scheduler
            .add_schedule("x", "0 0 * * * *", "scenario:")
            .await
            .is_err());
        assert!(scheduler
            .add_schedule("x", "0 0 * * * *", "scenario:wash-ring")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_every_second_schedule_is_due() -> Result<()> {
        let (_dir, pool) = test_pool();
        let scheduler = Scheduler::new(pool.clone());

        scheduler.add_schedule("tick", "* * * * * *", "analyze").await?;

        // Anchor last_run two seconds back so the next occurrence is past.
        let past = (Utc::now() - chrono::Duration::seconds(2)).to_rfc3339();
        let conn = pool.get()?;
        conn.execute(
            "UPDATE schedules SET last_run_at = ?1 WHERE name = 'tick'",
            rusqlite::params![past],
        )?;

        let due = scheduler.check_due_tasks().await?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, "tick");

        scheduler.update_last_run("tick").await?;
        let due_after = scheduler.check_due_tasks().await?;
        assert!(due_after.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_preview_orders_by_time() -> Result<()> {
        let (_dir, pool) = test_pool();
        let scheduler = Scheduler::new(pool);

        scheduler.add_schedule("a", "0 0 * * * *", "analyze").await?;
        scheduler.add_schedule("b", "0 30 * * * *", "analyze").await?;

        let preview = scheduler.preview_next_runs(2).await?;
        assert!(!preview.is_empty());
        let times: Vec<&String> = preview.iter().map(|(t, _, _)| t).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        Ok(())
    }
}
