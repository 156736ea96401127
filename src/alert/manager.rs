use crate::alert::{Alert, Severity, Signal};
use crate::storage::Pool;
use anyhow::Result;
use rusqlite::params;
use uuid::Uuid;

/// Persists scored alerts and serves the audit trail.
pub struct AlertManager {
    pool: Pool,
}

impl AlertManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn record(&self, signal: &Signal) -> Result<Uuid> {
        let conn = self.pool.get()?;
        let id = Uuid::new_v4();
        let severity_str = format!("{:?}", signal.severity); // Info, Warning, Critical
        let evidence_json = serde_json::to_string(&signal.evidence)?;

        conn.execute(
            "INSERT INTO alerts (id, severity, verdict, score, evidence_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'Open', datetime('now'))",
            params![id.to_string(), severity_str, signal.verdict, signal.score, evidence_json],
        )?;

        tracing::info!(alert = %id, verdict = %signal.verdict, score = signal.score, "alert recorded");
        Ok(id)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, severity, verdict, score, evidence_json, status, created_at
             FROM alerts ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id_str: String = row.get(0)?;
            let sev_str: String = row.get(1)?;
            let severity = match sev_str.as_str() {
                "Critical" => Severity::Critical,
                "Warning" => Severity::Warning,
                _ => Severity::Info,
            };
            let evidence_str: String = row.get(4)?;
            let created_str: String = row.get(6)?;

            Ok(Alert {
                id: Uuid::parse_str(&id_str).unwrap_or_default(),
                severity,
                verdict: row.get(2)?,
                score: row.get(3)?,
                evidence: serde_json::from_str(&evidence_str).unwrap_or_default(),
                status: row.get(5)?,
                created_at: parse_sqlite_datetime(&created_str),
            })
        })?;

        let mut alerts = Vec::new();
        for r in rows {
            alerts.push(r?);
        }
        Ok(alerts)
    }
}

/// SQLite `datetime('now')` emits `YYYY-MM-DD HH:MM:SS` (UTC, no offset);
/// accept RFC 3339 too for rows written by other paths.
fn parse_sqlite_datetime(s: &str) -> chrono::DateTime<chrono::Utc> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&chrono::Utc);
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}
