//! JSON-lines event source -- one canonical event record per line.

use crate::ingest::{normalize, EventRecord, EventSource};
use crate::storage::{self, Pool};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{info, warn};

pub struct JsonlSource {
    lines: Lines<BufReader<File>>,
    line_no: u64,
    rejected: u64,
}

impl JsonlSource {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open event file: {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
            rejected: 0,
        })
    }

    /// Lines that failed to parse so far. Bad lines are skipped, not fatal.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[async_trait::async_trait]
impl EventSource for JsonlSource {
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<EventRecord>>> {
        let mut batch = Vec::with_capacity(max);

        while batch.len() < max {
            match self.lines.next_line().await? {
                Some(line) => {
                    self.line_no += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventRecord>(trimmed) {
                        Ok(record) => batch.push(record),
                        Err(e) => {
                            self.rejected += 1;
                            warn!(line = self.line_no, error = %e, "skipping malformed event record");
                        }
                    }
                }
                None => break,
            }
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// Outcome of a bulk file ingestion.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub accepted: u64,
    pub rejected: u64,
}

/// Read a JSONL event file and persist every record that validates.
pub async fn ingest_file(pool: &Pool, path: &Path) -> Result<IngestSummary> {
    let mut source = JsonlSource::open(path).await?;
    let mut accepted = 0u64;
    let mut invalid = 0u64;

    while let Some(batch) = source.next_batch(512).await? {
        let mut events = Vec::with_capacity(batch.len());
        for record in batch {
            match normalize(record) {
                Ok(event) => events.push(event),
                Err(e) => {
                    invalid += 1;
                    warn!(error = %e, "rejecting invalid event record");
                }
            }
        }
        accepted += events.len() as u64;
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || storage::save_events(&pool, &events)).await??;
    }

    let rejected = source.rejected() + invalid;
    info!(path = %path.display(), accepted, rejected, "event file ingested");
    Ok(IngestSummary { accepted, rejected })
}
