//! Synthetic marketplace event streams for demos and soak data.
//!
//! The honest population browses listings in short view/bid/purchase
//! sessions. An optional wash ring adds a small clique of actors trading the
//! same few listings in a tight cycle, which is the flow pattern the detector
//! is meant to surface.

use crate::ingest::Event;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WashRing {
    /// Actors in the ring.
    pub actors: usize,
    /// Listings the ring cycles through.
    pub entities: usize,
    /// Full cycles each ring actor performs.
    pub rounds: usize,
}

impl Default for WashRing {
    fn default() -> Self {
        Self {
            actors: 3,
            entities: 3,
            rounds: 40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub actors: usize,
    pub entities: usize,
    /// Honest browsing sessions to generate.
    pub sessions: usize,
    pub wash_ring: Option<WashRing>,
    /// Fixed seed for reproducible streams.
    pub seed: Option<u64>,
    pub start: DateTime<Utc>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            actors: 40,
            entities: 25,
            sessions: 300,
            wash_ring: None,
            seed: None,
            start: Utc::now() - Duration::hours(24),
        }
    }
}

/// Generate a synthetic event stream. Deterministic for a fixed seed.
pub fn generate(options: &SimOptions) -> Vec<Event> {
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut events = Vec::new();

    // Honest browsing: view, sometimes bid, rarely purchase.
    for _ in 0..options.sessions {
        let actor = format!("user-{}", rng.gen_range(0..options.actors.max(1)));
        let entity = format!("listing-{}", rng.gen_range(0..options.entities.max(1)));
        let mut at = options.start + Duration::seconds(rng.gen_range(0..86_400));

        events.push(make_event(&actor, &entity, "view", at));
        if rng.gen_bool(0.6) {
            at += Duration::seconds(rng.gen_range(20..120));
            events.push(make_event(&actor, &entity, "bid", at));
            if rng.gen_bool(0.3) {
                at += Duration::seconds(rng.gen_range(20..120));
                events.push(make_event(&actor, &entity, "purchase", at));
            }
        }
        // Some sessions wander to a second listing.
        if rng.gen_bool(0.4) {
            let other = format!("listing-{}", rng.gen_range(0..options.entities.max(1)));
            at += Duration::seconds(rng.gen_range(30..300));
            events.push(make_event(&actor, &other, "view", at));
        }
    }

    if let Some(ring) = &options.wash_ring {
        let ring_entities: Vec<String> = (0..ring.entities.max(1))
            .map(|i| format!("listing-wash-{}", i))
            .collect();

        for a in 0..ring.actors.max(1) {
            let actor = format!("wash-{}", a);
            let mut at = options.start + Duration::seconds(rng.gen_range(0..3_600));
            for round in 0..ring.rounds {
                for entity in &ring_entities {
                    // Tight cadence keeps the whole cycle in one session.
                    at += Duration::seconds(rng.gen_range(30..90));
                    let action = if round % 2 == 0 { "bid" } else { "purchase" };
                    events.push(make_event(&actor, entity, action, at));
                }
            }
        }
    }

    events.sort_by_key(|e| e.timestamp);
    events
}

fn make_event(actor: &str, entity: &str, action: &str, at: DateTime<Utc>) -> Event {
    Event {
        id: Uuid::new_v4(),
        timestamp: at,
        actor_id: actor.to_string(),
        entity_id: entity.to_string(),
        action: action.to_string(),
        context: None,
    }
}

/// Write an event stream as JSON lines, one canonical record per line.
pub fn write_jsonl(events: &[Event], path: &Path) -> Result<()> {
    use std::io::Write;

    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create output file: {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
