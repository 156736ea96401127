//! State derivation -- maps events to discrete Markov states.
//!
//! The strategy decides how much of the event collapses into the state label.
//! Swapping strategies changes the granularity of the chain without touching
//! ingestion or the matrix/solver downstream.

use crate::ingest::Event;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How an event is collapsed into a discrete state label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateStrategy {
    /// `<entity>:<action>` -- per-listing behavior (default).
    EntityAction,
    /// `<seller>:<action>` -- flows aggregated per seller.
    SellerAction,
    /// `<action>` -- global action flow, coarsest view.
    ActionOnly,
    /// `<entity>:<action>:<stage>` -- adds early/mid/late session position.
    EntityActionStage,
}

impl StateStrategy {
    fn needs_stage(self) -> bool {
        matches!(self, StateStrategy::EntityActionStage)
    }
}

impl std::fmt::Display for StateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StateStrategy::EntityAction => "entity-action",
            StateStrategy::SellerAction => "seller-action",
            StateStrategy::ActionOnly => "action-only",
            StateStrategy::EntityActionStage => "entity-action-stage",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StateStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entity-action" => Ok(StateStrategy::EntityAction),
            "seller-action" => Ok(StateStrategy::SellerAction),
            "action-only" => Ok(StateStrategy::ActionOnly),
            "entity-action-stage" => Ok(StateStrategy::EntityActionStage),
            other => anyhow::bail!(
                "unknown state strategy '{}' (expected entity-action, seller-action, action-only or entity-action-stage)",
                other
            ),
        }
    }
}

/// Position of an event within its session, by thirds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Early,
    Mid,
    Late,
}

impl SessionStage {
    fn of(position: usize, session_len: usize) -> Self {
        debug_assert!(session_len > 0 && position < session_len);
        match (3 * position) / session_len {
            0 => SessionStage::Early,
            1 => SessionStage::Mid,
            _ => SessionStage::Late,
        }
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStage::Early => "early",
            SessionStage::Mid => "mid",
            SessionStage::Late => "late",
        };
        write!(f, "{}", s)
    }
}

/// Derive the state label for one event. Deterministic and pure.
///
/// `stage` is only consulted by stage-aware strategies; callers that know the
/// session layout pass it, everyone else passes `None`.
pub fn state_label(event: &Event, strategy: StateStrategy, stage: Option<SessionStage>) -> String {
    match strategy {
        StateStrategy::EntityAction => format!("{}:{}", event.entity_id, event.action),
        StateStrategy::SellerAction => format!("{}:{}", event.seller_id(), event.action),
        StateStrategy::ActionOnly => event.action.clone(),
        StateStrategy::EntityActionStage => {
            let stage = stage.unwrap_or(SessionStage::Early);
            format!("{}:{}:{}", event.entity_id, event.action, stage)
        }
    }
}

/// Split an actor-ordered event stream into sessions.
///
/// Events are grouped per actor and ordered by timestamp; a session breaks
/// once the idle gap between consecutive events exceeds `idle_gap`.
pub fn sessionize(events: &[Event], idle_gap: Duration) -> Vec<Vec<&Event>> {
    use std::collections::HashMap;

    let mut per_actor: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        per_actor.entry(&event.actor_id).or_default().push(event);
    }

    // Deterministic output order regardless of hash iteration.
    let mut actors: Vec<&str> = per_actor.keys().copied().collect();
    actors.sort_unstable();

    let mut sessions = Vec::new();
    for actor in actors {
        let mut stream = per_actor.remove(actor).unwrap_or_default();
        stream.sort_by_key(|e| e.timestamp);

        let mut current: Vec<&Event> = Vec::new();
        for event in stream {
            if let Some(last) = current.last() {
                if event.timestamp - last.timestamp > idle_gap {
                    sessions.push(std::mem::take(&mut current));
                }
            }
            current.push(event);
        }
        if !current.is_empty() {
            sessions.push(current);
        }
    }

    sessions
}

/// Derive session-grouped `(state, next-state)` observations from an event
/// population. Transitions never cross session boundaries.
pub fn transitions(
    events: &[Event],
    strategy: StateStrategy,
    idle_gap: Duration,
) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    for session in sessionize(events, idle_gap) {
        let len = session.len();
        let labels: Vec<String> = session
            .iter()
            .enumerate()
            .map(|(pos, event)| {
                let stage = strategy
                    .needs_stage()
                    .then(|| SessionStage::of(pos, len));
                state_label(event, strategy, stage)
            })
            .collect();

        for window in labels.windows(2) {
            pairs.push((window[0].clone(), window[1].clone()));
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn event(actor: &str, entity: &str, action: &str, minute: u32) -> Event {
        Event {
            id: Uuid::new_v4(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 10, minute, 0).unwrap(),
            actor_id: actor.to_string(),
            entity_id: entity.to_string(),
            action: action.to_string(),
            context: None,
        }
    }

    #[test]
    fn test_state_label_strategies() {
        let e = event("alice", "listing-7", "bid", 0);
        assert_eq!(state_label(&e, StateStrategy::EntityAction, None), "listing-7:bid");
        assert_eq!(state_label(&e, StateStrategy::ActionOnly, None), "bid");
        assert_eq!(
            state_label(&e, StateStrategy::EntityActionStage, Some(SessionStage::Late)),
            "listing-7:bid:late"
        );
    }

    #[test]
    fn test_state_label_is_deterministic() {
        let e = event("alice", "listing-7", "bid", 0);
        let a = state_label(&e, StateStrategy::EntityAction, None);
        let b = state_label(&e, StateStrategy::EntityAction, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sessionize_splits_on_idle_gap() {
        // alice: 10:00, 10:05, then 10:50 -- gap of 45m breaks the session
        let events = vec![
            event("alice", "l1", "view", 0),
            event("alice", "l1", "bid", 5),
            event("alice", "l2", "view", 50),
            event("bob", "l1", "view", 2),
        ];
        let sessions = sessionize(&events, Duration::minutes(30));
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].len(), 2); // alice session 1
        assert_eq!(sessions[1].len(), 1); // alice session 2
        assert_eq!(sessions[2].len(), 1); // bob
    }

    #[test]
    fn test_transitions_do_not_cross_sessions() {
        let events = vec![
            event("alice", "l1", "view", 0),
            event("alice", "l1", "bid", 5),
            event("alice", "l2", "view", 50),
        ];
        let pairs = transitions(&events, StateStrategy::EntityAction, Duration::minutes(30));
        assert_eq!(pairs, vec![("l1:view".to_string(), "l1:bid".to_string())]);
    }

    #[test]
    fn test_session_stage_by_thirds() {
        assert_eq!(SessionStage::of(0, 6), SessionStage::Early);
        assert_eq!(SessionStage::of(1, 6), SessionStage::Early);
        assert_eq!(SessionStage::of(2, 6), SessionStage::Mid);
        assert_eq!(SessionStage::of(3, 6), SessionStage::Mid);
        assert_eq!(SessionStage::of(4, 6), SessionStage::Late);
        assert_eq!(SessionStage::of(5, 6), SessionStage::Late);
        assert_eq!(SessionStage::of(0, 1), SessionStage::Early);
    }

    #[test]
    fn test_stage_strategy_labels_within_session() {
        let events = vec![
            event("alice", "l1", "view", 0),
            event("alice", "l1", "bid", 1),
            event("alice", "l1", "purchase", 2),
        ];
        let pairs = transitions(&events, StateStrategy::EntityActionStage, Duration::minutes(30));
        assert_eq!(
            pairs,
            vec![
                ("l1:view:early".to_string(), "l1:bid:mid".to_string()),
                ("l1:bid:mid".to_string(), "l1:purchase:late".to_string()),
            ]
        );
    }
}
