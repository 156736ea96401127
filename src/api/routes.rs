//! API route definitions.

use crate::api::state::AppState;
use crate::ingest::{self, EventRecord};
use crate::perturb::Scenario;
use crate::pipeline;
use crate::storage;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ingest_events))
        .route("/events/count", get(event_count))
        .route("/analysis/run", post(run_analysis))
        .route("/analysis/latest", get(latest_analysis))
        .route("/alerts", get(list_alerts))
        .route("/scenarios", get(list_scenarios).post(create_scenario))
        .route("/scenarios/run", post(run_scenario))
        .route("/schedules", get(list_schedules))
}

/// Uniform error mapping: client mistakes are 400, everything else 500.
struct ApiError(StatusCode, String);

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(json!({ "error": self.1 }));
        (self.0, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "api request failed");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, message.into())
}

fn envelope(data: Value, meta: Value) -> Json<Value> {
    Json(json!({ "data": data, "meta": meta }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Accepts a single canonical event record or an array of them.
async fn ingest_events(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let records: Vec<EventRecord> = match body {
        Value::Array(_) => serde_json::from_value(body)
            .map_err(|e| bad_request(format!("malformed event array: {}", e)))?,
        Value::Object(_) => vec![serde_json::from_value(body)
            .map_err(|e| bad_request(format!("malformed event record: {}", e)))?],
        _ => return Err(bad_request("expected an event object or array")),
    };

    let mut events = Vec::with_capacity(records.len());
    let mut rejected = 0usize;
    for record in records {
        match ingest::normalize(record) {
            Ok(event) => events.push(event),
            Err(e) => {
                rejected += 1;
                tracing::warn!(error = %e, "rejecting invalid event record");
            }
        }
    }

    let accepted = events.len();
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || storage::save_events(&pool, &events))
        .await
        .map_err(anyhow::Error::from)??;

    Ok(envelope(
        json!({ "accepted": accepted, "rejected": rejected }),
        json!({ "timestamp": chrono::Utc::now().to_rfc3339() }),
    ))
}

async fn event_count(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let count = tokio::task::spawn_blocking(move || storage::count_events(&pool))
        .await
        .map_err(anyhow::Error::from)??;
    Ok(envelope(json!({ "events": count }), json!({})))
}

async fn run_analysis(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let outcome = pipeline::run_analysis(&state.pool, &state.config).await?;
    Ok(envelope(
        serde_json::to_value(&outcome).map_err(anyhow::Error::from)?,
        json!({ "strategy": state.config.chain.strategy }),
    ))
}

async fn latest_analysis(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let strategy = state.config.chain.strategy.clone();
    let pool = state.pool.clone();
    let run = tokio::task::spawn_blocking(move || storage::latest_analysis_run(&pool, &strategy))
        .await
        .map_err(anyhow::Error::from)??;

    match run {
        Some(run) => Ok(envelope(
            serde_json::to_value(&run).map_err(anyhow::Error::from)?,
            json!({}),
        )),
        None => Ok(envelope(
            Value::Null,
            json!({ "message": "no analysis runs yet" }),
        )),
    }
}

#[derive(Deserialize)]
struct AlertQuery {
    limit: Option<usize>,
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let pool = state.pool.clone();
    let alerts = tokio::task::spawn_blocking(move || {
        crate::alert::manager::AlertManager::new(pool).list_recent(limit)
    })
    .await
    .map_err(anyhow::Error::from)??;

    let total = alerts.len();
    Ok(envelope(
        serde_json::to_value(&alerts).map_err(anyhow::Error::from)?,
        json!({ "total": total }),
    ))
}

async fn list_scenarios(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pool = state.pool.clone();
    let scenarios = tokio::task::spawn_blocking(move || storage::list_scenarios(&pool))
        .await
        .map_err(anyhow::Error::from)??;
    let total = scenarios.len();
    Ok(envelope(
        serde_json::to_value(&scenarios).map_err(anyhow::Error::from)?,
        json!({ "total": total }),
    ))
}

async fn create_scenario(
    State(state): State<AppState>,
    Json(scenario): Json<Scenario>,
) -> Result<Json<Value>, ApiError> {
    if scenario.name.trim().is_empty() {
        return Err(bad_request("scenario name must not be empty"));
    }
    if scenario.excluded_actors.is_empty() && scenario.excluded_entities.is_empty() {
        return Err(bad_request("scenario must exclude at least one actor or entity"));
    }

    let pool = state.pool.clone();
    let name = scenario.name.clone();
    tokio::task::spawn_blocking(move || storage::save_scenario(&pool, &scenario))
        .await
        .map_err(anyhow::Error::from)??;

    Ok(envelope(json!({ "name": name }), json!({})))
}

#[derive(Deserialize)]
struct RunScenarioRequest {
    name: String,
}

/// Run a stored scenario against a freshly computed baseline.
async fn run_scenario(
    State(state): State<AppState>,
    Json(request): Json<RunScenarioRequest>,
) -> Result<Json<Value>, ApiError> {
    let report = pipeline::run_stored_scenario(&state.pool, &state.config, &request.name)
        .await
        .map_err(|e| {
            if e.to_string().contains("not found") {
                bad_request(e.to_string())
            } else {
                e.into()
            }
        })?;

    Ok(envelope(
        serde_json::to_value(&report).map_err(anyhow::Error::from)?,
        json!({ "strategy": state.config.chain.strategy }),
    ))
}

async fn list_schedules(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let schedules = state.scheduler.list().await?;
    let data: Vec<Value> = schedules
        .into_iter()
        .map(|(name, cron, task, enabled)| {
            json!({ "name": name, "cron": cron, "task": task, "enabled": enabled })
        })
        .collect();
    let total = data.len();
    Ok(envelope(json!(data), json!({ "total": total })))
}
