//! TOML configuration -- layered model with compiled-in defaults,
//! environment variable override for the config file path, and a standard
//! filesystem location.

use crate::alert::AlertThresholds;
use crate::chain::SolverOptions;
use crate::perturb::PerturbOptions;
use crate::state::StateStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Root configuration for the markovflow process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain: ChainConfig,
    pub solver: SolverConfig,
    pub alerts: AlertConfig,
    pub perturb: PerturbConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `MARKOVFLOW_CONFIG` environment variable.
    /// 2. `/etc/markovflow/markovflow.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("MARKOVFLOW_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "MARKOVFLOW_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new("/etc/markovflow/markovflow.toml");
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn strategy(&self) -> Result<StateStrategy> {
        self.chain.strategy.parse()
    }

    pub fn session_gap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.chain.session_gap_minutes as i64)
    }

    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            damping: self.solver.damping,
            tolerance: self.solver.tolerance,
            max_iterations: self.solver.max_iterations,
        }
    }

    pub fn alert_thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            kl_threshold: self.alerts.kl_threshold,
            tvd_threshold: self.alerts.tvd_threshold,
            concentration_threshold: self.alerts.concentration_threshold,
            concentration_top_k: self.alerts.concentration_top_k,
            min_observations: self.alerts.min_observations,
        }
    }

    pub fn perturb_options(&self) -> PerturbOptions {
        PerturbOptions {
            mass_epsilon: self.perturb.mass_epsilon,
            top_shifts: self.perturb.top_shifts,
        }
    }
}

/// State derivation and sessionization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// State-definition strategy: `entity-action`, `seller-action`,
    /// `action-only` or `entity-action-stage`.
    pub strategy: String,
    /// Idle gap that closes a session (minutes).
    pub session_gap_minutes: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            strategy: "entity-action".to_string(),
            session_gap_minutes: 30,
        }
    }
}

/// Equilibrium solver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Damping factor; `1.0` disables teleportation.
    pub damping: f64,
    /// L1 convergence threshold.
    pub tolerance: f64,
    /// Iteration cap before non-convergence is reported.
    pub max_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let defaults = SolverOptions::default();
        Self {
            damping: defaults.damping,
            tolerance: defaults.tolerance,
            max_iterations: defaults.max_iterations,
        }
    }
}

/// Alerting thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub kl_threshold: f64,
    pub tvd_threshold: f64,
    pub concentration_threshold: f64,
    pub concentration_top_k: usize,
    pub min_observations: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let defaults = AlertThresholds::default();
        Self {
            kl_threshold: defaults.kl_threshold,
            tvd_threshold: defaults.tvd_threshold,
            concentration_threshold: defaults.concentration_threshold,
            concentration_top_k: defaults.concentration_top_k,
            min_observations: defaults.min_observations,
        }
    }
}

/// Perturbation analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbConfig {
    pub mass_epsilon: f64,
    pub top_shifts: usize,
}

impl Default for PerturbConfig {
    fn default() -> Self {
        let defaults = PerturbOptions::default();
        Self {
            mass_epsilon: defaults.mass_epsilon,
            top_shifts: defaults.top_shifts,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/markovflow.db".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.chain.strategy, "entity-action");
        assert_eq!(cfg.chain.session_gap_minutes, 30);
        assert_eq!(cfg.solver.damping, 0.85);
        assert_eq!(cfg.solver.max_iterations, 200);
        assert_eq!(cfg.alerts.concentration_top_k, 5);
        assert_eq!(cfg.api.bind, "0.0.0.0:8080");
        assert_eq!(cfg.storage.db_path, "data/markovflow.db");
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.strategy().is_ok());
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[chain]
strategy = "seller-action"
session_gap_minutes = 15

[solver]
damping = 0.9
tolerance = 1e-8
max_iterations = 500

[alerts]
kl_threshold = 0.2
concentration_top_k = 3

[api]
bind = "127.0.0.1:9090"

[storage]
db_path = "/var/lib/markovflow/flow.db"

[logging]
level = "debug"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.chain.strategy, "seller-action");
        assert_eq!(cfg.chain.session_gap_minutes, 15);
        assert_eq!(cfg.solver.damping, 0.9);
        assert_eq!(cfg.solver.max_iterations, 500);
        assert_eq!(cfg.alerts.kl_threshold, 0.2);
        assert_eq!(cfg.alerts.concentration_top_k, 3);
        // Unspecified alert fields keep defaults.
        assert_eq!(cfg.alerts.tvd_threshold, 0.05);
        assert_eq!(cfg.api.bind, "127.0.0.1:9090");
        assert_eq!(cfg.storage.db_path, "/var/lib/markovflow/flow.db");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.strategy().unwrap(), StateStrategy::SellerAction);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str("[solver]\ndamping = 1.0\n").unwrap();
        assert_eq!(cfg.solver.damping, 1.0);
        assert_eq!(cfg.solver.max_iterations, 200);
        assert_eq!(cfg.chain.strategy, "entity-action");
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.chain.session_gap_minutes, 30);
        assert_eq!(cfg.solver.tolerance, 1e-9);
    }

    #[test]
    fn test_bad_strategy_is_an_error() {
        let cfg: Config = toml::from_str("[chain]\nstrategy = \"nope\"\n").unwrap();
        assert!(cfg.strategy().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("markovflow.toml");
        std::fs::write(&path, "[api]\nbind = \"0.0.0.0:9999\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.api.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/path/markovflow.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.chain.strategy, roundtripped.chain.strategy);
        assert_eq!(cfg.solver.damping, roundtripped.solver.damping);
        assert_eq!(cfg.alerts.min_observations, roundtripped.alerts.min_observations);
    }
}
