use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use markovflow::config::Config;
use markovflow::perturb::Scenario;

#[derive(Parser)]
#[command(
    name = "markovflow",
    about = "Markov-chain equilibrium anomaly detection for marketplace event streams",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + analysis scheduler)
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ingest a JSON-lines event file
    Ingest {
        /// Path to the event file, one canonical record per line
        #[arg(long)]
        file: PathBuf,
    },

    /// Run the full analysis pipeline once and print the result
    Analyze {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Manage and run perturbation scenarios
    Scenario {
        #[command(subcommand)]
        action: ScenarioAction,
    },

    /// List recent alerts
    Alerts {
        /// Maximum number of alerts to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Manage recurring analysis schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Generate a synthetic marketplace event stream
    Simulate {
        /// Honest browsing sessions to generate
        #[arg(long, default_value = "300")]
        sessions: usize,

        /// Distinct honest actors
        #[arg(long, default_value = "40")]
        actors: usize,

        /// Distinct listings
        #[arg(long, default_value = "25")]
        entities: usize,

        /// Inject a circular wash-trading ring
        #[arg(long)]
        wash_ring: bool,

        /// Seed for a reproducible stream
        #[arg(long)]
        seed: Option<u64>,

        /// Write JSONL here instead of ingesting into the database
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ScenarioAction {
    /// Store a named exclusion scenario
    Add {
        /// Scenario name
        #[arg(long)]
        name: String,

        /// Actor ids to exclude (comma-separated)
        #[arg(long, value_delimiter = ',')]
        actors: Vec<String>,

        /// Entity ids to exclude (comma-separated)
        #[arg(long, value_delimiter = ',')]
        entities: Vec<String>,
    },

    /// List stored scenarios
    List,

    /// Run a stored scenario against a fresh baseline
    Run {
        /// Scenario name
        #[arg(long)]
        name: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// List all schedules
    List,

    /// Add a new schedule
    Add {
        /// Schedule name
        #[arg(long)]
        name: String,

        /// Cron expression (with seconds field)
        #[arg(long)]
        cron: String,

        /// Task to run: 'analyze' or 'scenario:<name>'
        #[arg(long)]
        task: String,
    },

    /// Remove a schedule
    Remove {
        /// Schedule name
        #[arg(long)]
        name: String,
    },

    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind } => {
            tracing::info!("Starting markovflow daemon");
            markovflow::serve(config, bind.as_deref()).await?;
        }
        Commands::Ingest { file } => {
            let pool = markovflow::storage::open_pool(&config.storage.db_path)?;
            let summary = markovflow::ingest::jsonl::ingest_file(&pool, &file).await?;
            println!(
                "Ingested {} events ({} rejected) from {}",
                summary.accepted,
                summary.rejected,
                file.display()
            );
        }
        Commands::Analyze { json } => {
            let pool = markovflow::storage::open_pool(&config.storage.db_path)?;
            let outcome = markovflow::pipeline::run_analysis(&pool, &config).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("\n=== Markovflow Analysis ===");
                println!("Run:          {}", outcome.run_id);
                println!("Events:       {}", outcome.event_count);
                println!("States:       {}", outcome.state_count);
                println!("Transitions:  {}", outcome.transition_count);
                println!("Observations: {}", outcome.observations);
                if outcome.converged {
                    println!(
                        "Converged in {} iterations (residual {:.3e})",
                        outcome.iterations, outcome.residual
                    );
                    println!("\nTop states by stationary mass:");
                    for (state, mass) in &outcome.top_states {
                        println!("  {:<40} {:.5}", state, mass);
                    }
                } else {
                    println!(
                        "DID NOT CONVERGE after {} iterations (residual {:.3e})",
                        outcome.iterations, outcome.residual
                    );
                }
                if !outcome.alerts.is_empty() {
                    println!("\nAlerts raised: {}", outcome.alerts.len());
                }
                println!();
            }
        }
        Commands::Scenario { action } => {
            let pool = markovflow::storage::open_pool(&config.storage.db_path)?;
            match action {
                ScenarioAction::Add {
                    name,
                    actors,
                    entities,
                } => {
                    if actors.is_empty() && entities.is_empty() {
                        anyhow::bail!("scenario must exclude at least one actor or entity");
                    }
                    let scenario = Scenario {
                        name: name.clone(),
                        excluded_actors: actors,
                        excluded_entities: entities,
                    };
                    markovflow::storage::save_scenario(&pool, &scenario)?;
                    println!("Scenario '{}' added.", name);
                }
                ScenarioAction::List => {
                    let scenarios = markovflow::storage::list_scenarios(&pool)?;
                    if scenarios.is_empty() {
                        println!("No scenarios found.");
                    } else {
                        println!("{:<20} | {:<30} | Entities", "Name", "Actors");
                        println!("{:-<20}-|-{:-<30}-|-{:-<20}", "", "", "");
                        for s in scenarios {
                            println!(
                                "{:<20} | {:<30} | {}",
                                s.name,
                                s.excluded_actors.join(","),
                                s.excluded_entities.join(",")
                            );
                        }
                    }
                }
                ScenarioAction::Run { name, json } => {
                    let report =
                        markovflow::pipeline::run_stored_scenario(&pool, &config, &name).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!("\n=== Perturbation: {} ===", report.scenario);
                        println!("Removed events:  {}", report.removed_events);
                        println!(
                            "States:          {} -> {}",
                            report.baseline_states, report.perturbed_states
                        );
                        println!("KL divergence:   {:.6}", report.kl_divergence);
                        println!("Total variation: {:.6}", report.total_variation);
                        println!("Impact radius:   {}", report.impact_radius);
                        if !report.shifted_states.is_empty() {
                            println!("\nLargest shifts:");
                            for shift in &report.shifted_states {
                                println!(
                                    "  {:<40} {:.5} -> {:.5}",
                                    shift.state, shift.before, shift.after
                                );
                            }
                        }
                        println!();
                    }
                }
            }
        }
        Commands::Alerts { limit } => {
            let pool = markovflow::storage::open_pool(&config.storage.db_path)?;
            let manager = markovflow::alert::manager::AlertManager::new(pool);
            let alerts = manager.list_recent(limit)?;
            if alerts.is_empty() {
                println!("No alerts found.");
            } else {
                println!("{:<36} | {:<8} | {:<7} | Verdict", "Id", "Severity", "Score");
                println!("{:-<36}-|-{:-<8}-|-{:-<7}-|-{:-<40}", "", "", "", "");
                for alert in alerts {
                    println!(
                        "{:<36} | {:<8} | {:<7.2} | {}",
                        alert.id,
                        format!("{:?}", alert.severity),
                        alert.score,
                        alert.verdict
                    );
                }
            }
        }
        Commands::Schedule { action } => {
            let pool = markovflow::storage::open_pool(&config.storage.db_path)?;
            let scheduler = markovflow::scheduler::Scheduler::new(pool);

            match action {
                ScheduleAction::List => {
                    let list = scheduler.list().await?;
                    if list.is_empty() {
                        println!("No schedules found.");
                    } else {
                        println!("{:<20} | {:<15} | {:<20} | Enabled", "Name", "Cron", "Task");
                        println!("{:-<20}-|-{:-<15}-|-{:-<20}-|-{:-<7}", "", "", "", "");
                        for (name, cron, task, enabled) in list {
                            println!("{:<20} | {:<15} | {:<20} | {}", name, cron, task, enabled);
                        }
                    }
                }
                ScheduleAction::Add { name, cron, task } => {
                    scheduler.add_schedule(&name, &cron, &task).await?;
                    println!("Schedule '{}' added.", name);
                }
                ScheduleAction::Remove { name } => {
                    scheduler.remove(&name).await?;
                    println!("Schedule '{}' removed.", name);
                }
                ScheduleAction::DryRun { hours } => {
                    let preview = scheduler.preview_next_runs(hours).await?;
                    if preview.is_empty() {
                        println!("No runs scheduled in next {} hours.", hours);
                    } else {
                        println!("Upcoming runs (next {} hours):", hours);
                        for (time, name, task) in preview {
                            println!("{} : {} ({})", time, name, task);
                        }
                    }
                }
            }
        }
        Commands::Simulate {
            sessions,
            actors,
            entities,
            wash_ring,
            seed,
            out,
        } => {
            let options = markovflow::simulate::SimOptions {
                actors,
                entities,
                sessions,
                wash_ring: wash_ring.then(markovflow::simulate::WashRing::default),
                seed,
                ..markovflow::simulate::SimOptions::default()
            };
            let events = markovflow::simulate::generate(&options);

            match out {
                Some(path) => {
                    markovflow::simulate::write_jsonl(&events, &path)?;
                    println!("Wrote {} events to {}", events.len(), path.display());
                }
                None => {
                    let pool = markovflow::storage::open_pool(&config.storage.db_path)?;
                    markovflow::storage::save_events(&pool, &events)?;
                    println!("Ingested {} synthetic events.", events.len());
                }
            }
        }
    }

    Ok(())
}
