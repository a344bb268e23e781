pub mod application;
pub mod benchmarks;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod telemetry;

pub use application::{agent, coordinator, tooling};
pub use domain::types;
pub use infrastructure::model;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use cli::{Cli, RunMode};
use config::AppConfig;
use coordinator::{RunCoordinator, RunSettings};
use types::Goal;

pub async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    init_tracing();
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        let kind = match provider {
            cli::ProviderArg::Ollama => config::ProviderKind::Ollama,
            cli::ProviderArg::Openai => config::ProviderKind::Openai,
        };
        if kind != config.provider.kind {
            config.provider = config::ProviderConfig::defaults_for(kind);
        }
    }
    if let Some(endpoint) = cli.endpoint.clone() {
        config.provider.endpoint = endpoint;
    }
    if let Some(model) = cli.model.clone() {
        config.model = model;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(sandbox_root) = cli.sandbox_root.clone() {
        config.sandbox_root = sandbox_root;
    }
    info!(
        model = %config.model,
        max_iterations = config.max_iterations,
        servers = config.servers.len(),
        "configuration loaded"
    );

    let provider = model::provider_from_config(&config.provider)?;
    let cancel = Arc::new(AtomicBool::new(false));
    spawn_cancel_handler(cancel.clone());
    let coordinator = RunCoordinator::new(config.clone(), provider);

    match cli.mode {
        RunMode::Goal => {
            let text = cli.goal.join(" ").trim().to_string();
            if text.is_empty() {
                return Err("a goal is required in goal mode".into());
            }
            let mut goal = Goal::new(text);
            if let Some(command) = cli.verify_command.clone() {
                goal = goal.with_verify_command(command);
            }
            let settings = RunSettings {
                run_id: cli.run_id.clone(),
                run_id_prefix: cli.run_id_prefix.clone(),
                cancel,
            };
            let report = coordinator.execute(goal, settings).await?;
            info!(
                run_id = %report.manifest.run_id,
                success = report.manifest.success,
                iterations = report.manifest.iterations,
                manifest = %report.manifest_path.display(),
                "run complete"
            );
        }
        RunMode::Bench => {
            let loader = benchmarks::SuiteLoader::new(config.sandbox_root.clone());
            let exercises = loader.discover(cli.bench_limit)?;
            info!(count = exercises.len(), "benchmark suite loaded");
            let mut passed = 0usize;
            let total = exercises.len();
            for exercise in exercises {
                if cancel.load(Ordering::Relaxed) {
                    warn!("benchmark suite interrupted");
                    break;
                }
                let settings = RunSettings {
                    run_id: None,
                    run_id_prefix: format!("bench-{}", exercise.slug),
                    cancel: cancel.clone(),
                };
                let report = coordinator.execute(exercise.build_goal(), settings).await?;
                if report.manifest.success {
                    passed += 1;
                }
                info!(
                    exercise = %exercise.display_name(),
                    success = report.manifest.success,
                    iterations = report.manifest.iterations,
                    "benchmark exercise finished"
                );
            }
            info!(passed, total, "benchmark suite complete");
        }
    }
    Ok(())
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}

/// First Ctrl-C requests a graceful stop at the next iteration boundary; the
/// flag stays set so subsequent runs in the same process also stop.
fn spawn_cancel_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current step before stopping");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}
