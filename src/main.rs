// Main binary that wires and runs the lifecycle engine
use clap::Parser;
use color_eyre::eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

use caddis_actions::{ControlExecutor, ErrorRegistryBuilder, ExecutorRegistry, ShellExecutor};
use caddis_engine::{CommandScheduler, DelayQueue, Engine, EngineConfig, MemoryStateStore};
use caddis_query::{
    QueryClient, QueryClientError, QueryClientFactory, QueryRuntime, QueryScriptExecutor,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Caddis workflow action lifecycle engine", long_about = None)]
struct Cli {
    /// Path to the engine configuration file (TOML)
    #[arg(short, long, env = "CADDIS_CONFIG")]
    config: Option<PathBuf>,
}

/// Placeholder factory until a real query service client is wired in;
/// query actions classify this as a service-side error
struct UnconfiguredQueryService;

#[async_trait::async_trait]
impl QueryClientFactory for UnconfiguredQueryService {
    async fn connect(&self) -> std::result::Result<Arc<dyn QueryClient>, QueryClientError> {
        Err(QueryClientError::Service(
            "no query service configured".to_string(),
        ))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    // The queues exist before the executor registry so the query bridge
    // can schedule statement work on them
    let scheduler = CommandScheduler::new(config.scheduler.capacity);
    let delay = DelayQueue::new();

    let mut errors = ErrorRegistryBuilder::new();
    ShellExecutor::register_errors(&mut errors);
    QueryScriptExecutor::register_errors(&mut errors);
    errors.parse_overrides(config.override_rules.iter().map(String::as_str))?;

    let mut executors = ExecutorRegistry::new();
    executors.register(ShellExecutor::new());
    executors.register(ControlExecutor::new());
    executors.register(QueryScriptExecutor::new(
        Arc::new(UnconfiguredQueryService),
        QueryRuntime {
            scheduler: scheduler.clone(),
            delay: delay.clone(),
        },
    ));

    let store = Arc::new(MemoryStateStore::new());
    let engine = Arc::new(Engine::with_queues(
        store,
        Arc::new(executors),
        Arc::new(errors.build()),
        config,
        scheduler,
        delay,
    ));
    engine.start().await?;

    info!("caddis engine running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    engine.shutdown();
    Ok(())
}
