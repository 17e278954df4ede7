use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn, Level};

use screen_agent::capture::PermissionGrant;
use screen_agent::config::{AgentConfig, PLANNER_URL_ENV};
use screen_agent::device::SimDevice;
use screen_agent::llm::{HttpPlanner, Planner, ScriptedPlanner};
use screen_agent::orchestrator::Coordinator;
use screen_agent::screen::{JpegScreenshotStore, ScreenshotStore};
use screen_agent::types::command::CommandScript;

const LOG_ENV: &str = "SCREEN_AGENT_LOG";

const USAGE: &str = "usage: screen-agent <run <script> | observe | ask <instruction> | cleanup>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| Level::from_str(&v).ok())
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = AgentConfig::from_env().context("Failed to load configuration")?;
    let store: Arc<dyn ScreenshotStore> = Arc::new(JpegScreenshotStore::new(
        &config.storage.capture_dir,
        config.storage.jpeg_quality,
    ));

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("run") => {
            let path = args.get(1).context(USAGE)?;
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read script {}", path))?;
            let script = CommandScript::parse(&text);
            for line in &script.skipped_lines {
                warn!(line, "skipped unparsable script line");
            }
            let planner = Arc::new(ScriptedPlanner::new(path.clone(), script.commands));
            run(&config, store, planner, path).await
        }
        Some("observe") => {
            let device = SimDevice::demo(config.capture.width, config.capture.height);
            let coordinator = start(&device, store, Arc::new(ScriptedPlanner::default()), &config).await?;
            let state = coordinator.observe().await;
            coordinator.capture().stop_session().await;
            println!("{}", serde_json::to_string_pretty(&state?)?);
            Ok(())
        }
        Some("ask") => {
            let instruction = args[1..].join(" ");
            if instruction.trim().is_empty() {
                bail!(USAGE);
            }
            if config.planner.endpoint.is_none() {
                bail!("{} must be set to ask the planner", PLANNER_URL_ENV);
            }
            let planner = Arc::new(HttpPlanner::new(&config.planner)?);
            run(&config, store, planner, &instruction).await
        }
        Some("cleanup") => {
            let removed = store.cleanup(config.storage.retention()).await?;
            info!(removed, dir = %config.storage.capture_dir, "screenshot cleanup finished");
            println!("removed {} screenshots", removed);
            Ok(())
        }
        _ => bail!(USAGE),
    }
}

async fn start(
    device: &SimDevice,
    store: Arc<dyn ScreenshotStore>,
    planner: Arc<dyn Planner>,
    config: &AgentConfig,
) -> Result<Arc<Coordinator>> {
    let coordinator = Arc::new(Coordinator::new(device.ports(), store, planner, config));
    coordinator
        .capture()
        .start_session(
            &PermissionGrant::new("local"),
            device.width,
            device.height,
            config.capture.density_dpi,
        )
        .await?;
    Ok(coordinator)
}

async fn run(
    config: &AgentConfig,
    store: Arc<dyn ScreenshotStore>,
    planner: Arc<dyn Planner>,
    instruction: &str,
) -> Result<()> {
    let device = SimDevice::demo(config.capture.width, config.capture.height);
    let coordinator = start(&device, store, planner, config).await?;

    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(event = event.event_type(), plan_id = event.plan_id(), "progress");
        }
    });

    let cancel = coordinator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling plan");
            cancel.cancel();
        }
    });

    let report = coordinator.run_instruction(instruction).await;
    coordinator.capture().stop_session().await;
    println!("{}", serde_json::to_string_pretty(&report?)?);
    Ok(())
}
