pub mod config;
pub mod db;
pub mod input;
pub mod models;
pub mod pipeline;
pub mod registry;

use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::input::RunInput;
use crate::pipeline::inference::OllamaClient;
use crate::pipeline::{EngineRunner, RunEvent, SqliteEvidenceCache};

/// Command-line entry point: `evidence-engine <run-input.json>`.
/// Prints the engine output as JSON on stdout.
pub fn run_cli() -> Result<(), String> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| "usage: evidence-engine <run-input.json>".to_string())?;
    let (registry, documents) = RunInput::load(Path::new(&path))
        .and_then(RunInput::into_parts)
        .map_err(|e| e.to_string())?;

    let config = EngineConfig::from_env();
    let mut runner = EngineRunner::new(config.clone());

    if config.inference_enabled {
        match OllamaClient::new(&config.ollama_url, config.inference_timeout_secs) {
            Ok(client) => runner = runner.with_client(Arc::new(client)),
            Err(e) => tracing::warn!(error = %e, "Could not build inference client"),
        }
    }

    let cache_path = config::cache_db_path();
    match SqliteEvidenceCache::open(&cache_path) {
        Ok(cache) => runner = runner.with_cache(Arc::new(cache)),
        Err(e) => tracing::warn!(path = %cache_path.display(), error = %e, "Evidence cache unavailable, running uncached"),
    }

    let progress = |event: RunEvent| match event {
        RunEvent::RequirementCompleted { requirement_id, status, completed, total } => {
            tracing::info!(requirement_id = %requirement_id, status = %status, "Requirement {completed}/{total} done");
        }
        RunEvent::ComponentValidated { members, findings } => {
            tracing::info!(members = ?members, findings = findings.len(), "Component validated");
        }
        RunEvent::Started { .. } | RunEvent::Completed { .. } => {}
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {e}"))?;
    let output = runtime
        .block_on(runner.run(&registry, documents, Some(&progress)))
        .map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
