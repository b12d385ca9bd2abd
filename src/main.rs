use anyhow::{Context, Result};
use gleaner::{
    batch::{BatchOrchestrator, CsvSink, InputTable},
    config::Config,
    extractor::PageRenderer,
};
use std::{collections::HashMap, sync::Arc};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const ENV_LOG_JSON: &str = "GLEANER_LOG_JSON";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(ENV_LOG_JSON)
        .map(|v| matches!(v.as_str(), "1" | "true"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(feature = "chromium")]
fn renderer(config: &Config) -> Option<Arc<dyn PageRenderer>> {
    config.render.then(|| {
        Arc::new(gleaner::extractor::render::ChromiumRenderer::new(config.render_timeout))
            as Arc<dyn PageRenderer>
    })
}

#[cfg(not(feature = "chromium"))]
fn renderer(config: &Config) -> Option<Arc<dyn PageRenderer>> {
    if config.render {
        tracing::warn!("rendering requested but gleaner was built without the `chromium` feature");
    }
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let run_id = Uuid::new_v4();
    info!(
        %run_id,
        input = %config.input_path.display(),
        output = %config.output_path.display(),
        concurrency = config.concurrency,
        render = config.render,
        "starting harvest"
    );

    let table = InputTable::load(&config.input_path)
        .with_context(|| format!("loading {}", config.input_path.display()))?;
    let key_column = config.key_column.as_deref();
    let items = table.work_items(key_column)?;
    let keys = table.row_keys(key_column)?;
    info!(rows = table.rows.len(), items = items.len(), "input loaded");

    let previous = if config.resume && config.output_path.exists() {
        CsvSink::load_accepted(&config.output_path, key_column)
            .with_context(|| format!("reading previous output {}", config.output_path.display()))?
    } else {
        HashMap::new()
    };

    let sink = CsvSink::new(&config.output_path, &table, keys);
    let orchestrator = BatchOrchestrator::from_config(&config, renderer(&config))?.with_run_id(run_id);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Received shutdown signal, persisting completed rows...");
        shutdown.cancel();
    });

    let run = orchestrator.run(items, previous, &sink, cancel).await?;
    info!(
        %run_id,
        accepted = run.report.accepted,
        exhausted = run.report.exhausted,
        cancelled = run.report.cancelled,
        output = %sink.path().display(),
        "harvest finished"
    );
    Ok(())
}
