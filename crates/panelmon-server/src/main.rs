use anyhow::Result;
use panelmon_alert::conditions::QueryConditionPlugin;
use panelmon_alert::eval_handler::EvalHandler;
use panelmon_alert::registry::ConditionRegistry;
use panelmon_common::metrics::AlertingMetrics;
use panelmon_notify::dispatcher::NotificationDispatcher;
use panelmon_notify::plugin::ChannelRegistry;
use panelmon_storage::{AlertStore, SqlStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use panelmon_server::config::{self, AlertsImportFile, ServerConfig};
use panelmon_server::result_handler::ResultHandler;
use panelmon_server::scheduler::{self, Engine, EngineSettings};
use panelmon_server::telemetry::{self, RecorderMetrics};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  panelmon-server [config.toml]                          Start the server");
    eprintln!("  panelmon-server import-alerts <config.toml> <alerts.json>  Save a dashboard's alerts from a JSON file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("panelmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("import-alerts") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("import-alerts requires <config.toml> and <alerts.json> arguments")
            })?;
            let alerts_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("import-alerts requires <alerts.json> argument")
            })?;
            run_import_alerts(config_path, alerts_path).await
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or(config::DEFAULT_CONFIG_PATH);
            run_server(config_path).await
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<SqlStore> {
    if let Some(dir) = config.database.sqlite_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(SqlStore::connect(&config.database.url).await?)
}

/// Saves the alerts of one dashboard from a JSON file.
async fn run_import_alerts(config_path: &str, alerts_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;

    let content = std::fs::read_to_string(alerts_path)
        .map_err(|e| anyhow::anyhow!("Failed to read alerts file '{}': {}", alerts_path, e))?;
    let file: AlertsImportFile = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse alerts file '{}': {}", alerts_path, e))?;

    let registry = condition_registry();
    let cmd = file.into_command();
    for alert in &cmd.alerts {
        if let Err(e) = panelmon_alert::rule::AlertRule::from_alert(alert, &registry) {
            tracing::warn!(panel_id = alert.panel_id, name = %alert.name, error = %e, "Alert conditions will not load");
        }
    }

    let saved = store.save_alerts(&cmd).await?;
    tracing::info!(
        dashboard_id = cmd.dashboard_id,
        saved = saved.len(),
        "Imported alerts"
    );
    Ok(())
}

/// Conditions are built against named series sources. None are wired in by
/// default; embedders register theirs on the query plugin.
fn condition_registry() -> ConditionRegistry {
    let plugin = QueryConditionPlugin::new();
    if plugin.source_names().is_empty() {
        tracing::warn!(
            "No series sources registered: every `query` condition will fail to load \
             and its alert will be set to execution_error"
        );
    }
    let mut registry = ConditionRegistry::new();
    registry.register(Box::new(plugin));
    registry
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl-C only");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load_or_default(config_path)?;
    let store = Arc::new(open_store(&config).await?);

    if let Some(listen) = &config.metrics.listen {
        let addr = telemetry::install_prometheus(listen)?;
        tracing::info!(%addr, "Prometheus metrics endpoint listening");
    }
    let metrics = AlertingMetrics::new(Arc::new(RecorderMetrics));

    let channels = panelmon_server::build_channels(&ChannelRegistry::default(), &config.notifications)?;
    tracing::info!(count = channels.len(), "Notification channels ready");
    let dispatcher = Arc::new(NotificationDispatcher::new(channels, metrics.clone()));

    if !config.alerting.enabled {
        tracing::info!("Alerting disabled, nothing to do");
        return Ok(());
    }

    let alerting = &config.alerting;
    let settings = EngineSettings {
        server_id: alerting.resolve_server_id(),
        tick: alerting.tick(),
        heartbeat_liveness: alerting.heartbeat_liveness(),
    };
    let eval_handler =
        Arc::new(EvalHandler::new(metrics.clone()).with_timeout(alerting.eval_timeout()));
    let results = Arc::new(ResultHandler::new(
        store.clone(),
        dispatcher,
        metrics.clone(),
    ));
    let engine = Arc::new(Engine::new(
        store.clone(),
        store.clone(),
        Arc::new(condition_registry()),
        eval_handler,
        results,
        metrics,
        settings,
    ));

    let cancel = CancellationToken::new();
    let engine_handle = tokio::spawn(engine.run(cancel.clone()));
    let cleanup_handle = tokio::spawn(scheduler::run_heartbeat_cleanup(
        store.clone(),
        alerting.heartbeat_cleanup(),
        alerting.heartbeat_liveness(),
        cancel.clone(),
    ));

    tracing::info!("Server started");
    wait_for_shutdown().await;
    tracing::info!("Shutting down gracefully");

    cancel.cancel();
    if let Err(e) = engine_handle.await {
        tracing::error!(error = %e, "Alerting engine task failed");
    }
    if let Err(e) = cleanup_handle.await {
        tracing::error!(error = %e, "Heartbeat cleanup task failed");
    }
    tracing::info!("Server stopped");

    Ok(())
}
