//! `reflex serve` — run the engine with the HTTP API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use reflex_core::{EngineConfig, ServerConfig};
use reflex_engine::{start_reload_watcher_with_nudge, Engine, RuleSource};
use reflex_loader::FileRuleSource;

pub async fn run(
    rules_dir: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let engine_config = EngineConfig::from_env();
    engine_config.log_summary();

    let mut server_config = ServerConfig::from_env();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }

    let engine = Engine::new(engine_config);
    engine.start();

    if let Some(dir) = rules_dir {
        let mut source = FileRuleSource::new(dir.clone())
            .with_context(|| format!("opening rules directory {}", dir.display()))?;
        let nudge = source.watch().context("starting rules directory watcher")?;
        start_reload_watcher_with_nudge(
            &engine,
            vec![Arc::new(source) as Arc<dyn RuleSource>],
            Some(nudge),
        );
        info!(path = %dir.display(), "rule hot-reload active");
    }

    let serve_engine = Arc::clone(&engine);
    reflex_server::serve(serve_engine, &server_config, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    engine.stop().await;
    Ok(())
}

/// Resolve on SIGINT/SIGTERM (Unix) or Ctrl+C.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
    info!("shutdown signal received");
}
