use crate::config::ProxyConfig;
use crate::metrics::Metrics;
use crate::proxy::ProxyState;
use crate::{admin, server};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: PathBuf,
    pub listen: Option<String>,
    pub metrics_listen: Option<String>,
}

/// Process lifecycle: init → load config → serve → reload-on-SIGHUP → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let mut config = ProxyConfig::load(&args.config_path)?;
    if let Some(ref listen) = args.listen {
        config.listen = listen.clone();
    }
    if let Some(ref metrics_listen) = args.metrics_listen {
        config.metrics_listen = metrics_listen.clone();
    }

    init_tracing(&config.logging.level);

    let listen = config.listen.clone();
    let metrics_listen = config.metrics_listen.clone();
    let metrics = Metrics::install();
    let state = ProxyState::new(config, metrics.clone());

    let shutdown = Arc::new(Notify::new());

    start_reload_watcher(&state, args.config_path.clone(), &shutdown);

    tracing::info!("server: starting proxy, listen={listen}");

    let proxy_handle = tokio::spawn({
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    let admin_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { admin::run(&metrics_listen, metrics, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {e}");
    }
    admin_handle.abort();

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing(level: &str) {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string())))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Reload the config file on SIGHUP and atomically swap it into `state`.
/// Unlike the upstream-discovery watchers this replaces, there is no
/// external config store to poll — the only trigger is the signal itself.
fn start_reload_watcher(state: &ProxyState, config_path: PathBuf, shutdown: &Arc<Notify>) {
    let state = state.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let Ok(mut hangup) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                tracing::warn!("server: failed to install SIGHUP handler, config reload disabled");
                return;
            };

            loop {
                tokio::select! {
                    _ = hangup.recv() => {
                        match ProxyConfig::load(&config_path) {
                            Ok(new_config) => {
                                state.reload(new_config);
                                tracing::info!("server: config reloaded on SIGHUP");
                            }
                            Err(e) => {
                                tracing::error!("server: config reload failed, keeping previous config, error={e}");
                            }
                        }
                    }
                    _ = shutdown.notified() => return,
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (state, config_path);
            shutdown.notified().await;
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
