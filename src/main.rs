use clap::Parser;
use tokio::sync::watch;
use trackium_location::config::{prompt_device_id, Cli, Config};
use trackium_location::delivery;
use trackium_location::http;
use trackium_location::location::LocationResolver;
use trackium_location::service::{Cycle, ServiceLoop};
use trackium_location::store::LocalStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Trackium location service starting");

    // ── Device id ───────────────────────────────────────────────

    let device_id = match cli.device_id.clone() {
        Some(id) => id,
        None => {
            let stdin = std::io::stdin();
            match prompt_device_id(&mut stdin.lock(), &mut std::io::stdout()) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let config = Config::from_cli(cli, device_id).unwrap_or_else(|e| {
        tracing::error!("{}", e);
        std::process::exit(1);
    });

    // ── Wire up the cycle ───────────────────────────────────────

    let agent = http::agent(config.request_timeout);
    let store = LocalStore::new(config.data_dir.clone());

    match store.load_last() {
        Ok(Some(last)) => tracing::info!(
            at = %last.timestamp,
            uploaded = last.uploaded,
            "last known location: {}",
            last.location.display_line()
        ),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "could not read last known location"),
    }

    let cycle = Cycle::new(
        config.device_id.clone(),
        LocationResolver::standard(agent.clone()),
        store,
        delivery::build(config.delivery, agent, &config.node_url),
    );
    let service = ServiceLoop::new(cycle, config.interval);

    tracing::info!(
        device_id = %config.device_id,
        node = %config.node_url,
        delivery = %config.delivery,
        data_dir = %config.data_dir.display(),
        "service started, update interval {} seconds",
        config.interval.as_secs_f64()
    );

    if config.once {
        if let Err(e) = service.run_once().await {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    // ── Signals ─────────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("stopping Trackium location service");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = service.run(shutdown_rx).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
