use clap::Parser;
use sluice::{Config, Proxy};
use std::path::PathBuf;
use std::sync::Arc;

/// Round-robin HTTP reverse proxy
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let cfg = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    let log = sluice::logging::init(&cfg.logging)?;

    let proxy = match Proxy::new(cfg, log).await {
        Ok(proxy) => Arc::new(proxy),
        Err(e) => {
            tracing::error!(error = %e, "failed to create proxy");
            std::process::exit(1);
        }
    };

    let mut server = tokio::spawn({
        let proxy = proxy.clone();
        async move { proxy.start().await }
    });

    tokio::select! {
        res = &mut server => {
            match res {
                Ok(Err(e)) => tracing::error!(error = %e, "failed to start proxy"),
                Err(e) => tracing::error!(error = %e, "proxy task failed"),
                Ok(Ok(())) => tracing::error!("proxy stopped unexpectedly"),
            }
            std::process::exit(1);
        }

        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    if let Err(e) = proxy.shutdown().await {
        tracing::error!(error = %e, "error during shutdown");
    }
    if let Ok(Err(e)) = server.await {
        tracing::error!(error = %e, "proxy exited with error");
    }

    Ok(())
}

async fn shutdown_signal() {
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
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
