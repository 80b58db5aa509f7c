//! 服务运行时

use std::net::SocketAddr;

use anyhow::Context;
use bridge_config::BridgeSettings;
use bridge_telemetry::{init_metrics, init_tracing, init_tracing_json};
use tracing::{error, info};

/// 初始化日志与指标
pub fn init_runtime(settings: &BridgeSettings) -> anyhow::Result<()> {
    if settings.is_production() || settings.telemetry.json {
        init_tracing_json(&settings.telemetry.log_level)?;
    } else {
        init_tracing(&settings.telemetry.log_level)?;
    }

    if let Some(addr) = &settings.telemetry.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid telemetry.metrics_addr: {}", addr))?;
        init_metrics(Some(addr))?;
    }

    info!(
        app_name = %settings.app_name,
        app_env = %settings.app_env,
        "Runtime initialized"
    );
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
