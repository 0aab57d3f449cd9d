use anyhow::{Context, Result};
use meter_config::Config;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config, role: &str) {
    if config.path().as_os_str().is_empty() {
        meter_log::info!("launching {role} without config folder");
    } else {
        meter_log::info!(
            "launching {role} from config folder {}",
            config.path().display()
        );
    }

    match role {
        "server" => {
            meter_log::info!("  http address: {}", config.http_addr());
            match config.grpc_addr() {
                Some(addr) => meter_log::info!("  grpc address: {addr}"),
                None => meter_log::info!("  grpc address: -"),
            }
            match config.trusted_subnet() {
                Some(subnet) => meter_log::info!("  trusted subnet: {subnet}"),
                None => meter_log::info!("  trusted subnet: -"),
            }
        }
        _ => {
            meter_log::info!("  collector: {}", config.collector_address());
            meter_log::info!("  transport: {}", config.transport());
        }
    }

    meter_log::info!(
        "  signing: {}",
        if config.signing_key().is_some() {
            "enabled"
        } else {
            "disabled"
        }
    );
    match config.crypto_key_path() {
        Some(path) => meter_log::info!("  crypto key: {}", path.display()),
        None => meter_log::info!("  crypto key: -"),
    }
    meter_log::info!("  log level: {:?}", config.logging().level);
}

/// Constructs the multi-threaded tokio runtime.
pub fn create_runtime(name: &str) -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name(name)
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")
}

/// Returns a token that is canceled on SIGINT or SIGTERM.
///
/// Must be called within a tokio runtime.
pub fn shutdown_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let guard = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        meter_log::info!("received shutdown signal");
        guard.cancel();
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(error) => {
            meter_log::error!(
                error = &error as &dyn std::error::Error,
                "failed to listen for SIGTERM"
            );
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
