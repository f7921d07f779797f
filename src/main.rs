use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use timetable::config::ServerConfig;
use timetable::observability::{CONNECTIONS_ACTIVE, CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL};
use timetable::tenant::TenantManager;
use timetable::{observability, tls, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    observability::init(config.metrics_port)?;
    let tls_acceptor = tls::acceptor_from_config(&config)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let tenant_manager = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        config.policy,
    ));
    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("timetable listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  conflict policy: {:?}", config.policy);
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });

    // Stop accepting on SIGTERM/ctrl-c, then drain in-flight connections.
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    tracing::warn!("connection limit reached, rejecting {peer}");
                    metrics::counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
                    drop(socket);
                    continue;
                };

                info!("connection from {peer}");
                metrics::counter!(CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
                let tm = tenant_manager.clone();
                let pw = config.password.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = wire::process_connection(socket, tm, pw, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("timetable stopped");
    Ok(())
}
