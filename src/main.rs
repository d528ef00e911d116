use receiptd::api::{self, ApiState};
use receiptd::commands::Executor;
use receiptd::monitor::{Monitor, DEFAULT_INTERVAL};
use receiptd::pool::ConnectionPool;
use receiptd::printer::{Manager, PrinterEvent};
use receiptd::queue::{PrintQueue, DEFAULT_MAX_RETRIES};
use receiptd::{config, Printer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    info!("========================================");
    info!("receiptd starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("========================================");

    let port = config::server_port();
    let registry_path = config::registry_path();
    info!("registry file: {}", registry_path.display());

    let manager = Arc::new(Manager::new(&registry_path));

    // Initial detection; the monitor keeps it fresh from here.
    let printers = manager.detect().await;
    info!("found {} printer(s)", printers.len());
    for printer in &printers {
        log_printer(printer);
    }

    let pool = Arc::new(ConnectionPool::new());
    let queue = Arc::new(PrintQueue::new(
        Arc::clone(&pool),
        Arc::clone(&manager),
        DEFAULT_MAX_RETRIES,
    ));
    let executor = Arc::new(Executor::new(Arc::clone(&manager), Arc::clone(&queue)));

    let monitor = Monitor::new(Arc::clone(&manager), DEFAULT_INTERVAL);
    monitor.start().await;

    // Surface detection events in the log; frontends subscribe the same way.
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PrinterEvent::Added(printer)) => {
                    info!("printer connected: {}", printer.display_name());
                }
                Ok(PrinterEvent::Removed(id)) => {
                    info!("printer disconnected: {}", id);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let state = ApiState {
        manager: Arc::clone(&manager),
        queue: Arc::clone(&queue),
        executor,
        start_time: Instant::now(),
    };

    let addr = format!("0.0.0.0:{port}");
    if let Err(e) = api::start_api_server(&addr, state, shutdown_signal()).await {
        error!("server error: {}", e);
    }

    info!("shutting down...");
    queue.stop().await;
    monitor.stop().await;
    pool.disconnect_all().await;
    info!("receiptd stopped");
}

fn log_printer(printer: &Printer) {
    info!(
        "  {} [{}] {}",
        printer.id,
        printer.kind.label(),
        printer.display_name()
    );
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}
