use crate::printer::{Manager, Printer, PrinterEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default interval between detection cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// Periodic detection loop that diffs consecutive snapshots by printer id
/// and publishes add/remove events through the manager's channel.
///
/// Event consumers run on their own tasks (broadcast receivers), so the loop
/// never blocks on a slow subscriber.
pub struct Monitor {
    manager: Arc<Manager>,
    interval: Duration,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    pub fn new(manager: Arc<Manager>, interval: Duration) -> Self {
        Self {
            manager,
            interval,
            token: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Start the loop. A second call while running is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let manager = Arc::clone(&self.manager);
        let interval = self.interval;
        let token = self.token.clone();

        *handle = Some(tokio::spawn(async move {
            // First tick lands one full interval out, so startup detection
            // (done by the caller) is not immediately repeated.
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            let mut previous: HashMap<String, Printer> = HashMap::new();

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = snapshot_map(manager.detect().await);
                        let (added, removed) = diff_snapshots(&previous, &current);

                        for printer in added {
                            info!("printer added: {}", printer.description);
                            manager.emit(PrinterEvent::Added(printer));
                        }
                        for id in removed {
                            info!("printer removed: {}", id);
                            manager.emit(PrinterEvent::Removed(id));
                        }

                        previous = current;
                    }
                }
            }
            debug!("monitor loop exited");
        }));
    }

    /// Signal the loop and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn snapshot_map(printers: Vec<Printer>) -> HashMap<String, Printer> {
    printers
        .into_iter()
        .map(|printer| (printer.id.clone(), printer))
        .collect()
}

/// Compare two snapshots by id: printers only in `current` are added,
/// ids only in `previous` are removed.
fn diff_snapshots(
    previous: &HashMap<String, Printer>,
    current: &HashMap<String, Printer>,
) -> (Vec<Printer>, Vec<String>) {
    let mut added: Vec<Printer> = current
        .iter()
        .filter(|(id, _)| !previous.contains_key(*id))
        .map(|(_, printer)| printer.clone())
        .collect();
    added.sort_by(|a, b| a.id.cmp(&b.id));

    let mut removed: Vec<String> = previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .cloned()
        .collect();
    removed.sort();

    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::PrinterKind;

    fn network_printer(id: &str, host: &str) -> Printer {
        Printer {
            id: id.into(),
            kind: PrinterKind::Network {
                host: host.into(),
                port: 9100,
            },
            description: format!("Network: {host}:9100"),
            name: String::new(),
        }
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let previous = snapshot_map(vec![
            network_printer("a", "10.0.0.1"),
            network_printer("b", "10.0.0.2"),
        ]);
        let current = snapshot_map(vec![
            network_printer("b", "10.0.0.2"),
            network_printer("c", "10.0.0.3"),
        ]);

        let (added, removed) = diff_snapshots(&previous, &current);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, "c");
        assert_eq!(removed, vec!["a".to_string()]);
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let snapshot = snapshot_map(vec![network_printer("a", "10.0.0.1")]);
        let (added, removed) = diff_snapshots(&snapshot, &snapshot);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(Manager::new(&dir.path().join("registry.json")));
        let monitor = Monitor::new(manager, Duration::from_secs(60));

        monitor.start().await;
        monitor.stop().await;
        // A second stop must return immediately, not hang or panic.
        monitor.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(Manager::new(&dir.path().join("registry.json")));
        let monitor = Monitor::new(manager, Duration::from_secs(60));
        monitor.stop().await;
    }
}
