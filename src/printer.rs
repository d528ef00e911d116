use crate::discovery;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Transport-specific coordinates of a printer.
///
/// Drivers, identity keys and the wire shape of a printer record all dispatch
/// on this variant, so adding a transport is an exhaustive-match exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrinterKind {
    Usb {
        vid: u16,
        pid: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },
    Serial {
        device: String,
    },
    Network {
        host: String,
        port: u16,
    },
}

impl PrinterKind {
    /// Derive the registry identity key for these hardware coordinates.
    ///
    /// When a variant's distinguishing fields are empty the key degrades to a
    /// hash of the description. That hash is unstable across driver string
    /// changes; it exists so detection never produces an unkeyable printer.
    pub fn identity_key(&self, description: &str) -> String {
        match self {
            PrinterKind::Usb { vid, pid, .. } if *vid != 0 && *pid != 0 => {
                format!("usb:{vid:04X}:{pid:04X}")
            }
            PrinterKind::Serial { device } if !device.is_empty() => {
                format!("serial:{device}")
            }
            PrinterKind::Network { host, port } if !host.is_empty() => {
                format!("network:{host}:{port}")
            }
            _ => format!("hash:{:x}", md5::compute(description)),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PrinterKind::Usb { .. } => "usb",
            PrinterKind::Serial { .. } => "serial",
            PrinterKind::Network { .. } => "network",
        }
    }
}

/// Detection-time facts about a printer, used to look up or mint its
/// persistent id. Never stored as-is.
#[derive(Debug, Clone)]
pub struct PrinterInfo {
    pub kind: PrinterKind,
    pub description: String,
}

impl PrinterInfo {
    pub fn identity_key(&self) -> String {
        self.kind.identity_key(&self.description)
    }
}

/// A live printer record as held in the manager's map and served over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printer {
    pub id: String,
    #[serde(flatten)]
    pub kind: PrinterKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Printer {
    /// The user-facing label: custom name when set, otherwise the description.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.description
        } else {
            &self.name
        }
    }
}

/// Detection events published by the manager.
#[derive(Debug, Clone)]
pub enum PrinterEvent {
    Added(Printer),
    Removed(String),
}

/// Owns the live printer map and the identity registry, and runs detection.
///
/// Subscribers receive add/remove announcements over a broadcast channel;
/// the monitor and the background network sweep are the producers.
pub struct Manager {
    registry: Registry,
    printers: RwLock<HashMap<String, Printer>>,
    sweep_started: AtomicBool,
    events: broadcast::Sender<PrinterEvent>,
}

impl Manager {
    pub fn new(registry_path: &Path) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry: Registry::open(registry_path),
            printers: RwLock::new(HashMap::new()),
            sweep_started: AtomicBool::new(false),
            events,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Subscribe to printer add/remove announcements.
    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: PrinterEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.events.send(event);
    }

    /// Scan every transport and replace the live map with the result.
    ///
    /// Scanner failures degrade to empty snapshots for that transport; one
    /// misbehaving subsystem never starves the others. The first call also
    /// launches the background LAN sweep, exactly once per process.
    #[tracing::instrument(skip(self))]
    pub async fn detect(self: &Arc<Self>) -> Vec<Printer> {
        let mut printers = Vec::new();

        // USB and serial enumeration are blocking; run them off the runtime.
        // A panic inside a scanner surfaces as a JoinError here and is
        // contained to that transport's snapshot.
        let manager = Arc::clone(self);
        match tokio::task::spawn_blocking(move || discovery::scan_usb(manager.registry())).await {
            Ok(found) => printers.extend(found),
            Err(e) => warn!("USB scan failed: {}", e),
        }

        let manager = Arc::clone(self);
        match tokio::task::spawn_blocking(move || discovery::scan_serial(manager.registry())).await
        {
            Ok(found) => printers.extend(found),
            Err(e) => warn!("serial scan failed: {}", e),
        }

        printers.extend(discovery::scan_system_printers(&self.registry).await);

        // Deduplicate by id, keeping first occurrence.
        let mut seen = HashMap::new();
        let mut unique = Vec::with_capacity(printers.len());
        for printer in printers {
            if seen.insert(printer.id.clone(), ()).is_none() {
                unique.push(printer);
            }
        }

        if !self.sweep_started.swap(true, Ordering::SeqCst) {
            info!("launching background network sweep");
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                discovery::sweep_local_networks(manager).await;
            });
        }

        let mut map = self.printers.write().await;
        map.clear();
        for printer in &unique {
            map.insert(printer.id.clone(), printer.clone());
        }
        drop(map);

        unique
    }

    pub async fn get_printer(&self, id: &str) -> Option<Printer> {
        self.printers.read().await.get(id).cloned()
    }

    pub async fn all_printers(&self) -> Vec<Printer> {
        self.printers.read().await.values().cloned().collect()
    }

    /// Set a custom display name; returns false when the id is unknown to the
    /// registry. The live record is updated in place when present.
    pub async fn set_printer_name(&self, id: &str, name: &str) -> bool {
        if !self.registry.set_name(id, name) {
            return false;
        }
        let mut map = self.printers.write().await;
        if let Some(printer) = map.get_mut(id) {
            printer.name = name.to_string();
        }
        true
    }

    /// Manually register a network printer and announce it.
    pub async fn add_network_printer(&self, host: &str, port: u16, description: &str) -> String {
        let kind = PrinterKind::Network {
            host: host.to_string(),
            port,
        };
        let info = PrinterInfo {
            kind: kind.clone(),
            description: description.to_string(),
        };
        let id = self.registry.get_or_create_id(&info);

        let printer = Printer {
            id: id.clone(),
            kind,
            description: description.to_string(),
            name: self.registry.get_name(&id),
        };

        self.printers
            .write()
            .await
            .insert(id.clone(), printer.clone());
        self.emit(PrinterEvent::Added(printer));

        id
    }

    /// Insert a printer discovered outside a detect cycle (the network sweep);
    /// no-op when the id is already live.
    pub(crate) async fn insert_if_absent(&self, printer: Printer) -> bool {
        let mut map = self.printers.write().await;
        if map.contains_key(&printer.id) {
            return false;
        }
        map.insert(printer.id.clone(), printer.clone());
        drop(map);
        self.emit(PrinterEvent::Added(printer));
        true
    }

    /// Whether the once-per-process network sweep has been launched.
    pub fn sweep_launched(&self) -> bool {
        self.sweep_started.load(Ordering::SeqCst)
    }
}
