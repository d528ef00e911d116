use crate::printer::{PrinterInfo, PrinterKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// A persisted registry record, keyed by identity key in the on-disk JSON
/// document. Variant fields are flattened so the file reads as a flat object
/// per printer; absent optional fields are omitted rather than null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub identity_key: String,
    #[serde(flatten)]
    pub kind: PrinterKind,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

/// Persistent mapping from a printer's hardware identity to its logical id
/// and user-assigned display name.
///
/// The file is a cache of the in-memory map: every mutation rewrites it via
/// write-temp-then-rename, and a failed rewrite is logged but never fails the
/// call. The next successful mutation persists the missed state.
pub struct Registry {
    path: PathBuf,
    data: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    /// Open a registry file. A missing file is normal; a corrupt one is
    /// logged and treated as empty.
    pub fn open(path: &Path) -> Self {
        let data = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!("registry file {} is corrupt, starting empty: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("failed to read registry {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            data: RwLock::new(data),
        }
    }

    /// Look up the logical id for a printer, minting and persisting a fresh
    /// UUID the first time this identity is seen. Idempotent.
    pub fn get_or_create_id(&self, info: &PrinterInfo) -> String {
        let identity_key = info.identity_key();

        let mut data = self.data.write().unwrap();
        if let Some(entry) = data.get(&identity_key) {
            return entry.id.clone();
        }

        let id = uuid::Uuid::new_v4().to_string();
        let entry = RegistryEntry {
            id: id.clone(),
            identity_key: identity_key.clone(),
            kind: info.kind.clone(),
            description: info.description.clone(),
            name: String::new(),
        };
        debug!("registered printer {} as {}", identity_key, id);
        data.insert(identity_key, entry);
        self.persist(&data);

        id
    }

    /// The custom name for a printer, or empty when unset or unknown.
    pub fn get_name(&self, printer_id: &str) -> String {
        let data = self.data.read().unwrap();
        data.values()
            .find(|entry| entry.id == printer_id)
            .map(|entry| entry.name.clone())
            .unwrap_or_default()
    }

    /// Set (or, with an empty string, clear) a printer's custom name.
    /// Returns false when the id is unknown.
    pub fn set_name(&self, printer_id: &str, name: &str) -> bool {
        let mut data = self.data.write().unwrap();
        let Some(entry) = data.values_mut().find(|entry| entry.id == printer_id) else {
            return false;
        };
        entry.name = name.to_string();
        self.persist(&data);
        true
    }

    /// All stored facts about a printer, by logical id.
    pub fn get_info(&self, printer_id: &str) -> Option<RegistryEntry> {
        let data = self.data.read().unwrap();
        data.values().find(|entry| entry.id == printer_id).cloned()
    }

    /// Forget a printer. Returns false when the id is unknown.
    pub fn remove(&self, printer_id: &str) -> bool {
        let mut data = self.data.write().unwrap();
        let Some(key) = data
            .iter()
            .find(|(_, entry)| entry.id == printer_id)
            .map(|(key, _)| key.clone())
        else {
            return false;
        };
        data.remove(&key);
        self.persist(&data);
        true
    }

    /// A snapshot copy of every entry, keyed by identity key.
    pub fn all(&self) -> HashMap<String, RegistryEntry> {
        self.data.read().unwrap().clone()
    }

    /// Rewrite the registry file atomically. Called with the write lock held
    /// so rewrites cannot interleave; failure is logged and dropped, the
    /// in-memory state stays authoritative.
    fn persist(&self, data: &HashMap<String, RegistryEntry>) {
        if let Err(e) = self.try_persist(data) {
            warn!("failed to persist registry {}: {}", self.path.display(), e);
        }
    }

    fn try_persist(&self, data: &HashMap<String, RegistryEntry>) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}
