use crate::bitmap::Bitmap;
use crate::connection::{Connection, NetworkConnection, SerialConnection, UsbConnection, DEFAULT_BAUD};
use crate::discovery;
use crate::errors::{DaemonError, Result};
use crate::escpos;
use crate::printer::{Printer, PrinterKind};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Shared pool of open printer connections, keyed by logical printer id.
///
/// Connections are opened lazily on first use and live until an explicit
/// disconnect or shutdown; there is no idle eviction. The map lock is never
/// held across a device write - the drivers carry their own write locks.
pub struct ConnectionPool {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Open a connection for the printer unless one already exists.
    #[tracing::instrument(skip(self, printer), fields(printer_id = %printer.id))]
    pub async fn connect(&self, printer: &Printer) -> Result<()> {
        if self.is_connected(&printer.id).await {
            return Ok(());
        }

        let conn = match &printer.kind {
            PrinterKind::Usb { vid, pid, .. } => match UsbConnection::open(*vid, *pid).await {
                Ok(conn) => Connection::Usb(conn),
                Err(err) if cfg!(target_os = "macos") => {
                    // macOS frequently exposes USB printers only as serial
                    // nodes. Heuristic: take the first candidate node that
                    // opens; it can bind the wrong device.
                    warn!(
                        "USB open failed for {:04X}:{:04X}, trying serial fallback: {}",
                        vid, pid, err
                    );
                    match self.open_serial_fallback().await {
                        Some(conn) => Connection::Serial(conn),
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            },
            PrinterKind::Serial { device } => {
                Connection::Serial(SerialConnection::open(device, DEFAULT_BAUD).await?)
            }
            PrinterKind::Network { host, port } => {
                Connection::Network(NetworkConnection::open(host, *port).await?)
            }
        };

        let mut connections = self.connections.write().await;
        if connections.contains_key(&printer.id) {
            // Lost the open race; keep the established entry.
            drop(connections);
            conn.close().await;
            return Ok(());
        }
        connections.insert(printer.id.clone(), Arc::new(conn));
        info!("connected to printer {}", printer.id);
        Ok(())
    }

    async fn open_serial_fallback(&self) -> Option<SerialConnection> {
        for candidate in discovery::serial_port_candidates() {
            debug!("trying serial fallback port {}", candidate);
            match SerialConnection::open(&candidate, DEFAULT_BAUD).await {
                Ok(conn) => {
                    info!("serial fallback connected via {}", candidate);
                    return Some(conn);
                }
                Err(e) => debug!("serial fallback {} failed: {}", candidate, e),
            }
        }
        None
    }

    /// Encode the bitmap and write it to the printer's connection.
    /// Requires a prior `connect`; driver errors propagate to the caller.
    pub async fn print(&self, printer_id: &str, bitmap: &Bitmap) -> Result<()> {
        let conn = {
            let connections = self.connections.read().await;
            connections.get(printer_id).cloned()
        }
        .ok_or_else(|| DaemonError::NotFound(format!("printer not connected: {printer_id}")))?;

        let data = escpos::encode_bitmap(bitmap);
        conn.write(&data).await?;
        Ok(())
    }

    /// Close and drop the printer's connection; no-op when absent.
    pub async fn disconnect(&self, printer_id: &str) {
        let conn = self.connections.write().await.remove(printer_id);
        if let Some(conn) = conn {
            conn.close().await;
            info!("disconnected printer {}", printer_id);
        }
    }

    /// Close every connection (shutdown path).
    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, Arc<Connection>)> =
            self.connections.write().await.drain().collect();
        for (id, conn) in drained {
            conn.close().await;
            debug!("disconnected printer {}", id);
        }
    }

    pub async fn is_connected(&self, printer_id: &str) -> bool {
        self.connections.read().await.contains_key(printer_id)
    }

    /// Install a pre-built connection, bypassing the drivers. Test seam.
    #[cfg(test)]
    pub(crate) async fn install(&self, printer_id: &str, conn: Connection) {
        self.connections
            .write()
            .await
            .insert(printer_id.to_string(), Arc::new(conn));
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MockConnection;

    #[tokio::test]
    async fn print_requires_a_connection() {
        let pool = ConnectionPool::new();
        let bitmap = Bitmap::new(8, 8);
        let err = pool.print("ghost", &bitmap).await.unwrap_err();
        assert!(matches!(err, DaemonError::NotFound(_)));
    }

    #[tokio::test]
    async fn print_writes_encoded_stream_once() {
        let pool = ConnectionPool::new();
        let mock = MockConnection::new();
        pool.install("p1", Connection::Mock(mock.clone())).await;

        let bitmap = Bitmap::new(8, 2);
        pool.print("p1", &bitmap).await.unwrap();

        assert_eq!(mock.write_count(), 1);
        let written = mock.last_write().unwrap();
        assert_eq!(written, escpos::encode_bitmap(&bitmap));
    }

    #[tokio::test]
    async fn disconnect_removes_entry() {
        let pool = ConnectionPool::new();
        pool.install("p1", Connection::Mock(MockConnection::new()))
            .await;
        assert!(pool.is_connected("p1").await);

        pool.disconnect("p1").await;
        assert!(!pool.is_connected("p1").await);

        // Disconnecting again is a no-op.
        pool.disconnect("p1").await;
    }

    #[tokio::test]
    async fn disconnect_all_clears_pool() {
        let pool = ConnectionPool::new();
        pool.install("a", Connection::Mock(MockConnection::new()))
            .await;
        pool.install("b", Connection::Mock(MockConnection::new()))
            .await;

        pool.disconnect_all().await;
        assert!(!pool.is_connected("a").await);
        assert!(!pool.is_connected("b").await);
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let pool = ConnectionPool::new();
        let mock = MockConnection::new();
        mock.fail_next(1);
        pool.install("p1", Connection::Mock(mock.clone())).await;

        let err = pool.print("p1", &Bitmap::new(8, 1)).await.unwrap_err();
        assert!(matches!(err, DaemonError::Transport(_)));
        assert_eq!(mock.attempt_count(), 1);
        assert_eq!(mock.write_count(), 0);
    }
}
