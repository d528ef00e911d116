use crate::errors::{DaemonError, Result};
use rusb::{ConfigDescriptor, Context, DeviceHandle, Direction, TransferType, UsbContext};
use serialport::SerialPort;
use std::io::Write;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default baud rate for serial thermal printers.
pub const DEFAULT_BAUD: u32 = 9600;

const USB_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(100);
const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TCP_WRITE_TIMEOUT: Duration = Duration::from_secs(20);
const TCP_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// An open byte channel to one printer.
///
/// Every variant serializes its writes behind an internal lock, so concurrent
/// print calls against the same connection cannot interleave byte streams.
pub enum Connection {
    Usb(UsbConnection),
    Serial(SerialConnection),
    Network(NetworkConnection),
    #[cfg(test)]
    Mock(MockConnection),
}

impl Connection {
    /// Write the full buffer, returning the number of bytes written.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        match self {
            Connection::Usb(conn) => conn.write(data).await,
            Connection::Serial(conn) => conn.write(data).await,
            Connection::Network(conn) => conn.write(data).await,
            #[cfg(test)]
            Connection::Mock(conn) => conn.write(data),
        }
    }

    /// Release the underlying device. Best effort; errors are logged.
    pub async fn close(&self) {
        match self {
            Connection::Usb(conn) => conn.close().await,
            Connection::Serial(conn) => conn.close().await,
            Connection::Network(conn) => conn.close().await,
            #[cfg(test)]
            Connection::Mock(_) => {}
        }
    }
}

// ============================================================================
// USB
// ============================================================================

struct UsbIo {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint: u8,
}

/// A claimed USB interface with a bulk OUT endpoint.
///
/// rusb I/O is synchronous, so opens and writes run on the blocking pool.
pub struct UsbConnection {
    io: Arc<StdMutex<UsbIo>>,
    vid: u16,
    pid: u16,
}

impl UsbConnection {
    /// Open a device by VID:PID, detach any kernel driver, and claim an
    /// interface with a bulk OUT endpoint.
    pub async fn open(vid: u16, pid: u16) -> Result<Self> {
        let io = tokio::task::spawn_blocking(move || open_usb_blocking(vid, pid))
            .await
            .map_err(|e| DaemonError::DeviceUnavailable(format!("USB open task failed: {e}")))??;

        Ok(Self {
            io: Arc::new(StdMutex::new(io)),
            vid,
            pid,
        })
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let io = Arc::clone(&self.io);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let io = io.lock().unwrap();
            io.handle
                .write_bulk(io.endpoint, &data, USB_WRITE_TIMEOUT)
                .map_err(|e| DaemonError::Transport(format!("USB write failed: {e}")))
        })
        .await
        .map_err(|e| DaemonError::Transport(format!("USB write task failed: {e}")))?
    }

    async fn close(&self) {
        let io = Arc::clone(&self.io);
        let (vid, pid) = (self.vid, self.pid);
        let _ = tokio::task::spawn_blocking(move || {
            let io = io.lock().unwrap();
            if let Err(e) = io.handle.release_interface(io.interface) {
                debug!("failed to release USB interface on {vid:04X}:{pid:04X}: {e}");
            }
        })
        .await;
    }
}

/// Find a device by VID:PID and claim an interface exposing a bulk OUT
/// endpoint. Strategy: the default configuration's first interface, then the
/// active configuration, then every configuration with one delayed claim
/// retry.
fn open_usb_blocking(vid: u16, pid: u16) -> Result<UsbIo> {
    let ctx = Context::new().map_err(DaemonError::Usb)?;
    let devices = ctx.devices().map_err(DaemonError::Usb)?;

    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => continue,
        };
        if desc.vendor_id() != vid || desc.product_id() != pid {
            continue;
        }

        let handle = device.open().map_err(|e| {
            DaemonError::DeviceUnavailable(format!(
                "failed to open USB device {vid:04X}:{pid:04X}: {e}"
            ))
        })?;
        // Not supported on every platform; the claim below still decides.
        let _ = handle.set_auto_detach_kernel_driver(true);

        if let Ok(config) = device.config_descriptor(0) {
            if let Some((interface, endpoint)) = first_interface_out(&config) {
                if handle.claim_interface(interface).is_ok() {
                    return Ok(UsbIo {
                        handle,
                        interface,
                        endpoint,
                    });
                }
            }
        }

        if let Ok(config) = device.active_config_descriptor() {
            if let Some((interface, endpoint)) = any_out_endpoint(&config) {
                if handle.claim_interface(interface).is_ok() {
                    return Ok(UsbIo {
                        handle,
                        interface,
                        endpoint,
                    });
                }
            }
        }

        for index in 0..desc.num_configurations() {
            let Ok(config) = device.config_descriptor(index) else {
                continue;
            };
            let Some((interface, endpoint)) = any_out_endpoint(&config) else {
                continue;
            };
            if handle.claim_interface(interface).is_err() {
                std::thread::sleep(CLAIM_RETRY_DELAY);
                if let Err(e) = handle.claim_interface(interface) {
                    warn!("claim retry on interface {interface} of {vid:04X}:{pid:04X} failed: {e}");
                    continue;
                }
            }
            return Ok(UsbIo {
                handle,
                interface,
                endpoint,
            });
        }

        return Err(DaemonError::DeviceUnavailable(format!(
            "no OUT endpoint found on {vid:04X}:{pid:04X}"
        )));
    }

    Err(DaemonError::DeviceUnavailable(format!(
        "USB device not found: {vid:04X}:{pid:04X}"
    )))
}

/// Bulk OUT endpoint on the first interface only.
fn first_interface_out(config: &ConfigDescriptor) -> Option<(u8, u8)> {
    let interface = config.interfaces().next()?;
    for alt in interface.descriptors() {
        for endpoint in alt.endpoint_descriptors() {
            if endpoint.direction() == Direction::Out
                && endpoint.transfer_type() == TransferType::Bulk
            {
                return Some((alt.interface_number(), endpoint.address()));
            }
        }
    }
    None
}

/// Bulk OUT endpoint anywhere in the configuration.
fn any_out_endpoint(config: &ConfigDescriptor) -> Option<(u8, u8)> {
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            for endpoint in alt.endpoint_descriptors() {
                if endpoint.direction() == Direction::Out
                    && endpoint.transfer_type() == TransferType::Bulk
                {
                    return Some((alt.interface_number(), endpoint.address()));
                }
            }
        }
    }
    None
}

// ============================================================================
// Serial
// ============================================================================

/// A serial printer connection (RS-232 or USB-serial node).
pub struct SerialConnection {
    port: Arc<StdMutex<Box<dyn SerialPort>>>,
    device: String,
}

impl SerialConnection {
    pub async fn open(device: &str, baud: u32) -> Result<Self> {
        let baud = if baud == 0 { DEFAULT_BAUD } else { baud };
        let path = device.to_string();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&path, baud)
                .timeout(Duration::from_secs(10))
                .open()
                .map_err(|e| {
                    DaemonError::DeviceUnavailable(format!("failed to open serial port {path}: {e}"))
                })
        })
        .await
        .map_err(|e| DaemonError::DeviceUnavailable(format!("serial open task failed: {e}")))??;

        Ok(Self {
            port: Arc::new(StdMutex::new(port)),
            device: device.to_string(),
        })
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let port = Arc::clone(&self.port);
        let device = self.device.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = port.lock().unwrap();
            port.write_all(&data)
                .and_then(|_| port.flush())
                .map(|_| data.len())
                .map_err(|e| DaemonError::Transport(format!("serial write to {device} failed: {e}")))
        })
        .await
        .map_err(|e| DaemonError::Transport(format!("serial write task failed: {e}")))?
    }

    async fn close(&self) {
        // Dropping the port handle releases the device node.
        debug!("closing serial connection to {}", self.device);
    }
}

// ============================================================================
// Network
// ============================================================================

/// A raw-TCP printer connection (JetDirect port 9100 or LPR 515).
pub struct NetworkConnection {
    stream: Mutex<TcpStream>,
    address: String,
}

impl NetworkConnection {
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        let address = format!("{host}:{port}");
        let stream = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| DaemonError::Unreachable(format!("connection timed out to {address}")))?
            .map_err(|e| DaemonError::Unreachable(format!("failed to connect to {address}: {e}")))?;

        set_tcp_keepalive(&stream);

        Ok(Self {
            stream: Mutex::new(stream),
            address,
        })
    }

    async fn write(&self, data: &[u8]) -> Result<usize> {
        let mut stream = self.stream.lock().await;

        tokio::time::timeout(TCP_WRITE_TIMEOUT, stream.write_all(data))
            .await
            .map_err(|_| {
                DaemonError::Transport(format!(
                    "write timed out to {} ({} bytes)",
                    self.address,
                    data.len()
                ))
            })?
            .map_err(|e| DaemonError::Transport(format!("write to {} failed: {e}", self.address)))?;

        tokio::time::timeout(TCP_FLUSH_TIMEOUT, stream.flush())
            .await
            .map_err(|_| DaemonError::Transport(format!("flush timed out to {}", self.address)))?
            .map_err(|e| DaemonError::Transport(format!("flush to {} failed: {e}", self.address)))?;

        Ok(data.len())
    }

    async fn close(&self) {
        let mut stream = self.stream.lock().await;
        if let Err(e) = stream.shutdown().await {
            debug!("failed to shut down connection to {}: {e}", self.address);
        }
    }
}

/// Configure TCP keepalive so a silently dead printer link is detected.
/// Keepalive: idle 30s, interval 10s. Uses socket2 via the raw fd/socket.
#[cfg(unix)]
fn set_tcp_keepalive(stream: &TcpStream) {
    use std::os::unix::io::{AsRawFd, FromRawFd};

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));

    let fd = stream.as_raw_fd();
    // Safety: from_raw_fd + forget, so the fd is never double-closed.
    let socket = unsafe { socket2::Socket::from_raw_fd(fd) };

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        debug!("failed to set TCP keepalive: {} (non-fatal)", e);
    }

    // tokio still owns the fd.
    std::mem::forget(socket);
}

#[cfg(windows)]
fn set_tcp_keepalive(stream: &TcpStream) {
    use std::os::windows::io::{AsRawSocket, FromRawSocket};

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(30))
        .with_interval(Duration::from_secs(10));

    let raw = stream.as_raw_socket();
    let socket = unsafe { socket2::Socket::from_raw_socket(raw) };

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        debug!("failed to set TCP keepalive: {} (non-fatal)", e);
    }

    std::mem::forget(socket);
}

// ============================================================================
// Test double
// ============================================================================

/// In-memory connection with a programmable failure plan, for queue and pool
/// tests. Compiled only into the test harness.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockConnection {
    state: Arc<StdMutex<MockState>>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    fail_next: usize,
    attempts: usize,
    writes: Vec<Vec<u8>>,
}

#[cfg(test)]
impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` writes before succeeding.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// Total write attempts, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Successful writes only.
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }

    pub fn last_write(&self) -> Option<Vec<u8>> {
        self.state.lock().unwrap().writes.last().cloned()
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(DaemonError::Transport("simulated write failure".into()));
        }
        state.writes.push(data.to_vec());
        Ok(data.len())
    }
}
