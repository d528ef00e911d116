use crate::printer::{Manager, Printer, PrinterInfo, PrinterKind};
use crate::registry::Registry;
use regex::Regex;
use rusb::{constants::LIBUSB_CLASS_PRINTER, Context, Device, DeviceDescriptor, UsbContext};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Ports probed by the LAN sweep: raw printing (9100) and LPR (515).
const SWEEP_PORTS: [u16; 2] = [9100, 515];

/// Per-address probe timeout during the LAN sweep.
const SWEEP_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// How many hosts of each interface's subnet the sweep visits.
const SWEEP_HOST_LIMIT: u8 = 100;

/// Timeout for the system print-service query.
const LPSTAT_TIMEOUT: Duration = Duration::from_secs(2);

/// Enumerate USB devices and propose every printer-class device.
///
/// A device qualifies when its device class is Printer (7) or any interface
/// declares the printer class. Descriptor fetch failures are skipped without
/// comment - USB enumeration is noisy. An absent USB subsystem yields an
/// empty snapshot, not an error.
pub fn scan_usb(registry: &Registry) -> Vec<Printer> {
    let ctx = match Context::new() {
        Ok(ctx) => ctx,
        Err(_) => return Vec::new(),
    };
    let devices = match ctx.devices() {
        Ok(devices) => devices,
        Err(_) => return Vec::new(),
    };

    let mut printers = Vec::new();
    for device in devices.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(_) => continue,
        };

        if !is_printer_device(&device, &desc) {
            continue;
        }

        let vid = desc.vendor_id();
        let pid = desc.product_id();

        let description = match usb_strings(&device, &desc) {
            Some((manufacturer, product))
                if !manufacturer.is_empty() || !product.is_empty() =>
            {
                format!("USB: {manufacturer} {product} ({vid:04X}:{pid:04X})")
            }
            _ => format!("USB: {vid:04X}:{pid:04X}"),
        };

        let kind = PrinterKind::Usb {
            vid,
            pid,
            device: None,
        };
        let info = PrinterInfo {
            kind: kind.clone(),
            description: description.clone(),
        };
        let id = registry.get_or_create_id(&info);
        let name = registry.get_name(&id);

        printers.push(Printer {
            id,
            kind,
            description,
            name,
        });
    }

    printers
}

fn is_printer_device(device: &Device<Context>, desc: &DeviceDescriptor) -> bool {
    if desc.class_code() == LIBUSB_CLASS_PRINTER {
        return true;
    }
    for index in 0..desc.num_configurations() {
        let Ok(config) = device.config_descriptor(index) else {
            continue;
        };
        for interface in config.interfaces() {
            for alt in interface.descriptors() {
                if alt.class_code() == LIBUSB_CLASS_PRINTER {
                    return true;
                }
            }
        }
    }
    false
}

/// Best-effort read of the manufacturer and product strings.
fn usb_strings(device: &Device<Context>, desc: &DeviceDescriptor) -> Option<(String, String)> {
    let handle = device.open().ok()?;
    let timeout = Duration::from_secs(1);
    let languages = handle.read_languages(timeout).ok()?;
    let language = *languages.first()?;
    let manufacturer = handle
        .read_manufacturer_string(language, desc, timeout)
        .unwrap_or_default();
    let product = handle
        .read_product_string(language, desc, timeout)
        .unwrap_or_default();
    Some((manufacturer.trim().to_string(), product.trim().to_string()))
}

/// Propose every serial device node that matches the platform's naming
/// conventions. Existence is sufficient; no open probe is performed.
pub fn scan_serial(registry: &Registry) -> Vec<Printer> {
    serial_port_candidates()
        .into_iter()
        .map(|device| {
            let base = device.rsplit('/').next().unwrap_or(&device).to_string();
            let description = format!("Serial: {base}");
            let kind = PrinterKind::Serial {
                device: device.clone(),
            };
            let info = PrinterInfo {
                kind: kind.clone(),
                description: description.clone(),
            };
            let id = registry.get_or_create_id(&info);
            let name = registry.get_name(&id);
            Printer {
                id,
                kind,
                description,
                name,
            }
        })
        .collect()
}

/// Platform serial device nodes worth proposing as printers.
///
/// Also used by the pool's macOS USB-to-serial fallback.
pub fn serial_port_candidates() -> Vec<String> {
    if cfg!(target_os = "macos") {
        const SKIP_PATTERNS: &[&str] = &[
            "Bluetooth",
            "Modem",
            "SPP",
            "DialIn",
            "Callout",
            "KeySerial",
            "debug-console",
        ];
        let mut ports = dev_nodes(&["cu.", "tty."]);
        ports.retain(|port| !SKIP_PATTERNS.iter().any(|pattern| port.contains(pattern)));
        ports
    } else if cfg!(target_os = "linux") {
        dev_nodes(&["ttyUSB", "ttyACM", "ttyS"])
    } else if cfg!(windows) {
        // COM1-COM32; higher ports are vanishingly rare for printers.
        (1..=32).map(|i| format!("COM{i}")).collect()
    } else {
        Vec::new()
    }
}

fn dev_nodes(prefixes: &[&str]) -> Vec<String> {
    let mut ports = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefixes.iter().any(|prefix| name.starts_with(prefix)) {
                ports.push(format!("/dev/{name}"));
            }
        }
    }
    ports.sort();
    ports
}

/// Query the host print service (CUPS) for configured network printers.
/// Fast, bounded, and non-fatal: any failure yields an empty snapshot.
pub async fn scan_system_printers(registry: &Registry) -> Vec<Printer> {
    if cfg!(windows) {
        // No lpstat on Windows; the sweep covers network printers there.
        return Vec::new();
    }

    let output = tokio::time::timeout(
        LPSTAT_TIMEOUT,
        tokio::process::Command::new("lpstat").arg("-v").output(),
    )
    .await;

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_lpstat_output(registry, &stdout)
        }
        _ => Vec::new(),
    }
}

/// Parse `lpstat -v` lines of the form
/// `device for NAME: socket://HOST:PORT` or `device for NAME: ipp://HOST/...`.
///
/// IPP/HTTP printers are proposed on raw port 9100 - most network printers
/// speak both, and the daemon only talks raw.
fn parse_lpstat_output(registry: &Registry, output: &str) -> Vec<Printer> {
    let device_re = Regex::new(r"device for ([^:]+):\s*(.+)").unwrap();
    let network_re = Regex::new(r"(?:socket|ipp|http)://([^:/]+):?(\d+)?").unwrap();

    let mut printers = Vec::new();
    for line in output.lines() {
        let Some(device) = device_re.captures(line) else {
            continue;
        };
        let printer_name = device[1].trim().to_string();
        let device_uri = device[2].trim().to_string();

        let Some(network) = network_re.captures(&device_uri) else {
            continue;
        };
        let host = network[1].to_string();
        let uri_port: u16 = network
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(9100);

        let (port, description) = if device_uri.contains("ipp://") || device_uri.contains("http://")
        {
            (9100, format!("Network: {printer_name} ({host})"))
        } else if device_uri.contains("socket://") {
            (uri_port, format!("Network: {printer_name} ({host}:{uri_port})"))
        } else {
            continue;
        };

        let kind = PrinterKind::Network {
            host: host.clone(),
            port,
        };
        let info = PrinterInfo {
            kind: kind.clone(),
            description: description.clone(),
        };
        let id = registry.get_or_create_id(&info);
        let name = registry.get_name(&id);
        printers.push(Printer {
            id,
            kind,
            description,
            name,
        });
    }

    printers
}

/// Walk each up, non-loopback IPv4 interface's subnet probing printer ports.
///
/// Launched in the background at most once per process. Hits are inserted
/// straight into the live map and announced; `detect()` may clobber an
/// insert, in which case a later cycle re-acquires the printer.
pub async fn sweep_local_networks(manager: Arc<Manager>) {
    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!("network sweep skipped, interface enumeration failed: {}", e);
            return;
        }
    };

    for (interface, addr) in interfaces {
        let IpAddr::V4(ip) = addr else {
            continue;
        };
        if ip.is_loopback() {
            continue;
        }

        debug!("sweeping subnet of {} ({})", interface, ip);
        let octets = ip.octets();

        // The interface API exposes addresses without masks; assume a /24,
        // which the first-100-hosts bound keeps within anyway.
        for host in 1..=SWEEP_HOST_LIMIT {
            let candidate = Ipv4Addr::new(octets[0], octets[1], octets[2], host);
            if candidate == ip {
                continue;
            }

            for port in SWEEP_PORTS {
                let target = SocketAddr::from((candidate, port));
                let probe = tokio::time::timeout(SWEEP_PROBE_TIMEOUT, TcpStream::connect(target));
                let Ok(Ok(stream)) = probe.await else {
                    continue;
                };
                drop(stream);

                let description = format!("Network: {candidate}:{port}");
                let kind = PrinterKind::Network {
                    host: candidate.to_string(),
                    port,
                };
                let info = PrinterInfo {
                    kind: kind.clone(),
                    description: description.clone(),
                };
                let id = manager.registry().get_or_create_id(&info);
                let name = manager.registry().get_name(&id);
                let printer = Printer {
                    id,
                    kind,
                    description: description.clone(),
                    name,
                };

                if manager.insert_if_absent(printer).await {
                    info!("network sweep found printer at {}", description);
                }
                // One open port is enough for this host.
                break;
            }
        }
    }

    debug!("network sweep finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry(dir: &tempfile::TempDir) -> Registry {
        Registry::open(&dir.path().join("registry.json"))
    }

    #[test]
    fn lpstat_socket_uri_parses_host_and_port() {
        let dir = tempfile::tempdir().unwrap();
        let registry = test_registry(&dir);

        let output = "device for FrontDesk: socket://192.168.1.42:9100\n";
        let printers = parse_lpstat_output(&registry, output);
        assert_eq!(printers.len(), 1);
        assert_eq!(
            printers[0].kind,
            PrinterKind::Network {
                host: "192.168.1.42".into(),
                port: 9100
            }
        );
        assert_eq!(printers[0].description, "Network: FrontDesk (192.168.1.42:9100)");
    }

    #[test]
    fn lpstat_ipp_uri_maps_to_raw_port() {
        let dir = tempfile::tempdir().unwrap();
        let registry = test_registry(&dir);

        let output = "device for Kitchen: ipp://10.0.0.9:631/ipp/print\n";
        let printers = parse_lpstat_output(&registry, output);
        assert_eq!(printers.len(), 1);
        assert_eq!(
            printers[0].kind,
            PrinterKind::Network {
                host: "10.0.0.9".into(),
                port: 9100
            }
        );
    }

    #[test]
    fn lpstat_ignores_non_network_uris() {
        let dir = tempfile::tempdir().unwrap();
        let registry = test_registry(&dir);

        let output = "device for Local: usb://EPSON/TM-T20\nno default destination\n";
        assert!(parse_lpstat_output(&registry, output).is_empty());
    }

    #[test]
    fn lpstat_ids_are_stable_across_scans() {
        let dir = tempfile::tempdir().unwrap();
        let registry = test_registry(&dir);

        let output = "device for FrontDesk: socket://192.168.1.42:9100\n";
        let first = parse_lpstat_output(&registry, output);
        let second = parse_lpstat_output(&registry, output);
        assert_eq!(first[0].id, second[0].id);
    }
}
