// Shared fixtures for integration tests.

use receiptd::{PrinterInfo, PrinterKind};

#[allow(dead_code)]
pub fn epson_usb_info() -> PrinterInfo {
    PrinterInfo {
        kind: PrinterKind::Usb {
            vid: 0x04b8,
            pid: 0x0e15,
            device: None,
        },
        description: "USB: Epson TM-T20 (04B8:0E15)".into(),
    }
}

#[allow(dead_code)]
pub fn network_info(host: &str, port: u16) -> PrinterInfo {
    PrinterInfo {
        kind: PrinterKind::Network {
            host: host.into(),
            port,
        },
        description: format!("Network: {host}:{port}"),
    }
}

#[allow(dead_code)]
pub fn serial_info(device: &str) -> PrinterInfo {
    PrinterInfo {
        kind: PrinterKind::Serial {
            device: device.into(),
        },
        description: format!("Serial: {device}"),
    }
}
