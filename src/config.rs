use std::path::PathBuf;

/// Default HTTP port for the daemon.
pub const DEFAULT_PORT: u16 = 12212;

/// Name of the persisted printer registry file.
const REGISTRY_FILE: &str = "printer_registry.json";

/// Resolve the server port: `SERVER_PORT` env var, then a `--port <n>`
/// command-line flag, then the default.
pub fn server_port() -> u16 {
    if let Ok(port) = std::env::var("SERVER_PORT") {
        if let Ok(port) = port.parse() {
            return port;
        }
    }

    let args: Vec<String> = std::env::args().collect();
    for (i, arg) in args.iter().enumerate() {
        if arg == "--port" {
            if let Some(port) = args.get(i + 1).and_then(|p| p.parse().ok()) {
                return port;
            }
        }
    }

    DEFAULT_PORT
}

/// Resolve the path of the printer registry file.
///
/// Preference order: next to the executable (if that directory is writable),
/// the current working directory, then a per-user config directory.
pub fn registry_path() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            if dir_is_writable(exe_dir) {
                return exe_dir.join(REGISTRY_FILE);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        return cwd.join(REGISTRY_FILE);
    }

    let config_dir = dirs::config_dir()
        .map(|p| p.join("receiptd"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&config_dir);
    config_dir.join(REGISTRY_FILE)
}

/// Probe a directory for write access by creating and removing a marker file.
fn dir_is_writable(dir: &std::path::Path) -> bool {
    let probe = dir.join(".receiptd-write-test");
    match std::fs::File::create(&probe) {
        Ok(f) => {
            drop(f);
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
