//! Thin CLI for a running receiptd daemon.
//!
//! Commands are forwarded verbatim to the daemon's `/command` endpoint,
//! except `--compose` argument runs, which are pre-encoded into a
//! `compose://<base64>` receipt so quoting survives the trip.

use base64::Engine;
use receiptd::commands::{compose_receipt_json, CommandResult};
use serde_json::{json, Value};

const DEFAULT_SERVER_URL: &str = "http://localhost:12212";

#[tokio::main]
async fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut server_url = DEFAULT_SERVER_URL.to_string();
    if let Some(pos) = args.iter().position(|a| a == "-s" || a == "--server") {
        if pos + 1 < args.len() {
            server_url = args.remove(pos + 1);
            args.remove(pos);
        } else {
            eprintln!("Error: {} requires a URL", args[pos]);
            std::process::exit(1);
        }
    }

    if args.is_empty() {
        print_usage();
        std::process::exit(1);
    }

    let command = match build_command(args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {message}");
            std::process::exit(1);
        }
    };

    let result = execute_command(&server_url, &command).await;
    if result.success {
        print_success(&result);
        std::process::exit(0);
    } else {
        print_error(&result);
        std::process::exit(1);
    }
}

/// Join the arguments into a bus command, replacing a `--compose` run with
/// its base64-wrapped receipt.
fn build_command(args: Vec<String>) -> Result<String, String> {
    let compose_index = if args.first().map(String::as_str) == Some("print") {
        args.iter().position(|a| a == "--compose")
    } else {
        None
    };

    let Some(compose_index) = compose_index else {
        return Ok(join_quoted(&args));
    };

    let rest = &args[compose_index + 1..];
    let compose_end = rest
        .iter()
        .position(|a| a.starts_with("--"))
        .unwrap_or(rest.len());
    let compose_args = &rest[..compose_end];
    if compose_args.is_empty() {
        return Err("--compose requires at least one command argument".into());
    }

    let receipt_json =
        compose_receipt_json(compose_args).map_err(|e| format!("creating composed receipt: {e}"))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(receipt_json);

    let mut rebuilt: Vec<String> = args[..compose_index].to_vec();
    rebuilt.push(format!("compose://{encoded}"));
    rebuilt.extend_from_slice(&rest[compose_end..]);
    Ok(join_quoted(&rebuilt))
}

/// Re-quote arguments containing spaces so the bus splitter reassembles them.
fn join_quoted(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') {
                format!("\"{arg}\"")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn execute_command(server_url: &str, command: &str) -> CommandResult {
    let url = format!("{}/command", server_url.trim_end_matches('/'));

    let response = match reqwest::Client::new()
        .post(&url)
        .json(&json!({ "command": command }))
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            return CommandResult {
                success: false,
                error: Some(format!("failed to connect to server: {e}")),
                ..Default::default()
            }
        }
    };

    match response.json::<CommandResult>().await {
        Ok(result) => result,
        Err(e) => CommandResult {
            success: false,
            error: Some(format!("failed to parse response: {e}")),
            ..Default::default()
        },
    }
}

fn print_success(result: &CommandResult) {
    if let Some(message) = &result.message {
        println!("{message}");
    }

    let Some(data) = &result.data else {
        return;
    };

    if let Some(printers) = data.get("printers").and_then(Value::as_array) {
        for printer in printers {
            println!("  {}", format_printer(printer));
        }
    }

    if let Some(jobs) = data.get("jobs").and_then(Value::as_array) {
        for job in jobs {
            println!("  {}", format_job(job));
        }
    }

    if let Some(job_id) = data.get("job_id").and_then(Value::as_str) {
        println!("  Job ID: {job_id}");
    }
}

fn format_printer(printer: &Value) -> String {
    let id = text(printer, "id");
    let kind = text(printer, "type");
    let display = {
        let name = text(printer, "name");
        if name.is_empty() {
            let description = text(printer, "description");
            if description.is_empty() {
                "Unnamed".to_string()
            } else {
                description
            }
        } else {
            name
        }
    };

    let mut line = format!("{id}: {display} ({kind}");
    match kind.as_str() {
        "network" => {
            let host = text(printer, "host");
            let port = printer.get("port").and_then(Value::as_u64).unwrap_or(0);
            if !host.is_empty() && port > 0 {
                line.push_str(&format!(", {host}:{port}"));
            }
        }
        "serial" => {
            let device = text(printer, "device");
            if !device.is_empty() {
                line.push_str(&format!(", {device}"));
            }
        }
        "usb" => {
            let vid = printer.get("vid").and_then(Value::as_u64).unwrap_or(0);
            let pid = printer.get("pid").and_then(Value::as_u64).unwrap_or(0);
            if vid > 0 && pid > 0 {
                line.push_str(&format!(", VID:0x{vid:04X} PID:0x{pid:04X}"));
            }
        }
        _ => {}
    }
    line.push(')');
    line
}

fn format_job(job: &Value) -> String {
    let mut line = format!(
        "{}: {} (printer: {}, retries: {})",
        text(job, "id"),
        text(job, "status"),
        text(job, "printer_id"),
        job.get("retries").and_then(Value::as_u64).unwrap_or(0)
    );
    let error = text(job, "error");
    if !error.is_empty() {
        line.push_str(&format!(" error: {error}"));
    }
    line
}

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn print_error(result: &CommandResult) {
    if let Some(error) = &result.error {
        eprintln!("Error: {error}");
    } else {
        eprintln!("Error: command failed");
    }
}

fn print_usage() {
    eprintln!(
        r#"receiptd CLI

Usage:
  receipt-cli [flags] <command>

Flags:
  -s, --server <url>   Server URL (default: {DEFAULT_SERVER_URL})

Commands:
  print <printer-id> (<path>|<url>) [--repeat N] [--var key=value] [--var-array key=v1,v2]
  print <printer-id> --compose <commands...> [--repeat N]
  printer list | add-network <host> [port] | rename <id> <name>
  job list | status <id> | clear
  detect
  server status|stop|restart
  help

Examples:
  receipt-cli print printer-123 ./receipt.receipt
  receipt-cli print printer-123 --compose text:"Hello" feed:2 cut
  receipt-cli printer add-network 192.168.1.100 9100
  receipt-cli -s http://localhost:8080 printer list
"#
    );
}
