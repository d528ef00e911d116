use crate::errors::{DaemonError, Result};
use crate::printer::Manager;
use crate::queue::PrintQueue;
use crate::receipt::{self, Receipt};
use crate::render;
use crate::template::{VariableArrayData, VariableData};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound for `--repeat`.
const MAX_REPEAT: u32 = 100;

/// Delay before a `server stop`/`restart` exits, letting the response flush.
const EXIT_FLUSH_DELAY: Duration = Duration::from_millis(200);

/// Exit code asking a supervisor to restart the daemon.
const RESTART_EXIT_CODE: i32 = 42;

/// Outcome of a command-bus invocation, also the `/command` wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            ..Default::default()
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Executes command strings against the manager and queue. Shared by the
/// HTTP `/command` endpoint and (through it) the CLI.
pub struct Executor {
    manager: Arc<Manager>,
    queue: Arc<PrintQueue>,
}

impl Executor {
    pub fn new(manager: Arc<Manager>, queue: Arc<PrintQueue>) -> Self {
        Self { manager, queue }
    }

    pub async fn execute(&self, command: &str) -> CommandResult {
        let parts = split_command(command);
        if parts.is_empty() {
            return CommandResult::fail("empty command");
        }

        let (head, args) = (parts[0].as_str(), &parts[1..]);
        match head {
            "print" => self.handle_print(args).await,
            "printer" => self.handle_printer(args).await,
            "job" => self.handle_job(args).await,
            "detect" => self.handle_detect().await,
            "server" => self.handle_server(args).await,
            "help" => handle_help(),
            other => CommandResult::fail(format!(
                "unknown command: {other}. Type 'help' for available commands"
            )),
        }
    }

    async fn handle_print(&self, args: &[String]) -> CommandResult {
        const USAGE: &str = "usage: print <printer-id> <receipt-path> [--repeat N] [--var key=value] [--var-array key=value1,value2]";
        if args.len() < 2 {
            return CommandResult::fail(USAGE);
        }

        let printer_id = &args[0];
        let receipt_arg = &args[1];

        let Some(printer) = self.manager.get_printer(printer_id).await else {
            return CommandResult::fail(format!("printer not found: {printer_id}"));
        };

        // Load the receipt document; options start after the source args.
        let (receipt, options_idx) = match load_receipt_source(receipt_arg, args).await {
            Ok(loaded) => loaded,
            Err(e) => return CommandResult::fail(e.to_string()),
        };

        if let Err(e) = receipt::validate(&receipt) {
            return CommandResult::fail(format!("invalid receipt: {e}"));
        }

        let options = match parse_print_options(&args[options_idx.min(args.len())..]) {
            Ok(options) => options,
            Err(e) => return CommandResult::fail(e.to_string()),
        };

        let bitmap = match render::render_receipt(&receipt, options.variables, options.arrays) {
            Ok(bitmap) => Arc::new(bitmap),
            Err(e) => return CommandResult::fail(format!("failed to render receipt: {e}")),
        };

        let mut job_ids = Vec::with_capacity(options.repeat as usize);
        for _ in 0..options.repeat {
            job_ids.push(self.queue.enqueue(printer_id, Arc::clone(&bitmap)).await);
        }

        let mut data = Map::new();
        data.insert("printer_id".into(), json!(printer_id));
        data.insert("job_ids".into(), json!(job_ids));
        data.insert("repeat".into(), json!(options.repeat));
        if options.repeat == 1 {
            data.insert("job_id".into(), json!(job_ids[0]));
        }

        info!(
            "queued {} print job(s) for printer {}",
            options.repeat, printer_id
        );
        CommandResult::ok_with(
            format!(
                "Queued {} print job(s) (Printer: {})",
                options.repeat,
                printer.display_name()
            ),
            Value::Object(data),
        )
    }

    async fn handle_printer(&self, args: &[String]) -> CommandResult {
        if args.is_empty() {
            return CommandResult::fail("usage: printer <list|add-network|rename>");
        }

        match args[0].as_str() {
            "list" => {
                let printers = self.manager.all_printers().await;
                CommandResult::ok_with(
                    format!("Found {} printer(s):", printers.len()),
                    json!({ "printers": printers }),
                )
            }
            "add-network" => {
                if args.len() < 2 {
                    return CommandResult::fail("usage: printer add-network <host> [port]");
                }
                let host = &args[1];
                let port: u16 = match args.get(2) {
                    Some(raw) => match raw.parse() {
                        Ok(port) => port,
                        Err(_) => return CommandResult::fail(format!("invalid port: {raw}")),
                    },
                    None => 9100,
                };
                let description = format!("Network: {host}:{port}");
                let id = self
                    .manager
                    .add_network_printer(host, port, &description)
                    .await;
                let printer = self.manager.get_printer(&id).await;
                CommandResult::ok_with(
                    format!("Added network printer: {description} (ID: {id})"),
                    json!({ "printer_id": id, "printer": printer }),
                )
            }
            "rename" => {
                if args.len() < 3 {
                    return CommandResult::fail("usage: printer rename <id> <name>");
                }
                let (id, name) = (&args[1], &args[2]);
                let Some(printer) = self.manager.get_printer(id).await else {
                    return CommandResult::fail(format!("printer not found: {id}"));
                };
                let old_name = printer.display_name().to_string();
                if !self.manager.set_printer_name(id, name).await {
                    return CommandResult::fail(format!("failed to rename printer: {id}"));
                }
                CommandResult::ok_with(
                    format!("Renamed printer {id} from '{old_name}' to '{name}'"),
                    json!({ "printer_id": id, "old_name": old_name, "new_name": name }),
                )
            }
            other => CommandResult::fail(format!(
                "unknown printer subcommand: {other}. Use: list, add-network, rename"
            )),
        }
    }

    async fn handle_job(&self, args: &[String]) -> CommandResult {
        if args.is_empty() {
            return CommandResult::fail("usage: job <list|status|clear>");
        }

        match args[0].as_str() {
            "list" => {
                let jobs = self.queue.all().await;
                CommandResult::ok_with(
                    format!("Found {} job(s):", jobs.len()),
                    json!({ "jobs": jobs }),
                )
            }
            "status" => {
                if args.len() < 2 {
                    return CommandResult::fail("usage: job status <id>");
                }
                let id = &args[1];
                let Some(job) = self.queue.get(id).await else {
                    return CommandResult::fail(format!("job not found: {id}"));
                };
                let mut message = format!(
                    "Job {}: status={}, printer={}, retries={}",
                    job.id,
                    job.status.as_str(),
                    job.printer_id,
                    job.retries
                );
                if let Some(error) = &job.error {
                    message.push_str(&format!(", error={error}"));
                }
                CommandResult::ok_with(message, serde_json::to_value(&job).unwrap_or(Value::Null))
            }
            "clear" => {
                let removed = self.queue.clear_completed().await;
                let message = if removed > 0 {
                    format!("Cleared {removed} completed job(s)")
                } else {
                    "Cleared completed jobs".to_string()
                };
                CommandResult::ok(message)
            }
            other => CommandResult::fail(format!(
                "unknown job subcommand: {other}. Use: list, status, clear"
            )),
        }
    }

    async fn handle_detect(&self) -> CommandResult {
        let printers = self.manager.detect().await;
        CommandResult::ok_with(
            format!("Detected {} printer(s):", printers.len()),
            json!({ "printers": printers }),
        )
    }

    async fn handle_server(&self, args: &[String]) -> CommandResult {
        if args.is_empty() {
            return CommandResult::fail("usage: server <status|stop|restart>");
        }

        match args[0].as_str() {
            "status" => CommandResult::ok_with(
                "Server status",
                json!({
                    "pid": std::process::id(),
                    "printer_cnt": self.manager.all_printers().await.len(),
                    "job_cnt": self.queue.all().await.len(),
                }),
            ),
            "stop" | "off" | "shutdown" => {
                warn!("server stop requested via command bus");
                exit_after_flush(0);
                CommandResult::ok("Server shutting down...")
            }
            "restart" => {
                warn!("server restart requested via command bus");
                exit_after_flush(RESTART_EXIT_CODE);
                CommandResult::ok("Server restarting...")
            }
            other => CommandResult::fail(format!(
                "unknown server subcommand: {other} (use: status, stop, restart)"
            )),
        }
    }
}

/// Let the in-flight HTTP response flush before the process exits.
fn exit_after_flush(code: i32) {
    tokio::spawn(async move {
        tokio::time::sleep(EXIT_FLUSH_DELAY).await;
        std::process::exit(code);
    });
}

/// Resolve the receipt source argument: `--compose` inline commands,
/// a `compose://<base64>` wrapper, a URL, or a file path. Returns the parsed
/// receipt and the index where flag parsing starts.
async fn load_receipt_source(receipt_arg: &str, args: &[String]) -> Result<(Receipt, usize)> {
    if receipt_arg == "--compose" {
        let mut end = 2;
        while end < args.len() && !args[end].starts_with("--") {
            end += 1;
        }
        if end == 2 {
            return Err(DaemonError::Validation(
                "usage: print <printer-id> --compose <commands...> [--repeat N] [--var key=value]"
                    .into(),
            ));
        }
        let receipt_json = compose_receipt_json(&args[2..end])?;
        return Ok((receipt::parse(&receipt_json)?, end));
    }

    if let Some(encoded) = receipt_arg.strip_prefix("compose://") {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DaemonError::Validation(format!("failed to decode receipt JSON: {e}")))?;
        return Ok((receipt::parse(&raw)?, 2));
    }

    if receipt_arg.starts_with("http://") || receipt_arg.starts_with("https://") {
        let response = reqwest::get(receipt_arg)
            .await
            .map_err(|e| DaemonError::Validation(format!("failed to fetch receipt from URL: {e}")))?;
        if !response.status().is_success() {
            return Err(DaemonError::Validation(format!(
                "failed to fetch receipt: HTTP {}",
                response.status().as_u16()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| DaemonError::Validation(format!("failed to read receipt from URL: {e}")))?;
        return Ok((receipt::parse(&body)?, 2));
    }

    let data = tokio::fs::read(receipt_arg)
        .await
        .map_err(|e| DaemonError::Validation(format!("failed to read receipt file: {e}")))?;
    Ok((receipt::parse(&data)?, 2))
}

struct PrintOptions {
    repeat: u32,
    variables: VariableData,
    arrays: VariableArrayData,
}

/// Parse `--repeat`, `--var` and `--var-array` flags (space- or `=`-joined).
fn parse_print_options(args: &[String]) -> Result<PrintOptions> {
    let mut repeat: i64 = 1;
    let mut variables = VariableData::new();
    let mut arrays = VariableArrayData::new();

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];

        let mut take_value = |name: &str| -> Option<String> {
            if let Some(joined) = arg.strip_prefix(&format!("{name}=")) {
                return Some(joined.to_string());
            }
            if arg == name {
                let value = args.get(i + 1).cloned();
                if value.is_some() {
                    i += 1;
                }
                return value;
            }
            None
        };

        if arg == "--repeat" || arg.starts_with("--repeat=") {
            let raw = take_value("--repeat")
                .ok_or_else(|| DaemonError::Validation("usage: --repeat <number>".into()))?;
            repeat = raw
                .parse()
                .map_err(|_| DaemonError::Validation(format!("invalid --repeat value: {raw}")))?;
        } else if arg == "--var" || arg.starts_with("--var=") {
            let raw = take_value("--var")
                .ok_or_else(|| DaemonError::Validation("usage: --var key=value".into()))?;
            if let Some((key, value)) = raw.split_once('=') {
                variables.insert(key.to_string(), json!(value));
            }
        } else if arg == "--var-array" || arg.starts_with("--var-array=") {
            let raw = take_value("--var-array")
                .ok_or_else(|| DaemonError::Validation("usage: --var-array name=v1,v2".into()))?;
            if let Some((key, values)) = raw.split_once('=') {
                let rows: Vec<HashMap<String, Value>> = values
                    .split(',')
                    .map(|value| {
                        HashMap::from([("value".to_string(), json!(value.trim()))])
                    })
                    .collect();
                arrays.insert(key.to_string(), rows);
            }
        }

        i += 1;
    }

    if repeat < 1 {
        return Err(DaemonError::Validation("--repeat must be >= 1".into()));
    }
    if repeat > MAX_REPEAT as i64 {
        return Err(DaemonError::Validation(format!(
            "--repeat too large (max {MAX_REPEAT})"
        )));
    }

    Ok(PrintOptions {
        repeat: repeat as u32,
        variables,
        arrays,
    })
}

/// Split a command string into arguments, honoring single and double quotes.
pub fn split_command(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in input.trim().chars() {
        match ch {
            '"' | '\'' => match quote {
                None => quote = Some(ch),
                Some(open) if open == ch => quote = None,
                Some(_) => current.push(ch),
            },
            ' ' if quote.is_none() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            other => current.push(other),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Command names that open a new compose command. `align` is deliberately
/// absent: it is a property of text commands, not a command.
const COMPOSE_COMMANDS: &[&str] = &[
    "text:", "feed:", "cut", "divider", "image:", "barcode:", "qrcode:",
];

fn is_command_start(arg: &str) -> bool {
    COMPOSE_COMMANDS.iter().any(|command| {
        arg.starts_with(command) || arg == command.trim_end_matches(':')
    })
}

/// Turn compose arguments into a receipt JSON document.
///
/// The output is byte-identical whether the commands travel inline or
/// base64-wrapped as `compose://...` - both paths serialize this exact value.
pub fn compose_receipt_json(compose_args: &[String]) -> Result<Vec<u8>> {
    if compose_args.is_empty() {
        return Err(DaemonError::Validation(
            "no compose arguments provided".into(),
        ));
    }

    let mut commands: Vec<Value> = Vec::new();
    let mut current: Option<Map<String, Value>> = None;

    for arg in compose_args {
        if is_command_start(arg) {
            if let Some(done) = current.take() {
                commands.push(Value::Object(done));
            }
            current = Some(parse_compose_command_start(arg)?);
        } else if let Some(command) = current.as_mut() {
            parse_command_property(command, arg)?;
        } else {
            return Err(DaemonError::Validation(format!(
                "unexpected argument '{arg}' (expected command start)"
            )));
        }
    }
    if let Some(done) = current.take() {
        commands.push(Value::Object(done));
    }

    let receipt = json!({
        "version": "1.0",
        "commands": commands,
    });

    serde_json::to_vec(&receipt)
        .map_err(|e| DaemonError::Validation(format!("failed to marshal receipt JSON: {e}")))
}

fn parse_compose_command_start(arg: &str) -> Result<Map<String, Value>> {
    let mut command = Map::new();

    let Some((kind, first_value)) = arg.split_once(':') else {
        // Bare command such as `cut` or `divider`.
        command.insert("type".into(), json!(arg));
        return Ok(command);
    };

    command.insert("type".into(), json!(kind));
    match kind {
        "text" => {
            command.insert("value".into(), json!(trim_quotes(first_value)));
        }
        "feed" => {
            let lines: i64 = first_value.parse().map_err(|_| {
                DaemonError::Validation(format!("invalid feed lines value: {first_value}"))
            })?;
            command.insert("lines".into(), json!(lines));
        }
        "image" => {
            command.insert("path".into(), json!(trim_quotes(first_value)));
        }
        _ => {
            command.insert("value".into(), json!(trim_quotes(first_value)));
        }
    }

    Ok(command)
}

/// Properties are `name:value`; numbers and booleans are typed, everything
/// else stays a string.
fn parse_command_property(command: &mut Map<String, Value>, arg: &str) -> Result<()> {
    let Some((name, value)) = arg.split_once(':') else {
        return Err(DaemonError::Validation(format!(
            "property must be in format 'name:value', got: {arg}"
        )));
    };

    let typed = if let Ok(number) = value.parse::<i64>() {
        json!(number)
    } else if let Ok(flag) = value.parse::<bool>() {
        json!(flag)
    } else {
        json!(trim_quotes(value))
    };
    command.insert(name.to_string(), typed);
    Ok(())
}

fn trim_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

fn handle_help() -> CommandResult {
    let help = r#"Available Commands:

  print <printer-id> <receipt-path> [--var key=value]
    Print a receipt to the specified printer

  print <printer-id> --compose <commands...>
    Compose and print a receipt from command-line arguments

    Available Commands:
      text:"Hello"                    - Text with value
      text:"Title" size:32 align:center weight:bold - Text with properties
      feed:2                          - Feed N lines
      cut                             - Cut paper
      divider                         - Add divider line
      divider style:solid|dashed|dotted|double - Divider with style
      image:"/path/to/image.png"      - Print image from path
      barcode:"123456"                - Print barcode
      qrcode:"https://example.com"    - Print QR code

    Note: Use align as a property of text commands (e.g., text:"Hello" align:center)

    Example: print printer-123 --compose text:"Hello" feed:2 cut

  server status
    Show server info (pid, printers, jobs)

  server stop|off|shutdown
    Stop the running server process

  server restart
    Exit with restart code (for supervisors)

  printer list
    List all detected printers

  printer add-network <host> [port]
    Add a network printer (default port: 9100)

  printer rename <id> <name>
    Set a custom name for a printer

  job list
    List all print jobs

  job status <id>
    Get status of a specific job

  job clear
    Clear completed jobs from the queue

  detect
    Detect/scan for printers

  help
    Show this help message
"#;

    CommandResult::ok(help)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_honors_quotes() {
        let parts = split_command(r#"printer rename p1 "Kitchen Printer""#);
        assert_eq!(parts, vec!["printer", "rename", "p1", "Kitchen Printer"]);

        let parts = split_command("print p1 --compose text:'Hello World' cut");
        assert_eq!(parts, vec!["print", "p1", "--compose", "text:Hello World", "cut"]);
    }

    #[test]
    fn compose_builds_typed_command_list() {
        let args = strings(&[
            "text:\"Hi\"",
            "size:32",
            "align:center",
            "feed:2",
            "cut",
        ]);
        let raw = compose_receipt_json(&args).unwrap();
        let value: Value = serde_json::from_slice(&raw).unwrap();

        assert_eq!(value["version"], "1.0");
        let commands = value["commands"].as_array().unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            json!({"type": "text", "value": "Hi", "size": 32, "align": "center"})
        );
        assert_eq!(commands[1], json!({"type": "feed", "lines": 2}));
        assert_eq!(commands[2], json!({"type": "cut"}));
    }

    #[test]
    fn compose_round_trips_through_base64() {
        let args = strings(&["text:\"Hi\"", "size:32", "align:center", "feed:2", "cut"]);
        let inline = compose_receipt_json(&args).unwrap();

        let wrapped = format!(
            "compose://{}",
            base64::engine::general_purpose::STANDARD.encode(&inline)
        );
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(wrapped.strip_prefix("compose://").unwrap())
            .unwrap();

        assert_eq!(inline, decoded);
        // And both parse into the same receipt.
        let a = receipt::parse(&inline).unwrap();
        let b = receipt::parse(&decoded).unwrap();
        assert_eq!(a.commands, b.commands);
    }

    #[test]
    fn compose_rejects_orphan_property() {
        let args = strings(&["size:32"]);
        assert!(compose_receipt_json(&args).is_err());
    }

    #[test]
    fn compose_rejects_bad_feed_count() {
        let args = strings(&["feed:lots"]);
        assert!(compose_receipt_json(&args).is_err());
    }

    #[test]
    fn repeat_bounds_are_validated() {
        assert!(parse_print_options(&strings(&["--repeat", "0"])).is_err());
        assert!(parse_print_options(&strings(&["--repeat", "101"])).is_err());
        assert!(parse_print_options(&strings(&["--repeat", "abc"])).is_err());

        let options = parse_print_options(&strings(&["--repeat", "1"])).unwrap();
        assert_eq!(options.repeat, 1);
        let options = parse_print_options(&strings(&[])).unwrap();
        assert_eq!(options.repeat, 1);
        let options = parse_print_options(&strings(&["--repeat=100"])).unwrap();
        assert_eq!(options.repeat, 100);
    }

    #[test]
    fn var_flags_collect_data() {
        let options = parse_print_options(&strings(&[
            "--var",
            "customer=Ada",
            "--var=total=12.50",
            "--var-array",
            "items=Coffee, Tea",
        ]))
        .unwrap();

        assert_eq!(options.variables["customer"], json!("Ada"));
        assert_eq!(options.variables["total"], json!("12.50"));
        let rows = &options.arrays["items"];
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["value"], json!("Coffee"));
        assert_eq!(rows[1]["value"], json!("Tea"));
    }
}
