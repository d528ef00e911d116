use crate::commands::{CommandResult, Executor};
use crate::errors::{DaemonError, Result};
use crate::printer::Manager;
use crate::queue::PrintQueue;
use crate::receipt::{self, Receipt};
use crate::render;
use crate::template::{VariableArrayData, VariableData};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<Manager>,
    pub queue: Arc<PrintQueue>,
    pub executor: Arc<Executor>,
    pub start_time: Instant,
}

/// `POST /print` request body. Exactly one of the three receipt sources
/// must be present.
#[derive(Debug, Deserialize)]
struct PrintRequest {
    printer_id: String,
    #[serde(default)]
    receipt: Option<Receipt>,
    #[serde(default)]
    receipt_path: Option<String>,
    #[serde(default)]
    receipt_url: Option<String>,
    #[serde(default, rename = "variableData")]
    variable_data: Option<VariableData>,
    #[serde(default, rename = "variableArrayData")]
    variable_array_data: Option<VariableArrayData>,
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status = match &self {
            DaemonError::Validation(_) | DaemonError::Json(_) => StatusCode::BAD_REQUEST,
            DaemonError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// GET /printers - all live printers
async fn handle_get_printers(State(state): State<ApiState>) -> Json<Value> {
    let printers = state.manager.all_printers().await;
    Json(json!({ "printers": printers }))
}

/// POST /printer/{id}/name - set a custom display name
async fn handle_set_printer_name(
    State(state): State<ApiState>,
    Path(printer_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let name = body
        .get("name")
        .and_then(|value| value.as_str())
        .ok_or_else(|| DaemonError::Validation("name is required".into()))?
        .to_string();

    if !state.manager.set_printer_name(&printer_id, &name).await {
        return Err(DaemonError::NotFound("printer not found".into()));
    }

    info!("printer {} renamed to '{}'", printer_id, name);
    Ok(Json(json!({ "success": true })))
}

/// POST /printer/network - manually add a network printer
async fn handle_add_network_printer(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let host = body
        .get("host")
        .and_then(|value| value.as_str())
        .filter(|host| !host.is_empty())
        .ok_or_else(|| DaemonError::Validation("host is required".into()))?
        .to_string();
    let port = body
        .get("port")
        .and_then(|value| value.as_u64())
        .unwrap_or(9100) as u16;

    let description = format!("Network: {host}:{port}");
    let id = state
        .manager
        .add_network_printer(&host, port, &description)
        .await;

    if let Some(name) = body.get("name").and_then(|value| value.as_str()) {
        if !name.is_empty() {
            state.manager.set_printer_name(&id, name).await;
        }
    }

    let printer = state.manager.get_printer(&id).await;
    Ok(Json(json!({
        "success": true,
        "printer_id": id,
        "printer": printer,
    })))
}

/// POST /print - render a receipt and enqueue it
async fn handle_print(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    let request: PrintRequest = serde_json::from_value(body)
        .map_err(|e| DaemonError::Validation(format!("invalid print request: {e}")))?;

    debug!("print request for printer {}", request.printer_id);

    let sources = [
        request.receipt.is_some(),
        request.receipt_path.is_some(),
        request.receipt_url.is_some(),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if sources != 1 {
        return Err(DaemonError::Validation(
            "exactly one of receipt, receipt_path, receipt_url must be provided".into(),
        ));
    }

    let receipt = if let Some(receipt) = request.receipt {
        receipt
    } else if let Some(path) = request.receipt_path {
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| DaemonError::Validation(format!("failed to read receipt file: {e}")))?;
        receipt::parse(&data)?
    } else {
        let url = request.receipt_url.unwrap();
        let response = reqwest::get(&url)
            .await
            .map_err(|e| DaemonError::Validation(format!("failed to fetch receipt: {e}")))?;
        if !response.status().is_success() {
            return Err(DaemonError::Validation(format!(
                "failed to fetch receipt: HTTP {}",
                response.status().as_u16()
            )));
        }
        let data = response
            .bytes()
            .await
            .map_err(|e| DaemonError::Validation(format!("failed to read receipt: {e}")))?;
        receipt::parse(&data)?
    };

    receipt::validate(&receipt)?;

    let bitmap = render::render_receipt(
        &receipt,
        request.variable_data.unwrap_or_default(),
        request.variable_array_data.unwrap_or_default(),
    )
    .map_err(|e| match e {
        DaemonError::Validation(msg) => DaemonError::Validation(msg),
        other => DaemonError::Render(other.to_string()),
    })?;

    let job_id = state
        .queue
        .enqueue(&request.printer_id, Arc::new(bitmap))
        .await;

    info!(
        "print job {} enqueued via HTTP for printer {}",
        job_id, request.printer_id
    );
    Ok(Json(json!({ "success": true, "job_id": job_id })))
}

/// GET /jobs - all jobs in insertion order
async fn handle_get_jobs(State(state): State<ApiState>) -> Json<Value> {
    let jobs = state.queue.all().await;
    Json(json!({ "jobs": jobs }))
}

/// GET /job/{id} - one job
async fn handle_get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>> {
    let job = state
        .queue
        .get(&job_id)
        .await
        .ok_or_else(|| DaemonError::NotFound("job not found".into()))?;
    Ok(Json(serde_json::to_value(&job)?))
}

/// GET /health - liveness
async fn handle_health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// POST /command - the command bus over HTTP (used by the CLI)
async fn handle_command(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Json<CommandResult> {
    let command = body
        .get("command")
        .and_then(|value| value.as_str())
        .unwrap_or_default();

    Json(state.executor.execute(command).await)
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/printers", get(handle_get_printers))
        .route("/printer/{id}/name", post(handle_set_printer_name))
        .route("/printer/network", post(handle_add_network_printer))
        .route("/print", post(handle_print))
        .route("/jobs", get(handle_get_jobs))
        .route("/job/{id}", get(handle_get_job))
        .route("/health", get(handle_health))
        .route("/command", post(handle_command))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods([
                            axum::http::Method::GET,
                            axum::http::Method::POST,
                            axum::http::Method::OPTIONS,
                        ])
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves.
pub async fn start_api_server(
    addr: &str,
    state: ApiState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    info!("starting HTTP API server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            error!("HTTP API server error: {}", e);
            e.into()
        })
}
