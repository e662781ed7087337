//! HTTP API handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::config::{GatewayConfig, InstanceDescriptor};
use crate::process::LogClassifier;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// One engine instance as the web client sees it
#[derive(Debug, Serialize)]
pub struct InstanceInfo {
    /// Display id, `ENGINE-<id>`
    pub stream_id: String,
    pub id: u16,
    /// Port the instance's WebSocket API listens on
    pub port: u16,
}

impl From<InstanceDescriptor> for InstanceInfo {
    fn from(instance: InstanceDescriptor) -> Self {
        Self {
            stream_id: format!("ENGINE-{}", instance.id),
            id: instance.id,
            port: instance.control_port,
        }
    }
}

#[derive(Serialize)]
pub struct Settings {
    pub gateway: GatewayConfig,
    pub instances: Vec<InstanceInfo>,
    pub extensions: Vec<String>,
    pub mixer_control_port: u16,
}

/// List the engine instances
pub async fn get_instances(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<InstanceInfo>>> {
    let instances = state.config.instances().into_iter().map(InstanceInfo::from).collect();
    Json(ApiResponse::ok(instances))
}

/// Settings the web client needs to find its way around
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Settings>> {
    let config = &state.config;
    Json(ApiResponse::ok(Settings {
        gateway: config.gateway.clone(),
        instances: config.instances().into_iter().map(InstanceInfo::from).collect(),
        extensions: config.engine.enabled_extensions(),
        mixer_control_port: config.mixer.control_port,
    }))
}

/// Start a library scan with the first engine's config.
///
/// The response starts with a `{"started_at": ...}` line and then streams
/// the scanner's output as it runs.
pub async fn scan_library(State(state): State<Arc<AppState>>) -> Response {
    let config = &state.config;

    let mut command = Command::new(&config.engine.binary);
    command
        .arg("--config")
        .arg(config.engine_config_file(0))
        .args(&config.engine.scan_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to start library scan: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::error(format!("failed to start scan: {e}"))),
            )
                .into_response();
        }
    };

    let started_at = chrono::Utc::now().to_rfc3339();
    tracing::info!("Library scan started at {}", started_at);
    let ack = format!("{}\n", serde_json::json!({ "started_at": started_at }));

    let output = match child.stdout.take() {
        Some(stdout) => {
            let lines = BufReader::new(stdout).lines();
            // The child rides along so it lives as long as the response body
            stream::unfold(Some((lines, child)), |state| async move {
                let (mut lines, mut child) = state?;
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        LogClassifier::Engine.emit("scan", &line);
                        Some((Ok::<_, std::io::Error>(format!("{line}\n")), Some((lines, child))))
                    }
                    Ok(None) => {
                        match child.wait().await {
                            Ok(status) => tracing::info!("Library scan finished: {}", status),
                            Err(e) => tracing::warn!("Library scan wait failed: {}", e),
                        }
                        None
                    }
                    Err(e) => Some((Err(e), None)),
                }
            })
            .boxed()
        }
        None => stream::empty().boxed(),
    };

    let body = stream::once(async move { Ok(ack) }).chain(output);
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], Body::from_stream(body)).into_response()
}
