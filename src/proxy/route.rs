//! Gateway path → backend resolution

use serde::Serialize;

use crate::config::AppConfig;
use crate::constants::{CONTROL_NAMESPACE, STREAM_NAMESPACE};
use crate::error::RouteError;

/// Where one inbound connection is relayed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub backend_host: String,
    pub backend_port: u16,
    /// Path on the backend, starting with `/`
    pub path: String,
    /// Frames are relayed as binary rather than text
    pub binary_mode: bool,
}

impl Route {
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.backend_host, self.backend_port, self.path)
    }
}

/// Maps `<namespace>/<target>` paths to routes.
///
/// - `control/<x>` goes to the mixer's control port at `/<x>`; binary only
///   for `control/stream`, the mixer's audio stream.
/// - `stream/<id>` goes to engine instance `id` at `web_base_port + id`.
#[derive(Debug, Clone)]
pub struct RouteResolver {
    backend_host: String,
    mixer_control_port: u16,
    engine_web_base_port: u16,
    engine_ws_path: String,
}

impl RouteResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            backend_host: config.gateway.backend_host.clone(),
            mixer_control_port: config.mixer.control_port,
            engine_web_base_port: config.engine.web_base_port,
            engine_ws_path: config.engine.ws_path.clone(),
        }
    }

    pub fn resolve(&self, path: &str) -> Result<Route, RouteError> {
        let mut segments = path.trim_start_matches('/').splitn(2, '/');
        let namespace = segments.next().unwrap_or_default();
        let target = segments.next().unwrap_or_default().trim_end_matches('/');

        match namespace {
            CONTROL_NAMESPACE => {
                if target.is_empty() {
                    return Err(RouteError::MissingTarget(namespace.to_string()));
                }
                Ok(Route {
                    backend_host: self.backend_host.clone(),
                    backend_port: self.mixer_control_port,
                    path: format!("/{target}"),
                    binary_mode: target == "stream",
                })
            }
            STREAM_NAMESPACE => {
                if target.is_empty() {
                    return Err(RouteError::MissingTarget(namespace.to_string()));
                }
                let port = target
                    .parse::<u16>()
                    .ok()
                    .and_then(|id| self.engine_web_base_port.checked_add(id))
                    .ok_or_else(|| RouteError::InvalidInstance(target.to_string()))?;
                Ok(Route {
                    backend_host: self.backend_host.clone(),
                    backend_port: port,
                    path: self.engine_ws_path.clone(),
                    binary_mode: false,
                })
            }
            other => Err(RouteError::UnknownNamespace(other.to_string())),
        }
    }
}
