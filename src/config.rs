//! Gateway configuration
//!
//! Read once at startup from JSON (or TOML, by file extension) and shared
//! behind an `Arc` afterwards. Every section has defaults so a partial file
//! is enough to get going.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::ConfigError;

/// Root configuration tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub engine: EngineConfig,
    pub mixer: MixerConfig,
    pub templates: TemplateConfig,
}

/// How the engines hand their audio to the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// One named pipe per stream
    Fifo,
    /// Anything else; engines push to the mixer over TCP
    #[default]
    #[serde(other)]
    Tcp,
}

impl SourceType {
    pub fn is_fifo(self) -> bool {
        self == SourceType::Fifo
    }
}

/// Network-facing gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    /// Directory served for non-API, non-WebSocket requests
    pub static_dir: PathBuf,
    pub source_type: SourceType,
    /// Where named pipes are created when `source_type` is fifo
    pub fifo_dir: PathBuf,
    /// Host the engines and the mixer listen on
    pub backend_host: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            static_dir: PathBuf::from("static"),
            source_type: SourceType::default(),
            fifo_dir: PathBuf::from("/tmp"),
            backend_host: "127.0.0.1".to_string(),
        }
    }
}

/// Extension toggle passed to the engine template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub enabled: bool,
}

/// Playback engine pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub binary: String,
    /// Pool size
    pub instances: u16,
    /// Base of the per-instance HTTP/WebSocket control port
    pub web_base_port: u16,
    pub mpd_base_port: u16,
    /// Base of the per-instance TCP sink the mixer reads from
    pub tcp_sink_base_port: u16,
    /// Directory the per-instance configs are written to
    pub config_path: PathBuf,
    /// WebSocket path on the engine's control port
    pub ws_path: String,
    /// Arguments appended after `--config <path>` for a library rescan
    pub scan_args: Vec<String>,
    pub extensions: BTreeMap<String, ExtensionConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "mopidy".to_string(),
            instances: 1,
            web_base_port: DEFAULT_ENGINE_WEB_BASE_PORT,
            mpd_base_port: DEFAULT_ENGINE_MPD_BASE_PORT,
            tcp_sink_base_port: DEFAULT_TCP_SINK_BASE_PORT,
            config_path: PathBuf::from("/tmp"),
            ws_path: "/mopidy/ws".to_string(),
            scan_args: vec!["local".to_string(), "scan".to_string()],
            extensions: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Names of the enabled extensions, sorted
    pub fn enabled_extensions(&self) -> Vec<String> {
        self.extensions
            .iter()
            .filter(|(_, ext)| ext.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A stream fed to the mixer from outside the engine pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalStream {
    pub name: String,
    #[serde(default)]
    pub source_type: SourceType,
    /// Source URI for non-fifo streams
    #[serde(default)]
    pub uri: Option<String>,
}

/// Stream mixer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub binary: String,
    pub codec: String,
    /// Local HTTP/WebSocket control port of the mixer
    pub control_port: u16,
    /// Port clients connect to for audio
    pub stream_port: u16,
    /// Directory the mixer config is written to
    pub config_path: PathBuf,
    pub additional_streams: Vec<AdditionalStream>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            binary: "snapserver".to_string(),
            codec: "flac".to_string(),
            control_port: DEFAULT_MIXER_CONTROL_PORT,
            stream_port: DEFAULT_MIXER_STREAM_PORT,
            config_path: PathBuf::from("/tmp"),
            additional_streams: Vec::new(),
        }
    }
}

/// Template lookup settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory holding `engine.hbs` / `mixer.hbs` overrides
    pub path: Option<PathBuf>,
}

/// Ports of one pool member, always derived from the config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceDescriptor {
    pub id: u16,
    /// HTTP/WebSocket control port (`web_base_port + id`)
    pub control_port: u16,
    pub mpd_port: u16,
    /// TCP sink port (`tcp_sink_base_port + id`)
    pub stream_port: u16,
}

impl AppConfig {
    /// Load configuration from a file.
    ///
    /// `.toml` files are parsed as TOML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!("Loading config file {}", path.display());

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: AppConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)?,
            _ => serde_json::from_str(&text)?,
        };

        config.validate()?;
        tracing::debug!("Config file is valid");
        Ok(config)
    }

    /// Check invariants the supervisors and the router rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.binary is empty".into()));
        }
        if self.mixer.binary.trim().is_empty() {
            return Err(ConfigError::Invalid("mixer.binary is empty".into()));
        }

        let n = self.engine.instances;
        for (name, base) in [
            ("engine.web_base_port", self.engine.web_base_port),
            ("engine.mpd_base_port", self.engine.mpd_base_port),
            ("engine.tcp_sink_base_port", self.engine.tcp_sink_base_port),
        ] {
            if n > 0 && base.checked_add(n - 1).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{name} {base} leaves no room for {n} instances"
                )));
            }
        }
        Ok(())
    }

    /// Ports of instance `id`.
    ///
    /// Ports saturate at `u16::MAX`; `validate` rejects layouts where that
    /// could happen for ids inside the pool.
    pub fn instance(&self, id: u16) -> InstanceDescriptor {
        InstanceDescriptor {
            id,
            control_port: self.engine.web_base_port.saturating_add(id),
            mpd_port: self.engine.mpd_base_port.saturating_add(id),
            stream_port: self.engine.tcp_sink_base_port.saturating_add(id),
        }
    }

    /// Descriptors for ids `0..instances`
    pub fn instances(&self) -> Vec<InstanceDescriptor> {
        (0..self.engine.instances).map(|id| self.instance(id)).collect()
    }

    /// Per-instance engine config file
    pub fn engine_config_file(&self, id: u16) -> PathBuf {
        self.engine.config_path.join(format!("engine_{id}.conf"))
    }

    /// Mixer config file
    pub fn mixer_config_file(&self) -> PathBuf {
        self.mixer.config_path.join("mixer.conf")
    }

    /// Named pipe an engine instance writes into
    pub fn engine_fifo(&self, id: u16) -> PathBuf {
        self.gateway.fifo_dir.join(format!("stream_{id}.fifo"))
    }

    /// Named pipe for additional stream `index`; numbered after the pool
    pub fn additional_stream_fifo(&self, index: usize) -> PathBuf {
        let number = self.engine.instances as usize + index;
        self.gateway
            .fifo_dir
            .join("additional_streams")
            .join(format!("stream_{number}.fifo"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.engine.instances, 1);
        assert_eq!(config.engine.web_base_port, 6680);
        assert_eq!(config.mixer.control_port, 1780);
        assert_eq!(config.gateway.source_type, SourceType::Tcp);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "gateway": {"port": 9000, "source_type": "fifo"},
            "engine": {
                "instances": 2,
                "extensions": {"local": {"enabled": true}, "spotify": {"enabled": false}}
            },
            "mixer": {
                "codec": "pcm",
                "additional_streams": [{"name": "Airplay", "source_type": "fifo"}]
            }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.gateway.port, 9000);
        assert!(config.gateway.source_type.is_fifo());
        assert_eq!(config.engine.instances, 2);
        assert_eq!(config.engine.web_base_port, 6680);
        assert_eq!(config.engine.enabled_extensions(), vec!["local".to_string()]);
        assert_eq!(config.mixer.codec, "pcm");
        assert_eq!(config.mixer.additional_streams.len(), 1);
    }

    #[test]
    fn test_unknown_source_type_is_not_fifo() {
        let config: GatewayConfig = serde_json::from_str(r#"{"source_type": "pipewire"}"#).unwrap();
        assert_eq!(config.source_type, SourceType::Tcp);
    }

    #[test]
    fn test_instance_ports() {
        let mut config = AppConfig::default();
        config.engine.instances = 2;

        let instances = config.instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].control_port, 6680);
        assert_eq!(instances[1].control_port, 6681);
        assert_eq!(instances[1].mpd_port, 6601);
        assert_eq!(instances[1].stream_port, 4954);
    }

    #[test]
    fn test_port_overflow_rejected() {
        let mut config = AppConfig::default();
        config.engine.instances = 10;
        config.engine.web_base_port = u16::MAX - 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("gateway.toml");
        std::fs::write(&toml_path, "[engine]\ninstances = 3\n").unwrap();
        assert_eq!(AppConfig::load(&toml_path).unwrap().engine.instances, 3);

        let json_path = dir.path().join("gateway.json");
        std::fs::write(&json_path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&json_path), Err(ConfigError::Json(_))));

        let missing = dir.path().join("missing.json");
        assert!(matches!(AppConfig::load(&missing), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_fifo_paths() {
        let mut config = AppConfig::default();
        config.engine.instances = 2;
        assert_eq!(config.engine_fifo(1), PathBuf::from("/tmp/stream_1.fifo"));
        assert_eq!(
            config.additional_stream_fifo(0),
            PathBuf::from("/tmp/additional_streams/stream_2.fifo")
        );
    }
}
