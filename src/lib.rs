//! # Multiroom Gateway
//!
//! Supervises a pool of playback engines and one stream mixer, and exposes
//! all of them behind a single WebSocket gateway.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                               GATEWAY PROCESS                               │
//! │                                                                             │
//! │  ┌──────────────────────────────────────┐   ┌────────────────────────────┐  │
//! │  │ WorkerPoolSupervisor (supervisor::)  │   │ MixSupervisor              │  │
//! │  │   render engine_<i>.conf  (template) │   │   render mixer.conf        │  │
//! │  │   ┌──────────┐ ┌──────────┐          │   │   ┌──────────┐             │  │
//! │  │   │Executor 0│ │Executor 1│  ...     │   │   │ Executor │             │  │
//! │  │   │ reader   │ │ reader   │          │   │   │ reader   │             │  │
//! │  │   │ thread   │ │ thread   │          │   │   │ thread   │             │  │
//! │  │   └────┬─────┘ └────┬─────┘          │   │   └────┬─────┘             │  │
//! │  └────────┼────────────┼────────────────┘   └────────┼───────────────────┘  │
//! │           │ readiness latch ──────────────────────▶  │ (mixer starts after) │
//! │           ▼            ▼                              ▼                      │
//! │      engine :6680  engine :6681   ...           mixer :1780                 │
//! │           ▲            ▲                              ▲                      │
//! │           │            │      outbound WebSocket      │                      │
//! │  ┌────────┴────────────┴──────────────────────────────┴───────────────────┐  │
//! │  │        StreamRelay (proxy::relay): Connecting → Relaying → Closed      │  │
//! │  └────────────────────────────────────▲───────────────────────────────────┘  │
//! │                                       │ Route (proxy::route)                 │
//! │  ┌────────────────────────────────────┴───────────────────────────────────┐  │
//! │  │  axum server (ui::): /ws/<control|stream>/<target>, /api/*, static     │  │
//! │  └────────────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod proxy;
pub mod supervisor;
pub mod template;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default port the gateway listens on
    pub const DEFAULT_GATEWAY_PORT: u16 = 8080;

    /// Default base of the engines' HTTP/WebSocket control ports
    pub const DEFAULT_ENGINE_WEB_BASE_PORT: u16 = 6680;

    /// Default base of the engines' MPD ports
    pub const DEFAULT_ENGINE_MPD_BASE_PORT: u16 = 6600;

    /// Default base of the TCP sinks the engines stream into
    pub const DEFAULT_TCP_SINK_BASE_PORT: u16 = 4953;

    /// Default mixer control port
    pub const DEFAULT_MIXER_CONTROL_PORT: u16 = 1780;

    /// Default mixer audio port
    pub const DEFAULT_MIXER_STREAM_PORT: u16 = 1704;

    /// Interval at which idle supervisors check their shutdown flag
    pub const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_millis(300);

    /// Interval at which a reader thread checks whether its child exited
    pub const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Time a child gets to exit after SIGTERM before it is killed
    pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

    /// Outbound connection attempts before a relay gives up
    pub const RELAY_CONNECT_ATTEMPTS: u32 = 5;

    /// Deadline of one outbound connection attempt, handshake included
    pub const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

    /// Delay between outbound connection attempts
    pub const RELAY_RETRY_INTERVAL: Duration = Duration::from_secs(3);

    /// Namespace routed to the mixer
    pub const CONTROL_NAMESPACE: &str = "control";

    /// Namespace routed to a pool instance
    pub const STREAM_NAMESPACE: &str = "stream";

    /// Template name of the engine config
    pub const ENGINE_TEMPLATE: &str = "engine";

    /// Template name of the mixer config
    pub const MIXER_TEMPLATE: &str = "mixer";
}
