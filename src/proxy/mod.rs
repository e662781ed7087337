//! WebSocket reverse proxy
//!
//! Inbound connections arrive as `<namespace>/<target>` paths. The
//! [`RouteResolver`] maps each one to a backend endpoint and a
//! [`StreamRelay`] shuttles frames both ways until either side goes away.

pub mod relay;
pub mod route;

pub use relay::{
    connect_with_retry, Connection, Connector, Frame, FrameSink, FrameStream, RelayEnd,
    RelayState, RelaySummary, RetryPolicy, StreamRelay, WsConnector,
};
pub use route::{Route, RouteResolver};
