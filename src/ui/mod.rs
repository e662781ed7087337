//! HTTP surface of the gateway: WebSocket relay endpoint, JSON API and
//! static web client

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer};
