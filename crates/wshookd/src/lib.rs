//! `wshookd`: lets WebSocket clients talk to a plain TCP service.
//!
//! Each client connection gets a [`wshook::Session`]; once the upgrade
//! completes the gateway opens a TCP connection to the configured upstream
//! and relays decoded messages one way and framed upstream bytes the other.

pub mod config;
pub mod gateway;

pub use config::{ConfigError, GatewayConfig, Overrides};
pub use gateway::{Gateway, GatewayError};
