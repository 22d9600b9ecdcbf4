//! Server core functionality
//!
//! This module contains the accept loop, shutdown sequence, broadcast and
//! multicast, plus the server configuration.

pub mod config;
pub mod core;
pub mod delivery;

pub use self::config::ServerConfig;
pub use self::core::{Server, ServerBuilder};
pub use self::delivery::DeliveryReport;
