//! Portico: a reusable TCP connection server with pluggable protocols.
//!
//! The [`Server`] accepts connections, wraps each one in a [`Client`]
//! session, runs one task per session and hands every inbound message to a
//! [`Protocol`]. Protocols reach other connected clients through
//! [`Server::broadcast`] and [`Server::multicast`].

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod utils;

pub use async_trait::async_trait;
pub use client::{Client, ClientId, CloseReason};
pub use error::{Result, ServerError};
pub use protocol::Protocol;
pub use server::{DeliveryReport, Server, ServerBuilder, ServerConfig};
