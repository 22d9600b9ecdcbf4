//! Protocol dispatch
//!
//! A [`Protocol`] is the pluggable logic the server invokes for every inbound
//! message and for the lifecycle events of each client session. The bundled
//! implementations double as reference plug-ins.

pub mod chat;
pub mod daytime;
pub mod echo;
pub mod time;

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::Client;
use crate::server::Server;

pub use chat::ChatProtocol;
pub use daytime::DaytimeProtocol;
pub use echo::EchoProtocol;
pub use time::TimeProtocol;

/// Dispatch contract between the server and a protocol implementation.
///
/// Every method is invoked by the server, never by the protocol itself. One
/// instance is shared by all sessions, so callbacks run concurrently for
/// different clients; any state the implementation keeps across clients must
/// be synchronized by the implementation.
///
/// Faults are the implementation's business: report application-level errors
/// to the client with [`Client::send`] instead of panicking. A panic ends the
/// session of the client being served and nothing else.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// Short name used in log lines
    fn name(&self) -> &str {
        "protocol"
    }

    /// Handles one inbound message.
    ///
    /// The session reads the next message only after this returns, so it
    /// must not block indefinitely.
    async fn attend(&self, client: &Arc<Client>, server: &Server, data: &[u8]);

    /// Admission control, run once before the first `attend`.
    ///
    /// Returning `false` closes the connection; neither `attend` nor any
    /// farewell callback is invoked for a rejected client.
    async fn welcome(&self, _client: &Arc<Client>, _server: &Server) -> bool {
        true
    }

    /// Runs once when the client leaves in an orderly way.
    async fn bye(&self, _client: &Arc<Client>, _server: &Server) {}

    /// Runs once when the connection drops without an orderly close.
    async fn disconnect(&self, _client: &Arc<Client>, _server: &Server) {}
}

/// Names accepted by [`by_name`]
pub const BUNDLED: &[&str] = &["echo", "chat", "daytime", "time"];

/// Resolves one of the bundled protocols by its configuration name
pub fn by_name(name: &str) -> Option<Arc<dyn Protocol>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "echo" => Some(Arc::new(EchoProtocol)),
        "chat" => Some(Arc::new(ChatProtocol::new())),
        "daytime" => Some(Arc::new(DaytimeProtocol)),
        "time" => Some(Arc::new(TimeProtocol)),
        _ => None,
    }
}
