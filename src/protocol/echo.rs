//! Echo protocol (RFC 862)
//!
//! Sends every received message back to its sender.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use crate::client::Client;
use crate::protocol::Protocol;
use crate::server::Server;

#[derive(Debug, Default, Clone, Copy)]
pub struct EchoProtocol;

#[async_trait]
impl Protocol for EchoProtocol {
    fn name(&self) -> &str {
        "echo"
    }

    async fn attend(&self, client: &Arc<Client>, _server: &Server, data: &[u8]) {
        if let Err(e) = client.send(data).await {
            debug!("Echo to client #{} failed: {}", client.id(), e);
        }
    }
}
