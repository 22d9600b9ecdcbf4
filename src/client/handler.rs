use futures::FutureExt;
use log::{debug, error, info};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::client::Client;
use crate::error::peer_label;
use crate::server::Server;

/// Runs the whole lifecycle of one client, from acceptance to removal.
///
/// - Registers the client in the server's live set.
/// - Asks the protocol to `welcome` it; a refused client is closed at once.
/// - Feeds every received message to `attend`, strictly in arrival order.
/// - Removes the client from the live set however the session ended.
pub async fn run_session(server: Server, client: Arc<Client>) {
    let registry = server.registry();
    let connected = registry.insert(Arc::clone(&client)).await;
    info!(
        "Client #{} connected from {} ({} connected)",
        client.id(),
        peer_label(client.peer_addr()),
        connected
    );

    let outcome = AssertUnwindSafe(drive_session(&server, &client))
        .catch_unwind()
        .await;

    if outcome.is_err() {
        error!(
            "Protocol {} panicked while serving client #{}; closing its session",
            server.protocol().name(),
            client.id()
        );
        if AssertUnwindSafe(client.abandon()).catch_unwind().await.is_err() {
            error!(
                "Protocol {} panicked again while dropping client #{}",
                server.protocol().name(),
                client.id()
            );
        }
    }

    if registry.remove(&client).await.is_none() {
        debug!("Client #{} was already removed from the live set", client.id());
    }

    info!(
        "Client #{} disconnected ({:?})",
        client.id(),
        client.close_reason()
    );
}

async fn drive_session(server: &Server, client: &Arc<Client>) {
    let protocol = server.protocol();

    if !protocol.welcome(client, server).await {
        info!(
            "Protocol {} refused client #{}",
            protocol.name(),
            client.id()
        );
        client.reject().await;
        return;
    }
    client.admit();

    while client.is_alive() {
        match client.receive().await {
            Some(data) => {
                debug!("Received {} bytes from client #{}", data.len(), client.id());
                protocol.attend(client, server, &data).await;
            }
            None => break,
        }
    }

    client.conclude().await;
}
