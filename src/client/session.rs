//! Client session handle
//!
//! A [`Client`] owns one accepted connection. It exposes the liveness,
//! receive, send and disconnect surface the session loop and protocols work
//! against, and it is the one place that decides whether a finished session
//! ends with the protocol's `bye` or `disconnect` callback.

use log::{debug, warn};
use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};

use crate::error::peer_label;
use crate::server::Server;
use crate::server::core::Shared;

/// Process-unique client identifier, used for logging and lookups
pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Why a client stopped being alive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The protocol called [`Client::disconnect`]
    Requested,
    /// The remote end closed its side cleanly
    RemoteClosed,
    /// Reading from the connection failed
    TransportError,
    /// The server stopped being alive while the session was running
    ServerShutdown,
    /// The server closed the client after the shutdown grace period
    Forced,
    /// The protocol's `welcome` refused the client
    Rejected,
    /// A protocol callback panicked; answered with `disconnect`
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Farewell {
    Bye,
    Disconnect,
}

impl CloseReason {
    /// Whether this is an orderly close, answered with the protocol's `bye`
    pub fn is_graceful(self) -> bool {
        matches!(
            self,
            CloseReason::Requested | CloseReason::RemoteClosed | CloseReason::ServerShutdown
        )
    }

    fn farewell(self) -> Option<Farewell> {
        match self {
            CloseReason::Requested | CloseReason::RemoteClosed | CloseReason::ServerShutdown => {
                Some(Farewell::Bye)
            }
            CloseReason::TransportError | CloseReason::Forced | CloseReason::Faulted => {
                Some(Farewell::Disconnect)
            }
            CloseReason::Rejected => None,
        }
    }
}

enum ReadOutcome {
    Data(usize),
    Eof,
    Failed(io::Error),
    Closed(Option<CloseReason>),
}

/// One accepted connection.
///
/// Clients are shared as `Arc<Client>` and compared by reference; two
/// handles denote the same client only if they point at the same allocation.
pub struct Client {
    id: ClientId,
    peer_addr: Option<SocketAddr>,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    server: Weak<Shared>,
    closing: watch::Sender<Option<CloseReason>>,
    admitted: AtomicBool,
    farewell_done: AtomicBool,
    receive_buffer_size: usize,
    attachment: std::sync::Mutex<Option<Box<dyn Any + Send + Sync>>>,
}

impl Client {
    pub(crate) fn new(stream: TcpStream, server: Weak<Shared>, receive_buffer_size: usize) -> Self {
        let peer_addr = stream.peer_addr().ok();

        // Disable Nagle's algorithm for low latency
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer_label(peer_addr), e);
        }

        let (read_half, write_half) = stream.into_split();
        let (closing, _) = watch::channel(None);

        Self {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            reader: Mutex::new(read_half),
            writer: Mutex::new(write_half),
            server,
            closing,
            admitted: AtomicBool::new(false),
            farewell_done: AtomicBool::new(false),
            receive_buffer_size: receive_buffer_size.max(1),
            attachment: std::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Returns the remote address, if it could be read at accept time
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the server this client was accepted by, unless it was dropped
    pub fn server(&self) -> Option<Server> {
        self.server.upgrade().map(Server::from_shared)
    }

    /// Liveness check, re-evaluated by the session loop before every receive.
    ///
    /// False once the client was closed for any reason, or once its server
    /// is no longer alive.
    pub fn is_alive(&self) -> bool {
        self.is_open() && self.server().is_some_and(|server| server.is_alive())
    }

    /// True until the client was closed, regardless of server liveness
    pub fn is_open(&self) -> bool {
        self.closing.borrow().is_none()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.closing.borrow()
    }

    /// True once the protocol's `welcome` accepted this client
    pub fn is_admitted(&self) -> bool {
        self.admitted.load(Ordering::Acquire)
    }

    /// Waits for the next inbound message.
    ///
    /// One call returns the bytes of one read from the connection, at most
    /// `receive_buffer_size` of them. Returns `None` once the connection is
    /// over; by then the protocol's `bye` or `disconnect` has already run.
    pub async fn receive(self: &Arc<Self>) -> Option<Vec<u8>> {
        let mut closing = self.closing.subscribe();
        let mut buffer = vec![0u8; self.receive_buffer_size];

        let outcome = {
            let mut reader = self.reader.lock().await;
            tokio::select! {
                biased;
                reason = closed(&mut closing) => ReadOutcome::Closed(reason),
                read = reader.read(&mut buffer) => match read {
                    Ok(0) => ReadOutcome::Eof,
                    Ok(n) => ReadOutcome::Data(n),
                    Err(e) => ReadOutcome::Failed(e),
                },
            }
        };

        match outcome {
            ReadOutcome::Data(n) => {
                buffer.truncate(n);
                Some(buffer)
            }
            ReadOutcome::Eof => {
                debug!("Client {} closed the connection", self.label());
                self.finish(CloseReason::RemoteClosed).await;
                None
            }
            ReadOutcome::Failed(e) => {
                debug!("Failed to read from client {}: {}", self.label(), e);
                self.finish(CloseReason::TransportError).await;
                None
            }
            ReadOutcome::Closed(reason) => {
                self.finish(reason.unwrap_or(CloseReason::Requested)).await;
                None
            }
        }
    }

    /// Sends one message and flushes it.
    ///
    /// Fails with `NotConnected` once the client was closed.
    pub async fn send(&self, data: &[u8]) -> io::Result<()> {
        if !self.is_open() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("client {} is closed", self.id),
            ));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    }

    /// Requests an orderly close.
    ///
    /// `is_alive` turns false immediately and a pending `receive` returns;
    /// the session then ends with the protocol's `bye`.
    pub fn disconnect(&self) {
        if self.mark_closed(CloseReason::Requested) {
            debug!("Client {} requested to disconnect", self.label());
        }
    }

    /// Closes the client from the server side without waiting for its session.
    pub async fn close_forced(&self) {
        if self.mark_closed(CloseReason::Forced) {
            warn!("Forcibly closing client {}", self.label());
        }
        self.shutdown_transport().await;
    }

    /// Stores protocol-specific state on this client, replacing any previous value
    pub fn attach<T: Any + Send + Sync>(&self, value: T) {
        *self.lock_attachment() = Some(Box::new(value));
    }

    /// Runs `f` on the attached `T`, attaching `T::default()` first if the
    /// slot is empty.
    ///
    /// Returns `None` without calling `f` when state of another type is
    /// attached. `f` must not touch this client's attachment again.
    pub fn with_attachment<T, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Any + Send + Sync + Default,
    {
        let mut slot = self.lock_attachment();
        let value =
            slot.get_or_insert_with(|| Box::new(T::default()) as Box<dyn Any + Send + Sync>);
        value.downcast_mut::<T>().map(f)
    }

    /// Returns a copy of the attached state if it has type `T`
    pub fn attachment<T: Any + Clone>(&self) -> Option<T> {
        self.lock_attachment()
            .as_ref()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes and returns the attached state if it has type `T`
    pub fn detach<T: Any + Send + Sync>(&self) -> Option<T> {
        let mut slot = self.lock_attachment();
        if !slot.as_ref().is_some_and(|value| value.is::<T>()) {
            return None;
        }
        slot.take()
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub(crate) fn admit(&self) {
        self.admitted.store(true, Ordering::Release);
    }

    /// Closes a client refused by `welcome`; no farewell callback runs.
    pub(crate) async fn reject(&self) {
        self.mark_closed(CloseReason::Rejected);
        self.farewell_done.store(true, Ordering::Release);
        self.shutdown_transport().await;
    }

    /// Ends a session whose protocol callback panicked.
    ///
    /// The protocol gets its `disconnect` so it can release per-client state,
    /// unless the panic came from a farewell callback itself.
    pub(crate) async fn abandon(self: &Arc<Self>) {
        self.finish(CloseReason::Faulted).await;
    }

    /// Runs the farewell for a session loop that stopped without `receive`
    /// having reported the end of the connection.
    pub(crate) async fn conclude(self: &Arc<Self>) {
        let reason = self.close_reason().unwrap_or(CloseReason::ServerShutdown);
        self.finish(reason).await;
    }

    async fn finish(self: &Arc<Self>, reason: CloseReason) {
        self.mark_closed(reason);
        let reason = self.close_reason().unwrap_or(reason);

        if self.farewell_done.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(server) = self.server() {
            let protocol = server.protocol();
            match reason.farewell() {
                Some(Farewell::Bye) => protocol.bye(self, &server).await,
                Some(Farewell::Disconnect) => protocol.disconnect(self, &server).await,
                None => {}
            }
        }

        self.shutdown_transport().await;
    }

    /// Records the close reason unless one was recorded already
    fn mark_closed(&self, reason: CloseReason) -> bool {
        self.closing.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    async fn shutdown_transport(&self) {
        // A writer stuck on a slow peer keeps the lock; the socket then closes on drop.
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of client {} failed: {}", self.label(), e);
            }
        }
    }

    fn lock_attachment(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn Any + Send + Sync>>> {
        self.attachment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn label(&self) -> String {
        format!("#{} ({})", self.id, peer_label(self.peer_addr))
    }
}

async fn closed(closing: &mut watch::Receiver<Option<CloseReason>>) -> Option<CloseReason> {
    closing
        .wait_for(Option::is_some)
        .await
        .ok()
        .and_then(|reason| *reason)
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("close_reason", &self.close_reason())
            .field("admitted", &self.is_admitted())
            .finish()
    }
}
