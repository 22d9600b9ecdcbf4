use futures::future::join_all;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::client::{Client, ClientRegistry, run_session};
use crate::error::{Result, ServerError};
use crate::protocol::Protocol;
use crate::server::config::ServerConfig;
use crate::server::delivery::DeliveryReport;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// How long forcibly closed sessions get to run their cleanup
const FORCED_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// State shared by every handle of one server and by its clients
pub(crate) struct Shared {
    config: ServerConfig,
    protocol: Arc<dyn Protocol>,
    registry: ClientRegistry,
    alive: watch::Sender<bool>,
    running: watch::Sender<bool>,
    local_addr: RwLock<Option<SocketAddr>>,
}

/// TCP server dispatching every connection to a [`Protocol`].
///
/// `Server` is a cheap handle; clones refer to the same server, so protocols
/// and operators can hold one to broadcast or to stop it.
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

/// Builder for [`Server`]; the protocol handler is mandatory
pub struct ServerBuilder {
    config: ServerConfig,
    protocol: Option<Arc<dyn Protocol>>,
}

impl ServerBuilder {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            protocol: None,
        }
    }

    pub fn protocol(mut self, protocol: Arc<dyn Protocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Builds the server without starting it.
    ///
    /// Fails with [`ServerError::MissingProtocol`] when no protocol was set.
    pub fn build(self) -> Result<Server> {
        let protocol = self.protocol.ok_or(ServerError::MissingProtocol)?;
        Ok(Server::new(protocol, self.config))
    }

    /// Builds the server, binds it, and starts accepting in the background.
    pub async fn start(self) -> Result<Server> {
        let server = self.build()?;
        server.start().await?;
        Ok(server)
    }
}

impl Server {
    pub fn new(protocol: Arc<dyn Protocol>, config: ServerConfig) -> Self {
        let (alive, _) = watch::channel(false);
        let (running, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                config,
                protocol,
                registry: ClientRegistry::new(),
                alive,
                running,
                local_addr: RwLock::new(None),
            }),
        }
    }

    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn protocol(&self) -> Arc<dyn Protocol> {
        Arc::clone(&self.shared.protocol)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.shared.registry
    }

    /// Address the listener is bound to, while the server is running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .shared
            .local_addr
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True while the server accepts connections and has not been asked to stop
    pub fn is_alive(&self) -> bool {
        self.is_running() && *self.shared.alive.borrow()
    }

    /// True from the start of `serve` until its shutdown sequence completes
    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    /// Starts or stops the server.
    ///
    /// `false` initiates shutdown. `true` on a stopped server starts serving
    /// again in a background task and must be called inside a tokio runtime;
    /// on a running server it has no effect.
    pub fn set_alive(&self, alive: bool) {
        if !alive {
            if self.shared.alive.send_replace(false) {
                info!("Server shutdown requested");
            }
            return;
        }

        if self.is_running() {
            if !*self.shared.alive.borrow() {
                debug!("set_alive(true) ignored while the server is shutting down");
            }
            return;
        }

        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                error!("Server restart failed: {}", e);
            }
        });
    }

    /// Initiates shutdown; equivalent to `set_alive(false)`
    pub fn shutdown(&self) {
        self.set_alive(false);
    }

    /// Waits until a running server has completed its shutdown sequence
    pub async fn stopped(&self) {
        let mut running = self.shared.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Number of clients in the live set
    pub async fn client_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Admitted clients that are still open
    pub async fn clients(&self) -> Vec<Arc<Client>> {
        self.shared
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|client| client.is_admitted() && client.is_open())
            .collect()
    }

    /// Accepts connections until the server is told to stop.
    ///
    /// Returns immediately if the server is already running. A bind failure
    /// is returned to the caller; once listening, this returns after the
    /// shutdown sequence has completed.
    pub async fn serve(&self) -> Result<()> {
        match self.open().await? {
            Some(listener) => {
                self.run(listener).await;
                Ok(())
            }
            None => {
                debug!("serve() called on a running server; ignoring");
                Ok(())
            }
        }
    }

    /// Binds and spawns the accept loop, returning once the listener is ready
    pub async fn start(&self) -> Result<()> {
        if let Some(listener) = self.open().await? {
            let server = self.clone();
            tokio::spawn(async move { server.run(listener).await });
        }
        Ok(())
    }

    /// Sends `data` to every admitted client matching `predicate`.
    ///
    /// All sends run concurrently; this returns once every one of them has
    /// completed. Membership is snapshotted first, so clients joining or
    /// leaving meanwhile do not disturb the fan-out, and a failed send only
    /// affects its own entry in the report.
    pub async fn multicast<P>(&self, data: &[u8], predicate: P) -> DeliveryReport
    where
        P: Fn(&Arc<Client>) -> bool + Send,
    {
        let recipients: Vec<Arc<Client>> = self
            .clients()
            .await
            .into_iter()
            .filter(|client| predicate(client))
            .collect();

        let sends = recipients
            .iter()
            .map(|client| async move { (client.id(), client.send(data).await) });
        let results = join_all(sends).await;

        for (id, result) in &results {
            if let Err(e) = result {
                debug!("Delivery to client #{} failed: {}", id, e);
            }
        }

        DeliveryReport::new(results)
    }

    /// Sends `data` to every admitted client except `except`, if given
    pub async fn broadcast(&self, data: &[u8], except: Option<&Arc<Client>>) -> DeliveryReport {
        self.multicast(data, |client| {
            except.is_none_or(|excluded| !Arc::ptr_eq(excluded, client))
        })
        .await
    }

    /// Like [`Server::multicast`], but runs in a background task and returns at once
    pub fn spawn_multicast<P>(&self, data: Vec<u8>, predicate: P) -> JoinHandle<DeliveryReport>
    where
        P: Fn(&Arc<Client>) -> bool + Send + 'static,
    {
        let server = self.clone();
        tokio::spawn(async move { server.multicast(&data, predicate).await })
    }

    /// Like [`Server::broadcast`], but runs in a background task and returns at once
    pub fn spawn_broadcast(
        &self,
        data: Vec<u8>,
        except: Option<Arc<Client>>,
    ) -> JoinHandle<DeliveryReport> {
        let server = self.clone();
        tokio::spawn(async move { server.broadcast(&data, except.as_ref()).await })
    }

    /// Claims the running flag and binds; `None` if the server already runs
    async fn open(&self) -> Result<Option<TcpListener>> {
        let claimed = self.shared.running.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        });
        if !claimed {
            return Ok(None);
        }

        self.shared.alive.send_replace(true);
        match self.bind().await {
            Ok(listener) => Ok(Some(listener)),
            Err(e) => {
                self.shared.alive.send_replace(false);
                self.shared.running.send_replace(false);
                Err(e)
            }
        }
    }

    async fn bind(&self) -> Result<TcpListener> {
        let config = &self.shared.config;
        let endpoint = config.endpoint();

        let listener = TcpListener::bind((config.bind_address.as_str(), config.port))
            .await
            .map_err(|e| ServerError::bind(endpoint.clone(), e))?;
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        self.set_local_addr(Some(addr));
        info!(
            "Server bound to {} (protocol: {})",
            addr,
            self.shared.protocol.name()
        );
        Ok(listener)
    }

    async fn run(&self, listener: TcpListener) {
        let mut sessions = JoinSet::new();

        self.accept_loop(&listener, &mut sessions).await;
        self.shutdown_sessions(&mut sessions).await;

        drop(listener);
        self.set_local_addr(None);
        self.shared.running.send_replace(false);
        info!("Server stopped");
    }

    async fn accept_loop(&self, listener: &TcpListener, sessions: &mut JoinSet<()>) {
        let mut alive = self.shared.alive.subscribe();

        loop {
            while sessions.try_join_next().is_some() {}

            tokio::select! {
                biased;
                _ = stopping(&mut alive) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_session(stream, addr, sessions),
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, addr: SocketAddr, sessions: &mut JoinSet<()>) {
        debug!("Accepted connection from {}", addr);
        let client = Arc::new(Client::new(
            stream,
            Arc::downgrade(&self.shared),
            self.shared.config.receive_buffer_size,
        ));
        sessions.spawn(run_session(self.clone(), client));
    }

    async fn shutdown_sessions(&self, sessions: &mut JoinSet<()>) {
        let timeout = self.shared.config.disconnection_timeout();
        info!(
            "Waiting up to {:?} for {} session(s) to finish",
            timeout,
            sessions.len()
        );

        if tokio::time::timeout(timeout, drain(sessions)).await.is_err() {
            warn!(
                "{} session(s) still running after {:?}",
                sessions.len(),
                timeout
            );
        }

        for client in self.shared.registry.snapshot().await {
            client.close_forced().await;
        }

        if tokio::time::timeout(FORCED_CLOSE_GRACE, drain(sessions))
            .await
            .is_err()
        {
            warn!("Aborting {} unresponsive session(s)", sessions.len());
            sessions.abort_all();
            drain(sessions).await;
        }

        let leftover = self.shared.registry.clear().await;
        if leftover > 0 {
            debug!("Dropped {} client(s) left behind by aborted sessions", leftover);
        }
    }

    fn set_local_addr(&self, addr: Option<SocketAddr>) {
        *self
            .shared
            .local_addr
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = addr;
    }
}

async fn stopping(alive: &mut watch::Receiver<bool>) {
    let _ = alive.wait_for(|alive| !*alive).await;
}

async fn drain(sessions: &mut JoinSet<()>) {
    while sessions.join_next().await.is_some() {}
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("protocol", &self.shared.protocol.name())
            .field("local_addr", &self.local_addr())
            .field("alive", &self.is_alive())
            .finish()
    }
}
