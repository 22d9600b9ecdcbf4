//! Chat protocol
//!
//! Line-based multi-user chat built on the server's broadcast and multicast.
//!
//! ```text
//! LOGIN <name>            claim a name
//! SAY <text>              message every logged-in user, sender included
//! WHISPER <name> <text>   message one user
//! WHO                     list logged-in users
//! QUIT                    leave
//! ```
//!
//! Commands end with `\n` (an optional `\r` before it is ignored) and may
//! span several reads. Replies are single lines starting with `OK`, `ERR` or
//! an event keyword (`HELLO`, `JOINED`, `LEFT`, `MSG`, `WHISPER`, `USERS`,
//! `BYE`).

use async_trait::async_trait;
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::client::{Client, ClientId};
use crate::protocol::Protocol;
use crate::server::Server;

/// Longest accepted user name
pub const MAX_NAME_LENGTH: usize = 32;

/// Longest command line; longer unterminated input is discarded
pub const MAX_LINE_LENGTH: usize = 1024;

/// A parsed chat command
#[derive(Debug, PartialEq, Eq)]
pub enum ChatCommand {
    Login(String),
    Say(String),
    Whisper { to: String, text: String },
    Who,
    Quit,
    Unknown,
}

/// Parses one command line.
///
/// Keywords are case-insensitive; a known keyword missing its arguments
/// parses as `Unknown`.
pub fn parse_command(raw: &str) -> ChatCommand {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_uppercase();
    let arg = parts.next().unwrap_or("").trim();

    match cmd.as_str() {
        "LOGIN" if !arg.is_empty() => ChatCommand::Login(arg.to_string()),
        "SAY" if !arg.is_empty() => ChatCommand::Say(arg.to_string()),
        "WHISPER" => {
            let mut rest = arg.splitn(2, char::is_whitespace);
            let to = rest.next().unwrap_or("");
            let text = rest.next().unwrap_or("").trim();
            if to.is_empty() || text.is_empty() {
                ChatCommand::Unknown
            } else {
                ChatCommand::Whisper {
                    to: to.to_string(),
                    text: text.to_string(),
                }
            }
        }
        "WHO" => ChatCommand::Who,
        "QUIT" => ChatCommand::Quit,
        _ => ChatCommand::Unknown,
    }
}

/// Whether `name` may be claimed: non-empty, bounded, no whitespace or control characters
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name.chars().all(|c| !c.is_whitespace() && !c.is_control())
}

/// Per-client chat state, kept as the client's attachment
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    name: Option<String>,
    pending: Vec<u8>,
}

impl ChatState {
    /// Login name, once `LOGIN` succeeded
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Appends received bytes and returns the lines they complete.
    ///
    /// The second value is true when an unterminated line grew past
    /// [`MAX_LINE_LENGTH`] and was dropped.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<String>, bool) {
        self.pending.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }

        let overflow = self.pending.len() > MAX_LINE_LENGTH;
        if overflow {
            self.pending.clear();
        }
        (lines, overflow)
    }
}

/// Multi-user chat with a shared, lock-guarded user directory
#[derive(Default)]
pub struct ChatProtocol {
    users: Mutex<HashMap<String, ClientId>>,
    banned: HashSet<IpAddr>,
}

impl ChatProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses connections from the given addresses at `welcome`
    pub fn with_ban_list(banned: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            banned: banned.into_iter().collect(),
        }
    }

    /// Logged-in user names, sorted
    pub async fn users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn handle_line(&self, client: &Arc<Client>, server: &Server, line: &str) {
        match parse_command(line) {
            ChatCommand::Login(name) => self.login(client, server, name).await,
            ChatCommand::Say(text) => match user_name(client) {
                Some(name) => {
                    let line = format!("MSG {} {}\n", name, text);
                    server.multicast(line.as_bytes(), is_logged_in).await;
                }
                None => reply(client, "ERR not logged in").await,
            },
            ChatCommand::Whisper { to, text } => match user_name(client) {
                Some(name) => {
                    let line = format!("WHISPER {} {}\n", name, text);
                    let report = server
                        .multicast(line.as_bytes(), move |other| {
                            user_name(other).is_some_and(|user| user == to)
                        })
                        .await;
                    if report.delivered().is_empty() {
                        reply(client, "ERR no such user").await;
                    } else {
                        reply(client, "OK").await;
                    }
                }
                None => reply(client, "ERR not logged in").await,
            },
            ChatCommand::Who => {
                let line = format!("USERS {}", self.users().await.join(","));
                reply(client, &line).await;
            }
            ChatCommand::Quit => {
                reply(client, "BYE").await;
                client.disconnect();
            }
            ChatCommand::Unknown => reply(client, "ERR invalid command").await,
        }
    }

    async fn login(&self, client: &Arc<Client>, server: &Server, name: String) {
        if user_name(client).is_some() {
            reply(client, "ERR already logged in").await;
            return;
        }
        if !is_valid_name(&name) {
            reply(client, "ERR invalid name").await;
            return;
        }

        {
            let mut users = self.users.lock().await;
            if users.contains_key(&name) {
                drop(users);
                reply(client, "ERR name already in use").await;
                return;
            }
            users.insert(name.clone(), client.id());
        }

        client.with_attachment(|state: &mut ChatState| state.name = Some(name.clone()));
        info!("Client #{} logged in as {}", client.id(), name);
        reply(client, &format!("OK logged in as {}", name)).await;

        let joined = format!("JOINED {}\n", name);
        let except = Arc::clone(client);
        server
            .multicast(joined.as_bytes(), move |other| {
                is_logged_in(other) && !Arc::ptr_eq(other, &except)
            })
            .await;
    }

    /// Releases the client's name and tells the remaining users
    async fn leave(&self, client: &Arc<Client>, server: &Server) {
        let Some(name) = client
            .with_attachment(|state: &mut ChatState| state.name.take())
            .flatten()
        else {
            return;
        };

        {
            let mut users = self.users.lock().await;
            if users.get(&name) == Some(&client.id()) {
                users.remove(&name);
            }
        }

        info!("{} left the chat", name);
        let left = format!("LEFT {}\n", name);
        server.broadcast(left.as_bytes(), Some(client)).await;
    }
}

fn user_name(client: &Arc<Client>) -> Option<String> {
    client
        .with_attachment(|state: &mut ChatState| state.name.clone())
        .flatten()
}

fn is_logged_in(client: &Arc<Client>) -> bool {
    user_name(client).is_some()
}

async fn reply(client: &Arc<Client>, line: &str) {
    let mut message = String::with_capacity(line.len() + 1);
    message.push_str(line);
    message.push('\n');
    if let Err(e) = client.send(message.as_bytes()).await {
        debug!("Reply to client #{} failed: {}", client.id(), e);
    }
}

#[async_trait]
impl Protocol for ChatProtocol {
    fn name(&self) -> &str {
        "chat"
    }

    async fn welcome(&self, client: &Arc<Client>, _server: &Server) -> bool {
        if let Some(addr) = client.peer_addr() {
            if self.banned.contains(&addr.ip()) {
                info!("Refusing banned address {}", addr.ip());
                return false;
            }
        }
        reply(client, "HELLO use LOGIN <name> to join").await;
        true
    }

    async fn attend(&self, client: &Arc<Client>, server: &Server, data: &[u8]) {
        let (lines, overflow) = client
            .with_attachment(|state: &mut ChatState| state.feed(data))
            .unwrap_or_default();

        for line in &lines {
            self.handle_line(client, server, line).await;
            if !client.is_open() {
                return;
            }
        }
        if overflow {
            reply(client, "ERR line too long").await;
        }
    }

    async fn bye(&self, client: &Arc<Client>, server: &Server) {
        self.leave(client, server).await;
    }

    async fn disconnect(&self, client: &Arc<Client>, server: &Server) {
        self.leave(client, server).await;
    }
}
