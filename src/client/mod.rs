//! Client management system
//!
//! Handles client connections, the live set, and the per-client session task.

pub mod handler;
pub mod registry;
pub mod session;

pub use handler::run_session;
pub use registry::ClientRegistry;
pub use session::{Client, ClientId, CloseReason};
