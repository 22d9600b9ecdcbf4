//! Error handlers
//!
//! Reports errors that end the process.

use crate::error::types::ServerError;
use log::error;

/// Log a fatal server error
pub fn handle_error(err: &ServerError) {
    match err {
        ServerError::Bind { endpoint, source } => {
            error!("Server could not listen on {}: {}", endpoint, source);
        }
        other => error!("Server error: {}", other),
    }
}
