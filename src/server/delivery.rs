//! Fan-out results
//!
//! Outcome of a broadcast or multicast, one entry per recipient.

use std::io;

use crate::client::ClientId;

/// Per-client results of one broadcast or multicast
#[derive(Debug, Default)]
pub struct DeliveryReport {
    results: Vec<(ClientId, io::Result<()>)>,
}

impl DeliveryReport {
    pub fn new(results: Vec<(ClientId, io::Result<()>)>) -> Self {
        Self { results }
    }

    /// Number of clients a send was attempted to
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Clients the message was attempted to, in snapshot order
    pub fn recipients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.results.iter().map(|(id, _)| *id)
    }

    /// Clients that received the message
    pub fn delivered(&self) -> Vec<ClientId> {
        self.results
            .iter()
            .filter(|(_, result)| result.is_ok())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Clients whose send failed, with the error
    pub fn failed(&self) -> Vec<(ClientId, &io::Error)> {
        self.results
            .iter()
            .filter_map(|(id, result)| result.as_ref().err().map(|e| (*id, e)))
            .collect()
    }

    /// True when every attempted send succeeded
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|(_, result)| result.is_ok())
    }

    pub fn into_results(self) -> Vec<(ClientId, io::Result<()>)> {
        self.results
    }
}
