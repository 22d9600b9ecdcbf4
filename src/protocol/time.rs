//! Time protocol (RFC 868)
//!
//! Greets every client with the seconds elapsed since 1900-01-01 00:00 UTC
//! as a 32-bit big-endian integer, then closes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;

use crate::client::Client;
use crate::protocol::Protocol;
use crate::server::Server;

/// Seconds between 1900-01-01 and the Unix epoch
pub const SECONDS_1900_TO_1970: i64 = 2_208_988_800;

#[derive(Debug, Default, Clone, Copy)]
pub struct TimeProtocol;

/// RFC 868 encoding of `now`; the 32-bit counter wraps in 2036
pub fn encode_time(now: &DateTime<Utc>) -> [u8; 4] {
    let seconds = now.timestamp() + SECONDS_1900_TO_1970;
    (seconds as u32).to_be_bytes()
}

#[async_trait]
impl Protocol for TimeProtocol {
    fn name(&self) -> &str {
        "time"
    }

    async fn welcome(&self, client: &Arc<Client>, _server: &Server) -> bool {
        if let Err(e) = client.send(&encode_time(&Utc::now())).await {
            debug!("Time reply to client #{} failed: {}", client.id(), e);
        }
        client.disconnect();
        true
    }

    async fn attend(&self, _client: &Arc<Client>, _server: &Server, _data: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unix_epoch_is_offset_from_1900() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(u32::from_be_bytes(encode_time(&epoch)), 2_208_988_800);
    }

    #[test]
    fn counter_wraps_after_2036() {
        let wrap = Utc.timestamp_opt((1i64 << 32) - SECONDS_1900_TO_1970, 0).unwrap();
        assert_eq!(u32::from_be_bytes(encode_time(&wrap)), 0);
    }
}
