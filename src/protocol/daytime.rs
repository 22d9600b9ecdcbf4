//! Daytime protocol (RFC 867)
//!
//! Greets every client with the local date and time, then closes.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use log::debug;
use std::sync::Arc;

use crate::client::Client;
use crate::protocol::Protocol;
use crate::server::Server;

#[derive(Debug, Default, Clone, Copy)]
pub struct DaytimeProtocol;

/// Human-readable daytime line, e.g. `Monday, October 19, 2026 14:03:07 +02:00`
pub fn format_daytime<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}\r\n", now.format("%A, %B %-d, %Y %H:%M:%S %:z"))
}

#[async_trait]
impl Protocol for DaytimeProtocol {
    fn name(&self) -> &str {
        "daytime"
    }

    async fn welcome(&self, client: &Arc<Client>, _server: &Server) -> bool {
        let line = format_daytime(&Local::now());
        if let Err(e) = client.send(line.as_bytes()).await {
            debug!("Daytime reply to client #{} failed: {}", client.id(), e);
        }
        client.disconnect();
        true
    }

    async fn attend(&self, _client: &Arc<Client>, _server: &Server, _data: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn formats_with_offset_and_crlf() {
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 14, 3, 7).unwrap();
        assert_eq!(format_daytime(&at), "Monday, October 19, 2026 14:03:07 +00:00\r\n");

        let cest = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = at.with_timezone(&cest);
        assert_eq!(
            format_daytime(&local),
            "Monday, October 19, 2026 16:03:07 +02:00\r\n"
        );
    }
}
