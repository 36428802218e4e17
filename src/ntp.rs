//! Minimal SNTPv4 client (RFC 4330) used as the network time fallback.

use crate::types::Epoch;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

pub const NTP_PORT: u16 = 123;
const PACKET_LEN: usize = 48;
/// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const VERSION: u8 = 4;

#[derive(Debug, Error)]
pub enum NtpError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed reply: {0}")]
    InvalidResponse(&'static str),
    #[error("server sent kiss-of-death code {0}")]
    KissOfDeath(String),
}

/// Network time client contract.
#[allow(async_fn_in_trait)]
pub trait NetworkTimeClient {
    async fn sync(&mut self, host: &str, timeout: Duration) -> Result<Epoch, NtpError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SntpClient {
    port: Option<u16>,
}

impl SntpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Talk to a non-standard port, for local test servers.
    #[must_use]
    pub fn with_port(port: u16) -> Self {
        Self { port: Some(port) }
    }

    async fn query(&self, host: &str) -> Result<Epoch, NtpError> {
        let port = self.port.unwrap_or(NTP_PORT);
        let addr = lookup_host((host, port))
            .await
            .map_err(|_| NtpError::Resolve(host.to_string()))?
            .next()
            .ok_or_else(|| NtpError::Resolve(host.to_string()))?;

        let bind = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;
        socket.send(&request_packet()).await?;

        let mut reply = [0u8; PACKET_LEN];
        let len = socket.recv(&mut reply).await?;
        debug!(%addr, len, "SNTP reply");
        parse_reply(&reply[..len])
    }
}

impl NetworkTimeClient for SntpClient {
    async fn sync(&mut self, host: &str, limit: Duration) -> Result<Epoch, NtpError> {
        timeout(limit, self.query(host))
            .await
            .map_err(|_| NtpError::Timeout(limit))?
    }
}

fn request_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = (VERSION << 3) | MODE_CLIENT;
    packet
}

/// Transmit timestamp of a server reply, as Unix seconds rounded to nearest.
pub fn parse_reply(reply: &[u8]) -> Result<Epoch, NtpError> {
    if reply.len() < PACKET_LEN {
        return Err(NtpError::InvalidResponse("short packet"));
    }
    if reply[0] & 0x07 != MODE_SERVER {
        return Err(NtpError::InvalidResponse("not a server reply"));
    }
    if reply[1] == 0 {
        let code = String::from_utf8_lossy(&reply[12..16]).into_owned();
        return Err(NtpError::KissOfDeath(code));
    }
    let seconds = u32::from_be_bytes([reply[40], reply[41], reply[42], reply[43]]);
    let fraction = u32::from_be_bytes([reply[44], reply[45], reply[46], reply[47]]);
    if seconds == 0 {
        return Err(NtpError::InvalidResponse("zero transmit timestamp"));
    }
    let round_up = i64::from(fraction >= 0x8000_0000);
    Ok(i64::from(seconds) - NTP_UNIX_OFFSET + round_up)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_reply(unix_seconds: i64, fraction: u32, stratum: u8) -> [u8; PACKET_LEN] {
        let mut reply = [0u8; PACKET_LEN];
        reply[0] = (VERSION << 3) | MODE_SERVER;
        reply[1] = stratum;
        let ntp = (unix_seconds + NTP_UNIX_OFFSET) as u32;
        reply[40..44].copy_from_slice(&ntp.to_be_bytes());
        reply[44..48].copy_from_slice(&fraction.to_be_bytes());
        reply
    }

    #[test]
    fn test_request_packet_header() {
        assert_eq!(request_packet()[0], 0x23);
    }

    #[test]
    fn test_parse_reply() {
        let reply = server_reply(1_715_947_290, 0, 2);
        assert_eq!(parse_reply(&reply).unwrap(), 1_715_947_290);

        let reply = server_reply(1_715_947_290, 0xC000_0000, 2);
        assert_eq!(parse_reply(&reply).unwrap(), 1_715_947_291);
    }

    #[test]
    fn test_parse_reply_rejects_bad_packets() {
        assert!(matches!(parse_reply(&[0u8; 10]), Err(NtpError::InvalidResponse(_))));

        let mut reply = server_reply(1_715_947_290, 0, 2);
        reply[0] = (VERSION << 3) | MODE_CLIENT;
        assert!(matches!(parse_reply(&reply), Err(NtpError::InvalidResponse(_))));

        let mut kod = server_reply(1_715_947_290, 0, 0);
        kod[12..16].copy_from_slice(b"RATE");
        assert!(matches!(parse_reply(&kod), Err(NtpError::KissOfDeath(code)) if code == "RATE"));
    }

    #[tokio::test]
    async fn test_client_against_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; PACKET_LEN];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0] & 0x07, MODE_CLIENT);
            server.send_to(&server_reply(1_715_947_290, 0, 1), peer).await.unwrap();
        });

        let mut client = SntpClient::with_port(port);
        let epoch = client.sync("127.0.0.1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(epoch, 1_715_947_290);
    }

    #[tokio::test]
    async fn test_client_times_out() {
        // Bound but silent.
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let mut client = SntpClient::with_port(port);
        let result = client.sync("127.0.0.1", Duration::from_millis(200)).await;
        assert!(matches!(result, Err(NtpError::Timeout(_))));
        drop(server);
    }
}
