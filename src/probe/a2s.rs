//! A2S_INFO query over UDP.
//!
//! Only single-packet responses are understood, which covers the info reply
//! of every Source server we poll.

use std::time::Duration;
use tokio::net::UdpSocket;

use super::{QueryError, ServerQuery};
use crate::archive::{ServerInfo, Visibility};

const HEADER_SINGLE: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];
const A2S_INFO: u8 = 0x54;
const S2A_INFO: u8 = 0x49;
const S2C_CHALLENGE: u8 = 0x41;
const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";

/// Direct query client with a per-attempt timeout and a fixed retry budget.
#[derive(Debug, Clone)]
pub struct A2sClient {
    timeout: Duration,
    attempts: u32,
}

impl A2sClient {
    pub fn new(timeout: Duration, attempts: u32) -> Self {
        Self {
            timeout,
            attempts: attempts.max(1),
        }
    }
}

impl Default for A2sClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 3)
    }
}

impl ServerQuery for A2sClient {
    async fn query_info(&self, ip: &str, port: u16) -> Result<ServerInfo, QueryError> {
        let address = format!("{}:{}", ip, port);
        let mut last_err = QueryError::Timeout(self.timeout);

        for attempt in 1..=self.attempts {
            match tokio::time::timeout(self.timeout, query_once(&address)).await {
                Ok(Ok(info)) => return Ok(info),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = QueryError::Timeout(self.timeout),
            }
            tracing::trace!("A2S attempt {}/{} to {} failed: {}", attempt, self.attempts, address, last_err);
        }

        Err(last_err)
    }
}

async fn query_once(address: &str) -> Result<ServerInfo, QueryError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| QueryError::Network(format!("failed to bind socket: {}", e)))?;

    socket
        .connect(address)
        .await
        .map_err(|e| QueryError::Network(format!("failed to connect: {}", e)))?;

    let mut challenge: Option<[u8; 4]> = None;
    let mut buf = [0u8; 1400];

    // One challenge round trip at most
    for _ in 0..2 {
        let request = build_info_request(challenge);
        socket
            .send(&request)
            .await
            .map_err(|e| QueryError::Network(format!("failed to send: {}", e)))?;

        let n = socket
            .recv(&mut buf)
            .await
            .map_err(|e| QueryError::Network(format!("failed to recv: {}", e)))?;

        match parse_response(&buf[..n])? {
            Response::Challenge(c) => challenge = Some(c),
            Response::Info(mut info) => {
                info.address = address.to_string();
                return Ok(info);
            }
        }
    }

    Err(QueryError::Protocol("server kept answering with challenges".to_string()))
}

/// Build an A2S_INFO request, optionally answering a challenge.
fn build_info_request(challenge: Option<[u8; 4]>) -> Vec<u8> {
    let mut packet = Vec::with_capacity(29);
    packet.extend_from_slice(&HEADER_SINGLE);
    packet.push(A2S_INFO);
    packet.extend_from_slice(INFO_PAYLOAD);
    if let Some(c) = challenge {
        packet.extend_from_slice(&c);
    }
    packet
}

#[derive(Debug)]
enum Response {
    Challenge([u8; 4]),
    Info(ServerInfo),
}

fn parse_response(data: &[u8]) -> Result<Response, QueryError> {
    let mut reader = Reader::new(data);

    if reader.bytes(4)? != HEADER_SINGLE {
        return Err(QueryError::Protocol("unsupported packet header".to_string()));
    }

    match reader.u8()? {
        S2C_CHALLENGE => {
            let c = reader.bytes(4)?;
            Ok(Response::Challenge([c[0], c[1], c[2], c[3]]))
        }
        S2A_INFO => {
            let _protocol = reader.u8()?;
            let name = reader.cstring()?;
            let map = reader.cstring()?;
            let _folder = reader.cstring()?;
            let _game = reader.cstring()?;
            let _app_id = reader.bytes(2)?;
            let online_players = u32::from(reader.u8()?);
            let max_players = u32::from(reader.u8()?);
            let bots = u32::from(reader.u8()?);
            let _server_type = reader.u8()?;
            let _environment = reader.u8()?;
            let visibility = if reader.u8()? == 0 { Visibility::Public } else { Visibility::Private };

            Ok(Response::Info(ServerInfo {
                name,
                map,
                online_players,
                bots,
                max_players,
                visibility,
                address: String::new(),
            }))
        }
        other => Err(QueryError::Protocol(format!("unexpected response type 0x{:02x}", other))),
    }
}

/// Cursor over a response packet.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], QueryError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(QueryError::Protocol(format!("response too short: {} bytes", self.data.len())));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, QueryError> {
        Ok(self.bytes(1)?[0])
    }

    fn cstring(&mut self) -> Result<String, QueryError> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| QueryError::Protocol("unterminated string".to_string()))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }
}
