//! TCP control server.
//!
//! One task per client. Requests are handled inline against the shared
//! [`ControlState`]; a `Monitor` request additionally starts a per-client
//! task that pushes every status change down the same socket.

use crate::control::ControlState;
use crate::protocol::{create_response, CommandResponse, CommandType, ProtocolHandler, ResponseStatus, MAX_COMMAND_SIZE};
use crate::status::StatusReader;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

enum Request {
    Line(String),
    /// Longer than [`MAX_COMMAND_SIZE`]; the rest of it was discarded unread.
    Oversize,
    /// Not UTF-8.
    Garbled,
    Closed,
}

pub struct ControlServer {
    listener: TcpListener,
    control: Arc<ControlState>,
    status: StatusReader,
}

impl ControlServer {
    pub async fn bind(addr: &str, control: Arc<ControlState>, status: StatusReader) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            control,
            status,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until the task is aborted.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("Control server listening on {}", addr),
            Err(e) => warn!("Control server address unknown: {}", e),
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!("Control client connected: {}", addr);
                    let control = Arc::clone(&self.control);
                    let status = self.status.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, control, status).await {
                            warn!("Client {} error: {}", addr, e);
                        }
                        info!("Control client {} disconnected", addr);
                    });
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
    }

    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

async fn handle_client(stream: TcpStream, control: Arc<ControlState>, status: StatusReader) -> std::io::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let writer: SharedWriter = Arc::new(Mutex::new(writer));
    let mut handler = ProtocolHandler::new();
    let mut monitor: Option<JoinHandle<()>> = None;

    let mut buffer = Vec::with_capacity(MAX_COMMAND_SIZE + 1);
    loop {
        let line = match read_request(&mut reader, &mut buffer).await? {
            Request::Line(line) => line,
            Request::Closed => break,
            Request::Oversize => {
                warn!("Dropping command longer than {} bytes", MAX_COMMAND_SIZE);
                let message = format!("command exceeds {} bytes", MAX_COMMAND_SIZE);
                let response = create_response(0, ResponseStatus::InvalidCommand, Some(message));
                reply(&mut handler, &writer, &response).await?;
                continue;
            }
            Request::Garbled => {
                let response = create_response(0, ResponseStatus::InvalidCommand, Some("command is not UTF-8".to_string()));
                reply(&mut handler, &writer, &response).await?;
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match handler.parse_command(trimmed) {
            Ok(command) => {
                debug!(?command, "Received command");
                let response = handler.execute(&command, &control, &status);
                if command.command_type == CommandType::Monitor && monitor.is_none() {
                    monitor = Some(spawn_monitor(status.clone(), Arc::clone(&writer)));
                }
                response
            }
            Err(e) => {
                warn!("Failed to parse command: {}", e);
                create_response(0, ResponseStatus::InvalidCommand, Some(e.to_string()))
            }
        };

        reply(&mut handler, &writer, &response).await?;
    }

    if let Some(task) = monitor {
        task.abort();
    }
    Ok(())
}

async fn reply(handler: &mut ProtocolHandler, writer: &SharedWriter, response: &CommandResponse) -> std::io::Result<()> {
    let json = match handler.serialize_response(response) {
        Ok(json) => json.to_string(),
        Err(e) => {
            error!("Response serialization failed: {}", e);
            return Ok(());
        }
    };
    write_line(writer, &json).await
}

/// Read one newline-terminated request without ever buffering more than
/// `MAX_COMMAND_SIZE + 1` bytes of it.
async fn read_request<R>(reader: &mut R, buffer: &mut Vec<u8>) -> std::io::Result<Request>
where
    R: AsyncBufRead + Unpin,
{
    buffer.clear();
    let limit = MAX_COMMAND_SIZE as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buffer).await?;
    if read == 0 {
        return Ok(Request::Closed);
    }
    if buffer.last() != Some(&b'\n') && read as u64 == limit {
        discard_line(reader).await?;
        return Ok(Request::Oversize);
    }
    match std::str::from_utf8(buffer) {
        Ok(line) => Ok(Request::Line(line.to_string())),
        Err(_) => Ok(Request::Garbled),
    }
}

/// Skip to just past the next newline, or to end of stream.
async fn discard_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, found) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(at) => (at + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if found {
            return Ok(());
        }
    }
}

fn spawn_monitor(mut status: StatusReader, writer: SharedWriter) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = status.changed().await {
            let json = match serde_json::to_string(&snapshot) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Status serialization failed: {}", e);
                    continue;
                }
            };
            if let Err(e) = write_line(&writer, &json).await {
                debug!("Monitor stream closed: {}", e);
                break;
            }
        }
    })
}

async fn write_line(writer: &SharedWriter, json: &str) -> std::io::Result<()> {
    let mut guard = writer.lock().await;
    guard.write_all(json.as_bytes()).await?;
    guard.write_all(b"\n").await
}
