//! MCP transport & health probe (C6).
//!
//! The core assumes a local Model Context Protocol endpoint: line-delimited
//! JSON-RPC over a Unix domain socket or a loopback TCP port. The server
//! publishes its transport descriptor to a well-known file under the haven
//! root; both sandboxed children and the supervisor itself read it.

mod bridge;

pub use bridge::SocketBridge;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

use crate::error::{HavenError, Result};
use crate::haven_layout::HavenLayout;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Unix,
    Tcp,
}

/// Published by the MCP server at a well-known path under the haven root
/// (§4.6, §6 filesystem layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportDescriptor {
    pub mode: TransportMode,
    pub socket: Option<String>,
    pub port: Option<u16>,
    pub pid: u32,
}

impl TransportDescriptor {
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HavenError::Artifact(e.to_string()))?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            HavenError::TransportUnreachable(format!(
                "no transport descriptor at {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| HavenError::TransportUnreachable(format!("malformed descriptor: {e}")))
    }
}

/// Capability set shared by every transport variant (§9 "polymorphism over
/// transport"): connect once, then read/write newline-delimited JSON-RPC.
#[async_trait]
pub trait McpTransport: Send {
    async fn write_line(&mut self, line: &str) -> Result<()>;
    async fn read_line(&mut self) -> Result<String>;
    async fn close(self: Box<Self>) -> Result<()>;
}

pub struct UnixTransport {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl UnixTransport {
    pub async fn connect(socket_path: &str) -> Result<Self> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path))
            .await
            .map_err(|_| HavenError::TransportUnreachable(format!("connect timed out: {socket_path}")))?
            .map_err(|e| HavenError::TransportUnreachable(format!("{socket_path}: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}

#[async_trait]
impl McpTransport for UnixTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = String::new();
        self.reader.read_line(&mut buf).await?;
        Ok(buf)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

pub struct TcpTransport {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl TcpTransport {
    pub async fn connect(port: u16) -> Result<Self> {
        let addr = format!("127.0.0.1:{port}");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| HavenError::TransportUnreachable(format!("connect timed out: {addr}")))?
            .map_err(|e| HavenError::TransportUnreachable(format!("{addr}: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}

#[async_trait]
impl McpTransport for TcpTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut buf = String::new();
        self.reader.read_line(&mut buf).await?;
        Ok(buf)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Connect using whichever transport the descriptor names.
pub async fn connect(descriptor: &TransportDescriptor) -> Result<Box<dyn McpTransport>> {
    match descriptor.mode {
        TransportMode::Unix => {
            let socket = descriptor.socket.as_ref().ok_or_else(|| {
                HavenError::TransportUnreachable("descriptor missing socket path".into())
            })?;
            Ok(Box::new(UnixTransport::connect(socket).await?))
        }
        TransportMode::Tcp => {
            let port = descriptor.port.ok_or_else(|| {
                HavenError::TransportUnreachable("descriptor missing port".into())
            })?;
            Ok(Box::new(TcpTransport::connect(port).await?))
        }
    }
}

/// `true` iff the OS process named in the descriptor is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub pid_alive: bool,
    pub connectivity_ok: bool,
}

/// `checkMcpAgentServer(havenDir)`: read the descriptor, verify the pid is
/// alive, then send one `tools/list` request and expect any well-formed
/// JSON-RPC response within [`CONNECT_TIMEOUT`].
pub async fn check_mcp_agent_server(haven_dir: &Path) -> Result<HealthReport> {
    let layout = HavenLayout::new(haven_dir);
    let descriptor = TransportDescriptor::read(&layout.mcp_descriptor_path()).await?;

    if !pid_alive(descriptor.pid) {
        return Ok(HealthReport {
            pid_alive: false,
            connectivity_ok: false,
        });
    }

    let connectivity_ok = tokio::time::timeout(CONNECT_TIMEOUT, probe_connectivity(&descriptor))
        .await
        .unwrap_or(false);

    Ok(HealthReport {
        pid_alive: true,
        connectivity_ok,
    })
}

async fn probe_connectivity(descriptor: &TransportDescriptor) -> bool {
    let Ok(mut transport) = connect(descriptor).await else {
        return false;
    };
    let request = serde_json::json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1});
    if transport.write_line(&request.to_string()).await.is_err() {
        return false;
    }
    let Ok(response) = transport.read_line().await else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(&response)
        .map(|v| v.get("jsonrpc").is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn descriptor_round_trips_through_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp-transport.json");
        let descriptor = TransportDescriptor {
            mode: TransportMode::Unix,
            socket: Some("/tmp/haven.sock".into()),
            port: None,
            pid: 4242,
        };
        descriptor.write(&path).await.unwrap();

        let read_back = TransportDescriptor::read(&path).await.unwrap();
        assert_eq!(read_back.pid, 4242);
        assert_eq!(read_back.mode, TransportMode::Unix);
    }

    #[tokio::test]
    async fn read_missing_descriptor_is_transport_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let result = TransportDescriptor::read(&tmp.path().join("missing.json")).await;
        assert!(matches!(result, Err(HavenError::TransportUnreachable(_))));
    }

    #[tokio::test]
    async fn check_server_with_dead_pid_reports_not_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let descriptor = TransportDescriptor {
            mode: TransportMode::Tcp,
            socket: None,
            port: Some(1),
            pid: 999_999_999,
        };
        descriptor
            .write(&tmp.path().join("mcp-transport.json"))
            .await
            .unwrap();

        let report = check_mcp_agent_server(tmp.path()).await.unwrap();
        assert!(!report.pid_alive);
        assert!(!report.connectivity_ok);
    }

    #[tokio::test]
    async fn unix_transport_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let socket_path = tmp.path().join("test.sock");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            write_half.write_all(line.as_bytes()).await.unwrap();
        });

        let mut client = UnixTransport::connect(socket_path.to_str().unwrap())
            .await
            .unwrap();
        client.write_line("hello").await.unwrap();
        let echoed = client.read_line().await.unwrap();
        assert_eq!(echoed.trim(), "hello");

        server.await.unwrap();
    }
}
