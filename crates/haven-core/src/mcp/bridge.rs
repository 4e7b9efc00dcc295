//! Socket bridge: sandboxed children that cannot reach loopback TCP connect
//! instead to a Unix domain socket, which this bridge forwards bidirectionally
//! to the real TCP port the MCP server listens on.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixListener};
use tokio_util::sync::CancellationToken;

use crate::error::{HavenError, Result};

/// Owns the Unix listener and the cancellation token that tears it down.
/// Dropping the handle without calling [`SocketBridge::shutdown`] leaves the
/// forwarding task running until the token's parent scope cancels it.
pub struct SocketBridge {
    socket_path: PathBuf,
    token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl SocketBridge {
    /// Bind `socket_path` and forward every accepted connection to
    /// `127.0.0.1:tcp_port`, each direction copied on its own task.
    pub async fn start(socket_path: PathBuf, tcp_port: u16) -> Result<Self> {
        if socket_path.exists() {
            tokio::fs::remove_file(&socket_path).await.ok();
        }
        if let Some(parent) = socket_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| HavenError::TransportUnreachable(format!("bind {}: {e}", socket_path.display())))?;

        let token = CancellationToken::new();
        let accept_token = token.clone();
        let bound_path = socket_path.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((unix_stream, _)) = accepted else { continue };
                        let conn_token = accept_token.clone();
                        tokio::spawn(async move {
                            if let Ok(tcp_stream) = TcpStream::connect(("127.0.0.1", tcp_port)).await {
                                forward(unix_stream, tcp_stream, conn_token).await;
                            }
                        });
                    }
                }
            }
            tokio::fs::remove_file(&bound_path).await.ok();
        });

        Ok(Self {
            socket_path,
            token,
            task,
        })
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.socket_path
    }

    /// Cancel the forwarding loop and wait for cleanup to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

async fn forward(unix_stream: tokio::net::UnixStream, tcp_stream: TcpStream, token: CancellationToken) {
    let (mut unix_read, mut unix_write) = tokio::io::split(unix_stream);
    let (mut tcp_read, mut tcp_write) = tokio::io::split(tcp_stream);

    let client_to_server = async {
        let mut buf = [0u8; 8192];
        loop {
            match unix_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tcp_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    let server_to_client = async {
        let mut buf = [0u8; 8192];
        loop {
            match tcp_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if unix_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    tokio::select! {
        _ = token.cancelled() => {}
        _ = client_to_server => {}
        _ = server_to_client => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UnixStream};

    #[tokio::test]
    async fn bridge_forwards_bytes_both_ways() {
        let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp_port = tcp_listener.local_addr().unwrap().port();

        let echo_server = tokio::spawn(async move {
            let (mut stream, _) = tcp_listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        let tmp = tempfile::tempdir().unwrap();
        let socket_path = tmp.path().join("bridge.sock");
        let bridge = SocketBridge::start(socket_path.clone(), tcp_port).await.unwrap();

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut response = [0u8; 4];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"ping");

        echo_server.await.unwrap();
        bridge.shutdown().await;
        assert!(!socket_path.exists());
    }
}
