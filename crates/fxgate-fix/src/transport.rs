//! Transport seam for FIX sessions.
//!
//! Sessions dial through the `Dialer` trait so tests can hand the session
//! an in-memory stream and drive a scripted counterparty. The production
//! dialer is plain TCP, optionally tunnelled through a SOCKS5 proxy.

use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// A full-duplex byte stream carrying one FIX session.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for T {}

/// Dials the counterparty. One dial per (re)connect attempt.
pub trait Dialer: Send + Sync {
    fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn SessionStream>>>;
}

/// SOCKS5 proxy endpoint.
#[derive(Debug, Clone)]
pub struct Socks5Proxy {
    pub host: String,
    pub port: u16,
}

/// TCP dialer, optionally through a SOCKS5 proxy (no-auth method only).
#[derive(Debug, Clone)]
pub struct TcpDialer {
    pub host: String,
    pub port: u16,
    pub proxy: Option<Socks5Proxy>,
}

impl TcpDialer {
    pub fn new(host: impl Into<String>, port: u16, proxy: Option<Socks5Proxy>) -> Self {
        Self {
            host: host.into(),
            port,
            proxy,
        }
    }

    async fn dial_direct(&self) -> io::Result<TcpStream> {
        debug!(host = %self.host, port = self.port, "Dialing LP directly");
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn dial_via_socks5(&self, proxy: &Socks5Proxy) -> io::Result<TcpStream> {
        info!(
            proxy_host = %proxy.host,
            proxy_port = proxy.port,
            target = %self.host,
            "Dialing LP via SOCKS5"
        );
        let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
        stream.set_nodelay(true)?;

        // Greeting: version 5, one method, no-auth.
        stream.write_all(&[0x05, 0x01, 0x00]).await?;
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        if reply != [0x05, 0x00] {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "SOCKS5 proxy rejected no-auth method",
            ));
        }

        // CONNECT with domain-name address type.
        let host_bytes = self.host.as_bytes();
        if host_bytes.len() > 255 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "hostname too long for SOCKS5",
            ));
        }
        let mut req = Vec::with_capacity(7 + host_bytes.len());
        req.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, host_bytes.len() as u8]);
        req.extend_from_slice(host_bytes);
        req.extend_from_slice(&self.port.to_be_bytes());
        stream.write_all(&req).await?;

        let mut head = [0u8; 4];
        stream.read_exact(&mut head).await?;
        if head[1] != 0x00 {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("SOCKS5 CONNECT failed: code {}", head[1]),
            ));
        }
        // Drain the bound address the proxy reports.
        let addr_len = match head[3] {
            0x01 => 4,
            0x03 => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                len[0] as usize
            }
            0x04 => 16,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("SOCKS5 bad address type {other}"),
                ));
            }
        };
        let mut skip = vec![0u8; addr_len + 2];
        stream.read_exact(&mut skip).await?;

        Ok(stream)
    }
}

impl Dialer for TcpDialer {
    fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn SessionStream>>> {
        Box::pin(async move {
            let stream = match &self.proxy {
                Some(proxy) => self.dial_via_socks5(proxy).await?,
                None => self.dial_direct().await?,
            };
            Ok(Box::new(stream) as Box<dyn SessionStream>)
        })
    }
}

/// Test dialer handing out pre-queued streams, one per connect attempt.
///
/// Lets tests script reconnect behavior with `tokio::io::duplex` pairs.
pub struct QueueDialer {
    streams: parking_lot::Mutex<std::collections::VecDeque<Box<dyn SessionStream>>>,
}

impl QueueDialer {
    pub fn new() -> Self {
        Self {
            streams: parking_lot::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push(&self, stream: impl SessionStream + 'static) {
        self.streams.lock().push_back(Box::new(stream));
    }
}

impl Default for QueueDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialer for QueueDialer {
    fn dial(&self) -> BoxFuture<'_, io::Result<Box<dyn SessionStream>>> {
        Box::pin(async move {
            self.streams.lock().pop_front().ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no scripted stream left")
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_dialer_hands_out_in_order() {
        let dialer = QueueDialer::new();
        let (a, _keep_a) = tokio::io::duplex(64);
        dialer.push(a);

        assert!(dialer.dial().await.is_ok());
        assert!(dialer.dial().await.is_err());
    }
}
