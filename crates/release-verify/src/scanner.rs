//! Malware scanner adapter.
//!
//! [`MalwareScanner`] is the seam the pipeline talks to; [`ClamdScanner`]
//! speaks the clamd TCP protocol (`zPING`, `zINSTREAM`). The scanner is
//! treated as unreliable infrastructure: callers degrade on any
//! [`ScanError`] rather than failing the release.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Bytes sent per `INSTREAM` chunk.
const STREAM_CHUNK: usize = 64 * 1024;

/// Assumed worst-case engine throughput when waiting for a verdict.
const SCAN_BYTES_PER_SEC: u64 = 8 * 1024 * 1024;

/// Outcome of a completed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    /// Signature name reported by the engine
    Infected(String),
}

/// Transport or protocol failure talking to the scanner.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scanner I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scanner timed out after {0:?}")]
    Timeout(Duration),

    #[error("scanner protocol error: {0}")]
    Protocol(String),
}

/// Antivirus scanning service.
#[async_trait]
pub trait MalwareScanner: Send + Sync {
    /// Whether the service answers at all.
    async fn ping(&self) -> Result<bool, ScanError>;

    /// Scan the file at `path`.
    async fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError>;
}

/// clamd client over TCP.
#[derive(Debug, Clone)]
pub struct ClamdScanner {
    address: String,
    timeout: Duration,
}

impl ClamdScanner {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Run one I/O step, failing once `limit` passes.
    async fn step<T, F>(&self, limit: Duration, fut: F) -> Result<T, ScanError>
    where
        F: std::future::Future<Output = Result<T, ScanError>>,
    {
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ScanError::Timeout(limit))?
    }

    async fn connect(&self) -> Result<TcpStream, ScanError> {
        self.step(self.timeout, async {
            Ok(TcpStream::connect(&self.address).await?)
        })
        .await
    }

    async fn send(&self, stream: &mut TcpStream, bytes: &[u8]) -> Result<(), ScanError> {
        self.step(self.timeout, async { Ok(stream.write_all(bytes).await?) })
            .await
    }

    async fn ping_inner(&self) -> Result<bool, ScanError> {
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(b"zPING\0").await?;
        let reply = read_reply(&mut stream).await?;
        Ok(reply == "PONG")
    }

    async fn scan_inner(&self, path: &Path) -> Result<ScanVerdict, ScanError> {
        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let mut stream = self.connect().await?;
        self.send(&mut stream, b"zINSTREAM\0").await?;

        let mut buf = vec![0u8; STREAM_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let len = u32::try_from(n)
                .map_err(|_| ScanError::Protocol(format!("chunk of {n} bytes too large")))?;
            self.send(&mut stream, &len.to_be_bytes()).await?;
            self.send(&mut stream, &buf[..n]).await?;
        }
        self.send(&mut stream, &0u32.to_be_bytes()).await?;
        self.step(self.timeout, async { Ok(stream.flush().await?) })
            .await?;

        let reply = self
            .step(reply_timeout(self.timeout, size), read_reply(&mut stream))
            .await?;
        debug!(reply = %reply, size, "clamd INSTREAM reply");
        parse_scan_reply(&reply)
    }
}

#[async_trait]
impl MalwareScanner for ClamdScanner {
    async fn ping(&self) -> Result<bool, ScanError> {
        self.step(self.timeout, self.ping_inner()).await
    }

    /// Each connect and write gets the configured timeout on its own; the
    /// verdict wait is stretched by [`reply_timeout`].
    async fn scan(&self, path: &Path) -> Result<ScanVerdict, ScanError> {
        self.scan_inner(path).await
    }
}

/// Time allowed for clamd's verdict once a `size`-byte stream is sent:
/// the base timeout plus one second per started 8 MiB.
pub fn reply_timeout(base: Duration, size: u64) -> Duration {
    base + Duration::from_secs(size.div_ceil(SCAN_BYTES_PER_SEC))
}

/// Read a NUL-terminated (or EOF-terminated) reply.
async fn read_reply(stream: &mut TcpStream) -> Result<String, ScanError> {
    let mut reply = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 || byte[0] == 0 {
            break;
        }
        reply.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&reply).trim().to_string())
}

/// Interpret an `INSTREAM` reply such as `stream: OK` or
/// `stream: Eicar-Test-Signature FOUND`.
pub fn parse_scan_reply(reply: &str) -> Result<ScanVerdict, ScanError> {
    let body = reply
        .split_once(':')
        .map(|(_, rest)| rest.trim())
        .unwrap_or(reply.trim());
    if body == "OK" {
        return Ok(ScanVerdict::Clean);
    }
    if let Some(signature) = body.strip_suffix(" FOUND") {
        return Ok(ScanVerdict::Infected(signature.trim().to_string()));
    }
    Err(ScanError::Protocol(format!("unexpected reply: {reply}")))
}
