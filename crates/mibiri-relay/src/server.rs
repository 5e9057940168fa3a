//! TCP listener and per-connection line loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mibiri_common::{encode_line, error_code, Error, Response, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::store::{Store, DEFAULT_MAX_MAILBOX_LEN};

/// Default configuration values
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5555";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_LINE_BYTES: usize = 256 * 1024;
const STATS_INTERVAL_SECS: u64 = 60;

/// Relay runtime configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    /// Longest wait for the next request line before the connection is dropped
    pub idle_timeout: Duration,
    pub max_line_bytes: usize,
    /// 0 disables the cap
    pub max_mailbox_len: usize,
    pub strict_sender: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 5555)),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_mailbox_len: DEFAULT_MAX_MAILBOX_LEN,
            strict_sender: false,
        }
    }
}

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub idle_timeout: Duration,
    pub max_line_bytes: usize,
}

impl From<&RelayConfig> for ConnectionLimits {
    fn from(config: &RelayConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            max_line_bytes: config.max_line_bytes,
        }
    }
}

/// Relay server state
pub struct Relay {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    limits: ConnectionLimits,
}

impl Relay {
    /// Bind the listener and create an empty store.
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        info!("Relay listening on {}", listener.local_addr()?);

        let store = Arc::new(RwLock::new(Store::new(config.max_mailbox_len)));
        if config.strict_sender {
            info!("Strict sender mode: send requires the registered key of `from`");
        }

        Ok(Self {
            listener,
            dispatcher: Arc::new(Dispatcher::new(store, config.strict_sender)),
            limits: ConnectionLimits::from(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> Arc<RwLock<Store>> {
        self.dispatcher.store().clone()
    }

    /// Accept connections until `shutdown` fires (or its sender is dropped).
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut stats_interval = tokio::time::interval(Duration::from_secs(STATS_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("relay shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let dispatcher = self.dispatcher.clone();
                    let limits = self.limits;
                    tokio::spawn(async move {
                        debug!("New connection from {}", addr);
                        match handle_connection(stream, &dispatcher, limits).await {
                            Ok(()) => debug!("Connection closed: {}", addr),
                            Err(e) => warn!("Connection {} dropped: {}", addr, e),
                        }
                    });
                }
                _ = stats_interval.tick() => {
                    let stats = self.dispatcher.store().read().await.stats();
                    debug!("{} users, {} queued messages", stats.users, stats.queued);
                }
            }
        }

        Ok(())
    }
}

/// Serve one client: read newline-terminated requests and answer each in order.
///
/// Returns when the peer closes the stream. A malformed request only fails
/// that request. An idle timeout or an overlong line ends the connection.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: &Dispatcher,
    limits: ConnectionLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();

    loop {
        buf.clear();

        // One byte past the limit tells an overlong line from one that fits
        let mut limited = (&mut reader).take(limits.max_line_bytes as u64 + 1);
        let read = limited.read_until(b'\n', &mut buf);
        let n = match timeout(limits.idle_timeout, read).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::timeout(format!(
                    "no request within {:?}",
                    limits.idle_timeout
                )))
            }
        };

        if n == 0 {
            break;
        }

        let terminated = buf.last() == Some(&b'\n');
        if !terminated && buf.len() > limits.max_line_bytes {
            write_response(&mut writer, &Response::error(error_code::LINE_TOO_LONG)).await?;
            return Err(Error::protocol(format!(
                "request line exceeds {} bytes",
                limits.max_line_bytes
            )));
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => dispatcher.handle_line(line).await,
            Err(e) => Response::error(Error::protocol(format!("invalid UTF-8: {}", e)).to_string()),
        };
        write_response(&mut writer, &response).await?;

        // Unterminated data only happens right before EOF
        if !terminated {
            break;
        }
    }

    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(encode_line(response)?.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
