//! Relay connection: one TCP stream, sequential request/response round trips.

use std::time::{Duration, Instant};

use mibiri_common::helpers::ServerAddr;
use mibiri_common::{decode_line, encode_line, Error, Request, Response, Result, WireMessage};
use mibiri_crypto::PublicKey;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default bound on connecting and on each round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RelayClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    request_timeout: Duration,
}

impl RelayClient {
    /// Open a connection to the relay.
    pub async fn connect(addr: &ServerAddr, request_timeout: Duration) -> Result<Self> {
        let stream = timeout(
            request_timeout,
            TcpStream::connect((addr.host.as_str(), addr.port)),
        )
        .await
        .map_err(|_| Error::timeout(format!("connecting to {}", addr)))??;

        debug!("connected to relay {}", addr);

        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            request_timeout,
        })
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        let limit = self.request_timeout;
        timeout(limit, self.round_trip(request))
            .await
            .map_err(|_| Error::timeout(format!("{} request after {:?}", request.name(), limit)))?
    }

    async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        self.writer
            .write_all(encode_line(request)?.as_bytes())
            .await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(Error::protocol("relay closed the connection"));
        }
        decode_line(&line)
    }

    /// Publish `public_key` under `username`.
    pub async fn register(&mut self, username: &str, public_key: &PublicKey) -> Result<()> {
        let response = self
            .request(&Request::Register {
                username: username.to_string(),
                public_key: public_key.to_base64(),
            })
            .await?;
        expect_ok(response).map(|_| ())
    }

    /// Fetch the registered key of `username`, `None` if the relay has none.
    pub async fn get_pubkey(&mut self, username: &str) -> Result<Option<PublicKey>> {
        let response = self
            .request(&Request::GetPubkey {
                username: username.to_string(),
            })
            .await?;

        match (response.ok, response.public_key) {
            (true, Some(key)) => Ok(Some(PublicKey::from_base64(&key)?)),
            _ => Ok(None),
        }
    }

    /// Submit an already sealed message. The caller checks `ok`.
    pub async fn send_ciphertext(
        &mut self,
        from: &str,
        to: &str,
        ciphertext: String,
        sender_public_key: &PublicKey,
    ) -> Result<Response> {
        self.request(&Request::Send {
            from: from.to_string(),
            to: to.to_string(),
            ciphertext,
            sender_public_key: sender_public_key.to_base64(),
        })
        .await
    }

    /// Drain the mailbox of `username`.
    pub async fn inbox(&mut self, username: &str) -> Result<Vec<WireMessage>> {
        let response = self
            .request(&Request::Inbox {
                username: username.to_string(),
            })
            .await?;
        Ok(expect_ok(response)?.messages.unwrap_or_default())
    }

    /// Round-trip a ping and return the measured latency.
    pub async fn ping(&mut self) -> Result<Duration> {
        let start = Instant::now();
        let response = expect_ok(self.request(&Request::Ping).await?)?;
        if response.pong != Some(true) {
            return Err(Error::protocol("ping answered without pong"));
        }
        Ok(start.elapsed())
    }
}

fn expect_ok(response: Response) -> Result<Response> {
    if response.ok {
        Ok(response)
    } else {
        Err(Error::protocol(format!(
            "relay refused request: {}",
            response.error.as_deref().unwrap_or("no reason given")
        )))
    }
}
