//! Tunnel listener and the minimal line-delimited init framing used to
//! drive `ConnHandler` (§4.I). The full tunnel wire protocol is an external
//! collaborator per `SPEC_FULL.md` §1; this is the thin stand-in that lets
//! the hard core actually accept a TCP connection end to end.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use vertex_relay_core::connhandler::{ConnHandler, Dialer, Outcome, ParsedInit, Splicer};
use vertex_relay_core::sharetokenstore::StoredShareToken;
use vertex_tasks::TaskExecutor;

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireInit {
    Ping { ping: bool },
    Tunnel { token: StoredShareToken, target: String },
}

/// Parses the overlay-scheme listener address (`overlay://host:port`) into
/// a TCP bind address. The `overlay` scheme names this relay's logical
/// listener, not a distinct transport.
pub fn bind_addr(address: &str) -> Result<String, url::ParseError> {
    let parsed = url::Url::parse(address)?;
    let host = parsed.host_str().unwrap_or("0.0.0.0");
    let port = parsed.port().unwrap_or(0);
    Ok(format!("{host}:{port}"))
}

/// Accepts connections on `listener` until the process is told to shut
/// down, spawning one task per connection via `executor`.
pub async fn serve<D, S>(listener: TcpListener, handler: Arc<ConnHandler<D, S>>, executor: TaskExecutor)
where
    D: Dialer + 'static,
    S: Splicer + 'static,
{
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(%err, "failed to accept tunnel connection");
                continue;
            }
        };
        let handler = handler.clone();
        executor.spawn(async move {
            if let Err(err) = handle_one(stream, &handler).await {
                tracing::warn!(%peer, %err, "tunnel connection ended with an error");
            }
        });
    }
}

async fn handle_one<D, S>(stream: tokio::net::TcpStream, handler: &ConnHandler<D, S>) -> std::io::Result<()>
where
    D: Dialer,
    S: Splicer,
{
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let parsed: WireInit = match serde_json::from_str(line.trim()) {
        Ok(parsed) => parsed,
        Err(err) => {
            reader.write_all(format!("ERR 400 malformed init: {err}\n").as_bytes()).await?;
            return Ok(());
        }
    };

    let init = match parsed {
        WireInit::Ping { ping } => ParsedInit {
            is_ping: ping,
            token: Arc::new(StoredShareToken {
                contract_id: String::new(),
                relay_pubkey: String::new(),
                settlement_open: 0,
                settlement_close: 0,
                signature: String::new(),
            }),
            target: String::new(),
        },
        WireInit::Tunnel { token, target } => ParsedInit { is_ping: false, token: Arc::new(token), target },
    };

    match handler.handle(init, &mut reader).await {
        Ok(Outcome::Pong) => reader.write_all(b"PONG\n").await,
        Ok(Outcome::Tunneled) => Ok(()),
        Err(err) => {
            let status = err.status_code();
            reader.write_all(format!("ERR {status} {err}\n").as_bytes()).await
        }
    }
}
