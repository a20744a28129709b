//! Acceptor
//!
//! Listens on one TCP port, spawns an independent tunnel task per accepted
//! connection, and keeps the open-tunnel counter that shows up in every log
//! line. A dying tunnel never affects the acceptor or its siblings.

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::stats::{self, Registry};
use crate::{ingress, tunnel, Error, Result};

/// The proxy server: immutable config plus the accounting registry, shared
/// with every tunnel task.
pub struct Server {
    config: Arc<Config>,
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(config: Arc<Config>, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    /// Bind and serve forever. Only the bind itself can fail.
    pub async fn run(&self, host: &str, port: u16) -> Result<()> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("listening on {}:{}", host, port);
        self.serve(listener).await
    }

    /// Accept loop on an already-bound listener. Accept errors are logged
    /// and swallowed; the acceptor never exits on transient failures.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept error: {}", e);
                    continue;
                }
            };
            trace!("connection from {}", peer);

            stats::tunnel_opened();
            let config = Arc::clone(&self.config);
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                match handle_client(stream, &config, &registry).await {
                    Ok(()) => {}
                    Err(Error::Crypto) => error!("closing tunnel: decryption failed"),
                    Err(Error::Protocol(msg)) => debug!("rejecting client: {}", msg),
                    Err(e) => info!("tunnel closed: {}", e),
                }
                stats::tunnel_closed();
            });
        }
    }
}

/// One client, start to finish: parse the ingress handshake, route the
/// destination, run the tunnel.
async fn handle_client(
    mut stream: TcpStream,
    config: &Config,
    registry: &Registry,
) -> Result<()> {
    let parsed = ingress::accept(&mut stream).await?;
    let endpoint = config.upstream_for(&parsed.host);
    debug!("{} -> {}", parsed.destination_key(), endpoint.addr());
    tunnel::run(stream, parsed, endpoint, registry).await
}
