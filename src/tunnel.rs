//! Upstream handshake and the relay engine
//!
//! One tunnel owns both sockets. Client bytes are sealed and framed toward
//! the upstream; upstream frames are opened and streamed back to the client.
//! Frames are atomic on the wire; within one direction order holds, between
//! directions there is none. The only backpressure is TCP's own.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::config::UpstreamEndpoint;
use crate::crypto::Cipher;
use crate::ingress::Ingress;
use crate::proto::{self, RelayCodec, MAX_CHUNK_SIZE};
use crate::stats::{Registry, Transfer};
use crate::Result;

/// A tunnel with no traffic in either direction for this long is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run one tunnel session to completion: dial the chosen upstream, hand it
/// the destination, flush the deferred ingress bytes, then relay until
/// either side ends or the tunnel idles out. Both sockets close on drop,
/// on every exit path.
pub async fn run(
    mut client: TcpStream,
    ingress: Ingress,
    endpoint: &UpstreamEndpoint,
    registry: &Registry,
) -> Result<()> {
    let destination = ingress.destination_key();
    debug!("dialing {} for {}", endpoint.addr(), destination);
    let mut upstream = TcpStream::connect(endpoint.addr()).await?;

    let cipher = Cipher::new(&endpoint.key);
    proto::write_handshake(
        &mut upstream,
        &cipher,
        &endpoint.key,
        &ingress.host,
        ingress.port,
    )
    .await?;

    let mut upstream = Framed::new(upstream, RelayCodec);

    // Deferred ingress writes, now that the upstream leg exists
    if let Some(reply) = &ingress.client_reply {
        client.write_all(reply).await?;
    }
    if let Some(preamble) = &ingress.preamble {
        trace!("preamble for {}: {}", destination, hex::encode(preamble));
        upstream.send(Bytes::from(cipher.encrypt(preamble)?)).await?;
    }

    let transfer = registry.open(&destination);
    let result = relay(&mut client, &mut upstream, &cipher, &transfer).await;
    // Sole removal point; every relay exit passes through here.
    registry.close(&destination);
    result
}

/// The three-source relay loop: upstream frames, client reads, idle clock.
/// The sleep is recreated every iteration, so any event resets it.
async fn relay(
    client: &mut TcpStream,
    upstream: &mut Framed<TcpStream, RelayCodec>,
    cipher: &Cipher,
    transfer: &Transfer,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_CHUNK_SIZE];

    loop {
        tokio::select! {
            frame = upstream.next() => match frame {
                Some(Ok(sealed)) => {
                    let data = cipher.decrypt(&sealed)?;
                    // Wire-level accounting: the ciphertext length
                    transfer.add(sealed.len() as u64);
                    trace!("upstream -> client {} bytes: {}", data.len(), hex::encode(&data));
                    client.write_all(&data).await?;
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    debug!("upstream closed");
                    break;
                }
            },
            read = client.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("client closed");
                    break;
                }
                Ok(n) => {
                    trace!("client -> upstream {} bytes: {}", n, hex::encode(&buf[..n]));
                    let sealed = cipher.encrypt(&buf[..n])?;
                    upstream.send(Bytes::from(sealed)).await?;
                }
                Err(e) => return Err(e.into()),
            },
            _ = tokio::time::sleep(IDLE_TIMEOUT) => {
                debug!("idle timeout, closing tunnel");
                break;
            }
        }
    }

    Ok(())
}
