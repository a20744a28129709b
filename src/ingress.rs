//! Client ingress: protocol detection and destination extraction
//!
//! One listening port serves both SOCKS5 and HTTP-proxy clients. The first
//! byte decides: SOCKS5 always opens with its version byte `0x05`, while
//! every HTTP method keyword starts with an ASCII uppercase letter, which
//! sorts strictly above `0x05`.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::{http, socks5, Error, Result};

/// What an ingress handshake yields: where the client wants to go, plus any
/// bytes whose write is deferred until the upstream handshake is done.
#[derive(Debug, Clone)]
pub struct Ingress {
    pub host: String,
    pub port: u16,
    /// Written plaintext to the client after the upstream handshake
    pub client_reply: Option<Bytes>,
    /// Sent to the upstream as the first encrypted frame
    pub preamble: Option<Bytes>,
}

impl Ingress {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            client_reply: None,
            preamble: None,
        }
    }

    /// Accounting-registry key for this destination
    pub fn destination_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read the first client byte and run the matching handshake parser.
pub async fn accept<S>(stream: &mut S) -> Result<Ingress>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut first = [0u8; 1];
    stream.read_exact(&mut first).await?;

    match first[0] {
        socks5::VERSION => socks5::handshake(stream).await,
        byte if byte > socks5::VERSION => http::handshake(stream, byte).await,
        byte => Err(Error::Protocol(format!(
            "unsupported ingress protocol, first byte {byte:#04x}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_unknown_protocol_rejected() {
        let (mut client, mut server) = duplex(256);
        client.write_all(&[0x04]).await.unwrap(); // SOCKS4 is not supported

        let result = accept(&mut server).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_socks5_byte_dispatches() {
        let (mut client, mut server) = duplex(256);
        // greeting: one method, no-auth; request: CONNECT 127.0.0.1:80
        client
            .write_all(&[
                0x05, 0x01, 0x00, //
                0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50,
            ])
            .await
            .unwrap();

        let ingress = accept(&mut server).await.unwrap();
        assert_eq!(ingress.host, "127.0.0.1");
        assert_eq!(ingress.port, 80);
    }

    #[tokio::test]
    async fn test_http_byte_dispatches() {
        let (mut client, mut server) = duplex(8192);
        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let ingress = accept(&mut server).await.unwrap();
        assert_eq!(ingress.host, "example.com");
        assert_eq!(ingress.port, 443);
    }
}
