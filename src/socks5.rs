//! SOCKS5 ingress
//!
//! The RFC 1928 subset this proxy speaks: method `0x00` (no authentication)
//! only, CONNECT and BIND commands (BIND is acknowledged but handled exactly
//! like CONNECT; the proxy never binds), IPv4 and domain address types.
//! IPv6 requests are rejected before any reply is written.

use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::ingress::Ingress;
use crate::{Error, Result};

/// SOCKS5 protocol constants
pub const VERSION: u8 = 0x05;
pub const AUTH_NONE: u8 = 0x00;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

/// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;

/// SOCKS5 address types
pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// Fixed success reply: version 5, succeeded, IPv4 null bind address.
/// The proxy never synthesizes a real bound address.
const REPLY_SUCCESS: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Run the SOCKS5 handshake. The version byte has already been consumed by
/// the ingress dispatcher.
pub async fn handshake<S>(stream: &mut S) -> Result<Ingress>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // 1. Method negotiation
    let nmethods = stream.read_u8().await? as usize;
    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    // We only support no authentication
    if !methods.contains(&AUTH_NONE) {
        stream.write_all(&[VERSION, AUTH_NO_ACCEPTABLE]).await?;
        return Err(Error::Protocol("no acceptable auth method".to_string()));
    }
    stream.write_all(&[VERSION, AUTH_NONE]).await?;

    // 2. Request header: ver, cmd, rsv, atyp
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != VERSION {
        return Err(Error::Protocol(format!(
            "bad SOCKS version in request: {:#04x}",
            header[0]
        )));
    }

    let cmd = header[1];
    if cmd != CMD_CONNECT && cmd != CMD_BIND {
        return Err(Error::Protocol(format!("unsupported command: {cmd:#04x}")));
    }

    // 3. Destination address
    let host = match header[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            String::from_utf8(domain)
                .map_err(|_| Error::Protocol("domain is not valid UTF-8".to_string()))?
        }
        ATYP_IPV6 => {
            return Err(Error::Protocol(
                "IPv6 destinations are not supported".to_string(),
            ));
        }
        atyp => {
            return Err(Error::Protocol(format!(
                "unsupported address type: {atyp:#04x}"
            )));
        }
    };

    let port = stream.read_u16().await?;

    // 4. Acknowledge; the client sends its first payload after this reply.
    stream.write_all(&REPLY_SUCCESS).await?;

    debug!(
        "socks5 {} {}:{}",
        if cmd == CMD_BIND { "BIND" } else { "CONNECT" },
        host,
        port
    );

    Ok(Ingress::new(host, port))
}
