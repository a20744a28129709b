//! HTTP-proxy ingress
//!
//! Parsing is intentionally shallow: only the request line matters. CONNECT
//! requests become opaque tunnels (the client resends everything after our
//! `200 OK`); plain requests are forwarded with their head as the first
//! frame, with absolute-URI GET/HEAD request lines rewritten to origin-form.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use url::{Host, Url};

use crate::ingress::Ingress;
use crate::{Error, Result};

/// Cap on the request head read from the client
pub const MAX_HEAD_SIZE: usize = 8192;

/// Deferred CONNECT acknowledgement
const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n";

/// Default destination port when the request target names none
const DEFAULT_PORT: u16 = 80;

/// Parse an HTTP proxy request. `first` is the byte the ingress dispatcher
/// already consumed.
pub async fn handshake<S>(stream: &mut S, first: u8) -> Result<Ingress>
where
    S: AsyncRead + Unpin,
{
    let head = read_head(stream, first).await?;
    let (method, target) = request_line(&head)?;

    let url = parse_target(target)?;
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(_)) => {
            return Err(Error::Protocol(
                "IPv6 destinations are not supported".to_string(),
            ));
        }
        None => return Err(Error::Protocol("request target has no host".to_string())),
    };
    let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);

    let mut ingress = Ingress::new(host, port);
    if head.starts_with(b"CONNECT") {
        debug!("http CONNECT {}:{}", ingress.host, ingress.port);
        ingress.client_reply = Some(Bytes::from_static(CONNECT_ESTABLISHED));
    } else {
        debug!("http {} {}:{}", method, ingress.host, ingress.port);
        let method = method.to_string();
        let target = target.to_string();
        ingress.preamble = Some(rewrite_head(head.freeze(), &method, &target, &url));
    }
    Ok(ingress)
}

/// Accumulate the request head: stop at the header terminator, the size cap,
/// or EOF. Bytes past the terminator (a pipelined body) stay in the buffer
/// and travel with the preamble.
async fn read_head<S>(stream: &mut S, first: u8) -> Result<BytesMut>
where
    S: AsyncRead + Unpin,
{
    let mut head = BytesMut::with_capacity(MAX_HEAD_SIZE);
    head.put_u8(first);

    let mut chunk = [0u8; 1024];
    while head.len() < MAX_HEAD_SIZE && !has_terminator(&head) {
        let cap = chunk.len().min(MAX_HEAD_SIZE - head.len());
        let n = stream.read(&mut chunk[..cap]).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }
    Ok(head)
}

fn has_terminator(head: &[u8]) -> bool {
    head.windows(4).any(|w| w == b"\r\n\r\n")
}

/// Extract `(method, request_target)` from the head: the target is the first
/// whitespace-delimited token between the method and ` HTTP/`.
fn request_line(head: &[u8]) -> Result<(&str, &str)> {
    let line_end = head
        .windows(6)
        .position(|w| w == b" HTTP/")
        .ok_or_else(|| Error::Protocol("malformed request line".to_string()))?;
    let line = std::str::from_utf8(&head[..line_end])
        .map_err(|_| Error::Protocol("request line is not valid UTF-8".to_string()))?;

    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::Protocol("missing request method".to_string()))?;
    let target = parts
        .next()
        .ok_or_else(|| Error::Protocol("missing request target".to_string()))?;
    Ok((method, target))
}

/// Parse the request target, prepending a scheme when it has none so plain
/// authority forms (`example.com:443`) parse uniformly.
fn parse_target(target: &str) -> Result<Url> {
    let with_scheme = if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{target}")
    };
    Url::parse(&with_scheme).map_err(|e| Error::Protocol(format!("bad request target: {e}")))
}

/// Rewrite an absolute-URI request line to origin-form. Only GET and HEAD
/// are recognized; other methods are forwarded with their request line
/// unchanged, which most origin servers still accept.
fn rewrite_head(head: Bytes, method: &str, target: &str, url: &Url) -> Bytes {
    if method != "GET" && method != "HEAD" {
        return head;
    }
    if !target.starts_with("http://") && !target.starts_with("https://") {
        return head;
    }
    let Some(target_at) = find(&head, target.as_bytes()) else {
        return head;
    };

    let mut origin = url.path().to_string();
    if let Some(query) = url.query() {
        origin.push('?');
        origin.push_str(query);
    }

    let mut out = BytesMut::with_capacity(head.len());
    out.extend_from_slice(&head[..target_at]);
    out.extend_from_slice(origin.as_bytes());
    out.extend_from_slice(&head[target_at + target.len()..]);
    out.freeze()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
