//! Upstream relay wire protocol
//!
//! A freshly dialed upstream connection starts with a three-field handshake:
//!
//! ```text
//! len: u8 | encrypt(key[8..16], key)     check token
//! len: u8 | encrypt(host, key)           destination host
//! port: u16 BE                           destination port, plaintext
//! ```
//!
//! After the handshake both directions speak length-framed ciphertext
//! (see [`frames`]). The upstream sends no acknowledgement; relaying starts
//! immediately.

pub mod frames;

pub use frames::{FrameError, RelayCodec, MAX_CHUNK_SIZE, MAX_FRAME_SIZE};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::crypto::{Cipher, KEY_LEN};
use crate::{Error, Result};

/// The check token plaintext: eight bytes from the middle of the key,
/// sealed under that same key so the upstream can verify key agreement.
const TOKEN_BYTES: std::ops::Range<usize> = 8..16;

/// Write the handshake for a destination onto a freshly dialed upstream
/// connection. Fields go out back to back in one write.
pub async fn write_handshake<W>(
    writer: &mut W,
    cipher: &Cipher,
    key: &[u8; KEY_LEN],
    host: &str,
    port: u16,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let token = cipher.encrypt(&key[TOKEN_BYTES])?;
    let sealed_host = cipher.encrypt(host.as_bytes())?;
    if sealed_host.len() > u8::MAX as usize {
        return Err(Error::Protocol(format!("destination host too long: {host}")));
    }

    let mut buf = BytesMut::with_capacity(2 + token.len() + sealed_host.len() + 2);
    buf.put_u8(token.len() as u8);
    buf.extend_from_slice(&token);
    buf.put_u8(sealed_host.len() as u8);
    buf.extend_from_slice(&sealed_host);
    buf.put_u16(port);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_key;

    async fn handshake_bytes(host: &str, port: u16) -> (Vec<u8>, [u8; KEY_LEN]) {
        let key = derive_key("handshake-test");
        let cipher = Cipher::new(&key);
        let mut out = Vec::new();
        write_handshake(&mut out, &cipher, &key, host, port)
            .await
            .unwrap();
        (out, key)
    }

    #[tokio::test]
    async fn test_handshake_layout() {
        let (out, key) = handshake_bytes("example.com", 443).await;
        let cipher = Cipher::new(&key);

        let token_len = out[0] as usize;
        let token = cipher.decrypt(&out[1..1 + token_len]).unwrap();
        assert_eq!(token, &key[8..16]);

        let rest = &out[1 + token_len..];
        let host_len = rest[0] as usize;
        let host = cipher.decrypt(&rest[1..1 + host_len]).unwrap();
        assert_eq!(host, b"example.com");

        let port = &rest[1 + host_len..];
        assert_eq!(port, &[0x01, 0xBB]);
    }

    #[tokio::test]
    async fn test_handshake_rejects_oversized_host() {
        let key = derive_key("handshake-test");
        let cipher = Cipher::new(&key);
        let long_host = "h".repeat(250);
        let mut out = Vec::new();
        let result = write_handshake(&mut out, &cipher, &key, &long_host, 80).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
