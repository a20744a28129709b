//! Goixy - Encrypted Forwarding Proxy
//!
//! A local proxy that accepts SOCKS5 and HTTP/HTTPS-proxy clients on a single
//! port and relays their traffic to one of two upstream relays over an
//! encrypted, length-framed protocol. Destinations whose host matches a
//! whitelist of regular expressions go to the routed upstream; everything
//! else goes to the direct upstream.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐      ┌──────────────┐
//! │ Application │───────▶│    Goixy    │───────▶│  Upstream   │─────▶│ Destination  │
//! │  (Browser)  │ SOCKS5 │  Port 1080  │ framed │   Relay     │ TCP  │              │
//! │             │◀───────│             │◀───────│             │◀─────│              │
//! └─────────────┘ / HTTP └─────────────┘ crypto └─────────────┘      └──────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod http;
pub mod ingress;
pub mod logging;
pub mod proto;
pub mod server;
pub mod socks5;
pub mod stats;
pub mod tunnel;

// Re-export commonly used items
pub use config::{Config, UpstreamEndpoint};
pub use crypto::{derive_key, Cipher};
pub use ingress::Ingress;
pub use stats::Registry;

use thiserror::Error;

/// Error types for the proxy
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read key file: {0}")]
    KeyFile(std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("decryption failed")]
    Crypto,
}

/// Result type for the proxy
pub type Result<T> = std::result::Result<T, Error>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
