//! Configuration management and destination routing
//!
//! Configuration lives at `$HOME/.goixy/config.json`. An absent file is
//! tolerated: the proxy starts with no usable upstreams and every tunnel
//! fails at dial time.

use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::crypto::{self, derive_key};
use crate::{Error, Result};

/// One of the two upstream relays configured for the process lifetime.
#[derive(Clone)]
pub struct UpstreamEndpoint {
    pub host: String,
    pub port: u16,
    /// Wire key: SHA-256 of the trimmed passphrase
    pub key: [u8; crypto::KEY_LEN],
}

impl UpstreamEndpoint {
    /// Address in `host:port` form for dialing
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Key material stays out of Debug output.
impl fmt::Debug for UpstreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Process-wide configuration, immutable after startup
pub struct Config {
    /// Upstream for whitelisted destinations
    pub routed: UpstreamEndpoint,
    /// Upstream for everything else
    pub direct: UpstreamEndpoint,
    /// Host patterns routed via `routed`, in declared order
    pub whitelist: Vec<Regex>,
}

/// On-disk schema of `config.json`. Ports are strings in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    #[serde(rename = "Host")]
    host: String,
    #[serde(rename = "Port")]
    port: String,
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "WhiteList")]
    white_list: Vec<String>,
    #[serde(rename = "DirectHost")]
    direct_host: String,
    #[serde(rename = "DirectPort")]
    direct_port: String,
    #[serde(rename = "DirectKey")]
    direct_key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_raw(RawConfig::default()).expect("empty config is valid")
    }
}

impl Config {
    /// Load configuration from `$HOME/.goixy/config.json`
    pub fn load() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| Error::InvalidConfig("HOME is not set".to_string()))?;
        let path = PathBuf::from(home).join(".goixy").join("config.json");
        Self::from_file(&path)
    }

    /// Load configuration from a file. A missing file yields the default
    /// (upstream-less) configuration; any other read error is fatal.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(Error::KeyFile(e)),
        };
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let key = derive_key(&raw.key);
        let direct_key = if raw.direct_key.trim().is_empty() {
            // DirectKey falls back to the routed key
            key
        } else {
            derive_key(&raw.direct_key)
        };

        let whitelist = raw
            .white_list
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| Error::InvalidConfig(format!("bad whitelist pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            routed: UpstreamEndpoint {
                host: raw.host,
                port: parse_port(&raw.port)?,
                key,
            },
            direct: UpstreamEndpoint {
                host: raw.direct_host,
                port: parse_port(&raw.direct_port)?,
                key: direct_key,
            },
            whitelist,
        })
    }

    /// Pick the upstream for a destination host. The first whitelist pattern
    /// that finds a match anywhere in the host selects the routed upstream;
    /// no match selects the direct upstream. Ports play no part.
    pub fn upstream_for(&self, host: &str) -> &UpstreamEndpoint {
        if self.whitelist.iter().any(|re| re.is_match(host)) {
            &self.routed
        } else {
            &self.direct
        }
    }
}

fn parse_port(s: &str) -> Result<u16> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }
    s.parse()
        .map_err(|_| Error::InvalidConfig(format!("bad port: {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "Host": "relay.example.net",
        "Port": "9191",
        "Key": "routed-passphrase",
        "WhiteList": ["\\.internal$", "corp"],
        "DirectHost": "direct.example.net",
        "DirectPort": "9292",
        "DirectKey": ""
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.routed.host, "relay.example.net");
        assert_eq!(config.routed.port, 9191);
        assert_eq!(config.direct.port, 9292);
        assert_eq!(config.whitelist.len(), 2);
    }

    #[test]
    fn test_direct_key_inherits_routed_key() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.direct.key, config.routed.key);

        let own_key = SAMPLE.replace(r#""DirectKey": """#, r#""DirectKey": "other""#);
        let config = Config::from_json(&own_key).unwrap();
        assert_ne!(config.direct.key, config.routed.key);
    }

    #[test]
    fn test_whitelisted_host_routes_to_routed_upstream() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.upstream_for("db.internal").host, "relay.example.net");
        assert_eq!(config.upstream_for("example.com").host, "direct.example.net");
        // find semantics, not an anchored match
        assert_eq!(config.upstream_for("my-corp-proxy").host, "relay.example.net");
    }

    #[test]
    fn test_routing_ignores_port_and_is_deterministic() {
        let config = Config::from_json(SAMPLE).unwrap();
        for _ in 0..3 {
            assert_eq!(config.upstream_for("db.internal").host, "relay.example.net");
        }
    }

    #[test]
    fn test_empty_config_has_no_usable_upstreams() {
        let config = Config::from_json("{}").unwrap();
        assert!(config.routed.host.is_empty());
        assert_eq!(config.routed.port, 0);
        assert!(config.whitelist.is_empty());
    }

    #[test]
    fn test_bad_json_rejected() {
        assert!(matches!(
            Config::from_json("not json"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_whitelist_pattern_rejected() {
        let bad = r#"{"WhiteList": ["["]}"#;
        assert!(matches!(
            Config::from_json(bad),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_port_rejected() {
        let bad = r#"{"Port": "not-a-port"}"#;
        assert!(matches!(
            Config::from_json(bad),
            Err(Error::InvalidConfig(_))
        ));
    }
}
