//! Per-destination traffic accounting
//!
//! One registry entry per active destination, keyed `"host:port"`. Tunnels
//! add the ciphertext length of every upstream frame they receive; a reporter
//! task walks the registry every ten minutes and logs a summary.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::info;

/// How often the reporter enumerates the registry
pub const REPORT_INTERVAL: Duration = Duration::from_secs(600);

/// Currently open tunnels; shown in every log line prefix
static ACTIVE_TUNNELS: AtomicI64 = AtomicI64::new(0);

pub fn tunnel_opened() {
    ACTIVE_TUNNELS.fetch_add(1, Ordering::Relaxed);
}

pub fn tunnel_closed() {
    ACTIVE_TUNNELS.fetch_sub(1, Ordering::Relaxed);
}

pub fn active_tunnels() -> i64 {
    ACTIVE_TUNNELS.load(Ordering::Relaxed)
}

/// Traffic record for one destination
pub struct Transfer {
    /// Unix timestamp of the first tunnel that opened this entry
    first_seen: u64,
    /// Ciphertext bytes received from the upstream for this destination
    bytes_in: AtomicU64,
}

impl Transfer {
    fn new() -> Self {
        Self {
            first_seen: now_unix(),
            bytes_in: AtomicU64::new(0),
        }
    }

    /// Account one received frame by its ciphertext length
    pub fn add(&self, n: u64) {
        self.bytes_in.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn first_seen(&self) -> u64 {
        self.first_seen
    }
}

/// Process-wide accounting registry: destination key -> traffic record
#[derive(Default)]
pub struct Registry {
    entries: DashMap<String, Arc<Transfer>>,
}

impl Registry {
    /// Create or join the entry for a destination. Two tunnels to the same
    /// destination share one record.
    pub fn open(&self, key: &str) -> Arc<Transfer> {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Transfer::new()))
            .clone()
    }

    /// Drop the entry for a destination. The last tunnel to close removes
    /// the record; earlier closers racing a new opener lose the counts,
    /// which accounting accepts.
    pub fn close(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Log one summary line per active destination.
    pub fn report(&self) {
        // Snapshot first; entries may come and go while we print.
        let snapshot: Vec<(String, u64, u64)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().first_seen(), e.value().bytes_in()))
            .collect();

        info!("We have {} servers connected", snapshot.len());
        let now = now_unix();
        for (i, (key, first_seen, bytes)) in snapshot.iter().enumerate() {
            let elapsed = now.saturating_sub(*first_seen);
            info!(
                "{}: [{}] {} {}",
                i,
                format_elapsed(elapsed),
                key,
                format_bytes(*bytes)
            );
        }
    }
}

/// Periodic reporter task; never returns.
pub async fn report_loop(registry: Arc<Registry>) {
    loop {
        tokio::time::sleep(REPORT_INTERVAL).await;
        registry.report();
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Format a byte count as G/M/K in powers of 1024, one decimal.
pub fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    let bytes = bytes as f64;
    if bytes > GIB {
        format!("{:.1}G", bytes / GIB)
    } else if bytes > MIB {
        format!("{:.1}M", bytes / MIB)
    } else {
        format!("{:.1}K", bytes / KIB)
    }
}

/// Format elapsed seconds as `[<H>h][<M>m]<S>s`, dropping leading zero
/// components above seconds.
pub fn format_elapsed(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_add_close() {
        let registry = Registry::default();
        let transfer = registry.open("example.com:443");
        assert_eq!(registry.len(), 1);

        transfer.add(100);
        transfer.add(28);
        assert_eq!(transfer.bytes_in(), 128);

        registry.close("example.com:443");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_tunnels_share_entry() {
        let registry = Registry::default();
        let a = registry.open("example.com:443");
        let b = registry.open("example.com:443");
        assert_eq!(registry.len(), 1);

        a.add(10);
        b.add(20);
        assert_eq!(a.bytes_in(), 30);
        assert_eq!(a.first_seen(), b.first_seen());
    }

    #[test]
    fn test_bytes_in_monotonic() {
        let registry = Registry::default();
        let transfer = registry.open("example.com:80");
        let mut last = 0;
        for n in [5u64, 0, 17, 3] {
            transfer.add(n);
            let current = transfer.bytes_in();
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "0.5K");
        assert_eq!(format_bytes(2048), "2.0K");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0M");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 / 2), "2.5G");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(45), "45s");
        assert_eq!(format_elapsed(90), "1m30s");
        assert_eq!(format_elapsed(3700), "1h1m40s");
        assert_eq!(format_elapsed(0), "0s");
    }
}
