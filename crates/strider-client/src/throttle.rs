//! Per-host politeness delay for the HTTP downloader.
//!
//! Several downloader calls may target the same host at once. Each call
//! reserves the next free slot for its host and sleeps until that slot, so
//! consecutive requests to one host are spaced by at least the configured
//! delay while other hosts proceed undisturbed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use url::Url;

/// Configuration for [`HostThrottle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same host.
    pub delay: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(delay_ms: u64) -> Self {
        Self::new(Duration::from_millis(delay_ms))
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Spaces out requests to the same `scheme://host:port`.
#[derive(Debug)]
pub struct HostThrottle {
    config: ThrottleConfig,
    /// Earliest instant the next request to each host may start.
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    /// Waits for this URL's host slot. Returns how long the caller slept.
    pub async fn wait(&self, url: &Url) -> Duration {
        if self.config.delay.is_zero() {
            return Duration::ZERO;
        }
        let Some(key) = host_key(url) else {
            return Duration::ZERO;
        };

        let pause = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(&key)
                .copied()
                .filter(|slot| *slot > now)
                .unwrap_or(now);
            slots.insert(key.clone(), slot + self.config.delay);
            slot.saturating_duration_since(now)
        };

        if !pause.is_zero() {
            tracing::debug!(host = %key, sleep_ms = %pause.as_millis(), "Throttling request");
            tokio::time::sleep(pause).await;
        }
        pause
    }
}

/// `scheme://host:port`, with the scheme's default port filled in.
fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url
        .port_or_known_default()
        .map(|p| format!(":{p}"))
        .unwrap_or_default();
    Some(format!("{}://{host}{port}", url.scheme()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn host_key_fills_default_port() {
        assert_eq!(
            host_key(&url("https://example.com/path?q=1")),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            host_key(&url("http://example.com:8080/page")),
            Some("http://example.com:8080".to_string())
        );
        assert_eq!(host_key(&url("file:///etc/hosts")), None);
    }

    #[tokio::test]
    async fn same_host_is_spaced_out() {
        let throttle = HostThrottle::new(ThrottleConfig::from_millis(100));
        let start = Instant::now();
        assert_eq!(throttle.wait(&url("http://example.com/a")).await, Duration::ZERO);
        throttle.wait(&url("http://example.com/b")).await;
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(100),
            "second request should wait at least 100ms, waited {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn concurrent_waits_get_distinct_slots() {
        let throttle = HostThrottle::new(ThrottleConfig::from_millis(50));
        let (first, second, third) = (
            url("http://example.com/1"),
            url("http://example.com/2"),
            url("http://example.com/3"),
        );
        let start = Instant::now();
        tokio::join!(
            throttle.wait(&first),
            throttle.wait(&second),
            throttle.wait(&third),
        );
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn different_hosts_are_independent() {
        let throttle = HostThrottle::new(ThrottleConfig::from_millis(200));
        let start = Instant::now();
        throttle.wait(&url("http://example.com/")).await;
        throttle.wait(&url("http://other.org/")).await;
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn zero_delay_never_sleeps() {
        let throttle = HostThrottle::new(ThrottleConfig::from_millis(0));
        for _ in 0..3 {
            assert_eq!(throttle.wait(&url("http://example.com/")).await, Duration::ZERO);
        }
    }
}
