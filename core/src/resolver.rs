//! Host resolution with a time-bounded cache.
//!
//! Forward lookups go through the system resolver. Reverse lookups, used
//! to name traceroute hops, go through hickory and are not cached here.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use ntx_common::NtxError;
use ntx_common::network::host::Host;
use ntx_common::network::protocol::IpVersion;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    host: Host,
    expires_at: Instant,
}

pub struct Resolver {
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    reverse: OnceCell<TokioAsyncResolver>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
            reverse: OnceCell::new(),
        }
    }

    /// Resolves `host` to one address matching `pref`.
    ///
    /// IP literals, bracketed IPv6 included, are returned without touching
    /// the cache or the network.
    pub async fn resolve(&self, host: &str, pref: IpVersion) -> Result<Host, NtxError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(NtxError::InvalidHost(host.to_string()));
        }
        if let Some(ip) = parse_ip_literal(host) {
            return Ok(Host::new(host, ip));
        }
        if let Some(cached) = self.cached(host, pref) {
            return Ok(cached);
        }

        debug!("Resolving {host} ({pref})");
        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| NtxError::DnsResolution {
                host: host.to_string(),
                source,
            })?
            .map(|addr| addr.ip())
            .collect();

        let ip: IpAddr = select_address(&addrs, pref).ok_or_else(|| NtxError::NoAddress {
            host: host.to_string(),
            version: pref,
        })?;

        let resolved = Host::new(host, ip);
        self.cache.write().insert(
            cache_key(host, pref),
            CacheEntry {
                host: resolved.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(resolved)
    }

    /// A copy of the cached entry, evicting it if it has expired.
    pub fn cached(&self, host: &str, pref: IpVersion) -> Option<Host> {
        let key = cache_key(host, pref);
        {
            let cache = self.cache.read();
            match cache.get(&key) {
                Some(entry) if Instant::now() < entry.expires_at => {
                    return Some(entry.host.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        take_fresh(&mut self.cache.write(), &key, Instant::now())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    /// Best-effort PTR lookup, trailing dot removed.
    pub async fn reverse_lookup(&self, ip: IpAddr) -> Option<String> {
        let resolver = self
            .reverse
            .get_or_init(|| async {
                TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
                    TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
                })
            })
            .await;

        match resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!("Reverse lookup of {ip} failed: {e}");
                None
            }
        }
    }
}

pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse().ok()
}

/// The entry for `key` if it is still valid at `now`, else evicts it.
/// Another task may have refreshed the entry since it was seen expired.
fn take_fresh(cache: &mut HashMap<String, CacheEntry>, key: &str, now: Instant) -> Option<Host> {
    let fresh = cache
        .get(key)
        .filter(|entry| now < entry.expires_at)
        .map(|entry| entry.host.clone());
    if fresh.is_none() {
        cache.remove(key);
    }
    fresh
}

fn cache_key(host: &str, pref: IpVersion) -> String {
    format!("{}|{}", host.to_lowercase(), pref)
}

fn select_address(addrs: &[IpAddr], pref: IpVersion) -> Option<IpAddr> {
    addrs.iter().copied().find(|ip| pref.accepts(ip))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[tokio::test]
    async fn literals_bypass_the_cache() {
        let resolver = Resolver::new();

        let v4 = resolver.resolve("127.0.0.1", IpVersion::Any).await.unwrap();
        assert_eq!(v4.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(v4.ip_version, IpVersion::V4);

        let v6 = resolver.resolve("[::1]", IpVersion::Any).await.unwrap();
        assert_eq!(v6.ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(v6.ip_version, IpVersion::V6);

        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn empty_host_is_rejected() {
        let resolver = Resolver::new();
        let err = resolver.resolve("  ", IpVersion::Any).await.unwrap_err();
        assert!(matches!(err, NtxError::InvalidHost(_)));
    }

    #[tokio::test]
    async fn cached_hosts_are_copies() {
        let resolver = Resolver::new();

        let mut first = resolver.resolve("localhost", IpVersion::V4).await.unwrap();
        first.hostname = "mutated".to_string();
        first.ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

        let second = resolver.resolve("LOCALHOST", IpVersion::V4).await.unwrap();
        assert_eq!(second.hostname, "localhost");
        assert!(second.ip.is_loopback());
        assert_eq!(resolver.cache_len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_lookup() {
        let resolver = Resolver::with_ttl(Duration::ZERO);
        resolver.resolve("localhost", IpVersion::V4).await.unwrap();
        assert_eq!(resolver.cache_len(), 1);

        assert!(resolver.cached("localhost", IpVersion::V4).is_none());
        assert_eq!(resolver.cache_len(), 0);
    }

    #[test]
    fn refreshed_entries_survive_eviction() {
        let now = Instant::now();
        let host = Host::new("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut cache = HashMap::new();
        cache.insert(
            "fresh".to_string(),
            CacheEntry {
                host: host.clone(),
                expires_at: now + Duration::from_secs(60),
            },
        );
        cache.insert(
            "stale".to_string(),
            CacheEntry {
                host,
                expires_at: now,
            },
        );

        assert!(take_fresh(&mut cache, "fresh", now).is_some());
        assert!(take_fresh(&mut cache, "stale", now).is_none());
        assert!(take_fresh(&mut cache, "missing", now).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key("fresh"));
    }

    #[test]
    fn address_selection_honours_preference() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
        let addrs = [v6, v4];

        assert_eq!(select_address(&addrs, IpVersion::Any), Some(v6));
        assert_eq!(select_address(&addrs, IpVersion::V4), Some(v4));
        assert_eq!(select_address(&[v4], IpVersion::V6), None);
    }

    #[test]
    fn cache_key_ignores_case() {
        assert_eq!(
            cache_key("Example.COM", IpVersion::V4),
            cache_key("example.com", IpVersion::V4)
        );
        assert_ne!(
            cache_key("example.com", IpVersion::V4),
            cache_key("example.com", IpVersion::V6)
        );
    }

    #[tokio::test]
    #[ignore]
    async fn reverse_lookup_of_public_resolver() {
        let resolver = Resolver::new();
        let name = resolver
            .reverse_lookup(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)))
            .await;
        assert!(name.is_some());
    }
}
