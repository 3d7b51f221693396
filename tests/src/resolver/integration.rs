use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use ntx_common::network::protocol::IpVersion;
use ntx_core::resolver::Resolver;

/// Editing a resolved host never leaks back into the cache.
#[tokio::test]
async fn cached_lookups_are_independent_copies() -> anyhow::Result<()> {
    let resolver = Resolver::new();

    let mut first = resolver.resolve("localhost", IpVersion::V4).await?;
    let original = first.clone();
    first.ip = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7));
    first.port = Some(9);

    let second = resolver.resolve("localhost", IpVersion::V4).await?;
    assert_eq!(second, original);
    assert_ne!(second, first);
    Ok(())
}

#[tokio::test]
async fn entries_expire() -> anyhow::Result<()> {
    let resolver = Resolver::with_ttl(Duration::from_millis(30));
    resolver.resolve("localhost", IpVersion::V4).await?;
    assert!(resolver.cached("localhost", IpVersion::V4).is_some());

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(resolver.cached("localhost", IpVersion::V4).is_none());
    assert_eq!(resolver.cache_len(), 0);
    Ok(())
}
