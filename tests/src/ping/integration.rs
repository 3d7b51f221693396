use std::sync::Arc;
use std::time::Duration;

use ntx_common::NtxError;
use ntx_common::network::protocol::{Protocol, Status};
use ntx_common::ping::PingOptions;
use ntx_core::batch;
use ntx_core::network::icmp::IcmpTransport;
use ntx_core::ping::{Pinger, PingerFactory};
use ntx_core::resolver::Resolver;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn open_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        loop {
            let _ = listener.accept().await;
        }
    });
    Ok(port)
}

async fn closed_port() -> anyhow::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

fn factory() -> PingerFactory {
    PingerFactory::new(Arc::new(Resolver::new()))
}

fn tcp(count: u32, interval: Duration, timeout: Duration) -> PingOptions {
    PingOptions {
        protocol: Protocol::Tcp,
        count,
        interval,
        timeout,
        ..PingOptions::default()
    }
}

/// A TCP ping to a listening port gets every probe back.
#[tokio::test]
async fn tcp_ping_open_port() -> anyhow::Result<()> {
    let port = open_port().await?;
    let mut opts = tcp(3, Duration::from_millis(20), Duration::from_secs(2));
    let pinger = factory().create(&mut opts)?;

    let result = pinger
        .ping(&CancellationToken::new(), &format!("127.0.0.1:{port}"), &opts)
        .await?;

    assert_eq!(result.statistics.sent, 3);
    assert_eq!(result.statistics.received, 3);
    assert_eq!(result.statistics.loss_rate, 0.0);
    assert_eq!(result.replies.len(), result.statistics.sent);
    Ok(())
}

/// A closed port refuses the only probe.
#[tokio::test]
async fn tcp_ping_closed_port() -> anyhow::Result<()> {
    let port = closed_port().await?;
    let mut opts = tcp(1, Duration::ZERO, Duration::from_millis(50));
    let pinger = factory().create(&mut opts)?;

    let result = pinger
        .ping(&CancellationToken::new(), &format!("127.0.0.1:{port}"), &opts)
        .await?;

    assert_eq!(result.statistics.received, 0);
    assert_eq!(result.statistics.loss_rate, 100.0);
    assert_eq!(result.replies[0].status, Status::Failure);
    let error = result.replies[0].error.clone().unwrap_or_default();
    assert!(error.to_lowercase().contains("refused"), "{error}");
    Ok(())
}

/// Cancelling a stream part way yields fewer replies than requested.
#[tokio::test]
async fn tcp_stream_cancelled_midway() -> anyhow::Result<()> {
    let port = open_port().await?;
    let mut opts = tcp(10, Duration::from_millis(100), Duration::from_secs(2));
    let pinger = factory().create(&mut opts)?;
    let cancel = CancellationToken::new();

    let mut stream = pinger
        .ping_stream(&cancel, &format!("127.0.0.1:{port}"), &opts)
        .await?;

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });

    let mut count = 0u32;
    while let Some(reply) = stream.recv().await {
        count += 1;
        assert_eq!(reply.seq, count);
    }
    assert!((1..10).contains(&count), "received {count} replies");
    Ok(())
}

fn icmp_denied() -> Result<IcmpTransport, NtxError> {
    Err(NtxError::permission("open", "icmp socket"))
}

/// Without ICMP privileges the factory quietly hands out a TCP pinger.
#[tokio::test]
async fn icmp_denied_falls_back_to_tcp() -> anyhow::Result<()> {
    let port = open_port().await?;
    let factory = PingerFactory::with_icmp_opener(Arc::new(Resolver::new()), icmp_denied);
    let mut opts = PingOptions {
        count: 2,
        interval: Duration::from_millis(10),
        timeout: Duration::from_secs(2),
        ..PingOptions::default()
    };

    let mut pinger = factory.create(&mut opts)?;
    assert_eq!(opts.protocol, Protocol::Tcp);
    assert_eq!(pinger.protocol(), Protocol::Tcp);

    let result = pinger
        .ping(&CancellationToken::new(), &format!("127.0.0.1:{port}"), &opts)
        .await?;
    assert_eq!(result.protocol, Protocol::Tcp);
    assert_eq!(result.status, Status::Success);

    pinger.close().await?;
    pinger.close().await?;
    Ok(())
}

#[tokio::test]
async fn batch_mixes_results_and_errors() -> anyhow::Result<()> {
    let open = open_port().await?;
    let closed = closed_port().await?;
    let targets = vec![
        format!("127.0.0.1:{closed}"),
        format!("127.0.0.1:{open}"),
        "[::1".to_string(),
    ];
    let opts = tcp(2, Duration::from_millis(10), Duration::from_secs(1));

    let outcomes =
        batch::ping_many(&factory(), &targets, &opts, &CancellationToken::new(), None).await;

    let names: Vec<&str> = outcomes.iter().map(|o| o.target.as_str()).collect();
    assert_eq!(names, targets.iter().map(String::as_str).collect::<Vec<_>>());

    let Ok(refused) = &outcomes[0].result else {
        anyhow::bail!("closed port should still produce a result");
    };
    assert_eq!(refused.status, Status::Failure);
    let Ok(answered) = &outcomes[1].result else {
        anyhow::bail!("open port should produce a result");
    };
    assert_eq!(answered.status, Status::Success);
    assert!(matches!(outcomes[2].result, Err(NtxError::InvalidHost(_))));
    Ok(())
}
