//! Pinging many targets at once, one pinger per target.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use ntx_common::NtxError;
use ntx_common::ping::{PingOptions, PingResult};
use ntx_common::utils::concurrency::worker_count;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ping::{Pinger, PingerFactory};

#[derive(Debug)]
pub struct BatchOutcome {
    pub target: String,
    pub result: Result<PingResult, NtxError>,
}

/// Pings every target with its own pinger, at most `concurrency` at a time
/// (`None` picks a default from the core count). Outcomes come back in
/// input order.
pub async fn ping_many(
    factory: &PingerFactory,
    targets: &[String],
    opts: &PingOptions,
    cancel: &CancellationToken,
    concurrency: Option<usize>,
) -> Vec<BatchOutcome> {
    let factory = factory.clone();
    let opts = opts.clone();
    let cancel = cancel.clone();

    fan_out(targets, concurrency, move |target| {
        let factory = factory.clone();
        let mut opts = opts.clone();
        let cancel = cancel.clone();
        async move { ping_one(&factory, &target, &mut opts, &cancel).await }
    })
    .await
}

/// Runs `run` once per target under a semaphore. A task that dies is
/// reported as an error for its own target.
async fn fan_out<F, Fut>(
    targets: &[String],
    concurrency: Option<usize>,
    run: F,
) -> Vec<BatchOutcome>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<PingResult, NtxError>> + Send + 'static,
{
    let workers = worker_count(targets.len(), concurrency);
    let permits = Arc::new(Semaphore::new(workers));
    debug!("Pinging {} targets with {workers} workers", targets.len());

    let mut tasks: JoinSet<BatchOutcome> = JoinSet::new();
    let mut indices: HashMap<Id, usize> = HashMap::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        let permits = Arc::clone(&permits);
        let work = run(target.clone());
        let target = target.clone();

        let handle = tasks.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => work.await,
                Err(_) => Err(NtxError::Closed),
            };
            BatchOutcome { target, result }
        });
        indices.insert(handle.id(), index);
    }

    let mut outcomes: Vec<Option<BatchOutcome>> = (0..targets.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((id, outcome)) => {
                if let Some(&index) = indices.get(&id) {
                    outcomes[index] = Some(outcome);
                }
            }
            Err(e) => {
                warn!("Ping task failed: {e}");
                if let Some(&index) = indices.get(&e.id()) {
                    outcomes[index] = Some(BatchOutcome {
                        target: targets[index].clone(),
                        result: Err(NtxError::Io(io::Error::other(format!(
                            "ping task failed: {e}"
                        )))),
                    });
                }
            }
        }
    }

    outcomes
        .into_iter()
        .zip(targets)
        .map(|(outcome, target)| {
            outcome.unwrap_or_else(|| BatchOutcome {
                target: target.clone(),
                result: Err(NtxError::Cancelled),
            })
        })
        .collect()
}

async fn ping_one(
    factory: &PingerFactory,
    target: &str,
    opts: &mut PingOptions,
    cancel: &CancellationToken,
) -> Result<PingResult, NtxError> {
    if cancel.is_cancelled() {
        return Err(NtxError::Cancelled);
    }
    let mut pinger = factory.create(opts)?;
    let result = pinger.ping(cancel, target, opts).await;
    if let Err(e) = pinger.close().await {
        debug!("Closing pinger for {target}: {e}");
    }
    result
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
    use crate::resolver::Resolver;
    use ntx_common::network::protocol::{Protocol, Status};
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = open.local_addr().unwrap().port();
        let closed_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let targets = vec![
            format!("127.0.0.1:{open_port}"),
            format!("127.0.0.1:{closed_port}"),
            "".to_string(),
        ];
        let opts = PingOptions {
            protocol: Protocol::Tcp,
            count: 1,
            timeout: Duration::from_secs(2),
            ..PingOptions::default()
        };
        let factory = PingerFactory::new(Arc::new(Resolver::new()));

        let outcomes = ping_many(&factory, &targets, &opts, &CancellationToken::new(), Some(2)).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].target, targets[0]);
        assert_eq!(outcomes[0].result.as_ref().unwrap().status, Status::Success);
        assert_eq!(outcomes[1].result.as_ref().unwrap().status, Status::Failure);
        assert!(matches!(outcomes[2].result, Err(NtxError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn crashed_task_is_reported_for_its_own_target() {
        let targets = vec!["a".to_string(), "boom".to_string(), "c".to_string()];

        let outcomes = fan_out(&targets, Some(2), |target| async move {
            if target == "boom" {
                panic!("pinger crashed");
            }
            Err(NtxError::NoResponse)
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0].result, Err(NtxError::NoResponse)));
        assert!(matches!(outcomes[2].result, Err(NtxError::NoResponse)));
        assert_eq!(outcomes[1].target, "boom");
        match &outcomes[1].result {
            Err(NtxError::Io(e)) => assert!(e.to_string().contains("ping task failed")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelled_batch_starts_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let factory = PingerFactory::new(Arc::new(Resolver::new()));
        let targets = vec!["127.0.0.1:1".to_string()];
        let opts = PingOptions {
            protocol: Protocol::Tcp,
            ..PingOptions::default()
        };

        let outcomes = ping_many(&factory, &targets, &opts, &cancel, None).await;
        assert!(matches!(outcomes[0].result, Err(NtxError::Cancelled)));
    }
}
