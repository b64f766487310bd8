//! concurrent fan-out over the roster
//!
//! one tokio task per host. each task sends its outcome over a channel and
//! the run returns once every task has reported. a panicking task becomes a
//! `TaskPanicked` failure for its own host only.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::UnsealConfig;
use crate::host::Host;
use crate::key::KeyMode;
use crate::report::Reporter;
use crate::unseal::{status_host, unseal_host, UnsealOutcome};
use crate::vault::Connector;
use crate::UnsealError;

/// run `task` for every host concurrently
///
/// returns exactly one outcome per host, in completion order.
pub async fn run<F, Fut>(hosts: &[Host], task: F, reporter: Arc<dyn Reporter>) -> Vec<UnsealOutcome>
where
    F: Fn(Host) -> Fut,
    Fut: Future<Output = UnsealOutcome> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();

    for host in hosts {
        // building the future runs caller code too
        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| task(host.clone())));
        let host = host.clone();
        let tx = tx.clone();
        let reporter = Arc::clone(&reporter);

        tasks.spawn(async move {
            let result = match fut {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(panic) => UnsealOutcome::failed(
                    host.clone(),
                    UnsealError::TaskPanicked {
                        host: host.label(),
                        reason: panic_message(panic.as_ref()),
                    },
                ),
            };
            // queue before reporting so the outcome survives a reporter panic
            let _ = tx.send(outcome.clone());
            reporter.report(&outcome);
        });
    }
    drop(tx);

    let mut outcomes = Vec::with_capacity(hosts.len());
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "host task ended abnormally");
        }
    }

    debug!(hosts = hosts.len(), outcomes = outcomes.len(), "run complete");
    outcomes
}

/// unseal every host in the roster
pub async fn run_unseal(
    config: &UnsealConfig,
    connector: Arc<dyn Connector>,
    mode: KeyMode,
    reporter: Arc<dyn Reporter>,
) -> Vec<UnsealOutcome> {
    if config.hosts.is_empty() {
        warn!("no hosts configured");
    }

    let task = move |host: Host| {
        let connector = Arc::clone(&connector);
        let mode = mode.clone();
        async move { unseal_host(connector.as_ref(), &host, &mode).await }
    };
    run(&config.hosts, task, reporter).await
}

/// report the seal state of every host without unsealing
pub async fn run_status(
    config: &UnsealConfig,
    connector: Arc<dyn Connector>,
    reporter: Arc<dyn Reporter>,
) -> Vec<UnsealOutcome> {
    if config.hosts.is_empty() {
        warn!("no hosts configured");
    }

    let task = move |host: Host| {
        let connector = Arc::clone(&connector);
        async move { status_host(connector.as_ref(), &host).await }
    };
    run(&config.hosts, task, reporter).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DecryptConfig;
    use crate::keyring::{generate, PUBLIC_KEYRING_FILE, SECRET_KEYRING_FILE};
    use crate::testing::{MockConnector, MockVault, RecordingReporter, SEALED};
    use crate::unseal::UnsealState;
    use crate::vault::{SealStatus, VaultError};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;
    use zeroize::Zeroizing;

    fn config(names: &[&str]) -> UnsealConfig {
        UnsealConfig {
            hosts: names
                .iter()
                .map(|n| Host::new(*n, 8200, format!("{}-share", n)))
                .collect(),
            ..UnsealConfig::default()
        }
    }

    fn by_name(outcomes: &[UnsealOutcome]) -> HashMap<String, UnsealOutcome> {
        outcomes
            .iter()
            .map(|o| (o.host.name.clone(), o.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_one_outcome_per_host() {
        let connector = Arc::new(
            MockConnector::default()
                .with("a", MockVault::new().initialized(false))
                .with(
                    "b",
                    MockVault::new().seal_status(SealStatus {
                        sealed: false,
                        ..SEALED
                    }),
                )
                .with(
                    "c",
                    MockVault::new().unseal_result(Ok(SealStatus {
                        sealed: false,
                        progress: 3,
                        ..SEALED
                    })),
                ),
        );
        let reporter = Arc::new(RecordingReporter::default());

        let outcomes = run_unseal(
            &config(&["a", "b", "c"]),
            connector.clone(),
            KeyMode::Plain,
            reporter.clone(),
        )
        .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(reporter.outcomes().len(), 3);

        let outcomes = by_name(&outcomes);
        assert!(matches!(outcomes["a"].state, UnsealState::NotInitialized));
        assert!(matches!(outcomes["b"].state, UnsealState::AlreadyUnsealed));
        assert!(matches!(outcomes["c"].state, UnsealState::Unsealed));
        assert_eq!((outcomes["c"].progress, outcomes["c"].threshold), (3, 3));

        assert!(connector.vault("a").keys().is_empty());
        assert!(connector.vault("b").keys().is_empty());
        assert_eq!(connector.vault("c").keys(), vec!["c-share"]);
    }

    #[tokio::test]
    async fn test_probe_error_does_not_affect_siblings() {
        let connector = Arc::new(
            MockConnector::default()
                .with("a", MockVault::new())
                .with(
                    "d",
                    MockVault::new().init_error(VaultError::Transport("no route to host".into())),
                )
                .with("e", MockVault::new()),
        );
        let reporter = Arc::new(RecordingReporter::default());

        let outcomes = run_unseal(
            &config(&["a", "d", "e"]),
            connector.clone(),
            KeyMode::Plain,
            reporter,
        )
        .await;
        let outcomes = by_name(&outcomes);

        match outcomes["d"].error() {
            Some(UnsealError::Probe { host, reason }) => {
                assert_eq!(host, "d:8200");
                assert!(reason.contains("no route to host"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(connector.vault("d").keys().is_empty());
        assert!(matches!(outcomes["a"].state, UnsealState::Unsealing));
        assert!(matches!(outcomes["e"].state, UnsealState::Unsealing));
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let connector = Arc::new(
            MockConnector::default()
                .with("boom", MockVault::new().panic_on_unseal())
                .with("fine", MockVault::new()),
        );
        let reporter = Arc::new(RecordingReporter::default());

        let outcomes = run_unseal(
            &config(&["boom", "fine"]),
            connector,
            KeyMode::Plain,
            reporter.clone(),
        )
        .await;
        let outcomes = by_name(&outcomes);

        match outcomes["boom"].error() {
            Some(UnsealError::TaskPanicked { host, reason }) => {
                assert_eq!(host, "boom:8200");
                assert!(reason.contains("mock vault exploded"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(outcomes["fine"].state, UnsealState::Unsealing));
        assert_eq!(reporter.outcomes().len(), 2);
    }

    #[tokio::test]
    async fn test_panic_building_task_is_isolated() {
        let hosts = vec![Host::new("boom", 8200, "k"), Host::new("fine", 8200, "k")];
        let task = |host: Host| {
            if host.name == "boom" {
                panic!("cannot build task");
            }
            async move { UnsealOutcome::new(host, UnsealState::Unsealed) }
        };
        let reporter = Arc::new(RecordingReporter::default());

        let outcomes = run(&hosts, task, reporter.clone()).await;
        let outcomes = by_name(&outcomes);

        assert_eq!(outcomes.len(), 2);
        match outcomes["boom"].error() {
            Some(UnsealError::TaskPanicked { host, reason }) => {
                assert_eq!(host, "boom:8200");
                assert!(reason.contains("cannot build task"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(outcomes["fine"].state, UnsealState::Unsealed));
        assert_eq!(reporter.outcomes().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_host_fails_alone() {
        let connector = Arc::new(MockConnector::default().with("a", MockVault::new()));
        let outcomes = run_unseal(
            &config(&["a", "ghost"]),
            connector,
            KeyMode::Plain,
            Arc::new(RecordingReporter::default()),
        )
        .await;
        let outcomes = by_name(&outcomes);

        assert!(matches!(outcomes["ghost"].error(), Some(UnsealError::Client { .. })));
        assert!(!outcomes["a"].is_failed());
    }

    #[tokio::test]
    async fn test_empty_roster() {
        let outcomes = run_unseal(
            &config(&[]),
            Arc::new(MockConnector::default()),
            KeyMode::Plain,
            Arc::new(RecordingReporter::default()),
        )
        .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_hosts_run_concurrently() {
        let hosts: Vec<Host> = (0..5).map(|i| Host::new(format!("v{}", i), 8200, "k")).collect();
        let task = |host: Host| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            UnsealOutcome::new(host, UnsealState::Unsealed)
        };

        let started = std::time::Instant::now();
        let outcomes = run(&hosts, task, Arc::new(RecordingReporter::default())).await;

        assert_eq!(outcomes.len(), 5);
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_fails_every_decrypting_host() {
        let dir = tempdir().unwrap();
        let (pubring, secring) = generate("ops <ops@example.com>", "right").unwrap();
        pubring.save(&dir.path().join(PUBLIC_KEYRING_FILE)).unwrap();
        secring.save(&dir.path().join(SECRET_KEYRING_FILE)).unwrap();

        let hosts = ["a", "b", "skip"]
            .iter()
            .map(|n| Host::new(*n, 8200, pubring.encrypt(n.as_bytes()).unwrap()))
            .collect();
        let cfg = UnsealConfig {
            hosts,
            ..UnsealConfig::default()
        };

        let connector = Arc::new(
            MockConnector::default()
                .with("a", MockVault::new())
                .with("b", MockVault::new())
                .with("skip", MockVault::new().initialized(false)),
        );
        let mode = |passphrase: &str| {
            KeyMode::Encrypted(Arc::new(DecryptConfig {
                public_keyring: dir.path().join(PUBLIC_KEYRING_FILE),
                secret_keyring: dir.path().join(SECRET_KEYRING_FILE),
                passphrase: Zeroizing::new(passphrase.to_string()),
            }))
        };

        let outcomes = run_unseal(
            &cfg,
            connector.clone(),
            mode("wrong"),
            Arc::new(RecordingReporter::default()),
        )
        .await;
        let outcomes = by_name(&outcomes);

        for name in ["a", "b"] {
            assert!(matches!(
                outcomes[name].error(),
                Some(UnsealError::Decryption { .. })
            ));
            assert!(connector.vault(name).keys().is_empty());
        }
        assert!(matches!(outcomes["skip"].state, UnsealState::NotInitialized));

        // the right passphrase gets the decrypted shares through
        let connector = Arc::new(
            MockConnector::default()
                .with("a", MockVault::new())
                .with("b", MockVault::new())
                .with("skip", MockVault::new().initialized(false)),
        );
        run_unseal(
            &cfg,
            connector.clone(),
            mode("right"),
            Arc::new(RecordingReporter::default()),
        )
        .await;
        assert_eq!(connector.vault("a").keys(), vec!["a"]);
        assert_eq!(connector.vault("b").keys(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_run_status() {
        let connector = Arc::new(
            MockConnector::default()
                .with("sealed", MockVault::new())
                .with(
                    "open",
                    MockVault::new().seal_status(SealStatus {
                        sealed: false,
                        ..SEALED
                    }),
                ),
        );
        let outcomes = run_status(
            &config(&["sealed", "open"]),
            connector.clone(),
            Arc::new(RecordingReporter::default()),
        )
        .await;
        let outcomes = by_name(&outcomes);

        assert!(matches!(outcomes["sealed"].state, UnsealState::Sealed));
        assert!(matches!(outcomes["open"].state, UnsealState::Unsealed));
        assert!(connector.vault("sealed").keys().is_empty());
    }
}
