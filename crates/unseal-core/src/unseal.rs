//! per-host unseal state machine
//!
//! ```text
//! Probing --ProbeFailed--> Failed
//! Probing --NotInitialized/AlreadyUnsealed--> terminal, nothing attempted
//! Probing --Ready--> Provisioning
//! Provisioning --error--> Failed
//! Provisioning --ok--> Unsealing
//! Unsealing --remote error--> Failed
//! Unsealing --sealed--> Unsealing (quorum not met yet, terminal this run)
//! Unsealing --unsealed--> Unsealed
//! ```
//!
//! exactly one unseal call per host per run; nothing is retried.

use tracing::debug;

use crate::host::Host;
use crate::key::{resolve, KeyMaterial, KeyMode};
use crate::probe::{probe, HostReadiness};
use crate::vault::{Connector, SealStatus, VaultApi};
use crate::UnsealError;

#[derive(Debug, Clone)]
pub enum UnsealState {
    /// vault has never been initialized, nothing attempted
    NotInitialized,
    /// vault was already unsealed, nothing attempted
    AlreadyUnsealed,
    /// status only: vault is sealed
    Sealed,
    /// share accepted, more shares needed
    Unsealing,
    Unsealed,
    Failed(UnsealError),
}

/// the single terminal record each host produces per run
///
/// `progress` and `threshold` are copied from the vault and are zero unless
/// the state is `Sealed`, `Unsealing` or `Unsealed`.
#[derive(Debug, Clone)]
pub struct UnsealOutcome {
    pub host: Host,
    pub state: UnsealState,
    pub progress: u32,
    pub threshold: u32,
}

impl UnsealOutcome {
    pub fn new(host: Host, state: UnsealState) -> Self {
        Self {
            host,
            state,
            progress: 0,
            threshold: 0,
        }
    }

    pub fn failed(host: Host, err: UnsealError) -> Self {
        Self::new(host, UnsealState::Failed(err))
    }

    fn with_status(host: Host, state: UnsealState, status: &SealStatus) -> Self {
        Self {
            host,
            state,
            progress: status.progress,
            threshold: status.threshold,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, UnsealState::Failed(_))
    }

    pub fn error(&self) -> Option<&UnsealError> {
        match &self.state {
            UnsealState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// present `key` to a host that probed ready
///
/// the key is scrubbed as soon as the call returns, whatever it returned.
pub async fn unseal(api: &dyn VaultApi, host: &Host, key: &mut KeyMaterial) -> UnsealOutcome {
    let result = api.unseal(key).await;
    key.scrub();

    match result {
        Ok(status) if status.sealed => {
            UnsealOutcome::with_status(host.clone(), UnsealState::Unsealing, &status)
        }
        Ok(status) => UnsealOutcome::with_status(host.clone(), UnsealState::Unsealed, &status),
        Err(e) => UnsealOutcome::failed(
            host.clone(),
            UnsealError::Unseal {
                host: host.label(),
                reason: e.to_string(),
            },
        ),
    }
}

/// full pipeline for one host: connect, probe, provision, unseal
pub async fn unseal_host(connector: &dyn Connector, host: &Host, mode: &KeyMode) -> UnsealOutcome {
    let api = match connector.connect(host) {
        Ok(api) => api,
        Err(e) => {
            return UnsealOutcome::failed(
                host.clone(),
                UnsealError::Client {
                    host: host.label(),
                    reason: e.to_string(),
                },
            )
        }
    };

    debug!(host = %host, "probing");
    match probe(api.as_ref(), host).await {
        HostReadiness::Ready => {}
        HostReadiness::NotInitialized => {
            return UnsealOutcome::new(host.clone(), UnsealState::NotInitialized)
        }
        HostReadiness::AlreadyUnsealed => {
            return UnsealOutcome::new(host.clone(), UnsealState::AlreadyUnsealed)
        }
        HostReadiness::ProbeFailed(e) => return UnsealOutcome::failed(host.clone(), e),
    }

    debug!(host = %host, encrypted = mode.is_encrypted(), "provisioning key share");
    let mut key = match resolve(host, mode).await {
        Ok(key) => key,
        Err(e) => return UnsealOutcome::failed(host.clone(), e),
    };

    debug!(host = %host, "unsealing");
    unseal(api.as_ref(), host, &mut key).await
}

/// seal status only, no key material involved
pub async fn status_host(connector: &dyn Connector, host: &Host) -> UnsealOutcome {
    let api = match connector.connect(host) {
        Ok(api) => api,
        Err(e) => {
            return UnsealOutcome::failed(
                host.clone(),
                UnsealError::Client {
                    host: host.label(),
                    reason: e.to_string(),
                },
            )
        }
    };

    match api.seal_status().await {
        Ok(status) if status.sealed => {
            UnsealOutcome::with_status(host.clone(), UnsealState::Sealed, &status)
        }
        Ok(status) => UnsealOutcome::with_status(host.clone(), UnsealState::Unsealed, &status),
        Err(e) => UnsealOutcome::failed(
            host.clone(),
            UnsealError::Probe {
                host: host.label(),
                reason: e.to_string(),
            },
        ),
    }
}
