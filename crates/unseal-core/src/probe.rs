//! readiness probe
//!
//! decides whether presenting a key share to a host makes sense this run.

use crate::host::Host;
use crate::vault::VaultApi;
use crate::UnsealError;

#[derive(Debug, Clone)]
pub enum HostReadiness {
    NotInitialized,
    AlreadyUnsealed,
    Ready,
    ProbeFailed(UnsealError),
}

impl HostReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, HostReadiness::Ready)
    }
}

/// init-status, then seal-status. a host that is not initialized gets no
/// second call. any error is terminal for the host this run.
pub async fn probe(api: &dyn VaultApi, host: &Host) -> HostReadiness {
    let probe_err = |e: crate::vault::VaultError| {
        HostReadiness::ProbeFailed(UnsealError::Probe {
            host: host.label(),
            reason: e.to_string(),
        })
    };

    match api.init_status().await {
        Ok(false) => return HostReadiness::NotInitialized,
        Ok(true) => {}
        Err(e) => return probe_err(e),
    }

    match api.seal_status().await {
        Ok(status) if !status.sealed => HostReadiness::AlreadyUnsealed,
        Ok(_) => HostReadiness::Ready,
        Err(e) => probe_err(e),
    }
}
