//! outcome reporting

use tracing::{error, info, warn};

use crate::unseal::{UnsealOutcome, UnsealState};

/// receives each host's terminal outcome as soon as it is known
///
/// called concurrently from host tasks, so implementations serialize their
/// own output.
pub trait Reporter: Send + Sync {
    fn report(&self, outcome: &UnsealOutcome);
}

/// one structured log line per host
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, outcome: &UnsealOutcome) {
        let host = outcome.host.label();
        match &outcome.state {
            UnsealState::NotInitialized => {
                warn!(host = %host, reason = "not initialized", "vault is not ready to be unsealed")
            }
            UnsealState::AlreadyUnsealed => {
                warn!(host = %host, reason = "already unsealed", "vault is not ready to be unsealed")
            }
            UnsealState::Sealed => error!(
                host = %host,
                progress = outcome.progress,
                threshold = outcome.threshold,
                "vault is sealed"
            ),
            UnsealState::Unsealing => info!(
                host = %host,
                progress = outcome.progress,
                threshold = outcome.threshold,
                "unseal operation performed"
            ),
            UnsealState::Unsealed => info!(
                host = %host,
                progress = outcome.progress,
                threshold = outcome.threshold,
                "vault is unsealed"
            ),
            UnsealState::Failed(e) => error!(host = %host, error = %e.reason(), "{}", failure_message(e)),
        }
    }
}

fn failure_message(err: &crate::UnsealError) -> &'static str {
    use crate::UnsealError::*;
    match err {
        Config(_) => "invalid configuration",
        Decryption { .. } => "error decrypting key share",
        Client { .. } => "error creating vault client",
        Probe { .. } => "error getting vault status",
        Unseal { .. } => "error unsealing vault",
        TaskPanicked { .. } => "host task panicked",
        Keyring(_) => "keyring error",
    }
}

/// tally of a finished run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub unsealed: usize,
    pub unsealing: usize,
    pub sealed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_outcomes(outcomes: &[UnsealOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.state {
                UnsealState::Unsealed => summary.unsealed += 1,
                UnsealState::Unsealing => summary.unsealing += 1,
                UnsealState::Sealed => summary.sealed += 1,
                UnsealState::NotInitialized | UnsealState::AlreadyUnsealed => summary.skipped += 1,
                UnsealState::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.unsealed + self.unsealing + self.sealed + self.skipped + self.failed
    }
}
