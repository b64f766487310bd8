//! unseal-core: unseal a fleet of vault servers concurrently
//!
//! each configured host is probed, its key share decrypted if needed, and the
//! share presented once. hosts run in parallel and fail independently; every
//! host ends the run with exactly one [`UnsealOutcome`].
//!
//! ```text
//! UnsealConfig ──> orchestrator ──┬─> host task: probe -> key -> unseal ─┐
//!                                 ├─> host task ...                      ├─> Reporter
//!                                 └─> host task ...                      ┘
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod key;
pub mod keyring;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod unseal;
pub mod vault;

#[cfg(test)]
mod testing;

pub use config::UnsealConfig;
pub use error::{Result, UnsealError};
pub use host::{Host, DEFAULT_PORT};
pub use key::{DecryptConfig, KeyMaterial, KeyMode};
pub use keyring::KeyringError;
pub use orchestrator::{run, run_status, run_unseal};
pub use report::{Reporter, Summary, TracingReporter};
pub use unseal::{UnsealOutcome, UnsealState};
pub use vault::{Connector, HttpConnector, HttpVault, SealStatus, VaultApi, VaultError};
