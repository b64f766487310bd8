//! scripted in-memory vaults for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::host::Host;
use crate::key::KeyMaterial;
use crate::report::Reporter;
use crate::unseal::UnsealOutcome;
use crate::vault::{Connector, SealStatus, VaultApi, VaultError};

pub(crate) const SEALED: SealStatus = SealStatus {
    sealed: true,
    threshold: 3,
    shares: 5,
    progress: 0,
};

pub(crate) struct MockVault {
    init: Result<bool, VaultError>,
    seal: Result<SealStatus, VaultError>,
    unseal: Result<SealStatus, VaultError>,
    panic_on_unseal: bool,
    calls: Mutex<Vec<&'static str>>,
    keys: Mutex<Vec<String>>,
}

impl MockVault {
    /// initialized, sealed, and the unseal call returns one share of progress
    pub(crate) fn new() -> Self {
        Self {
            init: Ok(true),
            seal: Ok(SEALED),
            unseal: Ok(SealStatus {
                progress: 1,
                ..SEALED
            }),
            panic_on_unseal: false,
            calls: Mutex::new(Vec::new()),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn initialized(mut self, initialized: bool) -> Self {
        self.init = Ok(initialized);
        self
    }

    pub(crate) fn init_error(mut self, err: VaultError) -> Self {
        self.init = Err(err);
        self
    }

    pub(crate) fn seal_status(mut self, status: SealStatus) -> Self {
        self.seal = Ok(status);
        self
    }

    pub(crate) fn seal_status_error(mut self, err: VaultError) -> Self {
        self.seal = Err(err);
        self
    }

    pub(crate) fn unseal_result(mut self, result: Result<SealStatus, VaultError>) -> Self {
        self.unseal = result;
        self
    }

    pub(crate) fn panic_on_unseal(mut self) -> Self {
        self.panic_on_unseal = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// key shares received by the unseal endpoint
    pub(crate) fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VaultApi for MockVault {
    async fn init_status(&self) -> Result<bool, VaultError> {
        self.record("init");
        self.init.clone()
    }

    async fn seal_status(&self) -> Result<SealStatus, VaultError> {
        self.record("seal-status");
        self.seal.clone()
    }

    async fn unseal(&self, key: &KeyMaterial) -> Result<SealStatus, VaultError> {
        self.record("unseal");
        self.keys
            .lock()
            .unwrap()
            .push(key.as_str().unwrap_or_default().to_string());
        if self.panic_on_unseal {
            panic!("mock vault exploded");
        }
        self.unseal.clone()
    }
}

/// hands out the scripted vault registered for each host name
#[derive(Default)]
pub(crate) struct MockConnector {
    vaults: HashMap<String, Arc<MockVault>>,
}

impl MockConnector {
    pub(crate) fn with(mut self, name: &str, vault: MockVault) -> Self {
        self.vaults.insert(name.to_string(), Arc::new(vault));
        self
    }

    pub(crate) fn vault(&self, name: &str) -> Arc<MockVault> {
        Arc::clone(&self.vaults[name])
    }
}

impl Connector for MockConnector {
    fn connect(&self, host: &Host) -> Result<Arc<dyn VaultApi>, VaultError> {
        match self.vaults.get(&host.name) {
            Some(vault) => Ok(Arc::clone(vault) as Arc<dyn VaultApi>),
            None => Err(VaultError::Client(format!("no route to {}", host.name))),
        }
    }
}

/// collects outcomes instead of logging them
#[derive(Default)]
pub(crate) struct RecordingReporter {
    outcomes: Mutex<Vec<UnsealOutcome>>,
}

impl RecordingReporter {
    pub(crate) fn outcomes(&self) -> Vec<UnsealOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, outcome: &UnsealOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}
