//! roster entries

use serde::{Deserialize, Serialize};
use std::fmt;

/// default vault api port
pub const DEFAULT_PORT: u16 = 8200;

/// one vault server and the key share this operator holds for it
///
/// `key` is either the plaintext share or, in encrypted mode, the
/// base64-armored ciphertext. it is never modified after loading.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            port,
            key: key.into(),
        }
    }

    /// `name:port`, used in every log line and error
    pub fn label(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    /// base url of the vault api for the given scheme
    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}:{}", scheme, self.name, self.port)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

// keep key shares out of debug output
impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("key", &"<redacted>")
            .finish()
    }
}
