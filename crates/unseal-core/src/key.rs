//! key share provisioning
//!
//! a host's stored share is either used as-is or decrypted with the run's
//! shared keyring configuration. the plaintext only ever lives in a
//! [`KeyMaterial`] buffer, which is scrubbed right after the unseal call.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::host::Host;
use crate::keyring;
use crate::{Result, UnsealError};

/// plaintext key share, zeroed on scrub and on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_share(share: &str) -> Self {
        Self::new(share.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// the share as text, as the vault api expects it
    pub fn as_str(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// overwrite the buffer with zeroes in place, keeping its length
    pub fn scrub(&mut self) {
        self.bytes.as_mut_slice().zeroize();
    }

    /// true once nothing but zeroes is left
    pub fn is_scrubbed(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(<redacted>)")
    }
}

/// keyring locations and passphrase, resolved once per run before fan-out
pub struct DecryptConfig {
    pub public_keyring: PathBuf,
    pub secret_keyring: PathBuf,
    pub passphrase: Zeroizing<String>,
}

impl fmt::Debug for DecryptConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecryptConfig")
            .field("public_keyring", &self.public_keyring)
            .field("secret_keyring", &self.secret_keyring)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// how stored key shares are turned into plaintext
#[derive(Debug, Clone)]
pub enum KeyMode {
    Plain,
    Encrypted(Arc<DecryptConfig>),
}

impl KeyMode {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, KeyMode::Encrypted(_))
    }
}

/// produce the plaintext key share for `host`
///
/// decryption runs on the blocking pool since key stretching is cpu bound.
pub async fn resolve(host: &Host, mode: &KeyMode) -> Result<KeyMaterial> {
    match mode {
        KeyMode::Plain => Ok(KeyMaterial::from_share(&host.key)),
        KeyMode::Encrypted(config) => {
            let config = Arc::clone(config);
            let ciphertext = host.key.clone();
            let label = host.label();

            let decrypted = tokio::task::spawn_blocking(move || {
                keyring::decrypt(
                    &config.public_keyring,
                    &config.secret_keyring,
                    &ciphertext,
                    &config.passphrase,
                )
            })
            .await
            .map_err(|e| UnsealError::Decryption {
                host: label.clone(),
                reason: e.to_string(),
            })?;

            decrypted.map_err(|e| UnsealError::Decryption {
                host: label,
                reason: e.to_string(),
            })
        }
    }
}
