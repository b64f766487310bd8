//! openpgp keyrings and key share decryption
//!
//! encrypted roster entries hold base64 of a binary openpgp message, the
//! output of `gpg --encrypt | base64`. an ascii-armored message is accepted
//! as well. keyrings are gnupg-style files of transferable keys, binary or
//! armored (`gpg --export-secret-keys > secring.gpg`).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pgp::crypto::ecc_curve::ECCCurve;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::ser::Serialize;
use pgp::types::{PublicKeyTrait, SecretKeyTrait};
use pgp::{
    Deserializable, KeyType, Message, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
    SubkeyParamsBuilder,
};
use rand::rngs::OsRng;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::key::KeyMaterial;

pub const PUBLIC_KEYRING_FILE: &str = "pubring.gpg";
pub const SECRET_KEYRING_FILE: &str = "secring.gpg";

const ARMOR_HEADER: &str = "-----BEGIN PGP MESSAGE-----";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyringError {
    #[error("cannot access keyring {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("cannot parse keyring {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("keyring {0} holds no usable keys")]
    Empty(PathBuf),

    #[error("no key in the secret keyring can decrypt this share")]
    UnknownRecipient,

    #[error("wrong passphrase for the secret keyring")]
    BadPassphrase,

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("no encryption-capable key in the public keyring")]
    NoEncryptionKey,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

pub type Result<T> = std::result::Result<T, KeyringError>;

/// recipient keys, used to encrypt shares
pub struct PublicKeyring {
    pub keys: Vec<SignedPublicKey>,
}

/// passphrase-protected keys, used to decrypt shares
pub struct SecretKeyring {
    pub keys: Vec<SignedSecretKey>,
}

/// generate an ed25519 primary key with a curve25519 encryption subkey,
/// both locked with `passphrase`
pub fn generate(user_id: &str, passphrase: &str) -> Result<(PublicKeyring, SecretKeyring)> {
    let passphrase = Zeroizing::new(passphrase.to_string());

    let subkey = SubkeyParamsBuilder::default()
        .key_type(KeyType::ECDH(ECCCurve::Curve25519))
        .can_encrypt(true)
        .passphrase(Some(passphrase.to_string()))
        .build()
        .map_err(|e| KeyringError::KeyGeneration(e.to_string()))?;
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::EdDSALegacy)
        .can_certify(true)
        .can_sign(true)
        .primary_user_id(user_id.to_string())
        .passphrase(Some(passphrase.to_string()))
        .subkey(subkey)
        .build()
        .map_err(|e| KeyringError::KeyGeneration(e.to_string()))?;

    let key = params.generate(OsRng).map_err(|e| KeyringError::KeyGeneration(e.to_string()))?;
    let secret = key
        .sign(OsRng, || passphrase.to_string())
        .map_err(|e| KeyringError::KeyGeneration(e.to_string()))?;
    let public = secret
        .public_key()
        .sign(OsRng, &secret, || passphrase.to_string())
        .map_err(|e| KeyringError::KeyGeneration(e.to_string()))?;

    Ok((
        PublicKeyring { keys: vec![public] },
        SecretKeyring { keys: vec![secret] },
    ))
}

impl PublicKeyring {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            keys: read_keys(path)?,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_keys(path, &self.keys, false)
    }

    /// encrypt a key share to the first key able to receive it, returning
    /// the base64 form stored in the roster
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let literal = Message::new_literal_bytes("", plaintext);
        let enc_err = |e: pgp::errors::Error| KeyringError::EncryptionFailed(e.to_string());

        let mut encrypted = None;
        for key in &self.keys {
            if let Some(subkey) = key.public_subkeys.iter().find(|k| k.is_encryption_key()) {
                encrypted = Some(
                    literal
                        .encrypt_to_keys_seipdv1(OsRng, SymmetricKeyAlgorithm::AES256, &[subkey])
                        .map_err(enc_err)?,
                );
                break;
            }
            if key.is_encryption_key() {
                encrypted = Some(
                    literal
                        .encrypt_to_keys_seipdv1(OsRng, SymmetricKeyAlgorithm::AES256, &[key])
                        .map_err(enc_err)?,
                );
                break;
            }
        }

        let message = encrypted.ok_or(KeyringError::NoEncryptionKey)?;
        let bytes = message.to_bytes().map_err(enc_err)?;
        Ok(STANDARD.encode(bytes))
    }
}

impl SecretKeyring {
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self {
            keys: read_keys(path)?,
        })
    }

    /// written owner-only on unix
    pub fn save(&self, path: &Path) -> Result<()> {
        write_keys(path, &self.keys, true)
    }

    /// decrypt a roster share with whichever key it was encrypted to
    pub fn decrypt(&self, ciphertext: &str, passphrase: &str) -> Result<KeyMaterial> {
        let message = parse_message(ciphertext)?;
        let keys: Vec<&SignedSecretKey> = self.keys.iter().collect();

        let decrypted = match message.decrypt(|| passphrase.to_string(), &keys) {
            Ok((decrypted, _)) => decrypted,
            Err(pgp::errors::Error::MissingKey) => return Err(KeyringError::UnknownRecipient),
            Err(e) if !self.unlocks(passphrase) => {
                debug!(error = %e, "secret keys did not unlock");
                return Err(KeyringError::BadPassphrase);
            }
            Err(e) => return Err(KeyringError::DecryptionFailed(e.to_string())),
        };

        let content = decrypted
            .get_content()
            .map_err(|e| KeyringError::DecryptionFailed(e.to_string()))?
            .ok_or_else(|| KeyringError::DecryptionFailed("message holds no literal data".into()))?;
        Ok(KeyMaterial::new(content))
    }

    /// true if `passphrase` opens at least one secret key or subkey
    fn unlocks(&self, passphrase: &str) -> bool {
        self.keys.iter().any(|key| {
            key.secret_subkeys
                .iter()
                .any(|sub| sub.unlock(|| passphrase.to_string(), |_| Ok(())).is_ok())
                || key.unlock(|| passphrase.to_string(), |_| Ok(())).is_ok()
        })
    }
}

/// decrypt one base64 key share with the keyrings on disk
///
/// only the secret keyring is read. the public keyring path is accepted so
/// both configured rings can be passed through unchanged; it is used by
/// [`PublicKeyring::encrypt`].
pub fn decrypt(
    _public_keyring: &Path,
    secret_keyring: &Path,
    ciphertext: &str,
    passphrase: &str,
) -> Result<KeyMaterial> {
    SecretKeyring::load(secret_keyring)?.decrypt(ciphertext, passphrase)
}

fn parse_message(ciphertext: &str) -> Result<Message> {
    let trimmed = ciphertext.trim();
    if trimmed.starts_with(ARMOR_HEADER) {
        return Message::from_string(trimmed)
            .map(|(message, _)| message)
            .map_err(|e| KeyringError::InvalidCiphertext(e.to_string()));
    }

    // base64 tools wrap lines
    let compact: String = trimmed.split_whitespace().collect();
    let raw = Zeroizing::new(
        STANDARD
            .decode(compact)
            .map_err(|e| KeyringError::InvalidCiphertext(e.to_string()))?,
    );
    Message::from_bytes(&raw[..]).map_err(|e| KeyringError::InvalidCiphertext(e.to_string()))
}

/// every parsable key in the file; keys rpgp cannot read are skipped
fn read_keys<T: Deserializable>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| KeyringError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let (keys, _headers) = T::from_reader_many(file).map_err(|e| KeyringError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut parsed = Vec::new();
    for key in keys {
        match key {
            Ok(key) => parsed.push(key),
            Err(e) => warn!(keyring = %path.display(), error = %e, "skipping unreadable key"),
        }
    }

    if parsed.is_empty() {
        return Err(KeyringError::Empty(path.to_path_buf()));
    }
    Ok(parsed)
}

fn write_keys<T: Serialize>(path: &Path, keys: &[T], private: bool) -> Result<()> {
    let io_err = |reason: String| KeyringError::Io {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_err(e.to_string()))?;
        }
    }

    let bytes = Zeroizing::new(keys.to_bytes().map_err(|e| io_err(e.to_string()))?);
    fs::write(path, &bytes[..]).map_err(|e| io_err(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if private {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| io_err(e.to_string()))?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    Ok(())
}
