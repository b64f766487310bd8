//! run configuration
//!
//! a `config.toml` / `config.yaml` / `config.json` file, overlaid with `UNSEAL_*` environment
//! variables. loaded once per invocation and passed explicitly to the run.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::host::Host;
use crate::key::{DecryptConfig, KeyMode};
use crate::keyring::{PUBLIC_KEYRING_FILE, SECRET_KEYRING_FILE};
use crate::{Result, UnsealError};

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// file names tried in each search directory, in order
pub const CONFIG_NAMES: [&str; 4] = ["config.toml", "config.yaml", "config.yml", "config.json"];

const ENV_CAPATH: &str = "UNSEAL_CAPATH";
const ENV_GPG: &str = "UNSEAL_GPG";
const ENV_SECRET_KEYRING: &str = "UNSEAL_GPGSECRETKEYRING";
const ENV_PUBLIC_KEYRING: &str = "UNSEAL_GPGPUBLICKEYRING";
const ENV_TIMEOUT: &str = "UNSEAL_TIMEOUT_SECS";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnsealConfig {
    pub hosts: Vec<Host>,
    /// pem file or directory of CA certificates trusted for vault tls
    pub capath: Option<PathBuf>,
    /// key shares are encrypted and must be decrypted before use
    pub gpg: bool,
    pub gpgsecretkeyring: Option<PathBuf>,
    pub gpgpublickeyring: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for UnsealConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            capath: None,
            gpg: false,
            gpgsecretkeyring: None,
            gpgpublickeyring: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Yaml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("yaml") | Some("yml") => Ok(Format::Yaml),
            Some("json") => Ok(Format::Json),
            _ => Err(UnsealError::Config(format!(
                "{}: unsupported config format, expected .toml, .yaml, .yml or .json",
                path.display()
            ))),
        }
    }
}

impl UnsealConfig {
    /// read and parse a config file, format chosen by extension
    pub fn load(path: &Path) -> Result<Self> {
        let format = Format::from_path(path)?;
        let contents = fs::read_to_string(path)
            .map_err(|e| UnsealError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::parse(&contents, format)
            .map_err(|e| UnsealError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str, format: Format) -> std::result::Result<Self, String> {
        match format {
            Format::Toml => toml::from_str(contents).map_err(|e| e.to_string()),
            Format::Yaml => {
                // an empty yaml document is an empty config
                if contents.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(contents).map_err(|e| e.to_string())
            }
            Format::Json => serde_json::from_str(contents).map_err(|e| e.to_string()),
        }
    }

    /// `path` if given, otherwise the first file found on the search path
    pub fn load_or_discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match discover() {
                Some(path) => Self::load(&path),
                None => Err(UnsealError::Config(format!(
                    "no config file found in {}",
                    search_dirs()
                        .iter()
                        .map(|d| d.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))),
            },
        }
    }

    /// overlay `UNSEAL_*` variables from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_CAPATH) {
            self.capath = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_GPG) {
            self.gpg = parse_bool(ENV_GPG, &v)?;
        }
        if let Some(v) = lookup(ENV_SECRET_KEYRING) {
            self.gpgsecretkeyring = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_PUBLIC_KEYRING) {
            self.gpgpublickeyring = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_TIMEOUT) {
            self.timeout_secs = v.trim().parse().map_err(|_| {
                UnsealError::Config(format!("{}: not a number of seconds: {:?}", ENV_TIMEOUT, v))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(UnsealError::Config("timeout_secs must be positive".into()));
        }
        for (i, host) in self.hosts.iter().enumerate() {
            if host.name.trim().is_empty() {
                return Err(UnsealError::Config(format!("hosts[{}]: empty name", i)));
            }
            if host.port == 0 {
                return Err(UnsealError::Config(format!("{}: port must be non-zero", host.name)));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn secret_keyring(&self) -> Result<PathBuf> {
        match &self.gpgsecretkeyring {
            Some(path) => Ok(path.clone()),
            None => Ok(gnupg_dir()?.join(SECRET_KEYRING_FILE)),
        }
    }

    pub fn public_keyring(&self) -> Result<PathBuf> {
        match &self.gpgpublickeyring {
            Some(path) => Ok(path.clone()),
            None => Ok(gnupg_dir()?.join(PUBLIC_KEYRING_FILE)),
        }
    }

    /// plain or encrypted mode for this run; the passphrase is only kept
    /// when shares are encrypted
    pub fn key_mode(&self, passphrase: Option<Zeroizing<String>>) -> Result<KeyMode> {
        if !self.gpg {
            return Ok(KeyMode::Plain);
        }
        let passphrase = passphrase.ok_or_else(|| {
            UnsealError::Config("encrypted key shares need a passphrase".into())
        })?;
        Ok(KeyMode::Encrypted(Arc::new(DecryptConfig {
            public_keyring: self.public_keyring()?,
            secret_keyring: self.secret_keyring()?,
            passphrase,
        })))
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(UnsealError::Config(format!("{}: not a boolean: {:?}", name, value))),
    }
}

/// `~/.unseal`
pub fn default_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".unseal"))
        .ok_or_else(|| UnsealError::Config("cannot determine home directory".into()))
}

/// `~/.gnupg`, home of the default keyrings
pub fn gnupg_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".gnupg"))
        .ok_or_else(|| UnsealError::Config("cannot determine home directory".into()))
}

/// `/etc/unseal`, `~/.unseal`, then the working directory
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/etc/unseal")];
    if let Ok(home) = default_dir() {
        dirs.push(home);
    }
    dirs.push(PathBuf::from("."));
    dirs
}

pub fn discover() -> Option<PathBuf> {
    discover_in(&search_dirs())
}

fn discover_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}
