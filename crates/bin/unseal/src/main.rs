//! unseal CLI
//!
//! Presents this operator's key share to every vault server in the roster.
//!
//! ## Usage
//!
//! ```bash
//! # unseal every host in the config file
//! unseal --config /etc/unseal/config.toml
//!
//! # seal state only
//! unseal status
//!
//! # one host, no config file
//! VAULT_KEY=... unseal -H vault-a.internal -P 8200
//!
//! # encrypted shares: create a keyring, then encrypt each share
//! unseal keygen
//! unseal encrypt --key <share>
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

use unseal_core::config::{self, UnsealConfig};
use unseal_core::keyring::{self, PublicKeyring, PUBLIC_KEYRING_FILE, SECRET_KEYRING_FILE};
use unseal_core::{run_status, run_unseal, Host, HttpConnector, Summary, TracingReporter, DEFAULT_PORT};

const PASSPHRASE_ENV: &str = "UNSEAL_PASSPHRASE";

#[derive(Parser)]
#[command(name = "unseal")]
#[command(about = "Unseal a fleet of vault servers concurrently")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (.toml, .yaml, .yml, .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Unseal a single host instead of the configured roster
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Vault port for --host
    #[arg(short = 'P', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Key share for --host (prompted if absent)
    #[arg(short = 'K', long, env = "VAULT_KEY", hide_env_values = true)]
    key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the seal state of every host
    Status,

    /// Print the version
    Version,

    /// Create an OpenPGP public/secret keyring pair for encrypted key shares
    Keygen {
        /// Output directory (default ~/.gnupg)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// User id bound to the generated key
        #[arg(long, default_value = "unseal operator")]
        user_id: String,
    },

    /// Encrypt a key share with the configured public keyring
    Encrypt {
        /// Key share (prompted if absent)
        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("unseal={0},unseal_core={0}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        None => unseal(cli.config.as_deref(), cli.host, cli.port, cli.key).await,
        Some(Commands::Status) => status(cli.config.as_deref()).await,
        Some(Commands::Version) => {
            println!("unseal v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Keygen { out_dir, user_id }) => keygen(out_dir, &user_id),
        Some(Commands::Encrypt { key }) => encrypt(cli.config.as_deref(), key),
    }
}

async fn unseal(
    config_path: Option<&Path>,
    host: Option<String>,
    port: u16,
    key: Option<String>,
) -> Result<()> {
    let config = match host {
        Some(name) => {
            // single host: the share is typed in plain, the file is optional
            let mut config = load_optional_config(config_path)?;
            let key = match key {
                Some(key) => Zeroizing::new(key),
                None => prompt("Unseal key: ")?,
            };
            config.hosts = vec![Host::new(name, port, key.as_str())];
            config.gpg = false;
            config
        }
        None => load_config(config_path)?,
    };

    let passphrase = if config.gpg {
        Some(passphrase()?)
    } else {
        None
    };
    let mode = config.key_mode(passphrase)?;
    let connector = Arc::new(HttpConnector::new(config.capath.clone(), config.timeout()));

    info!(hosts = config.hosts.len(), encrypted = mode.is_encrypted(), "unsealing");
    let outcomes = run_unseal(&config, connector, mode, Arc::new(TracingReporter)).await;

    let summary = Summary::from_outcomes(&outcomes);
    info!(
        unsealed = summary.unsealed,
        unsealing = summary.unsealing,
        skipped = summary.skipped,
        failed = summary.failed,
        "done"
    );
    Ok(())
}

async fn status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let connector = Arc::new(HttpConnector::new(config.capath.clone(), config.timeout()));

    let outcomes = run_status(&config, connector, Arc::new(TracingReporter)).await;

    let summary = Summary::from_outcomes(&outcomes);
    info!(
        sealed = summary.sealed,
        unsealed = summary.unsealed,
        failed = summary.failed,
        "done"
    );
    Ok(())
}

fn keygen(out_dir: Option<PathBuf>, user_id: &str) -> Result<()> {
    let dir = match out_dir {
        Some(dir) => dir,
        None => config::gnupg_dir()?,
    };
    let public_path = dir.join(PUBLIC_KEYRING_FILE);
    let secret_path = dir.join(SECRET_KEYRING_FILE);
    for path in [&secret_path, &public_path] {
        if path.exists() {
            bail!("{} already exists, refusing to overwrite", path.display());
        }
    }

    let passphrase = match std::env::var(PASSPHRASE_ENV) {
        Ok(p) => Zeroizing::new(p),
        Err(_) => {
            let first = prompt("New passphrase: ")?;
            let second = prompt("Repeat passphrase: ")?;
            if first != second {
                bail!("passphrases do not match");
            }
            first
        }
    };
    if passphrase.is_empty() {
        bail!("passphrase must not be empty");
    }

    let (public, secret) = keyring::generate(user_id, &passphrase)?;
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    public.save(&public_path)?;
    secret.save(&secret_path)?;

    info!(public = %public_path.display(), secret = %secret_path.display(), "keyring created");
    Ok(())
}

fn encrypt(config_path: Option<&Path>, key: Option<String>) -> Result<()> {
    let config = load_optional_config(config_path)?;
    let public = PublicKeyring::load(&config.public_keyring()?)?;

    let share = match key {
        Some(key) => Zeroizing::new(key),
        None => prompt("Key share: ")?,
    };
    println!("{}", public.encrypt(share.as_bytes())?);
    Ok(())
}

/// config file plus environment; a missing file is an error
fn load_config(path: Option<&Path>) -> Result<UnsealConfig> {
    let mut config = UnsealConfig::load_or_discover(path)?;
    config.apply_env()?;
    Ok(config)
}

/// like [`load_config`] but falls back to defaults when no file is found
fn load_optional_config(path: Option<&Path>) -> Result<UnsealConfig> {
    let mut config = match path.map(Path::to_path_buf).or_else(config::discover) {
        Some(path) => UnsealConfig::load(&path)?,
        None => UnsealConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn passphrase() -> Result<Zeroizing<String>> {
    match std::env::var(PASSPHRASE_ENV) {
        Ok(p) => Ok(Zeroizing::new(p)),
        Err(_) => prompt("Passphrase: "),
    }
}

fn prompt(label: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(label)
        .map(Zeroizing::new)
        .context("reading from terminal")
}
