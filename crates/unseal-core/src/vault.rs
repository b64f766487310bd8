//! vault http api client
//!
//! only the three unauthenticated sys endpoints the orchestrator needs:
//!
//! - `GET /v1/sys/init`
//! - `GET /v1/sys/seal-status`
//! - `PUT /v1/sys/unseal`

use async_trait::async_trait;
use reqwest::{Certificate, Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::host::Host;
use crate::key::KeyMaterial;

/// connect timeout for every vault request
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("vault returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("invalid key share: {0}")]
    InvalidKey(String),

    #[error("cannot load CA certificates from {path}: {reason}")]
    CaPath { path: PathBuf, reason: String },

    #[error("cannot build http client: {0}")]
    Client(String),
}

/// seal state as reported by the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    /// shares required to unseal
    #[serde(rename = "t", default)]
    pub threshold: u32,
    /// total shares
    #[serde(rename = "n", default)]
    pub shares: u32,
    /// shares presented so far
    #[serde(default)]
    pub progress: u32,
}

/// the vault operations the orchestrator consumes
#[async_trait]
pub trait VaultApi: Send + Sync {
    async fn init_status(&self) -> Result<bool, VaultError>;

    async fn seal_status(&self) -> Result<SealStatus, VaultError>;

    /// present one key share
    async fn unseal(&self, key: &KeyMaterial) -> Result<SealStatus, VaultError>;
}

/// builds a vault client for a roster entry
pub trait Connector: Send + Sync {
    fn connect(&self, host: &Host) -> Result<Arc<dyn VaultApi>, VaultError>;
}

#[derive(Deserialize)]
struct InitResponse {
    initialized: bool,
}

#[derive(Serialize)]
struct UnsealRequest<'a> {
    key: &'a str,
}

/// json body of an unseal request, zeroed when dropped
///
/// reqwest keeps its own copy of the body until the request is sent; that
/// copy is outside our control.
fn unseal_body(key: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    serde_json::to_vec(&UnsealRequest { key })
        .map(Zeroizing::new)
        .map_err(|e| VaultError::InvalidKey(e.to_string()))
}

#[derive(Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// vault client over http(s)
pub struct HttpVault {
    base: String,
    http: Client,
}

impl HttpVault {
    pub fn new(base: impl Into<String>, http: Client) -> Self {
        Self {
            base: base.into(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, VaultError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, VaultError> {
    let status = resp.status();
    if !status.is_success() {
        let body: ErrorResponse = resp.json().await.unwrap_or_default();
        let message = if body.errors.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            body.errors.join("; ")
        };
        return Err(VaultError::Api {
            status: status.as_u16(),
            message,
        });
    }

    resp.json()
        .await
        .map_err(|e| VaultError::Decode(e.to_string()))
}

#[async_trait]
impl VaultApi for HttpVault {
    async fn init_status(&self) -> Result<bool, VaultError> {
        let resp: InitResponse = self.get("/v1/sys/init").await?;
        Ok(resp.initialized)
    }

    async fn seal_status(&self) -> Result<SealStatus, VaultError> {
        self.get("/v1/sys/seal-status").await
    }

    async fn unseal(&self, key: &KeyMaterial) -> Result<SealStatus, VaultError> {
        let key = key
            .as_str()
            .map_err(|e| VaultError::InvalidKey(e.to_string()))?;

        let body = unseal_body(key)?;

        let resp = self
            .http
            .put(self.url("/v1/sys/unseal"))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        decode(resp).await
    }
}

/// builds one [`HttpVault`] per host, trusting the CA certificates at
/// `ca_path` in addition to the built-in roots
#[derive(Debug, Clone)]
pub struct HttpConnector {
    ca_path: Option<PathBuf>,
    timeout: Duration,
    scheme: String,
}

impl HttpConnector {
    pub fn new(ca_path: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            ca_path,
            timeout,
            scheme: "https".into(),
        }
    }

    /// override the url scheme (plain `http` for local dev vaults)
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    fn client(&self) -> Result<Client, VaultError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.timeout);

        if let Some(path) = &self.ca_path {
            for cert in load_ca_certificates(path)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        builder
            .build()
            .map_err(|e| VaultError::Client(e.to_string()))
    }
}

impl Connector for HttpConnector {
    fn connect(&self, host: &Host) -> Result<Arc<dyn VaultApi>, VaultError> {
        let http = self.client()?;
        Ok(Arc::new(HttpVault::new(host.url(&self.scheme), http)))
    }
}

/// a pem bundle file, or a directory of `.pem` / `.crt` / `.cer` files
pub fn load_ca_certificates(path: &Path) -> Result<Vec<Certificate>, VaultError> {
    let ca_err = |reason: String| VaultError::CaPath {
        path: path.to_path_buf(),
        reason,
    };

    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = fs::read_dir(path)
            .map_err(|e| ca_err(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("pem") | Some("crt") | Some("cer")
                )
            })
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut certs = Vec::new();
    for file in &files {
        let pem = fs::read(file).map_err(|e| ca_err(format!("{}: {}", file.display(), e)))?;
        let bundle = Certificate::from_pem_bundle(&pem)
            .map_err(|e| ca_err(format!("{}: {}", file.display(), e)))?;
        certs.extend(bundle);
    }

    if certs.is_empty() {
        return Err(ca_err("no certificates found".into()));
    }
    Ok(certs)
}
