//! PowerShell-backed personal certificate store.
//!
//! Queries `Cert:\CurrentUser\My` in a bounded child process and parses the
//! JSON it prints. `ConvertTo-Json` emits a bare object for a single
//! certificate and an array otherwise; both shapes are accepted.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{Certificate, CertificateStore, common_name, normalize_hex};
use crate::config::CertificateStoreConfig;
use crate::error::SignerError;

const LIST_SCRIPT: &str = r"
$now = Get-Date
Get-ChildItem -Path Cert:\CurrentUser\My `
| Where-Object { $_.NotAfter -gt $now } `
| Select-Object Subject, Issuer, SerialNumber, Thumbprint, @{Name='NotAfter';Expression={$_.NotAfter.ToUniversalTime().ToString('o')}} `
| ConvertTo-Json -Compress
";

/// Certificate store queried through PowerShell.
#[derive(Debug, Clone)]
pub struct PowerShellStore {
    shell: String,
    timeout: Duration,
}

impl PowerShellStore {
    /// Create a store from configuration.
    #[must_use]
    pub fn new(config: &CertificateStoreConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            timeout: config.timeout,
        }
    }

    async fn run_query(&self) -> Result<String, SignerError> {
        let mut cmd = Command::new(&self.shell);
        cmd.args(["-NoProfile", "-NonInteractive", "-Command", LIST_SCRIPT])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| SignerError::DirectoryUnavailable {
                reason: format!("certificate query timed out after {:?}", self.timeout),
            })?
            .map_err(|e| SignerError::DirectoryUnavailable {
                reason: format!("failed to run {}: {e}", self.shell),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SignerError::DirectoryUnavailable {
                reason: format!("certificate query failed: {}", stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl CertificateStore for PowerShellStore {
    async fn list_certificates(&self) -> Result<Vec<Certificate>, SignerError> {
        let stdout = self.run_query().await?;
        let certs = parse_store_json(&stdout, Utc::now())?;
        debug!(count = certs.len(), "listed personal certificates");
        Ok(certs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StoreEntry {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    issuer: String,
    #[serde(default)]
    serial_number: String,
    #[serde(default)]
    thumbprint: String,
    #[serde(default)]
    not_after: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoreOutput {
    Many(Vec<StoreEntry>),
    One(StoreEntry),
}

/// Parses the store query output into non-expired certificates, latest
/// expiry first. Empty output means an empty store.
///
/// Entries with an unparseable expiry are skipped with a warning.
///
/// # Errors
///
/// Returns `SignerError::DirectoryUnavailable` if the output is not JSON of
/// the expected shape.
pub fn parse_store_json(output: &str, now: DateTime<Utc>) -> Result<Vec<Certificate>, SignerError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries = match serde_json::from_str::<StoreOutput>(trimmed).map_err(|e| {
        SignerError::DirectoryUnavailable {
            reason: format!("unexpected certificate query output: {e}"),
        }
    })? {
        StoreOutput::Many(entries) => entries,
        StoreOutput::One(entry) => vec![entry],
    };

    let mut certs = Vec::with_capacity(entries.len());
    for entry in entries {
        let expiry = match DateTime::parse_from_rfc3339(entry.not_after.trim()) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(e) => {
                warn!(thumbprint = %entry.thumbprint, error = %e, "skipping certificate with unreadable expiry");
                continue;
            },
        };
        let cert = Certificate {
            subject_common_name: common_name(&entry.subject),
            issuer_common_name: common_name(&entry.issuer),
            serial_number: normalize_hex(&entry.serial_number),
            thumbprint: normalize_hex(&entry.thumbprint),
            expiry,
        };
        if !cert.is_expired_at(now) {
            certs.push(cert);
        }
    }

    certs.sort_by(|a, b| b.expiry.cmp(&a.expiry));
    Ok(certs)
}
