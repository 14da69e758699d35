//! Certificate Directory.
//!
//! Enumerates the non-expired certificates of the current user's personal
//! store and derives the [`SelectionFilter`] that pre-answers the gateway's
//! client-certificate prompt.
//!
//! The store itself sits behind the [`CertificateStore`] trait; the
//! production implementation is [`PowerShellStore`].

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SignerError;

mod powershell;

pub use powershell::PowerShellStore;

static CN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CN=([^,]+)").expect("common name regex is valid"));

/// A certificate of the personal store. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Common name of the subject.
    pub subject_common_name: String,
    /// Common name of the issuer.
    pub issuer_common_name: String,
    /// Serial number, upper-case hex without separators.
    pub serial_number: String,
    /// SHA-1 thumbprint, upper-case hex.
    pub thumbprint: String,
    /// End of validity.
    pub expiry: DateTime<Utc>,
}

impl Certificate {
    /// Returns `true` if the certificate is no longer valid at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Builds the selection filter bound to a session.
    #[must_use]
    pub fn selection_filter(&self) -> SelectionFilter {
        SelectionFilter {
            subject_cn: self.subject_common_name.clone(),
            issuer_cn: self.issuer_common_name.clone(),
            serial: (!self.serial_number.is_empty()).then(|| self.serial_number.clone()),
        }
    }
}

/// Subject/issuer pair that identifies the certificate to present.
///
/// Set once when a session is created and never mutated afterwards. The
/// serial number is a secondary key used when matching dialog rows, whose
/// serial column is frequently truncated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionFilter {
    /// Subject common name.
    pub subject_cn: String,
    /// Issuer common name.
    pub issuer_cn: String,
    /// Serial number, if known.
    pub serial: Option<String>,
}

impl SelectionFilter {
    /// Creates a filter from subject and issuer common names.
    #[must_use]
    pub fn new(subject_cn: impl Into<String>, issuer_cn: impl Into<String>) -> Self {
        Self {
            subject_cn: subject_cn.into(),
            issuer_cn: issuer_cn.into(),
            serial: None,
        }
    }

    /// Attaches a serial number.
    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }
}

/// Read-only access to installed personal certificates.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Lists non-expired certificates, latest expiry first.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::DirectoryUnavailable` if the store cannot be
    /// queried.
    async fn list_certificates(&self) -> Result<Vec<Certificate>, SignerError>;
}

/// Resolves a certificate by thumbprint (case-insensitive, spaces ignored).
///
/// # Errors
///
/// Returns `SignerError::DirectoryUnavailable` if the store cannot be
/// queried, or `SignerError::CertificateNotFound` if no listed certificate
/// has the thumbprint.
pub async fn find_by_thumbprint(
    store: &dyn CertificateStore,
    thumbprint: &str,
) -> Result<Certificate, SignerError> {
    let wanted = normalize_hex(thumbprint);
    store
        .list_certificates()
        .await?
        .into_iter()
        .find(|cert| cert.thumbprint == wanted)
        .ok_or_else(|| SignerError::CertificateNotFound {
            thumbprint: thumbprint.to_string(),
        })
}

/// Extracts the `CN=` component of a distinguished name, or returns the
/// trimmed name if it has none.
#[must_use]
pub fn common_name(distinguished_name: &str) -> String {
    CN_REGEX
        .captures(distinguished_name)
        .and_then(|caps| caps.get(1))
        .map_or_else(
            || distinguished_name.trim().to_string(),
            |m| m.as_str().trim().to_string(),
        )
}

/// Upper-cases hex and strips whitespace.
#[must_use]
pub fn normalize_hex(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// In-memory store, for tests and for callers that already hold the list.
#[derive(Debug, Clone, Default)]
pub struct StaticStore {
    certificates: Vec<Certificate>,
}

impl StaticStore {
    /// Creates a store serving `certificates`.
    #[must_use]
    pub const fn new(certificates: Vec<Certificate>) -> Self {
        Self { certificates }
    }
}

#[async_trait]
impl CertificateStore for StaticStore {
    async fn list_certificates(&self) -> Result<Vec<Certificate>, SignerError> {
        let now = Utc::now();
        let mut certs: Vec<Certificate> = self
            .certificates
            .iter()
            .filter(|c| !c.is_expired_at(now))
            .cloned()
            .collect();
        certs.sort_by(|a, b| b.expiry.cmp(&a.expiry));
        Ok(certs)
    }
}
