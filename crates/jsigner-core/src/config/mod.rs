//! Configuration parsing and management.
//!
//! This module handles parsing of the signer configuration file (TOML) that
//! describes the portal (URL and DOM selectors), the authentication gateway,
//! timeouts, the dialog helper, and browser launch settings.
//!
//! Every field has a default matching the production portal, so an empty
//! file (or no file at all) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level signer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SignerConfig {
    /// Portal URL and listing selectors.
    #[serde(default)]
    pub portal: PortalConfig,

    /// Authentication gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Timeouts, calibrated for the medium speed preset.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Retry budgets.
    #[serde(default)]
    pub retries: RetryConfig,

    /// Out-of-process dialog helper.
    #[serde(default)]
    pub helper: HelperConfig,

    /// Browser launch settings.
    #[serde(default)]
    pub browser: BrowserSettings,

    /// Certificate store settings.
    #[serde(default)]
    pub certificates: CertificateStoreConfig,
}

impl SignerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Load configuration from `path` if it exists, or return the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed, or
    /// fails validation.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if:
    /// - no gateway host is configured (the dialog cannot be detected)
    /// - no auto-selection pattern is configured
    /// - `portal.max_pages` is zero
    /// - any retry budget is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "gateway.hosts must name at least one gateway host".to_string(),
            ));
        }
        if self.gateway.auto_select_patterns.is_empty() {
            return Err(ConfigError::Validation(
                "gateway.auto_select_patterns must not be empty".to_string(),
            ));
        }
        if self.portal.max_pages == 0 {
            return Err(ConfigError::Validation(
                "portal.max_pages must be at least 1".to_string(),
            ));
        }
        if self.retries.dialog_rounds == 0 || self.retries.authentication == 0 {
            return Err(ConfigError::Validation(
                "retries.dialog_rounds and retries.authentication must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Portal URL and listing selectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortalConfig {
    /// Entry URL of the portal.
    pub url: String,

    /// Top-level menu that reveals the listing entries.
    pub menu_selector: String,

    /// Listing entry for the Kit Digital category.
    pub kit_digital_selector: String,

    /// Listing entry for the Kit Consulting category.
    pub kit_consulting_selector: String,

    /// Listing table.
    pub table_selector: String,

    /// Next-page control of the listing.
    pub next_page_selector: String,

    /// Busy/loading indicator.
    pub spinner_selector: String,

    /// "Sign with Cl@ve and submit" control (primary method).
    pub sign_clave_selector: String,

    /// "Submit" control that signs with AutoFirma (fallback method).
    pub submit_selector: String,

    /// Status text of rows pending submission.
    pub pending_marker: String,

    /// Status text of rows already submitted.
    pub submitted_marker: String,

    /// Zero-based column holding the expedient id link.
    pub id_column: usize,

    /// Zero-based column holding the status text.
    pub status_column: usize,

    /// Upper bound on listing pages walked per pass.
    pub max_pages: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: "https://portal.gestion.sedepkd.red.gob.es/portal/espacioAD".to_string(),
            menu_selector: "#navbarTramitAcuerdos".to_string(),
            kit_digital_selector: "#kd-jus".to_string(),
            kit_consulting_selector: "#kc-jus".to_string(),
            table_selector: "#tableJustificaciones".to_string(),
            next_page_selector: "#tableJustificaciones_next".to_string(),
            spinner_selector: "#loading, .blockUI, .spinner-border".to_string(),
            sign_clave_selector: "#submitfirmaNotCrypto".to_string(),
            submit_selector: "#submitForm".to_string(),
            pending_marker: "Pdte. presentar".to_string(),
            submitted_marker: "Presentad".to_string(),
            id_column: 0,
            status_column: 3,
            max_pages: 50,
        }
    }
}

impl PortalConfig {
    /// Selector matching the listing's body rows.
    #[must_use]
    pub fn row_selector(&self) -> String {
        format!("{} tbody tr", self.table_selector)
    }

    /// Selector matching the expedient links of the listing.
    #[must_use]
    pub fn link_selector(&self) -> String {
        format!("{} tbody tr td a", self.table_selector)
    }
}

/// Authentication gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Hosts that identify the gateway from the page URL.
    pub hosts: Vec<String>,

    /// URL patterns that receive the certificate auto-selection rule.
    pub auto_select_patterns: Vec<String>,

    /// Text that identifies the gateway page when the URL is not decisive.
    pub marker_text: String,

    /// Label of the gateway button that requests certificate access.
    pub certificate_button_text: String,

    /// Label of the accept button in the in-page selection widget.
    pub accept_button_text: String,

    /// Rows of the in-page certificate selection widget.
    pub widget_row_selector: String,

    /// Rows of any table, used when no dialog-scoped rows exist.
    pub widget_fallback_row_selector: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["pasarela.clave.gob.es".to_string()],
            auto_select_patterns: vec![
                "https://pasarela.clave.gob.es".to_string(),
                "https://pasarela.clave.gob.es:443".to_string(),
                "https://*.clave.gob.es".to_string(),
                "https://*.ident.clave.gob.es".to_string(),
            ],
            marker_text: "Plataforma de identificación".to_string(),
            certificate_button_text: "Acceso DNIe / Certificado electrónico".to_string(),
            accept_button_text: "Aceptar".to_string(),
            widget_row_selector: "[role='dialog'] table tbody tr, .modal table tbody tr"
                .to_string(),
            widget_fallback_row_selector: "table tbody tr".to_string(),
        }
    }
}

/// Timeouts, calibrated for the medium speed preset and scaled by
/// [`crate::Pacing::scale`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Waiting for a page or the listing table to load.
    #[serde(with = "humantime_serde")]
    pub navigation: Duration,

    /// Waiting for the busy indicator to clear.
    #[serde(with = "humantime_serde")]
    pub spinner: Duration,

    /// Window in which browser auto-selection may clear the gateway.
    #[serde(with = "humantime_serde")]
    pub auto_select_window: Duration,

    /// One dialog strategy attempt (helper run, UI automation query).
    #[serde(with = "humantime_serde")]
    pub dialog_attempt: Duration,

    /// Waiting for a signing action to be confirmed.
    #[serde(with = "humantime_serde")]
    pub confirmation: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(20),
            spinner: Duration::from_secs(10),
            auto_select_window: Duration::from_millis(1500),
            dialog_attempt: Duration::from_secs(2),
            confirmation: Duration::from_secs(15),
        }
    }
}

/// Retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Rounds over the ordered dialog strategies before giving up.
    pub dialog_rounds: u32,

    /// Authentication checks before declaring `AuthenticationTimeout`.
    pub authentication: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            dialog_rounds: 3,
            authentication: 8,
        }
    }
}

/// Out-of-process dialog helper settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HelperConfig {
    /// Whether the helper strategy is attempted at all.
    pub enabled: bool,

    /// Helper executable. Defaults to `jsigner-clicker` next to the
    /// running executable.
    pub path: Option<PathBuf>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrowserSettings {
    /// Chrome executable; autodetected when unset.
    pub executable: Option<PathBuf>,

    /// Window width in pixels.
    pub window_width: u32,

    /// Window height in pixels.
    pub window_height: u32,

    /// Accept invalid TLS server certificates.
    pub ignore_https_errors: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            window_width: 1400,
            window_height: 900,
            ignore_https_errors: true,
        }
    }
}

/// Certificate store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CertificateStoreConfig {
    /// PowerShell binary used to query the store.
    pub shell: String,

    /// Upper bound on the store query.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CertificateStoreConfig {
    fn default() -> Self {
        Self {
            shell: "powershell".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
