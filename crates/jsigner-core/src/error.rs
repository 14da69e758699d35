//! Error taxonomy for signing runs.
//!
//! Errors fall in three tiers:
//!
//! | Variant | Scope | Effect |
//! |---------|-------|--------|
//! | `DirectoryUnavailable`, `CertificateNotFound`, `Config` | pre-flight | job never starts |
//! | `AuthenticationTimeout`, `Browser` | session | job aborts with a zero summary |
//! | `CertificateDialogUnresolved`, `NavigationTransient`, `ExpedientSignFailed` | expedient | expedient marked failed, run continues |
//! | `UiBusyTimeout` | action | logged, action attempted anyway |
//!
//! Only the first two tiers propagate out of the orchestrator; see
//! [`SignerError::is_fatal`].

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::dialog::StrategyKind;

/// Errors raised by the signing engine.
#[derive(Debug, Error)]
pub enum SignerError {
    /// The OS certificate store could not be queried.
    #[error("certificate directory unavailable: {reason}")]
    DirectoryUnavailable {
        /// Why the store query failed.
        reason: String,
    },

    /// No installed, non-expired certificate has the requested thumbprint.
    #[error("certificate not found: {thumbprint}")]
    CertificateNotFound {
        /// The thumbprint that was requested.
        thumbprint: String,
    },

    /// The gateway never reached an authenticated state.
    #[error("authentication did not complete after {retries} attempts")]
    AuthenticationTimeout {
        /// Number of delay-scaled retries spent.
        retries: u32,
    },

    /// Every dialog strategy was exhausted without selecting a certificate.
    #[error("certificate dialog unresolved (tried: {})", format_strategies(.tried))]
    CertificateDialogUnresolved {
        /// Strategies attempted, in order.
        tried: Vec<StrategyKind>,
    },

    /// The busy indicator stayed visible past its timeout.
    #[error("page still busy after {waited:?} (indicator `{selector}`)")]
    UiBusyTimeout {
        /// Selector of the busy indicator.
        selector: String,
        /// How long the guard waited.
        waited: Duration,
    },

    /// A page was not ready or a navigation failed; retried once.
    #[error("transient navigation error: {0}")]
    NavigationTransient(#[from] BrowserError),

    /// The expedient could not be signed by any method.
    #[error("expedient {expedient_id} not signed: {reason}")]
    ExpedientSignFailed {
        /// The expedient being signed.
        expedient_id: String,
        /// What went wrong.
        reason: String,
    },

    /// The browser could not be launched or its connection was lost.
    #[error("browser failure: {0}")]
    Browser(String),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The job id is unknown to the controller.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job id that was requested.
        job_id: String,
    },
}

impl SignerError {
    /// Returns `true` if the error must abort the whole job rather than a
    /// single expedient.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DirectoryUnavailable { .. }
                | Self::CertificateNotFound { .. }
                | Self::AuthenticationTimeout { .. }
                | Self::Browser(_)
                | Self::Config(_)
                | Self::JobNotFound { .. }
        )
    }

    /// Returns `true` if the per-expedient sequence may be retried once.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NavigationTransient(_))
    }
}

fn format_strategies(tried: &[StrategyKind]) -> String {
    if tried.is_empty() {
        return "none".to_string();
    }
    tried
        .iter()
        .map(StrategyKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Page-level failures reported by a [`crate::browser::PortalPage`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrowserError {
    /// No element matched the selector.
    #[error("no element matches `{selector}`")]
    ElementNotFound {
        /// The selector that matched nothing.
        selector: String,
    },

    /// No element under the selector contained the text.
    #[error("no element under `{selector}` contains `{text}`")]
    TextNotFound {
        /// The scope selector.
        selector: String,
        /// The text searched for.
        text: String,
    },

    /// Navigation did not complete.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The DevTools protocol call failed.
    #[error("devtools protocol error: {0}")]
    Protocol(String),

    /// A page script returned an unexpected value.
    #[error("page script failed: {0}")]
    Script(String),

    /// The browser or page has been closed.
    #[error("browser closed")]
    Closed,
}

/// Result alias for page operations.
pub type BrowserResult<T> = Result<T, BrowserError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(
            SignerError::DirectoryUnavailable {
                reason: "x".to_string()
            }
            .is_fatal()
        );
        assert!(SignerError::AuthenticationTimeout { retries: 3 }.is_fatal());
        assert!(!SignerError::CertificateDialogUnresolved { tried: vec![] }.is_fatal());
        assert!(
            !SignerError::UiBusyTimeout {
                selector: ".spinner".to_string(),
                waited: Duration::from_secs(1),
            }
            .is_fatal()
        );
        assert!(!SignerError::NavigationTransient(BrowserError::Closed).is_fatal());
    }

    #[test]
    fn test_only_navigation_is_transient() {
        assert!(SignerError::NavigationTransient(BrowserError::Closed).is_transient());
        assert!(
            !SignerError::ExpedientSignFailed {
                expedient_id: "KD-1".to_string(),
                reason: "x".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_unresolved_lists_strategies() {
        let err = SignerError::CertificateDialogUnresolved {
            tried: vec![StrategyKind::AutoSelection, StrategyKind::HelperProcess],
        };
        let msg = err.to_string();
        assert!(msg.contains("auto_selection"), "{msg}");
        assert!(msg.contains("helper_process"), "{msg}");

        let none = SignerError::CertificateDialogUnresolved { tried: vec![] };
        assert!(none.to_string().contains("none"));
    }
}
