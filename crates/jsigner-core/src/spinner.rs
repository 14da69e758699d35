//! Spinner Guard.
//!
//! The portal blocks interaction with a loading overlay while requests are
//! in flight. Clicking through it is silently ignored, so every
//! state-changing click is preceded by [`SpinnerGuard::before_click`].

use std::time::Duration;

use crate::browser::PortalPage;
use crate::config::{PortalConfig, TimeoutConfig};
use crate::error::SignerError;
use crate::job::JobLog;
use crate::pacing::{Pacing, poll_until};

/// Waits for the busy indicator to disappear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinnerGuard {
    selector: String,
    timeout: Duration,
}

impl SpinnerGuard {
    /// Creates a guard over `selector` with a timeout calibrated for the
    /// medium preset.
    #[must_use]
    pub fn new(selector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            selector: selector.into(),
            timeout,
        }
    }

    /// Creates the guard from configuration.
    #[must_use]
    pub fn from_config(portal: &PortalConfig, timeouts: &TimeoutConfig) -> Self {
        Self::new(portal.spinner_selector.clone(), timeouts.spinner)
    }

    /// Polls until the indicator is hidden.
    ///
    /// A page that cannot be queried counts as idle: the click that follows
    /// will surface the real problem.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::UiBusyTimeout` if the indicator is still
    /// visible after the scaled timeout.
    pub async fn wait_idle(&self, page: &dyn PortalPage, pacing: Pacing) -> Result<(), SignerError> {
        let waited = pacing.scale(self.timeout);
        let selector = self.selector.as_str();
        let idle = poll_until(waited, pacing.delay(0.5), || async move {
            !page.is_visible(selector).await.unwrap_or(false)
        })
        .await;

        if idle {
            Ok(())
        } else {
            Err(SignerError::UiBusyTimeout {
                selector: self.selector.clone(),
                waited,
            })
        }
    }

    /// Waits for idle before a click. A timeout is logged and the caller
    /// clicks anyway.
    pub async fn before_click(&self, page: &dyn PortalPage, pacing: Pacing, log: &JobLog) {
        if let Err(e) = self.wait_idle(page, pacing).await {
            log.warn(format!("{e}; clicking anyway"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::Speed;
    use crate::testing::FakePortal;

    #[tokio::test(start_paused = true)]
    async fn test_idle_page_passes() {
        let portal = FakePortal::builder().build();
        let guard = SpinnerGuard::new(
            portal.config().portal.spinner_selector.clone(),
            Duration::from_secs(1),
        );
        assert!(guard.wait_idle(&portal, Speed::Fast.pacing()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_spinner_times_out_with_scaled_wait() {
        let portal = FakePortal::builder().spinner_stuck().build();
        let guard = SpinnerGuard::new(
            portal.config().portal.spinner_selector.clone(),
            Duration::from_millis(600),
        );
        let start = tokio::time::Instant::now();
        let err = guard
            .wait_idle(&portal, Speed::Slow.pacing())
            .await
            .unwrap_err();
        match err {
            SignerError::UiBusyTimeout { waited, .. } => {
                assert!(waited.as_millis().abs_diff(1200) <= 1, "{waited:?}");
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() >= Duration::from_millis(1199));
    }
}
