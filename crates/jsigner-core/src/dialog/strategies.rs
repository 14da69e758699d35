//! The four ways of answering the certificate prompt.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::helper::DialogHelper;
use super::matching::pick_row;
use super::native;
use super::{DialogStrategy, GatewayDetector, StrategyKind, StrategyOutcome};
use crate::browser::PortalPage;
use crate::certs::SelectionFilter;
use crate::config::GatewayConfig;
use crate::pacing::{Pacing, poll_until};

// =============================================================================
// Browser auto-selection
// =============================================================================

/// Waits for the browser's auto-selection policy to answer the TLS prompt.
///
/// Takes no action; succeeds if the gateway clears within the window.
#[derive(Debug, Clone)]
pub struct AutoSelection {
    gateway: GatewayDetector,
    window: Duration,
}

impl AutoSelection {
    /// Creates the strategy with a poll `window` calibrated for the medium
    /// preset.
    #[must_use]
    pub const fn new(gateway: GatewayDetector, window: Duration) -> Self {
        Self { gateway, window }
    }
}

#[async_trait]
impl DialogStrategy for AutoSelection {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AutoSelection
    }

    async fn attempt(
        &self,
        page: &dyn PortalPage,
        _filter: &SelectionFilter,
        _timeout: Duration,
        pacing: Pacing,
    ) -> StrategyOutcome {
        let gateway = &self.gateway;
        let cleared = poll_until(pacing.scale(self.window), pacing.delay(0.5), || async move {
            !gateway.still_active(page).await
        })
        .await;
        StrategyOutcome {
            found: cleared,
            selected: cleared,
        }
    }
}

// =============================================================================
// Native dialog
// =============================================================================

/// Delegates the native dialog to the out-of-process helper.
#[derive(Debug, Clone)]
pub struct HelperProcess {
    helper: DialogHelper,
}

impl HelperProcess {
    /// Wraps a located helper.
    #[must_use]
    pub const fn new(helper: DialogHelper) -> Self {
        Self { helper }
    }
}

#[async_trait]
impl DialogStrategy for HelperProcess {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HelperProcess
    }

    async fn attempt(
        &self,
        _page: &dyn PortalPage,
        filter: &SelectionFilter,
        timeout: Duration,
        _pacing: Pacing,
    ) -> StrategyOutcome {
        self.helper.run(filter, timeout).await
    }
}

/// Drives the native dialog through UI Automation in this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectAutomation;

#[async_trait]
impl DialogStrategy for DirectAutomation {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectAutomation
    }

    async fn attempt(
        &self,
        _page: &dyn PortalPage,
        filter: &SelectionFilter,
        timeout: Duration,
        _pacing: Pacing,
    ) -> StrategyOutcome {
        let filter = filter.clone();
        let task = tokio::task::spawn_blocking(move || native::pick_certificate(&filter, timeout));
        match task.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(error = %e, "native certificate dialog automation failed");
                StrategyOutcome::default()
            },
            Err(e) => {
                warn!(error = %e, "native certificate dialog task panicked");
                StrategyOutcome::default()
            },
        }
    }
}

// =============================================================================
// In-page widget
// =============================================================================

/// Answers a certificate selection widget rendered in the page.
///
/// Rows inside a dialog or modal are preferred; any table is the fallback.
/// When no row is on screen yet, the gateway's certificate-access button is
/// pressed so that the prompt appears for the next attempt.
#[derive(Debug, Clone)]
pub struct InPageWidget {
    row_selector: String,
    fallback_row_selector: String,
    accept_text: String,
    certificate_button_text: String,
}

impl InPageWidget {
    /// Creates the strategy from the gateway configuration.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            row_selector: config.widget_row_selector.clone(),
            fallback_row_selector: config.widget_fallback_row_selector.clone(),
            accept_text: config.accept_button_text.clone(),
            certificate_button_text: config.certificate_button_text.clone(),
        }
    }

    async fn rows(&self, page: &dyn PortalPage) -> Option<(&str, Vec<String>)> {
        for selector in [&self.row_selector, &self.fallback_row_selector] {
            match page.table_rows(selector).await {
                Ok(rows) if !rows.is_empty() => {
                    let texts = rows.into_iter().map(|cells| cells.join(" ")).collect();
                    return Some((selector.as_str(), texts));
                },
                Ok(_) => {},
                Err(e) => debug!(selector = %selector, error = %e, "widget rows unavailable"),
            }
        }
        None
    }

    async fn confirm(&self, page: &dyn PortalPage) -> bool {
        if page.click_with_text("button", &self.accept_text).await.is_ok() {
            return true;
        }
        match page.press_enter().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "could not confirm in-page certificate selection");
                false
            },
        }
    }
}

#[async_trait]
impl DialogStrategy for InPageWidget {
    fn kind(&self) -> StrategyKind {
        StrategyKind::InPageWidget
    }

    async fn attempt(
        &self,
        page: &dyn PortalPage,
        filter: &SelectionFilter,
        _timeout: Duration,
        pacing: Pacing,
    ) -> StrategyOutcome {
        let Some((selector, rows)) = self.rows(page).await else {
            let opened = page
                .click_with_text("button, a", &self.certificate_button_text)
                .await
                .is_ok();
            if opened {
                debug!("requested certificate access on the gateway");
            }
            return StrategyOutcome {
                found: opened,
                selected: false,
            };
        };

        let Some((index, matched)) = pick_row(filter, &rows) else {
            debug!(rows = rows.len(), "no widget row matches the certificate");
            return StrategyOutcome {
                found: true,
                selected: false,
            };
        };

        info!(row = index, ?matched, "selecting certificate in page widget");
        if let Err(e) = page.click_row(selector, index).await {
            warn!(error = %e, "could not click certificate row");
            return StrategyOutcome {
                found: true,
                selected: false,
            };
        }
        pacing.pause(0.5).await;
        StrategyOutcome {
            found: true,
            selected: self.confirm(page).await,
        }
    }
}
