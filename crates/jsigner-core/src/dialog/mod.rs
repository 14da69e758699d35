//! Dialog Resolver.
//!
//! The gateway asks for a client certificate and the prompt can surface in
//! three places: the browser's own TLS prompt, a native OS window, or a
//! selection widget rendered in the page. The resolver tries an ordered
//! list of [`DialogStrategy`] implementations, one per way of answering the
//! prompt, until one of them selects the certificate or the gateway clears.
//!
//! ```text
//! Idle -> Detecting -> NoneFound ----------------------------> Resolved
//!                   -> { BrowserNativeFound | OsNativeFound
//!                      | InPageFound } -> Resolved | Unresolved
//! ```
//!
//! With no gateway on screen the resolver returns at once with
//! [`DialogEvent::none`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::browser::{PortalPage, url_host};
use crate::certs::SelectionFilter;
use crate::config::{GatewayConfig, SignerConfig};
use crate::error::{BrowserResult, SignerError};
use crate::pacing::Pacing;

pub mod helper;
pub mod matching;
pub mod native;
mod strategies;

pub use helper::DialogHelper;
pub use strategies::{AutoSelection, DirectAutomation, HelperProcess, InPageWidget};

/// Where a certificate prompt was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogSurface {
    /// The browser's TLS client-certificate prompt.
    BrowserNative,
    /// A native operating-system window.
    OsNative,
    /// A selection widget in the page DOM.
    InPageWidget,
}

impl DialogSurface {
    const fn found_state(self) -> ResolverState {
        match self {
            Self::BrowserNative => ResolverState::BrowserNativeFound,
            Self::OsNative => ResolverState::OsNativeFound,
            Self::InPageWidget => ResolverState::InPageFound,
        }
    }
}

/// Identifies a dialog strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Browser auto-selection satisfied the prompt on its own.
    AutoSelection,
    /// The out-of-process helper confirmed the native dialog.
    HelperProcess,
    /// In-process UI Automation confirmed the native dialog.
    DirectAutomation,
    /// The in-page widget was answered through the DOM.
    InPageWidget,
}

impl StrategyKind {
    /// Returns the strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AutoSelection => "auto_selection",
            Self::HelperProcess => "helper_process",
            Self::DirectAutomation => "direct_automation",
            Self::InPageWidget => "in_page_widget",
        }
    }

    /// Returns the surface this strategy answers.
    #[must_use]
    pub const fn surface(&self) -> DialogSurface {
        match self {
            Self::AutoSelection => DialogSurface::BrowserNative,
            Self::HelperProcess | Self::DirectAutomation => DialogSurface::OsNative,
            Self::InPageWidget => DialogSurface::InPageWidget,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogEvent {
    /// Surface the prompt was answered on; `None` when no prompt was shown.
    pub surface: Option<DialogSurface>,
    /// Whether the prompt is gone.
    pub resolved: bool,
    /// Strategy that answered the prompt; `None` when no prompt was shown.
    pub strategy_used: Option<StrategyKind>,
}

impl DialogEvent {
    /// No prompt was present.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            surface: None,
            resolved: true,
            strategy_used: None,
        }
    }

    /// The prompt was answered by `strategy`.
    #[must_use]
    pub const fn resolved_by(strategy: StrategyKind) -> Self {
        Self {
            surface: Some(strategy.surface()),
            resolved: true,
            strategy_used: Some(strategy),
        }
    }
}

/// Resolver progress, traced at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    /// Not started.
    Idle,
    /// Checking whether a prompt is shown.
    Detecting,
    /// The browser prompt is being answered.
    BrowserNativeFound,
    /// A native OS dialog was found.
    OsNativeFound,
    /// An in-page widget was found.
    InPageFound,
    /// No prompt is shown.
    NoneFound,
    /// The prompt is gone.
    Resolved,
    /// Every strategy was exhausted.
    Unresolved,
}

/// Uniform result of one strategy attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    /// The strategy saw its surface.
    pub found: bool,
    /// The strategy selected and confirmed the certificate.
    pub selected: bool,
}

/// One way of answering the certificate prompt.
#[async_trait]
pub trait DialogStrategy: Send + Sync {
    /// Identifies the strategy in logs and errors.
    fn kind(&self) -> StrategyKind;

    /// Makes one bounded attempt. `timeout` is already scaled to the job's
    /// pacing.
    async fn attempt(
        &self,
        page: &dyn PortalPage,
        filter: &SelectionFilter,
        timeout: Duration,
        pacing: Pacing,
    ) -> StrategyOutcome;
}

/// Detects whether the authentication gateway is on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDetector {
    hosts: Vec<String>,
    marker_text: String,
}

impl GatewayDetector {
    /// Creates a detector from the gateway configuration.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            hosts: config
                .hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            marker_text: config.marker_text.clone(),
        }
    }

    /// Returns `true` if `url` belongs to a gateway host or one of its
    /// subdomains.
    #[must_use]
    pub fn matches_url(&self, url: &str) -> bool {
        let Some(host) = url_host(url) else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        self.hosts.iter().any(|gateway| {
            host == *gateway
                || host
                    .strip_suffix(gateway.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Returns `true` if the page shows the gateway.
    ///
    /// # Errors
    ///
    /// Propagates page failures.
    pub async fn is_active(&self, page: &dyn PortalPage) -> BrowserResult<bool> {
        if self.matches_url(&page.current_url().await?) {
            return Ok(true);
        }
        if self.marker_text.is_empty() {
            return Ok(false);
        }
        page.contains_text(&self.marker_text).await
    }

    /// Like [`Self::is_active`], treating page failures as "still shown".
    pub async fn still_active(&self, page: &dyn PortalPage) -> bool {
        self.is_active(page).await.unwrap_or(true)
    }
}

/// Runs the ordered dialog strategies against a gateway prompt.
pub struct DialogResolver {
    strategies: Vec<Box<dyn DialogStrategy>>,
    gateway: GatewayDetector,
    rounds: u32,
    attempt_timeout: Duration,
}

impl fmt::Debug for DialogResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogResolver")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            )
            .field("gateway", &self.gateway)
            .field("rounds", &self.rounds)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl DialogResolver {
    /// Creates a resolver over `strategies`, tried in order for up to
    /// `rounds` rounds.
    #[must_use]
    pub fn new(
        gateway: GatewayDetector,
        strategies: Vec<Box<dyn DialogStrategy>>,
        rounds: u32,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            strategies,
            gateway,
            rounds: rounds.max(1),
            attempt_timeout,
        }
    }

    /// Builds the production resolver: auto-selection, helper process,
    /// direct UI Automation, in-page widget. The helper is skipped when it
    /// is disabled or not installed.
    #[must_use]
    pub fn standard(config: &SignerConfig) -> Self {
        let gateway = GatewayDetector::new(&config.gateway);
        let mut strategies: Vec<Box<dyn DialogStrategy>> = vec![Box::new(AutoSelection::new(
            gateway.clone(),
            config.timeouts.auto_select_window,
        ))];
        match DialogHelper::locate(&config.helper) {
            Some(helper) => strategies.push(Box::new(HelperProcess::new(helper))),
            None => debug!("dialog helper not available; skipping helper strategy"),
        }
        strategies.push(Box::new(DirectAutomation));
        strategies.push(Box::new(InPageWidget::new(&config.gateway)));

        Self::new(
            gateway,
            strategies,
            config.retries.dialog_rounds,
            config.timeouts.dialog_attempt,
        )
    }

    /// Returns the gateway detector.
    #[must_use]
    pub const fn gateway(&self) -> &GatewayDetector {
        &self.gateway
    }

    /// Returns the strategy order.
    #[must_use]
    pub fn strategy_order(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Resolves the certificate prompt, if any.
    ///
    /// Between attempts the gateway is re-checked: a prompt that cleared on
    /// its own (late browser auto-selection) is reported as resolved on the
    /// browser surface.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::NavigationTransient` if the page cannot be
    /// inspected, or `SignerError::CertificateDialogUnresolved` once every
    /// strategy has been exhausted.
    pub async fn resolve(
        &self,
        page: &dyn PortalPage,
        filter: &SelectionFilter,
        pacing: Pacing,
    ) -> Result<DialogEvent, SignerError> {
        let mut state = ResolverState::Idle;
        transition(&mut state, ResolverState::Detecting);

        if !self.gateway.is_active(page).await? {
            transition(&mut state, ResolverState::NoneFound);
            transition(&mut state, ResolverState::Resolved);
            return Ok(DialogEvent::none());
        }

        let timeout = pacing.scale(self.attempt_timeout);
        let mut tried = Vec::new();
        for round in 1..=self.rounds {
            for strategy in &self.strategies {
                let kind = strategy.kind();
                if !tried.contains(&kind) {
                    tried.push(kind);
                }

                let outcome = strategy.attempt(page, filter, timeout, pacing).await;
                debug!(round, strategy = %kind, found = outcome.found, selected = outcome.selected, "dialog strategy attempt");
                if outcome.found {
                    transition(&mut state, kind.surface().found_state());
                }
                if outcome.selected {
                    transition(&mut state, ResolverState::Resolved);
                    info!(strategy = %kind, "certificate prompt resolved");
                    return Ok(DialogEvent::resolved_by(kind));
                }

                if !self.gateway.still_active(page).await {
                    transition(&mut state, ResolverState::BrowserNativeFound);
                    transition(&mut state, ResolverState::Resolved);
                    info!(after = %kind, "certificate prompt cleared by browser auto-selection");
                    return Ok(DialogEvent::resolved_by(StrategyKind::AutoSelection));
                }
                pacing.pause(0.5).await;
            }
        }

        transition(&mut state, ResolverState::Unresolved);
        Err(SignerError::CertificateDialogUnresolved { tried })
    }
}

fn transition(state: &mut ResolverState, next: ResolverState) {
    debug!(from = ?*state, to = ?next, "dialog resolver state");
    *state = next;
}
