//! Session Driver.
//!
//! Owns the browser of one job. The certificate auto-selection policy is
//! passed on the browser command line, so it is in force before the first
//! navigation and disappears with the process; nothing is written to the
//! user profile and no elevation is needed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::{ChromiumBrowser, PortalPage, auto_select_policy};
use crate::certs::SelectionFilter;
use crate::config::{PortalConfig, SignerConfig};
use crate::dialog::DialogResolver;
use crate::error::SignerError;
use crate::job::JobLog;
use crate::pacing::{Pacing, Speed};

/// Expedient listing to work through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Kit Digital justifications.
    KitDigital,
    /// Kit Consulting justifications.
    KitConsulting,
}

impl Category {
    /// Returns the category name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::KitDigital => "kit_digital",
            Self::KitConsulting => "kit_consulting",
        }
    }

    /// Returns the menu entry that opens this category's listing.
    #[must_use]
    pub fn selector<'a>(&self, portal: &'a PortalConfig) -> &'a str {
        match self {
            Self::KitDigital => &portal.kit_digital_selector,
            Self::KitConsulting => &portal.kit_consulting_selector,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category `{0}` (expected kd or kc)")]
pub struct ParseCategoryError(String);

impl FromStr for Category {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "kd" | "kit_digital" | "kitdigital" => Ok(Self::KitDigital),
            "kc" | "kit_consulting" | "kitconsulting" => Ok(Self::KitConsulting),
            other => Err(ParseCategoryError(other.to_string())),
        }
    }
}

/// Opens sessions. Implemented by [`SessionDriver`]; tests substitute a
/// launcher over a scripted page.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Launches a browser bound to `filter`.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::Browser` if the browser cannot be started.
    async fn launch(
        &self,
        filter: SelectionFilter,
        speed: Speed,
        headless: bool,
    ) -> Result<SessionHandle, SignerError>;
}

/// Launches Chrome with the auto-selection policy for a certificate.
#[derive(Debug, Clone)]
pub struct SessionDriver {
    config: Arc<SignerConfig>,
}

impl SessionDriver {
    /// Creates a driver.
    #[must_use]
    pub const fn new(config: Arc<SignerConfig>) -> Self {
        Self { config }
    }

    /// Starts a session.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::Browser` if the browser cannot be started.
    pub async fn start(
        &self,
        filter: SelectionFilter,
        speed: Speed,
        headless: bool,
    ) -> Result<SessionHandle, SignerError> {
        let policy = auto_select_policy(&self.config.gateway.auto_select_patterns, &filter);
        debug!(%policy, "certificate auto-selection policy");

        let (browser, page) = ChromiumBrowser::launch(
            &self.config.browser,
            &policy,
            headless,
            speed.pacing().scale(self.config.timeouts.navigation),
        )
        .await?;

        let mut session = SessionHandle::from_page(
            Arc::new(page),
            filter,
            speed,
            Arc::clone(&self.config),
            DialogResolver::standard(&self.config),
        );
        session.browser = Some(browser);
        Ok(session)
    }
}

#[async_trait]
impl SessionLauncher for SessionDriver {
    async fn launch(
        &self,
        filter: SelectionFilter,
        speed: Speed,
        headless: bool,
    ) -> Result<SessionHandle, SignerError> {
        self.start(filter, speed, headless).await
    }
}

/// A live session: the page, its certificate filter and pacing.
pub struct SessionHandle {
    browser: Option<ChromiumBrowser>,
    page: Arc<dyn PortalPage>,
    filter: SelectionFilter,
    pacing: Pacing,
    config: Arc<SignerConfig>,
    resolver: DialogResolver,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("filter", &self.filter)
            .field("pacing", &self.pacing)
            .field("browser", &self.browser.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Wraps an already open page. The session owns no browser process.
    #[must_use]
    pub fn from_page(
        page: Arc<dyn PortalPage>,
        filter: SelectionFilter,
        speed: Speed,
        config: Arc<SignerConfig>,
        resolver: DialogResolver,
    ) -> Self {
        Self {
            browser: None,
            page,
            filter,
            pacing: speed.pacing(),
            config,
            resolver,
        }
    }

    /// Returns the page.
    #[must_use]
    pub fn page(&self) -> &dyn PortalPage {
        self.page.as_ref()
    }

    /// Returns the certificate filter bound to this session.
    #[must_use]
    pub const fn filter(&self) -> &SelectionFilter {
        &self.filter
    }

    /// Returns the job's pacing.
    #[must_use]
    pub const fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Returns the dialog resolver.
    #[must_use]
    pub const fn resolver(&self) -> &DialogResolver {
        &self.resolver
    }

    /// Opens the portal, navigates to `category` and completes the gateway
    /// login if one is shown.
    ///
    /// Authentication runs at the fast preset regardless of the job's
    /// speed: the gateway drops slow clients.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::NavigationTransient` if the portal cannot be
    /// loaded, or `SignerError::AuthenticationTimeout` if the gateway is
    /// still shown after the configured number of attempts.
    pub async fn authenticate(&self, category: Category, log: &JobLog) -> Result<(), SignerError> {
        let portal = &self.config.portal;
        let page = self.page();

        log.info(format!("opening portal {}", portal.url));
        page.goto(&portal.url).await?;
        self.pacing.pause(1.0).await;

        if let Err(e) = page.click(&portal.menu_selector).await {
            log.warn(format!("listing menu not available: {e}"));
        }
        self.pacing.pause(0.5).await;
        if let Err(e) = page.click(category.selector(portal)).await {
            log.warn(format!("{category} listing entry not available: {e}"));
        }
        self.pacing.pause(1.0).await;

        let fast = Speed::Fast.pacing();
        let gateway = self.resolver.gateway();
        let budget = self.config.retries.authentication;
        for attempt in 1..=budget {
            if !gateway.still_active(page).await {
                if attempt > 1 {
                    log.info("authenticated on the gateway");
                }
                return Ok(());
            }
            if attempt == 1 {
                log.info("gateway authentication required");
            }

            match self.resolver.resolve(page, &self.filter, fast).await {
                Ok(event) => debug!(?event, attempt, "gateway prompt handled"),
                Err(e) => log.warn(format!("authentication attempt {attempt}/{budget}: {e}")),
            }
            fast.pause(1.0).await;
        }

        if gateway.still_active(page).await {
            return Err(SignerError::AuthenticationTimeout { retries: budget });
        }
        log.info("authenticated on the gateway");
        Ok(())
    }

    /// Closes the browser. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            browser.close().await;
            debug!("browser closed");
        }
    }
}
