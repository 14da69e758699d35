//! Scripted in-memory portal for component tests.
//!
//! [`FakePortal`] models the pieces of the portal the engine touches: the
//! category menu, a paginated listing, an expedient view with its two sign
//! controls, the gateway prompt, and the busy overlay. Behaviour per
//! expedient is scripted with [`SignBehavior`]. Views are kept on a history
//! stack, so `go_back` from the listing leaves it just like a browser would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};

use crate::browser::PortalPage;
use crate::certs::{Certificate, SelectionFilter};
use crate::config::SignerConfig;
use crate::dialog::{DialogResolver, DialogStrategy, GatewayDetector, StrategyKind, StrategyOutcome};
use crate::error::{BrowserError, BrowserResult, SignerError};
use crate::job::{JOB_EVENT_CAPACITY, JobEvent, JobId, JobLog};
use crate::pacing::{Pacing, Speed};
use crate::session::{SessionHandle, SessionLauncher};

pub const GATEWAY_URL: &str = "https://pasarela.clave.gob.es/Proxy2/ServiceProvider";
pub const THUMBPRINT: &str = "AB12CD34EF56";
pub const SERIAL: &str = "2DBB3D0D060A312066E40192B2676785";
const SUBMITTED: &str = "Presentada";

/// Gateway behaviour after choosing a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Already authenticated.
    None,
    /// The prompt is answered by the scripted strategy.
    Resolvable,
    /// The installed certificate never matches.
    Never,
}

/// What happens when a sign control is clicked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignBehavior {
    /// Signed on click, no prompt.
    Immediate,
    /// A certificate prompt is raised and answered by the scripted strategy.
    Prompted,
    /// A prompt is raised that nothing can answer.
    Unresolvable,
    /// The Cl@ve control is missing; the submit control signs on click.
    NoPrimary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    Blank,
    Home,
    Listing,
    Expedient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prompt {
    Auth,
    Sign(String),
    Stuck,
}

#[derive(Debug)]
struct Row {
    id: String,
    status: String,
}

#[derive(Debug)]
struct State {
    view: View,
    history: Vec<View>,
    pages: Vec<Vec<Row>>,
    page_index: usize,
    prompt: Option<Prompt>,
    auth: AuthMode,
    authenticated: bool,
    behaviors: HashMap<String, SignBehavior>,
    spinner_stuck: bool,
    auto_clear_after: Option<u32>,
    url_checks: u32,
    strategy_attempts: u32,
    signed: Vec<String>,
    opened: Vec<String>,
    clicks: Vec<String>,
    stop_after: Option<(usize, watch::Sender<bool>)>,
    primary_failures: HashMap<String, u32>,
    open_failures: u32,
}

impl State {
    fn behavior(&self, id: &str) -> SignBehavior {
        self.behaviors
            .get(id)
            .copied()
            .unwrap_or(SignBehavior::Immediate)
    }

    fn is_signed(&self, id: &str) -> bool {
        self.signed.iter().any(|s| s == id)
    }

    fn mark_signed(&mut self, id: &str) {
        for row in self.pages.iter_mut().flatten() {
            if row.id == id {
                row.status = SUBMITTED.to_string();
            }
        }
        self.signed.push(id.to_string());
        if let Some((after, stop)) = &self.stop_after {
            if self.signed.len() == *after {
                let _ = stop.send(true);
            }
        }
    }

    fn resolve_prompt(&mut self) -> bool {
        match self.prompt.clone() {
            Some(Prompt::Auth) if self.auth == AuthMode::Resolvable => {
                self.authenticated = true;
                self.prompt = None;
                true
            },
            Some(Prompt::Sign(id)) => {
                self.mark_signed(&id);
                self.prompt = None;
                true
            },
            _ => false,
        }
    }

    fn expedient_id(&self) -> Option<String> {
        match &self.view {
            View::Expedient(id) => Some(id.clone()),
            _ => None,
        }
    }

    fn navigate(&mut self, next: View) {
        let previous = std::mem::replace(&mut self.view, next);
        self.history.push(previous);
        self.prompt = None;
    }

    /// Pops the history like a browser: the listing comes back on its
    /// first page, and going back from the listing leaves it.
    fn back(&mut self) -> bool {
        let Some(previous) = self.history.pop() else {
            return false;
        };
        self.view = previous;
        self.prompt = None;
        self.page_index = 0;
        true
    }
}

/// Builder for [`FakePortal`].
pub struct FakePortalBuilder {
    config: SignerConfig,
    state: State,
}

impl FakePortalBuilder {
    /// Appends a listing page of `(id, status)` rows.
    pub fn page(mut self, rows: &[(&str, &str)]) -> Self {
        self.state.pages.push(
            rows.iter()
                .map(|(id, status)| Row {
                    id: (*id).to_string(),
                    status: (*status).to_string(),
                })
                .collect(),
        );
        self
    }

    /// Starts on the listing, reached from the portal home, instead of a
    /// blank page.
    pub fn on_listing(mut self) -> Self {
        self.state.view = View::Listing;
        self.state.history = vec![View::Blank, View::Home];
        self.state.authenticated = true;
        self
    }

    pub fn spinner_stuck(mut self) -> Self {
        self.state.spinner_stuck = true;
        self
    }

    pub fn max_pages(mut self, pages: u32) -> Self {
        self.config.portal.max_pages = pages;
        self
    }

    pub fn auth(mut self, mode: AuthMode) -> Self {
        self.state.auth = mode;
        self
    }

    pub fn sign(mut self, id: &str, behavior: SignBehavior) -> Self {
        self.state.behaviors.insert(id.to_string(), behavior);
        self
    }

    /// The first `times` clicks on the Cl@ve control of `id` fail with a
    /// navigation error.
    pub fn fail_primary_clicks(mut self, id: &str, times: u32) -> Self {
        self.state.primary_failures.insert(id.to_string(), times);
        self
    }

    /// The first `times` attempts to open an expedient fail with a
    /// navigation error and leave the listing in place.
    pub fn fail_opens(mut self, times: u32) -> Self {
        self.state.open_failures = times;
        self
    }

    /// Raises the stop flag once `count` expedients are signed.
    pub fn stop_after_signed(mut self, count: usize, stop: watch::Sender<bool>) -> Self {
        self.state.stop_after = Some((count, stop));
        self
    }

    /// The browser answers any prompt on its own after `checks` URL reads.
    pub fn auto_clear_after(mut self, checks: u32) -> Self {
        self.state.auto_clear_after = Some(checks);
        self
    }

    pub fn build(self) -> FakePortal {
        FakePortal {
            config: Arc::new(self.config),
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

/// Shared handle to the scripted portal.
#[derive(Debug, Clone)]
pub struct FakePortal {
    config: Arc<SignerConfig>,
    state: Arc<Mutex<State>>,
}

impl FakePortal {
    pub fn builder() -> FakePortalBuilder {
        FakePortalBuilder {
            config: SignerConfig::default(),
            state: State {
                view: View::Blank,
                history: Vec::new(),
                pages: Vec::new(),
                page_index: 0,
                prompt: None,
                auth: AuthMode::None,
                authenticated: false,
                behaviors: HashMap::new(),
                spinner_stuck: false,
                auto_clear_after: None,
                url_checks: 0,
                strategy_attempts: 0,
                signed: Vec::new(),
                opened: Vec::new(),
                clicks: Vec::new(),
                stop_after: None,
                primary_failures: HashMap::new(),
                open_failures: 0,
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake portal lock poisoned")
    }

    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    pub fn config_arc(&self) -> Arc<SignerConfig> {
        Arc::clone(&self.config)
    }

    pub fn filter(&self) -> SelectionFilter {
        test_certificate().selection_filter()
    }

    pub fn on_listing_view(&self) -> bool {
        self.state().view == View::Listing
    }

    pub fn authenticated(&self) -> bool {
        self.state().authenticated
    }

    pub fn prompt_active(&self) -> bool {
        self.state().prompt.is_some()
    }

    /// Raises a gateway prompt that the scripted strategy cannot answer.
    pub fn raise_stuck_prompt(&self) {
        self.state().prompt = Some(Prompt::Stuck);
    }

    /// Raises a sign prompt for `id`.
    pub fn raise_sign_prompt(&self, id: &str) {
        self.state().prompt = Some(Prompt::Sign(id.to_string()));
    }

    pub fn strategy_attempts(&self) -> u32 {
        self.state().strategy_attempts
    }

    pub fn signed_ids(&self) -> Vec<String> {
        self.state().signed.clone()
    }

    pub fn opened_ids(&self) -> Vec<String> {
        self.state().opened.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state().clicks.clone()
    }

    fn count_in(&self, state: &State, selector: &str) -> usize {
        let portal = &self.config.portal;
        if state.prompt == Some(Prompt::Auth) {
            return 0;
        }
        match &state.view {
            View::Listing if selector == portal.table_selector => 1,
            View::Listing if selector == portal.row_selector() => {
                state.pages.get(state.page_index).map_or(0, Vec::len)
            },
            View::Expedient(id) if !state.is_signed(id) => {
                if selector == portal.submit_selector {
                    1
                } else if selector == portal.sign_clave_selector {
                    usize::from(state.behavior(id) != SignBehavior::NoPrimary)
                } else {
                    0
                }
            },
            _ => 0,
        }
    }

    /// Opens the first listing row whose id satisfies `matches`, the way a
    /// link click lands on the first matching anchor.
    fn open_link(
        &self,
        selector: &str,
        text: &str,
        matches: impl Fn(&str) -> bool,
    ) -> BrowserResult<()> {
        let mut state = self.state();
        if state.view == View::Listing
            && state.prompt.is_none()
            && selector == self.config.portal.link_selector()
        {
            if state.open_failures > 0 {
                state.open_failures -= 1;
                return Err(BrowserError::Navigation("listing not ready".to_string()));
            }
            let target = state
                .pages
                .get(state.page_index)
                .and_then(|rows| rows.iter().find(|r| matches(&r.id)))
                .map(|r| r.id.clone());
            if let Some(id) = target {
                state.clicks.push(format!("open:{id}"));
                state.opened.push(id.clone());
                state.navigate(View::Expedient(id));
                return Ok(());
            }
        }
        Err(BrowserError::TextNotFound {
            selector: selector.to_string(),
            text: text.to_string(),
        })
    }

    fn sign_click(state: &mut State, id: &str, primary: bool) -> BrowserResult<()> {
        if primary {
            if let Some(remaining) = state.primary_failures.get_mut(id).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(BrowserError::Navigation("page not ready".to_string()));
            }
        }
        match (state.behavior(id), primary) {
            (SignBehavior::Immediate, _) | (SignBehavior::NoPrimary, false) => {
                state.mark_signed(id);
            },
            (SignBehavior::Prompted, _) => state.prompt = Some(Prompt::Sign(id.to_string())),
            (SignBehavior::Unresolvable, _) => state.prompt = Some(Prompt::Stuck),
            (SignBehavior::NoPrimary, true) => {
                return Err(BrowserError::ElementNotFound {
                    selector: "primary".to_string(),
                });
            },
        }
        Ok(())
    }
}

#[async_trait]
impl PortalPage for FakePortal {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        let mut state = self.state();
        state.clicks.push(format!("goto:{url}"));
        state.navigate(View::Home);
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        let mut state = self.state();
        if state.prompt.is_some() {
            state.url_checks += 1;
            if state
                .auto_clear_after
                .is_some_and(|after| state.url_checks >= after)
            {
                state.resolve_prompt();
            }
        }
        let base = self.config.portal.url.clone();
        Ok(match (&state.prompt, &state.view) {
            (Some(_), _) => GATEWAY_URL.to_string(),
            (None, View::Blank) => "about:blank".to_string(),
            (None, View::Home) => base,
            (None, View::Listing) => format!("{base}/justificaciones"),
            (None, View::Expedient(id)) => format!("{base}/expediente/{id}"),
        })
    }

    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        let state = self.state();
        Ok(self.count_in(&state, selector))
    }

    async fn is_visible(&self, selector: &str) -> BrowserResult<bool> {
        let state = self.state();
        if selector == self.config.portal.spinner_selector {
            return Ok(state.spinner_stuck);
        }
        Ok(self.count_in(&state, selector) > 0)
    }

    async fn is_disabled(&self, selector: &str) -> BrowserResult<bool> {
        let state = self.state();
        Ok(self.count_in(&state, selector) == 0)
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        let state = self.state();
        if state.view != View::Listing
            || selector != self.config.portal.next_page_selector
            || name != "class"
        {
            return Ok(None);
        }
        let class = if state.page_index + 1 < state.pages.len() {
            "paginate_button next"
        } else {
            "paginate_button next disabled"
        };
        Ok(Some(class.to_string()))
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        let portal = &self.config.portal;
        let mut state = self.state();
        state.clicks.push(format!("click:{selector}"));

        if selector == portal.menu_selector {
            return Ok(());
        }
        if selector == portal.kit_digital_selector || selector == portal.kit_consulting_selector {
            state.navigate(View::Listing);
            state.page_index = 0;
            if state.auth != AuthMode::None && !state.authenticated {
                state.prompt = Some(Prompt::Auth);
            }
            return Ok(());
        }
        if selector == portal.next_page_selector
            && state.view == View::Listing
            && state.page_index + 1 < state.pages.len()
        {
            state.page_index += 1;
            return Ok(());
        }
        if let Some(id) = state.expedient_id() {
            if self.count_in(&state, selector) > 0 {
                if selector == portal.sign_clave_selector {
                    return Self::sign_click(&mut state, &id, true);
                }
                if selector == portal.submit_selector {
                    return Self::sign_click(&mut state, &id, false);
                }
            }
        }
        Err(BrowserError::ElementNotFound {
            selector: selector.to_string(),
        })
    }

    async fn click_with_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        self.open_link(selector, text, |id| id.contains(text))
    }

    async fn click_exact_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        self.open_link(selector, text, |id| id == text.trim())
    }

    async fn table_rows(&self, row_selector: &str) -> BrowserResult<Vec<Vec<String>>> {
        let state = self.state();
        if state.view != View::Listing
            || state.prompt.is_some()
            || row_selector != self.config.portal.row_selector()
        {
            return Ok(Vec::new());
        }
        Ok(state
            .pages
            .get(state.page_index)
            .map(|rows| {
                rows.iter()
                    .map(|r| {
                        vec![
                            r.id.clone(),
                            "ACME SOLUCIONES SL".to_string(),
                            "Justificación".to_string(),
                            r.status.clone(),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn click_row(&self, row_selector: &str, _index: usize) -> BrowserResult<()> {
        Err(BrowserError::ElementNotFound {
            selector: row_selector.to_string(),
        })
    }

    async fn contains_text(&self, text: &str) -> BrowserResult<bool> {
        let state = self.state();
        Ok(state.prompt.is_some() && text == self.config.gateway.marker_text)
    }

    async fn press_enter(&self) -> BrowserResult<()> {
        Ok(())
    }

    async fn go_back(&self) -> BrowserResult<()> {
        let mut state = self.state();
        state.clicks.push("back".to_string());
        if state.back() {
            Ok(())
        } else {
            Err(BrowserError::Navigation("no history".to_string()))
        }
    }

    async fn reload(&self) -> BrowserResult<()> {
        let mut state = self.state();
        state.clicks.push("reload".to_string());
        state.prompt = None;
        state.page_index = 0;
        Ok(())
    }
}

/// Answers whatever prompt the fake portal shows, when it can be answered.
pub struct ScriptedStrategy {
    portal: FakePortal,
}

#[async_trait]
impl DialogStrategy for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::InPageWidget
    }

    async fn attempt(
        &self,
        _page: &dyn PortalPage,
        _filter: &SelectionFilter,
        _timeout: Duration,
        _pacing: Pacing,
    ) -> StrategyOutcome {
        let mut state = self.portal.state();
        state.strategy_attempts += 1;
        let found = state.prompt.is_some();
        let selected = state.resolve_prompt();
        StrategyOutcome { found, selected }
    }
}

/// Resolver whose only strategy is [`ScriptedStrategy`].
pub fn scripted_resolver(portal: &FakePortal) -> DialogResolver {
    let config = portal.config();
    let strategies: Vec<Box<dyn DialogStrategy>> = vec![Box::new(ScriptedStrategy {
        portal: portal.clone(),
    })];
    DialogResolver::new(
        GatewayDetector::new(&config.gateway),
        strategies,
        config.retries.dialog_rounds,
        config.timeouts.dialog_attempt,
    )
}

/// Launcher handing out sessions over a shared fake portal.
pub struct FakeLauncher {
    pub portal: FakePortal,
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(
        &self,
        filter: SelectionFilter,
        speed: Speed,
        _headless: bool,
    ) -> Result<SessionHandle, SignerError> {
        Ok(SessionHandle::from_page(
            Arc::new(self.portal.clone()),
            filter,
            speed,
            self.portal.config_arc(),
            scripted_resolver(&self.portal),
        ))
    }
}

pub fn test_certificate() -> Certificate {
    Certificate {
        subject_common_name: "GARCIA LOPEZ ANA - 12345678Z".to_string(),
        issuer_common_name: "AC FNMT Usuarios".to_string(),
        serial_number: SERIAL.to_string(),
        thumbprint: THUMBPRINT.to_string(),
        expiry: Utc::now() + chrono::Duration::days(365),
    }
}

pub fn test_log() -> (JobLog, broadcast::Receiver<JobEvent>) {
    let (events, receiver) = broadcast::channel(JOB_EVENT_CAPACITY);
    (JobLog::new(JobId::new(), events), receiver)
}

/// Drains the log messages published so far.
pub fn messages(receiver: &mut broadcast::Receiver<JobEvent>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let JobEvent::Log { message, .. } = event {
            out.push(message);
        }
    }
    out
}
