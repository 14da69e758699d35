//! `chromiumoxide` implementation of [`PortalPage`].
//!
//! Queries are evaluated as small page scripts returning JSON; clicks go
//! through real DevTools mouse events so the portal's handlers fire the same
//! way they do for a user.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::{Handler, Page};
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::PortalPage;
use crate::config::BrowserSettings;
use crate::error::{BrowserError, BrowserResult, SignerError};

/// A launched browser process and its DevTools event pump.
pub struct ChromiumBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

impl ChromiumBrowser {
    /// Launch a browser with the certificate auto-selection policy applied
    /// and open the single working page.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::Browser` if the browser cannot be configured,
    /// launched, or the page cannot be opened.
    pub async fn launch(
        settings: &BrowserSettings,
        auto_select_policy: &str,
        headless: bool,
        navigation_timeout: Duration,
    ) -> Result<(Self, ChromiumPage), SignerError> {
        let mut builder = BrowserConfig::builder()
            .window_size(settings.window_width, settings.window_height)
            .arg(format!(
                "--auto-select-certificate-for-urls={auto_select_policy}"
            ));
        if !headless {
            builder = builder.with_head();
        }
        if settings.ignore_https_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }
        if let Some(executable) = &settings.executable {
            builder = builder.chrome_executable(executable);
        }
        let config = builder.build().map_err(SignerError::Browser)?;

        info!(headless, "launching browser");
        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| SignerError::Browser(format!("failed to launch browser: {e}")))?;

        let closed = Arc::new(AtomicBool::new(false));
        let handler_task = spawn_handler_task(handler, Arc::clone(&closed));

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SignerError::Browser(format!("failed to open page: {e}")))?;

        Ok((
            Self {
                browser,
                handler_task,
                closed: Arc::clone(&closed),
            },
            ChromiumPage {
                page,
                navigation_timeout,
                closed,
            },
        ))
    }

    /// Returns `true` once the DevTools connection has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the browser and stop the event pump. Errors are logged, not
    /// returned: the process is going away either way.
    pub async fn close(&mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(error = %e, "browser close request failed");
        }
        if let Err(e) = self.browser.wait().await {
            debug!(error = %e, "waiting for browser exit failed");
        }
        self.handler_task.abort();
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn spawn_handler_task(mut handler: Handler, closed: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("devtools handler event error: {e}");
            }
        }
        closed.store(true, Ordering::SeqCst);
    })
}

/// The job's working page.
#[derive(Clone)]
pub struct ChromiumPage {
    page: Page,
    navigation_timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl ChromiumPage {
    fn ensure_open(&self) -> BrowserResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::Closed);
        }
        Ok(())
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> BrowserResult<T> {
        self.ensure_open()?;
        let result = self.page.evaluate(script).await.map_err(protocol)?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn wait_navigation(&self) -> BrowserResult<()> {
        match tokio::time::timeout(self.navigation_timeout, self.page.wait_for_navigation()).await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::Navigation(format!(
                "no navigation within {:?}",
                self.navigation_timeout
            ))),
        }
    }
}

impl ChromiumPage {
    async fn click_first(
        &self,
        selector: &str,
        text: &str,
        matches: impl Fn(&str) -> bool + Send,
    ) -> BrowserResult<()> {
        self.ensure_open()?;
        let elements = self.page.find_elements(selector).await.unwrap_or_default();
        for element in elements {
            let inner = element.inner_text().await.ok().flatten().unwrap_or_default();
            if matches(&inner) {
                element.click().await.map_err(protocol)?;
                return Ok(());
            }
        }
        Err(BrowserError::TextNotFound {
            selector: selector.to_string(),
            text: text.to_string(),
        })
    }
}

/// Whole-text comparison, ignoring surrounding whitespace.
fn exact_text_matches(inner: &str, text: &str) -> bool {
    inner.trim() == text.trim()
}

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

/// Encodes `value` as a JavaScript string literal.
fn js_str(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

#[derive(Deserialize)]
struct Wrapped<T> {
    value: T,
}

#[async_trait]
impl PortalPage for ChromiumPage {
    async fn goto(&self, url: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        match tokio::time::timeout(self.navigation_timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::Navigation(format!(
                "{url} did not load within {:?}",
                self.navigation_timeout
            ))),
        }
    }

    async fn current_url(&self) -> BrowserResult<String> {
        self.ensure_open()?;
        Ok(self.page.url().await.map_err(protocol)?.unwrap_or_default())
    }

    async fn count(&self, selector: &str) -> BrowserResult<usize> {
        self.eval(format!(
            "document.querySelectorAll({}).length",
            js_str(selector)
        ))
        .await
    }

    async fn is_visible(&self, selector: &str) -> BrowserResult<bool> {
        self.eval(format!(
            r"(() => {{
                for (const el of document.querySelectorAll({sel})) {{
                    const style = window.getComputedStyle(el);
                    const rect = el.getBoundingClientRect();
                    if (style.display !== 'none' && style.visibility !== 'hidden'
                        && style.opacity !== '0' && (rect.width > 0 || rect.height > 0)) {{
                        return true;
                    }}
                }}
                return false;
            }})()",
            sel = js_str(selector)
        ))
        .await
    }

    async fn is_disabled(&self, selector: &str) -> BrowserResult<bool> {
        self.eval(format!(
            r"(() => {{
                const el = document.querySelector({sel});
                if (!el) return true;
                return el.disabled === true
                    || el.getAttribute('aria-disabled') === 'true'
                    || el.classList.contains('disabled');
            }})()",
            sel = js_str(selector)
        ))
        .await
    }

    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>> {
        let wrapped: Wrapped<Option<String>> = self
            .eval(format!(
                r"(() => {{
                    const el = document.querySelector({sel});
                    return {{ value: el ? el.getAttribute({name}) : null }};
                }})()",
                sel = js_str(selector),
                name = js_str(name)
            ))
            .await?;
        Ok(wrapped.value)
    }

    async fn click(&self, selector: &str) -> BrowserResult<()> {
        self.ensure_open()?;
        let element =
            self.page
                .find_element(selector)
                .await
                .map_err(|_| BrowserError::ElementNotFound {
                    selector: selector.to_string(),
                })?;
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn click_with_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        self.click_first(selector, text, |inner| inner.contains(text))
            .await
    }

    async fn click_exact_text(&self, selector: &str, text: &str) -> BrowserResult<()> {
        self.click_first(selector, text, |inner| exact_text_matches(inner, text))
            .await
    }

    async fn table_rows(&self, row_selector: &str) -> BrowserResult<Vec<Vec<String>>> {
        self.eval(format!(
            r"Array.from(document.querySelectorAll({sel})).map(
                tr => Array.from(tr.querySelectorAll('td')).map(td => (td.innerText || '').trim())
            )",
            sel = js_str(row_selector)
        ))
        .await
    }

    async fn click_row(&self, row_selector: &str, index: usize) -> BrowserResult<()> {
        self.ensure_open()?;
        let rows = self
            .page
            .find_elements(row_selector)
            .await
            .map_err(protocol)?;
        let row = rows
            .get(index)
            .ok_or_else(|| BrowserError::ElementNotFound {
                selector: format!("{row_selector} [{index}]"),
            })?;
        row.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn contains_text(&self, text: &str) -> BrowserResult<bool> {
        self.eval(format!(
            "!!document.body && document.body.innerText.includes({})",
            js_str(text)
        ))
        .await
    }

    async fn press_enter(&self) -> BrowserResult<()> {
        self.ensure_open()?;
        let target = match self.page.find_element(":focus").await {
            Ok(el) => el,
            Err(_) => self
                .page
                .find_element("body")
                .await
                .map_err(|_| BrowserError::ElementNotFound {
                    selector: "body".to_string(),
                })?,
        };
        target.press_key("Enter").await.map_err(protocol)?;
        Ok(())
    }

    async fn go_back(&self) -> BrowserResult<()> {
        let _: bool = self.eval("(history.back(), true)".to_string()).await?;
        self.wait_navigation().await
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.ensure_open()?;
        match tokio::time::timeout(self.navigation_timeout, self.page.reload()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::Navigation(format!(
                "reload did not finish within {:?}",
                self.navigation_timeout
            ))),
        }
    }
}
