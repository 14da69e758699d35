//! Browser seam.
//!
//! Every component talks to the portal through [`PortalPage`], a small set
//! of DOM-level operations. The production implementation is
//! [`chromium::ChromiumPage`]; tests drive the same components against a
//! scripted in-memory page.
//!
//! All operations are single-shot: waiting and retrying are the caller's
//! business, using [`crate::pacing::poll_until`].

use async_trait::async_trait;

use crate::error::BrowserResult;

pub mod chromium;
pub mod policy;

pub use chromium::{ChromiumBrowser, ChromiumPage};
pub use policy::{AutoSelectRule, auto_select_policy};

/// DOM-level operations on the single page owned by a job.
#[async_trait]
pub trait PortalPage: Send + Sync {
    /// Navigates to `url` and waits for the load to finish.
    async fn goto(&self, url: &str) -> BrowserResult<()>;

    /// Returns the current URL.
    async fn current_url(&self) -> BrowserResult<String>;

    /// Counts elements matching `selector`.
    async fn count(&self, selector: &str) -> BrowserResult<usize>;

    /// Returns `true` if any element matching `selector` is rendered and
    /// visible.
    async fn is_visible(&self, selector: &str) -> BrowserResult<bool>;

    /// Returns `true` if the first element matching `selector` is disabled.
    /// A missing element counts as disabled.
    async fn is_disabled(&self, selector: &str) -> BrowserResult<bool>;

    /// Reads an attribute of the first element matching `selector`.
    async fn attribute(&self, selector: &str, name: &str) -> BrowserResult<Option<String>>;

    /// Clicks the first element matching `selector`.
    async fn click(&self, selector: &str) -> BrowserResult<()>;

    /// Clicks the first element matching `selector` whose text contains
    /// `text`.
    async fn click_with_text(&self, selector: &str, text: &str) -> BrowserResult<()>;

    /// Clicks the first element matching `selector` whose trimmed text is
    /// exactly `text`. Used for expedient links, where `KD-1` must not open
    /// `KD-10`.
    async fn click_exact_text(&self, selector: &str, text: &str) -> BrowserResult<()>;

    /// Returns the cell texts of every row matching `row_selector`, in
    /// document order.
    async fn table_rows(&self, row_selector: &str) -> BrowserResult<Vec<Vec<String>>>;

    /// Clicks the `index`-th row matching `row_selector`.
    async fn click_row(&self, row_selector: &str, index: usize) -> BrowserResult<()>;

    /// Returns `true` if `text` is visible anywhere on the page.
    async fn contains_text(&self, text: &str) -> BrowserResult<bool>;

    /// Presses Enter on the focused element.
    async fn press_enter(&self) -> BrowserResult<()>;

    /// Navigates back in history.
    async fn go_back(&self) -> BrowserResult<()>;

    /// Reloads the current page.
    async fn reload(&self) -> BrowserResult<()>;
}

/// Returns the host part of `url`, without credentials or port.
#[must_use]
pub fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host_port.split(':').next()?;
    (!host.is_empty()).then_some(host)
}
