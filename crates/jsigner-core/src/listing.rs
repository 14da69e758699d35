//! Listing Walker.
//!
//! Walks the paginated expedient table and yields the rows pending
//! submission, top to bottom, page after page. The table is re-read on
//! every call: signing an expedient changes its row, and returning to the
//! listing reloads it.
//!
//! The walker remembers every id it has yielded during the run. A row that
//! stays pending after a failed attempt is therefore skipped on later scans
//! instead of being retried forever.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::browser::PortalPage;
use crate::config::PortalConfig;
use crate::error::{BrowserError, SignerError};
use crate::job::JobLog;
use crate::pacing::{Pacing, poll_until};
use crate::spinner::SpinnerGuard;

/// Submission status of a listing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpedientStatus {
    /// Waiting to be signed and submitted.
    PendingSubmission,
    /// Already submitted.
    Submitted,
    /// Any other state.
    Other,
}

impl ExpedientStatus {
    /// Classifies the status cell text using the configured markers.
    #[must_use]
    pub fn classify(text: &str, portal: &PortalConfig) -> Self {
        if text.contains(&portal.pending_marker) {
            Self::PendingSubmission
        } else if text.contains(&portal.submitted_marker) {
            Self::Submitted
        } else {
            Self::Other
        }
    }
}

/// A row of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expedient {
    /// Expedient code, as shown in the row link.
    pub id: String,
    /// Row status.
    pub status: ExpedientStatus,
    /// Zero-based listing page the row was found on.
    pub page_index: u32,
}

/// Lazy, restartable walk over the listing.
#[derive(Debug, Clone)]
pub struct ListingWalker {
    portal: PortalConfig,
    load_timeout: Duration,
    yielded: HashSet<String>,
    page_index: u32,
}

impl ListingWalker {
    /// Creates a walker positioned on the first page.
    #[must_use]
    pub fn new(portal: &PortalConfig, load_timeout: Duration) -> Self {
        Self {
            portal: portal.clone(),
            load_timeout,
            yielded: HashSet::new(),
            page_index: 0,
        }
    }

    /// Returns the page the walker believes is shown.
    #[must_use]
    pub const fn page_index(&self) -> u32 {
        self.page_index
    }

    /// Returns `true` if `id` was already yielded in this run.
    #[must_use]
    pub fn was_yielded(&self, id: &str) -> bool {
        self.yielded.contains(id)
    }

    /// Restarts from the first page after the listing was reloaded.
    /// Yielded ids are kept.
    pub fn restart(&mut self) {
        self.page_index = 0;
    }

    /// Reads and classifies the rows of the page currently shown.
    ///
    /// Rows without an id are skipped.
    ///
    /// # Errors
    ///
    /// Propagates page failures as `SignerError::NavigationTransient`.
    pub async fn scan(&self, page: &dyn PortalPage) -> Result<Vec<Expedient>, SignerError> {
        let rows = page.table_rows(&self.portal.row_selector()).await?;
        Ok(rows
            .iter()
            .filter_map(|cells| {
                let id = cells.get(self.portal.id_column)?.trim();
                if id.is_empty() {
                    return None;
                }
                let status = cells
                    .get(self.portal.status_column)
                    .map_or(ExpedientStatus::Other, |text| {
                        ExpedientStatus::classify(text, &self.portal)
                    });
                Some(Expedient {
                    id: id.to_string(),
                    status,
                    page_index: self.page_index,
                })
            })
            .collect())
    }

    /// Returns the next pending expedient not yielded before, advancing
    /// pagination as needed. `None` means the listing is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::NavigationTransient` if the table does not load
    /// or the page cannot be read.
    pub async fn next_pending(
        &mut self,
        page: &dyn PortalPage,
        spinner: &SpinnerGuard,
        pacing: Pacing,
        log: &JobLog,
    ) -> Result<Option<Expedient>, SignerError> {
        loop {
            self.wait_for_table(page, pacing).await?;

            let rows = self.scan(page).await?;
            let pending = rows.into_iter().find(|e| {
                e.status == ExpedientStatus::PendingSubmission && !self.yielded.contains(&e.id)
            });
            if let Some(expedient) = pending {
                self.yielded.insert(expedient.id.clone());
                return Ok(Some(expedient));
            }

            if self.page_index + 1 >= self.portal.max_pages {
                log.warn(format!(
                    "stopping after {} listing pages",
                    self.portal.max_pages
                ));
                return Ok(None);
            }
            if !self.has_next_page(page).await? {
                debug!(page = self.page_index, "last listing page reached");
                return Ok(None);
            }

            self.advance(page, spinner, pacing, log).await?;
        }
    }

    /// Pages forward from a freshly loaded listing until `page_index` is
    /// shown, so an expedient found on a later page can be opened again.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::NavigationTransient` if the table does not load
    /// or the listing ends before `page_index`.
    pub async fn seek(
        &mut self,
        page: &dyn PortalPage,
        page_index: u32,
        spinner: &SpinnerGuard,
        pacing: Pacing,
        log: &JobLog,
    ) -> Result<(), SignerError> {
        while self.page_index < page_index {
            self.wait_for_table(page, pacing).await?;
            if !self.has_next_page(page).await? {
                return Err(SignerError::NavigationTransient(
                    BrowserError::ElementNotFound {
                        selector: self.portal.next_page_selector.clone(),
                    },
                ));
            }
            self.advance(page, spinner, pacing, log).await?;
        }
        self.wait_for_table(page, pacing).await
    }

    async fn advance(
        &mut self,
        page: &dyn PortalPage,
        spinner: &SpinnerGuard,
        pacing: Pacing,
        log: &JobLog,
    ) -> Result<(), SignerError> {
        spinner.before_click(page, pacing, log).await;
        page.click(&self.portal.next_page_selector).await?;
        self.page_index += 1;
        log.info(format!("moving to listing page {}", self.page_index + 1));
        pacing.pause(0.8).await;
        Ok(())
    }

    async fn wait_for_table(&self, page: &dyn PortalPage, pacing: Pacing) -> Result<(), SignerError> {
        let table = self.portal.table_selector.as_str();
        let loaded = poll_until(pacing.scale(self.load_timeout), pacing.delay(0.5), || async move {
            page.count(table).await.is_ok_and(|n| n > 0)
        })
        .await;
        if loaded {
            Ok(())
        } else {
            Err(SignerError::NavigationTransient(
                BrowserError::ElementNotFound {
                    selector: self.portal.table_selector.clone(),
                },
            ))
        }
    }

    /// The next control is usable when present and its class does not
    /// contain `disabled`.
    async fn has_next_page(&self, page: &dyn PortalPage) -> Result<bool, SignerError> {
        let class = page
            .attribute(&self.portal.next_page_selector, "class")
            .await?;
        Ok(class.is_some_and(|c| !c.contains("disabled")))
    }
}
