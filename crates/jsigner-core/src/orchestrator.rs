//! Signing Orchestrator.
//!
//! Per expedient:
//!
//! ```text
//! Open -> AttemptPrimary (Cl@ve) -> Confirmed ---------------------> Success
//!               |  NeedsDialog -> Dialog Resolver -> Confirmed -----> Success
//!               |                                 -> Unresolved --+
//!               +- primary control absent ------------------------+
//!                                                                  v
//!                            AttemptFallback (AutoFirma) -> Confirmed -> Success
//!                                                        -> Unresolved -> Failed
//! ```
//!
//! A transient navigation error restarts the whole sequence once, from the
//! listing page the expedient was found on. Whatever the outcome, the page
//! is taken back to the listing before the next expedient, and failures
//! never leave this module: they are counted and logged.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::browser::PortalPage;
use crate::certs::SelectionFilter;
use crate::config::{PortalConfig, SignerConfig};
use crate::dialog::DialogResolver;
use crate::error::SignerError;
use crate::job::JobLog;
use crate::listing::{Expedient, ListingWalker};
use crate::pacing::{Pacing, poll_until};
use crate::spinner::SpinnerGuard;

/// Consecutive listing failures tolerated before the run ends.
const MAX_LISTING_FAILURES: u32 = 2;

/// How an expedient is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMethod {
    /// "Sign with Cl@ve and submit": remote signature through the gateway.
    ClaveIntegrated,
    /// "Submit": local signature through AutoFirma.
    AutoFirma,
}

/// Outcome of one signing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Signed and confirmed.
    Success,
    /// Transient failure; the sequence is repeated.
    Retry,
    /// Not signed.
    Failed,
}

/// Log record of one attempt on one expedient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningAttempt {
    /// The expedient.
    pub expedient_id: String,
    /// Last method tried, if any control was reached.
    pub method_tried: Option<SigningMethod>,
    /// Outcome.
    pub outcome: AttemptOutcome,
}

/// Counts of a run.
///
/// `attempted == signed + failed` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Expedients the orchestrator started on.
    pub attempted: u32,
    /// Expedients signed and confirmed.
    pub signed: u32,
    /// Expedients left unsigned.
    pub failed: u32,
    /// Wall time of the run.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl RunSummary {
    fn record(&mut self, outcome: AttemptOutcome) {
        self.attempted += 1;
        match outcome {
            AttemptOutcome::Success => self.signed += 1,
            AttemptOutcome::Retry | AttemptOutcome::Failed => self.failed += 1,
        }
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempted {}, signed {}, failed {} in {}",
            self.attempted,
            self.signed,
            self.failed,
            humantime::format_duration(Duration::from_secs(self.duration.as_secs()))
        )
    }
}

/// Result of the primary method when it did not confirm.
enum PrimaryStep {
    Confirmed,
    Unavailable,
    Unresolved(SignerError),
}

/// Drives the per-expedient signing sequence.
pub struct SigningOrchestrator<'a> {
    portal: PortalConfig,
    spinner: SpinnerGuard,
    resolver: &'a DialogResolver,
    filter: SelectionFilter,
    pacing: Pacing,
    confirmation: Duration,
    log: JobLog,
}

impl<'a> SigningOrchestrator<'a> {
    /// Creates an orchestrator for one session.
    #[must_use]
    pub fn new(
        config: &SignerConfig,
        resolver: &'a DialogResolver,
        filter: SelectionFilter,
        pacing: Pacing,
        log: JobLog,
    ) -> Self {
        Self {
            portal: config.portal.clone(),
            spinner: SpinnerGuard::from_config(&config.portal, &config.timeouts),
            resolver,
            filter,
            pacing,
            confirmation: config.timeouts.confirmation,
            log,
        }
    }

    /// Returns the spinner guard used before every click.
    #[must_use]
    pub const fn spinner(&self) -> &SpinnerGuard {
        &self.spinner
    }

    /// Signs every pending expedient the walker yields, checking `stop`
    /// between expedients.
    pub async fn run(
        &self,
        page: &dyn PortalPage,
        walker: &mut ListingWalker,
        stop: &watch::Receiver<bool>,
    ) -> RunSummary {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut listing_failures = 0;

        loop {
            if *stop.borrow() {
                self.log.info("stop requested; ending run");
                break;
            }

            let expedient = match walker
                .next_pending(page, &self.spinner, self.pacing, &self.log)
                .await
            {
                Ok(Some(expedient)) => expedient,
                Ok(None) => {
                    self.log.info("no more expedients pending submission");
                    break;
                },
                Err(e) => {
                    listing_failures += 1;
                    self.log.warn(format!("listing unavailable: {e}"));
                    if listing_failures >= MAX_LISTING_FAILURES {
                        break;
                    }
                    self.reload_listing(page, walker).await;
                    continue;
                },
            };
            listing_failures = 0;

            let attempt = self.sign(page, &expedient, walker).await;
            summary.record(attempt.outcome);
        }

        summary.duration = started.elapsed();
        self.log.info(format!("run finished: {summary}"));
        summary
    }

    /// Runs the signing sequence for one expedient and returns to the
    /// listing. Never fails: errors become a `Failed` attempt.
    pub async fn sign(
        &self,
        page: &dyn PortalPage,
        expedient: &Expedient,
        walker: &mut ListingWalker,
    ) -> SigningAttempt {
        self.log.info(format!("opening expedient {}", expedient.id));

        let mut method = None;
        let mut result = self.sign_once(page, expedient, &mut method).await;
        if let Err(e) = &result {
            if e.is_transient() {
                self.record(expedient, method, AttemptOutcome::Retry, Some(e));
                self.return_to_listing(page, walker).await;
                result = match walker
                    .seek(page, expedient.page_index, &self.spinner, self.pacing, &self.log)
                    .await
                {
                    Ok(()) => self.sign_once(page, expedient, &mut method).await,
                    Err(e) => Err(e),
                };
            }
        }

        let attempt = match result {
            Ok(()) => self.record(expedient, method, AttemptOutcome::Success, None),
            Err(e) => self.record(expedient, method, AttemptOutcome::Failed, Some(&e)),
        };
        self.return_to_listing(page, walker).await;
        attempt
    }

    fn record(
        &self,
        expedient: &Expedient,
        method: Option<SigningMethod>,
        outcome: AttemptOutcome,
        error: Option<&SignerError>,
    ) -> SigningAttempt {
        let attempt = SigningAttempt {
            expedient_id: expedient.id.clone(),
            method_tried: method,
            outcome,
        };
        let method = method.map_or("none", |m| match m {
            SigningMethod::ClaveIntegrated => "clave",
            SigningMethod::AutoFirma => "autofirma",
        });
        match (outcome, error) {
            (AttemptOutcome::Success, _) => self.log.info(format!(
                "expedient {} signed (method: {method})",
                expedient.id
            )),
            (_, Some(e)) => self.log.warn(format!(
                "expedient {} {} (method: {method}): {e}",
                expedient.id,
                if outcome == AttemptOutcome::Retry {
                    "retrying"
                } else {
                    "failed"
                }
            )),
            (_, None) => self.log.warn(format!("expedient {} failed", expedient.id)),
        }
        attempt
    }

    async fn sign_once(
        &self,
        page: &dyn PortalPage,
        expedient: &Expedient,
        method: &mut Option<SigningMethod>,
    ) -> Result<(), SignerError> {
        self.open(page, expedient).await?;

        *method = Some(SigningMethod::ClaveIntegrated);
        let primary_error = match self.attempt_primary(page, expedient).await? {
            PrimaryStep::Confirmed => return Ok(()),
            PrimaryStep::Unavailable => {
                debug!(expedient_id = %expedient.id, "primary signing control absent");
                None
            },
            PrimaryStep::Unresolved(e) => {
                self.log.warn(format!(
                    "expedient {}: Cl@ve signing did not complete ({e}); trying AutoFirma",
                    expedient.id
                ));
                Some(e)
            },
        };

        if page.count(&self.portal.submit_selector).await? == 0 {
            return Err(primary_error.unwrap_or_else(|| SignerError::ExpedientSignFailed {
                expedient_id: expedient.id.clone(),
                reason: "no signing control available".to_string(),
            }));
        }
        *method = Some(SigningMethod::AutoFirma);
        self.attempt_fallback(page, expedient).await
    }

    async fn open(&self, page: &dyn PortalPage, expedient: &Expedient) -> Result<(), SignerError> {
        self.spinner.before_click(page, self.pacing, &self.log).await;
        page.click_exact_text(&self.portal.link_selector(), &expedient.id)
            .await?;
        self.pacing.pause(0.8).await;
        Ok(())
    }

    async fn attempt_primary(
        &self,
        page: &dyn PortalPage,
        expedient: &Expedient,
    ) -> Result<PrimaryStep, SignerError> {
        let control = self.portal.sign_clave_selector.as_str();
        if page.count(control).await? == 0 {
            return Ok(PrimaryStep::Unavailable);
        }

        self.spinner.before_click(page, self.pacing, &self.log).await;
        page.click(control).await?;
        self.pacing.pause(1.0).await;

        match self.resolver.resolve(page, &self.filter, self.pacing).await {
            Ok(event) => {
                if let Some(strategy) = event.strategy_used {
                    self.log
                        .info(format!("certificate prompt answered via {strategy}"));
                }
            },
            Err(e @ SignerError::CertificateDialogUnresolved { .. }) => {
                return Ok(PrimaryStep::Unresolved(e));
            },
            Err(e) => return Err(e),
        }

        let controls = [control, self.portal.submit_selector.as_str()];
        if self.confirm(page, &controls).await {
            Ok(PrimaryStep::Confirmed)
        } else {
            Ok(PrimaryStep::Unresolved(SignerError::ExpedientSignFailed {
                expedient_id: expedient.id.clone(),
                reason: "Cl@ve signing not confirmed".to_string(),
            }))
        }
    }

    async fn attempt_fallback(
        &self,
        page: &dyn PortalPage,
        expedient: &Expedient,
    ) -> Result<(), SignerError> {
        let control = self.portal.submit_selector.as_str();
        self.spinner.before_click(page, self.pacing, &self.log).await;
        page.click(control).await?;
        self.pacing.pause(1.0).await;

        let event = self.resolver.resolve(page, &self.filter, self.pacing).await?;
        if let Some(strategy) = event.strategy_used {
            self.log
                .info(format!("certificate prompt answered via {strategy}"));
        }

        if self.confirm(page, &[control]).await {
            Ok(())
        } else {
            Err(SignerError::ExpedientSignFailed {
                expedient_id: expedient.id.clone(),
                reason: "submission not confirmed".to_string(),
            })
        }
    }

    /// Waits until every control is gone or disabled.
    async fn confirm(&self, page: &dyn PortalPage, controls: &[&str]) -> bool {
        poll_until(
            self.pacing.scale(self.confirmation),
            self.pacing.delay(0.8),
            || async move {
                for control in controls {
                    let gone = page.count(control).await.is_ok_and(|n| n == 0);
                    if !gone && !page.is_disabled(control).await.unwrap_or(false) {
                        return false;
                    }
                }
                true
            },
        )
        .await
    }

    /// History back from an expedient, or reload when the listing is
    /// still shown or going back fails. The walker restarts on the first
    /// page either way.
    async fn return_to_listing(&self, page: &dyn PortalPage, walker: &mut ListingWalker) {
        let on_listing = page
            .count(&self.portal.table_selector)
            .await
            .is_ok_and(|n| n > 0);
        if on_listing {
            self.reload_listing(page, walker).await;
            return;
        }
        if let Err(e) = page.go_back().await {
            debug!(error = %e, "history back failed; reloading");
            self.reload_listing(page, walker).await;
            return;
        }
        self.pacing.pause(0.8).await;
        walker.restart();
    }

    async fn reload_listing(&self, page: &dyn PortalPage, walker: &mut ListingWalker) {
        if let Err(e) = page.reload().await {
            self.log.warn(format!("could not reload the listing: {e}"));
        }
        self.pacing.pause(0.8).await;
        walker.restart();
    }
}
