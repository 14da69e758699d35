//! Native OS certificate dialog, driven through UI Automation.
//!
//! Chrome on Windows shows the client-certificate prompt as a top-level
//! "Select a certificate" window. [`pick_certificate`] finds that window,
//! selects the row showing the filter's certificate and confirms it. The
//! call blocks; async callers run it on the blocking pool.
//!
//! On other platforms there is no native dialog to drive and the call
//! reports "not found".

use std::time::Duration;

use thiserror::Error;

use super::StrategyOutcome;
use crate::certs::SelectionFilter;

/// Errors raised while driving the native dialog.
#[derive(Debug, Error)]
pub enum NativeDialogError {
    /// The UI Automation runtime could not be initialised.
    #[error("ui automation unavailable: {0}")]
    Unavailable(String),

    /// A UI Automation call failed after the dialog was found.
    #[error("ui automation failed: {0}")]
    Automation(String),
}

/// Finds the native certificate dialog within `timeout`, selects the row
/// matching `filter`, and confirms it.
///
/// Returns `found = false` when no dialog appeared or no row matched.
///
/// # Errors
///
/// Returns `NativeDialogError` if UI Automation is unusable or fails while
/// clicking.
pub fn pick_certificate(
    filter: &SelectionFilter,
    timeout: Duration,
) -> Result<StrategyOutcome, NativeDialogError> {
    imp::pick_certificate(filter, timeout)
}

#[cfg(windows)]
mod imp {
    use std::sync::LazyLock;
    use std::time::Duration;

    use regex::Regex;
    use tracing::{debug, info};
    use uiautomation::controls::ControlType;
    use uiautomation::{UIAutomation, UIElement};

    use super::NativeDialogError;
    use crate::certs::SelectionFilter;
    use crate::dialog::StrategyOutcome;
    use crate::dialog::matching::pick_row;

    static DIALOG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)seleccionar.*certificado|select.*certificate")
            .expect("dialog title regex is valid")
    });

    static ACCEPT_LABEL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^(aceptar|accept|ok)$").expect("accept regex is valid"));

    fn automation_err(e: uiautomation::Error) -> NativeDialogError {
        NativeDialogError::Automation(e.to_string())
    }

    pub(super) fn pick_certificate(
        filter: &SelectionFilter,
        timeout: Duration,
    ) -> Result<StrategyOutcome, NativeDialogError> {
        let automation =
            UIAutomation::new().map_err(|e| NativeDialogError::Unavailable(e.to_string()))?;
        let root = automation.get_root_element().map_err(automation_err)?;

        let wait_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let Ok(dialog) = automation
            .create_matcher()
            .from(root)
            .control_type(ControlType::Window)
            .filter_fn(Box::new(|e: &UIElement| {
                Ok(DIALOG_TITLE.is_match(&e.get_name()?))
            }))
            .timeout(wait_ms)
            .find_first()
        else {
            debug!("no native certificate dialog");
            return Ok(StrategyOutcome::default());
        };
        let _ = dialog.set_focus();

        let rows = dialog_rows(&automation, &dialog);
        let texts: Vec<String> = rows
            .iter()
            .map(|row| row_text(&automation, row))
            .collect();
        let Some((index, matched)) = pick_row(filter, &texts) else {
            debug!(rows = texts.len(), "no dialog row matches the certificate");
            return Ok(StrategyOutcome::default());
        };

        info!(row = index, ?matched, "selecting certificate in native dialog");
        rows[index].click().map_err(automation_err)?;
        std::thread::sleep(Duration::from_millis(300));
        confirm(&automation, &dialog)?;

        Ok(StrategyOutcome {
            found: true,
            selected: true,
        })
    }

    fn dialog_rows(automation: &UIAutomation, dialog: &UIElement) -> Vec<UIElement> {
        for control_type in [ControlType::DataItem, ControlType::ListItem] {
            if let Ok(rows) = automation
                .create_matcher()
                .from(dialog.clone())
                .control_type(control_type)
                .timeout(0)
                .find_all()
            {
                if !rows.is_empty() {
                    return rows;
                }
            }
        }
        Vec::new()
    }

    fn row_text(automation: &UIAutomation, row: &UIElement) -> String {
        let mut parts = vec![row.get_name().unwrap_or_default()];
        if let Ok(cells) = automation
            .create_matcher()
            .from(row.clone())
            .control_type(ControlType::Text)
            .timeout(0)
            .find_all()
        {
            parts.extend(cells.iter().filter_map(|cell| cell.get_name().ok()));
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }

    fn confirm(automation: &UIAutomation, dialog: &UIElement) -> Result<(), NativeDialogError> {
        let button = automation
            .create_matcher()
            .from(dialog.clone())
            .control_type(ControlType::Button)
            .filter_fn(Box::new(|e: &UIElement| {
                Ok(ACCEPT_LABEL.is_match(e.get_name()?.trim()))
            }))
            .timeout(0)
            .find_first();

        match button {
            Ok(button) => button.click().map_err(automation_err),
            Err(_) => {
                let _ = dialog.set_focus();
                dialog.send_keys("{enter}", 10).map_err(automation_err)
            },
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use std::time::Duration;

    use super::NativeDialogError;
    use crate::certs::SelectionFilter;
    use crate::dialog::StrategyOutcome;

    #[allow(clippy::unnecessary_wraps)]
    pub(super) fn pick_certificate(
        _filter: &SelectionFilter,
        _timeout: Duration,
    ) -> Result<StrategyOutcome, NativeDialogError> {
        Ok(StrategyOutcome::default())
    }
}
