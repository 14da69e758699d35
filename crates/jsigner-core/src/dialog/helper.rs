//! Out-of-process dialog helper.
//!
//! The helper (`jsigner-clicker`) drives the native certificate dialog in
//! its own process so that a wedged UI Automation call can be killed
//! without taking the job down. Protocol:
//!
//! - arguments: `--serial <hex> --cn <subject> --issuer-cn <issuer> --timeout <secs>`
//! - stdout: one JSON line `{"found": bool, "selected": bool}`
//! - exit status: [`EXIT_SELECTED`], [`EXIT_NOT_FOUND`] or [`EXIT_ERROR`]
//!
//! The caller allows the helper `timeout + 1s` and kills it after that.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::StrategyOutcome;
use crate::certs::SelectionFilter;
use crate::config::HelperConfig;

/// Exit status when a certificate was selected and confirmed.
pub const EXIT_SELECTED: i32 = 0;

/// Exit status when no dialog appeared or no row matched.
pub const EXIT_NOT_FOUND: i32 = 1;

/// Exit status on any other failure.
pub const EXIT_ERROR: i32 = 2;

/// Extra time granted to the helper beyond its own timeout.
const HELPER_GRACE: Duration = Duration::from_secs(1);

/// File name of the helper binary.
#[cfg(windows)]
pub const HELPER_BINARY: &str = "jsigner-clicker.exe";

/// File name of the helper binary.
#[cfg(not(windows))]
pub const HELPER_BINARY: &str = "jsigner-clicker";

/// Handle to the helper executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogHelper {
    path: PathBuf,
}

impl DialogHelper {
    /// Creates a helper handle for an explicit executable.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Locates the helper from configuration: the configured path, or
    /// [`HELPER_BINARY`] next to the running executable.
    ///
    /// Returns `None` when the helper is disabled or cannot be found.
    #[must_use]
    pub fn locate(config: &HelperConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        if let Some(path) = &config.path {
            return Some(Self::new(path));
        }
        let exe = std::env::current_exe().ok()?;
        let candidate = exe.parent()?.join(HELPER_BINARY);
        candidate.is_file().then(|| Self::new(candidate))
    }

    /// Returns the helper executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Builds the helper argument list.
    #[must_use]
    pub fn args(filter: &SelectionFilter, timeout: Duration) -> Vec<String> {
        vec![
            "--serial".to_string(),
            filter.serial.clone().unwrap_or_default(),
            "--cn".to_string(),
            filter.subject_cn.clone(),
            "--issuer-cn".to_string(),
            filter.issuer_cn.clone(),
            "--timeout".to_string(),
            format!("{:.3}", timeout.as_secs_f64()),
        ]
    }

    /// Runs the helper once.
    ///
    /// Failures to spawn, a helper that overruns `timeout + 1s`, and
    /// unreadable output all count as "not found".
    pub async fn run(&self, filter: &SelectionFilter, timeout: Duration) -> StrategyOutcome {
        let mut cmd = Command::new(&self.path);
        cmd.args(Self::args(filter, timeout))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout + HELPER_GRACE, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(helper = %self.path.display(), error = %e, "failed to run dialog helper");
                return StrategyOutcome::default();
            },
            Err(_) => {
                debug!(helper = %self.path.display(), "dialog helper overran its timeout");
                return StrategyOutcome::default();
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = parse_report(&stdout, output.status.code());
        debug!(
            code = ?output.status.code(),
            found = outcome.found,
            selected = outcome.selected,
            "dialog helper finished"
        );
        outcome
    }
}

/// Reads the helper's JSON report, falling back to its exit status when
/// no report line was printed.
#[must_use]
pub fn parse_report(stdout: &str, exit_code: Option<i32>) -> StrategyOutcome {
    let report = stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<StrategyOutcome>(line).ok());

    if let Some(report) = report {
        return report;
    }
    match exit_code {
        Some(EXIT_SELECTED) => StrategyOutcome {
            found: true,
            selected: true,
        },
        _ => StrategyOutcome::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_layout() {
        let filter = SelectionFilter::new("ANA", "AC FNMT Usuarios").with_serial("2DBB");
        let args = DialogHelper::args(&filter, Duration::from_millis(2500));
        assert_eq!(
            args,
            vec![
                "--serial",
                "2DBB",
                "--cn",
                "ANA",
                "--issuer-cn",
                "AC FNMT Usuarios",
                "--timeout",
                "2.500"
            ]
        );
    }

    #[test]
    fn test_parse_report_prefers_json() {
        let out = "scanning rows\n{\"found\":true,\"selected\":false}\n";
        let outcome = parse_report(out, Some(EXIT_SELECTED));
        assert!(outcome.found);
        assert!(!outcome.selected);
    }

    #[test]
    fn test_parse_report_falls_back_to_exit_code() {
        assert!(parse_report("", Some(EXIT_SELECTED)).selected);
        assert!(!parse_report("garbage", Some(EXIT_NOT_FOUND)).found);
        assert!(!parse_report("", Some(EXIT_ERROR)).found);
        assert!(!parse_report("", None).found);
    }

    #[test]
    fn test_locate_disabled() {
        let config = HelperConfig {
            enabled: false,
            path: Some(PathBuf::from("/bin/true")),
        };
        assert!(DialogHelper::locate(&config).is_none());
    }

    #[test]
    fn test_locate_explicit_path() {
        let config = HelperConfig {
            enabled: true,
            path: Some(PathBuf::from("/opt/jsigner/clicker")),
        };
        let helper = DialogHelper::locate(&config).unwrap();
        assert_eq!(helper.path(), Path::new("/opt/jsigner/clicker"));
    }

    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_missing_helper_is_not_found() {
        let helper = DialogHelper::new("nonexistent_helper_12345");
        let outcome = helper
            .run(&SelectionFilter::new("ANA", "CA"), Duration::from_millis(100))
            .await;
        assert_eq!(outcome, StrategyOutcome::default());
    }

    #[cfg(unix)]
    #[cfg_attr(miri, ignore)] // Miri can't spawn processes
    #[tokio::test]
    async fn test_helper_report_is_read() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("clicker.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"found\":true,\"selected\":true}'\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let outcome = DialogHelper::new(&script)
            .run(&SelectionFilter::new("ANA", "CA"), Duration::from_secs(2))
            .await;
        assert!(outcome.found);
        assert!(outcome.selected);
    }
}
