//! `jsigner policy`: auto-selection policy preview.

use anyhow::{Context, Result};
use jsigner_core::browser::auto_select_policy;
use jsigner_core::certs::find_by_thumbprint;
use jsigner_core::{PowerShellStore, SignerConfig};

/// Prints the policy the browser would be launched with.
pub async fn print(config: &SignerConfig, thumbprint: &str) -> Result<()> {
    let store = PowerShellStore::new(&config.certificates);
    let cert = find_by_thumbprint(&store, thumbprint)
        .await
        .with_context(|| format!("cannot resolve certificate {thumbprint}"))?;

    let policy = auto_select_policy(&config.gateway.auto_select_patterns, &cert.selection_filter());
    let pretty: serde_json::Value =
        serde_json::from_str(&policy).context("policy is not valid JSON")?;
    println!("{}", serde_json::to_string_pretty(&pretty)?);
    Ok(())
}
