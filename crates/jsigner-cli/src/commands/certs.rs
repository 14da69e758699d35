//! `jsigner certs`: certificate listing.

use anyhow::{Context, Result};
use jsigner_core::{Certificate, CertificateStore, PowerShellStore, SignerConfig};

/// Lists the valid certificates, soonest expiry last.
pub async fn list(config: &SignerConfig, json: bool) -> Result<()> {
    let store = PowerShellStore::new(&config.certificates);
    let certs = store
        .list_certificates()
        .await
        .context("failed to read the personal certificate store")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&certs)?);
        return Ok(());
    }

    if certs.is_empty() {
        println!("No valid certificates found.");
        return Ok(());
    }
    for cert in &certs {
        print_row(cert);
    }
    Ok(())
}

fn print_row(cert: &Certificate) {
    println!(
        "{:<42} {:<28} {}  {}",
        cert.subject_common_name,
        cert.issuer_common_name,
        cert.expiry.format("%Y-%m-%d"),
        cert.thumbprint
    );
}
