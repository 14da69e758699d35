//! `jsigner run`: one signing job in the foreground.
//!
//! The job's log is streamed to stdout. The first Ctrl-C asks the job to
//! stop after the expedient in progress; the summary is printed when the
//! terminal event arrives.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use jsigner_core::job::JobTicket;
use jsigner_core::{
    Category, JobController, JobEvent, JobRequest, PowerShellStore, SessionDriver, SignerConfig,
    Speed,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Starts the job and follows it to its terminal event.
pub async fn run(
    config: SignerConfig,
    thumbprint: String,
    category: Category,
    speed: Speed,
    headless: bool,
) -> Result<()> {
    let config = Arc::new(config);
    let controller = JobController::new(
        Arc::clone(&config),
        Arc::new(PowerShellStore::new(&config.certificates)),
        Arc::new(SessionDriver::new(Arc::clone(&config))),
    );

    let JobTicket { job_id, mut events } = controller
        .start(JobRequest {
            certificate_id: thumbprint,
            category,
            speed,
            headless,
        })
        .await
        .context("failed to start the signing job")?;

    let mut stop_requested = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(JobEvent::Log { timestamp, message }) => {
                    println!("[{}] {message}", timestamp.format("%H:%M:%S"));
                },
                Ok(JobEvent::Finished { summary }) => {
                    println!("Done: {summary}");
                    return Ok(());
                },
                Ok(JobEvent::Aborted { reason, summary }) => {
                    println!("Aborted: {summary}");
                    bail!("job {job_id} aborted: {reason}");
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "log output fell behind");
                },
                Err(RecvError::Closed) => bail!("job {job_id} ended without a summary"),
            },
            signal = tokio::signal::ctrl_c(), if !stop_requested => {
                signal.context("failed to listen for Ctrl-C")?;
                stop_requested = true;
                println!("Stopping after the current expedient...");
                controller.stop(job_id).await?;
            },
        }
    }
}
