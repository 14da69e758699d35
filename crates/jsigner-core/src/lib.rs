#![allow(clippy::doc_markdown)]

//! jsigner-core - expedient signing engine
//!
//! This library drives a browser session against the administrative portal,
//! walks the expedient listing, and signs every pending expedient while
//! resolving the certificate-selection prompt on whichever surface it
//! appears (browser auto-selection, native OS dialog, or in-page widget).
//!
//! # Runtime Requirements
//!
//! All page interaction is async and expects a tokio runtime. A job holds a
//! single page and performs one logical action at a time; concurrency comes
//! from running several jobs, each with its own browser.
//!
//! # Modules
//!
//! - [`certs`]: Certificate Directory over the OS personal store
//! - [`config`]: TOML configuration (portal selectors, gateway, timeouts)
//! - [`pacing`]: speed presets and bounded polling
//! - [`browser`]: the [`browser::PortalPage`] seam and its `chromiumoxide`
//!   backend
//! - [`dialog`]: Dialog Resolver and its surface strategies
//! - [`spinner`]: Spinner Guard
//! - [`listing`]: Listing Walker
//! - [`orchestrator`]: per-expedient signing state machine
//! - [`session`]: Session Driver (launch + authentication)
//! - [`job`]: Job Controller and job event stream

pub mod browser;
pub mod certs;
pub mod config;
pub mod dialog;
pub mod error;
pub mod job;
pub mod listing;
pub mod orchestrator;
pub mod pacing;
pub mod session;
pub mod spinner;

#[cfg(test)]
pub(crate) mod testing;

pub use certs::{Certificate, CertificateStore, PowerShellStore, SelectionFilter};
pub use config::SignerConfig;
pub use error::{BrowserError, SignerError};
pub use job::{JobController, JobEvent, JobId, JobRequest, JobStatus};
pub use orchestrator::RunSummary;
pub use pacing::{Pacing, Speed};
pub use session::{Category, SessionDriver, SessionHandle};
