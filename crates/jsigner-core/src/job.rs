//! Job Controller.
//!
//! A job is one signing run: certificate pre-flight, browser session,
//! authentication, and the orchestrator loop. Jobs run as tokio tasks, each
//! with its own browser, pacing, stop channel and event stream. The only
//! thing they share is the tracing subscriber; every line a job logs is
//! emitted inside a `job` span carrying its id and also published to the
//! job's subscribers as a [`JobEvent`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::certs::{Certificate, CertificateStore, find_by_thumbprint};
use crate::config::SignerConfig;
use crate::error::SignerError;
use crate::listing::ListingWalker;
use crate::orchestrator::{RunSummary, SigningOrchestrator};
use crate::pacing::Speed;
use crate::session::{Category, SessionHandle, SessionLauncher};

/// Events buffered per subscriber before it starts lagging.
pub const JOB_EVENT_CAPACITY: usize = 1024;

/// Ended jobs kept queryable before the oldest is evicted.
pub const DEFAULT_RETAINED_JOBS: usize = 64;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Parameters of a signing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Thumbprint of the certificate to sign with.
    pub certificate_id: String,
    /// Listing to work through.
    pub category: Category,
    /// Delay preset.
    #[serde(default)]
    pub speed: Speed,
    /// Run the browser without a window.
    #[serde(default)]
    pub headless: bool,
}

/// Event published on a job's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// A log line.
    Log {
        /// When the line was logged.
        timestamp: DateTime<Utc>,
        /// The message.
        message: String,
    },
    /// The run completed; terminal.
    Finished {
        /// Final counts.
        summary: RunSummary,
    },
    /// The run hit a fatal error; terminal.
    Aborted {
        /// The fatal error.
        reason: String,
        /// Counts at the time of abort (zero when authentication failed).
        summary: RunSummary,
    },
}

impl JobEvent {
    /// Returns `true` for the last event of a job.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Aborted { .. })
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Still working.
    Running,
    /// Completed, possibly after a stop request.
    Finished,
    /// Ended by a fatal error.
    Aborted,
}

/// Job-scoped logger: traces the line and publishes it to subscribers.
#[derive(Debug, Clone)]
pub struct JobLog {
    job_id: JobId,
    events: broadcast::Sender<JobEvent>,
}

impl JobLog {
    /// Creates a logger publishing on `events`.
    #[must_use]
    pub const fn new(job_id: JobId, events: broadcast::Sender<JobEvent>) -> Self {
        Self { job_id, events }
    }

    /// Returns the job id.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Logs at info level.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(job_id = %self.job_id, "{message}");
        self.publish(message);
    }

    /// Logs at warn level.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(job_id = %self.job_id, "{message}");
        self.publish(message);
    }

    fn publish(&self, message: String) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent::Log {
            timestamp: Utc::now(),
            message,
        });
    }

    fn terminal(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

/// Returned by [`JobController::start`].
#[derive(Debug)]
pub struct JobTicket {
    /// The new job's id.
    pub job_id: JobId,
    /// Event stream, subscribed before the job started.
    pub events: broadcast::Receiver<JobEvent>,
}

struct JobEntry {
    status: JobStatus,
    stop: watch::Sender<bool>,
    events: broadcast::Sender<JobEvent>,
}

/// Live jobs plus a bounded history of ended ones.
struct JobRegistry {
    entries: HashMap<JobId, JobEntry>,
    ended: VecDeque<JobId>,
    retain: usize,
}

impl JobRegistry {
    fn new(retain: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ended: VecDeque::new(),
            retain,
        }
    }

    /// Records the final status and evicts the oldest ended jobs beyond
    /// the retention limit.
    fn finish(&mut self, job_id: JobId, status: JobStatus) {
        let Some(entry) = self.entries.get_mut(&job_id) else {
            return;
        };
        entry.status = status;
        self.ended.push_back(job_id);
        while self.ended.len() > self.retain {
            if let Some(evicted) = self.ended.pop_front() {
                self.entries.remove(&evicted);
                debug!(job_id = %evicted, "evicted ended job");
            }
        }
    }
}

type JobTable = Arc<RwLock<JobRegistry>>;

/// Starts, stops and tracks signing jobs.
pub struct JobController {
    config: Arc<SignerConfig>,
    store: Arc<dyn CertificateStore>,
    launcher: Arc<dyn SessionLauncher>,
    jobs: JobTable,
}

impl JobController {
    /// Creates a controller keeping the last [`DEFAULT_RETAINED_JOBS`]
    /// ended jobs.
    #[must_use]
    pub fn new(
        config: Arc<SignerConfig>,
        store: Arc<dyn CertificateStore>,
        launcher: Arc<dyn SessionLauncher>,
    ) -> Self {
        Self::with_retention(config, store, launcher, DEFAULT_RETAINED_JOBS)
    }

    /// Creates a controller keeping the last `retain` ended jobs; older
    /// ones report `JobNotFound`. Running jobs are never evicted.
    #[must_use]
    pub fn with_retention(
        config: Arc<SignerConfig>,
        store: Arc<dyn CertificateStore>,
        launcher: Arc<dyn SessionLauncher>,
        retain: usize,
    ) -> Self {
        Self {
            config,
            store,
            launcher,
            jobs: Arc::new(RwLock::new(JobRegistry::new(retain))),
        }
    }

    /// Starts a job.
    ///
    /// The certificate is resolved before anything else; the browser work
    /// runs in a spawned task.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::DirectoryUnavailable` or
    /// `SignerError::CertificateNotFound` from the pre-flight lookup.
    pub async fn start(&self, request: JobRequest) -> Result<JobTicket, SignerError> {
        let certificate =
            find_by_thumbprint(self.store.as_ref(), &request.certificate_id).await?;

        let job_id = JobId::new();
        let (events, receiver) = broadcast::channel(JOB_EVENT_CAPACITY);
        let (stop, stop_rx) = watch::channel(false);
        self.jobs.write().await.entries.insert(
            job_id,
            JobEntry {
                status: JobStatus::Running,
                stop,
                events: events.clone(),
            },
        );

        let log = JobLog::new(job_id, events);
        log.info(format!(
            "job started: certificate {} ({}), category {}, speed {}",
            certificate.subject_common_name,
            certificate.issuer_common_name,
            request.category,
            request.speed
        ));

        let run = JobRun {
            config: Arc::clone(&self.config),
            launcher: Arc::clone(&self.launcher),
            jobs: Arc::clone(&self.jobs),
            request,
            certificate,
            log,
            stop: stop_rx,
        };
        tokio::spawn(run.execute().instrument(info_span!("job", job_id = %job_id)));

        Ok(JobTicket {
            job_id,
            events: receiver,
        })
    }

    /// Requests a stop. The job finishes the expedient in progress, closes
    /// its session and publishes a partial summary. Stopping a job that
    /// already ended is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::JobNotFound` for an unknown id.
    pub async fn stop(&self, job_id: JobId) -> Result<(), SignerError> {
        let jobs = self.jobs.read().await;
        let entry = jobs.entries.get(&job_id).ok_or_else(|| not_found(job_id))?;
        if entry.status == JobStatus::Running {
            let _ = entry.stop.send(true);
        }
        Ok(())
    }

    /// Subscribes to a job's events. Events published before subscribing
    /// are not replayed.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::JobNotFound` for an unknown id.
    pub async fn subscribe(&self, job_id: JobId) -> Result<broadcast::Receiver<JobEvent>, SignerError> {
        let jobs = self.jobs.read().await;
        jobs.entries
            .get(&job_id)
            .map(|entry| entry.events.subscribe())
            .ok_or_else(|| not_found(job_id))
    }

    /// Returns a job's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns `SignerError::JobNotFound` for an unknown id.
    pub async fn status(&self, job_id: JobId) -> Result<JobStatus, SignerError> {
        let jobs = self.jobs.read().await;
        jobs.entries
            .get(&job_id)
            .map(|entry| entry.status)
            .ok_or_else(|| not_found(job_id))
    }
}

fn not_found(job_id: JobId) -> SignerError {
    SignerError::JobNotFound {
        job_id: job_id.to_string(),
    }
}

/// Everything a spawned job needs.
struct JobRun {
    config: Arc<SignerConfig>,
    launcher: Arc<dyn SessionLauncher>,
    jobs: JobTable,
    request: JobRequest,
    certificate: Certificate,
    log: JobLog,
    stop: watch::Receiver<bool>,
}

impl JobRun {
    async fn execute(self) {
        let job_id = self.log.job_id();
        let result = self.run_session().await;

        let (status, event) = match result {
            Ok(summary) => {
                self.log.info(format!("job finished: {summary}"));
                (JobStatus::Finished, JobEvent::Finished { summary })
            },
            Err(e) => {
                self.log.warn(format!("job aborted: {e}"));
                (
                    JobStatus::Aborted,
                    JobEvent::Aborted {
                        reason: e.to_string(),
                        summary: RunSummary::default(),
                    },
                )
            },
        };

        self.jobs.write().await.finish(job_id, status);
        self.log.terminal(event);
    }

    async fn run_session(&self) -> Result<RunSummary, SignerError> {
        let filter = self.certificate.selection_filter();
        let mut session = self
            .launcher
            .launch(filter, self.request.speed, self.request.headless)
            .await?;

        let result = self.drive(&session).await;
        session.close().await;
        result
    }

    async fn drive(&self, session: &SessionHandle) -> Result<RunSummary, SignerError> {
        session.authenticate(self.request.category, &self.log).await?;

        let mut walker = ListingWalker::new(&self.config.portal, self.config.timeouts.navigation);
        let orchestrator = SigningOrchestrator::new(
            &self.config,
            session.resolver(),
            session.filter().clone(),
            session.pacing(),
            self.log.clone(),
        );
        Ok(orchestrator.run(session.page(), &mut walker, &self.stop).await)
    }
}

#[cfg(test)]
mod tests;
