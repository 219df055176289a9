//! Scan orchestrator.
//!
//! Drives one portal session through login, region filters and one query per
//! identifier, collecting the rows whose validity window is still open. A
//! failing identifier is recorded and skipped; only session-level failures
//! end the run. The browser is stopped on every exit path.

use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, SessionKey};
use crate::config::AppConfig;
use crate::identifier::ProjectId;
use crate::logger::ScanLogger;
use crate::portal::extractor::{self, RowError};
use crate::portal::{filters, DriverError, Portal, PortalSession};
use crate::record::{Credentials, Region, RegionSelector, ResultRow};
use crate::validity::{compute_validity, format_date, is_active};

/// Format of the `Retirado_em` column.
pub const RETRIEVED_AT_FORMAT: &str = "%d/%m/%Y %H:%M";

/// Terminal progress event when nothing active was found.
pub const NONE_FOUND_MESSAGE: &str = "No active records found.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Starting,
    Authenticating,
    FilteringRegion,
    /// Index into the request's identifier list.
    QueryingIdentifier(usize),
    Aggregating,
    Completed,
    Failed,
    Interrupted,
}

impl ScanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanState::Completed | ScanState::Failed | ScanState::Interrupted)
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan request: {0}")]
    Validation(String),

    #[error("Could not start the browser engine: {0}")]
    EngineUnavailable(String),

    #[error("Portal is unreachable: {0}")]
    PortalUnreachable(#[source] DriverError),

    #[error("Login failed: {0}")]
    AuthenticationFailed(#[source] DriverError),

    #[error("Portal session failed: {0}")]
    Driver(#[from] DriverError),

    #[error("Scan interrupted after {completed} of {total} identifiers")]
    Interrupted { completed: usize, total: usize },
}

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub credentials: Credentials,
    pub region: Region,
    pub identifiers: Vec<ProjectId>,
}

impl ScanRequest {
    pub fn new(credentials: Credentials, region: Region, identifiers: Vec<ProjectId>) -> Self {
        Self {
            credentials,
            region,
            identifiers,
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if !self.credentials.is_complete() {
            return Err(ScanError::Validation("user and password are required".to_string()));
        }
        if self.identifiers.is_empty() {
            return Err(ScanError::Validation("no project identifiers to query".to_string()));
        }
        Ok(())
    }
}

/// Result of querying one identifier.
#[derive(Debug)]
pub enum QueryOutcome {
    Matched {
        /// Rows still inside their validity window.
        rows: Vec<ResultRow>,
        /// Rows read from the grid.
        inspected: usize,
        /// Rows read but expired or undated.
        inactive: usize,
        /// Rows that could not be read.
        skipped_rows: Vec<RowError>,
    },
    Skipped {
        reason: DriverError,
    },
}

impl QueryOutcome {
    pub fn rows(&self) -> &[ResultRow] {
        match self {
            QueryOutcome::Matched { rows, .. } => rows,
            QueryOutcome::Skipped { .. } => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, QueryOutcome::Skipped { .. })
    }
}

#[derive(Debug)]
pub struct IdentifierReport {
    pub id: ProjectId,
    pub outcome: QueryOutcome,
}

/// A completed scan.
#[derive(Debug)]
pub struct ScanOutcome {
    pub region: Region,
    /// Active rows, in query order. Includes rows restored from a checkpoint.
    pub rows: Vec<ResultRow>,
    /// One report per identifier queried in this run.
    pub reports: Vec<IdentifierReport>,
    /// Identifiers skipped because a checkpoint had them done already.
    pub resumed: usize,
    pub started_at: NaiveDateTime,
}

impl ScanOutcome {
    pub fn skipped_count(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_skipped()).count()
    }

    pub fn queried_count(&self) -> usize {
        self.reports.len()
    }
}

/// Starts a browser session. The scanner calls this exactly once per run,
/// after the request has been validated.
pub trait SessionLauncher {
    type Session: PortalSession;

    fn launch(&self) -> Result<Self::Session, DriverError>;
}

/// Source of "now" for validity checks and the `Retirado_em` stamp.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

struct CheckpointStore {
    dir: PathBuf,
    resume_from: Option<Checkpoint>,
}

/// Checkpoint in use for the current run.
struct ActiveCheckpoint {
    dir: PathBuf,
    checkpoint: Checkpoint,
}

impl ActiveCheckpoint {
    fn save(&mut self, logger: &ScanLogger) {
        // A failed save costs resumability, not the scan.
        if let Err(e) = self.checkpoint.save(&self.dir) {
            warn!("Failed to save checkpoint in {}: {}", self.dir.display(), e);
            logger.warn(&format!("Could not save checkpoint: {}", e));
        }
    }
}

pub struct Scanner<L: SessionLauncher> {
    launcher: L,
    config: AppConfig,
    logger: ScanLogger,
    clock: Box<dyn Clock + Send>,
    checkpoint: Option<CheckpointStore>,
    interrupt: Option<Arc<AtomicBool>>,
    states: Vec<ScanState>,
}

impl<L: SessionLauncher> Scanner<L> {
    pub fn new(launcher: L, config: AppConfig, logger: ScanLogger) -> Self {
        Self {
            launcher,
            config,
            logger,
            clock: Box::new(SystemClock),
            checkpoint: None,
            interrupt: None,
            states: vec![ScanState::Idle],
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Save progress to `dir` after every identifier. A compatible
    /// `resume_from` checkpoint skips the identifiers it already covers.
    pub fn with_checkpoint(mut self, dir: impl Into<PathBuf>, resume_from: Option<Checkpoint>) -> Self {
        self.checkpoint = Some(CheckpointStore {
            dir: dir.into(),
            resume_from,
        });
        self
    }

    /// Flag checked between identifiers; when set the scan stops cleanly.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn state(&self) -> ScanState {
        self.states.last().copied().unwrap_or(ScanState::Idle)
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn states(&self) -> &[ScanState] {
        &self.states
    }

    pub fn logger(&self) -> &ScanLogger {
        &self.logger
    }

    fn transition(&mut self, next: ScanState) {
        debug!("Scan state {:?} -> {:?}", self.state(), next);
        self.states.push(next);
    }

    fn interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn check_interrupt(&self, completed: usize, total: usize) -> Result<(), ScanError> {
        if self.interrupted() {
            return Err(ScanError::Interrupted { completed, total });
        }
        Ok(())
    }

    /// Run the whole scan. Validation failures return before any browser
    /// is launched.
    pub fn run(&mut self, request: &ScanRequest) -> Result<ScanOutcome, ScanError> {
        request.validate()?;
        let started_at = self.clock.now();

        let mut checkpoint = self.open_checkpoint(request);
        let mut rows: Vec<ResultRow> = checkpoint
            .as_ref()
            .map(|active| active.checkpoint.rows.clone())
            .unwrap_or_default();
        let resumed = checkpoint
            .as_ref()
            .map(|active| active.checkpoint.remaining(&request.identifiers).len())
            .map_or(0, |remaining| request.identifiers.len() - remaining);

        self.transition(ScanState::Starting);
        self.logger.event("Starting browser engine...");
        let session = match self.launcher.launch() {
            Ok(session) => session,
            Err(e) => {
                let error = ScanError::EngineUnavailable(e.to_string());
                self.fail(&error);
                return Err(error);
            }
        };

        let mut portal = Portal::new(session, &self.config);
        let mut reports = Vec::new();
        let result = self.drive(&mut portal, request, &mut checkpoint, &mut rows, &mut reports);
        portal.stop();
        self.logger.finish_progress();

        match result {
            Ok(()) => {
                self.transition(ScanState::Aggregating);
                self.logger.event(&format!("Done: {} active.", rows.len()));
                if rows.is_empty() {
                    self.logger.event(NONE_FOUND_MESSAGE);
                }
                if let Some(active) = &checkpoint {
                    if let Err(e) = Checkpoint::delete(&active.dir) {
                        warn!("Failed to remove checkpoint: {}", e);
                    }
                }
                self.transition(ScanState::Completed);
                info!("Scan completed: {} active rows", rows.len());
                Ok(ScanOutcome {
                    region: request.region,
                    rows,
                    reports,
                    resumed,
                    started_at,
                })
            }
            Err(error @ ScanError::Interrupted { .. }) => {
                if let Some(active) = checkpoint.as_mut() {
                    active.save(&self.logger);
                }
                self.logger.event(&error.to_string());
                self.transition(ScanState::Interrupted);
                Err(error)
            }
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        }
    }

    fn fail(&mut self, error: &ScanError) {
        self.logger.error(&error.to_string());
        self.transition(ScanState::Failed);
    }

    fn open_checkpoint(&mut self, request: &ScanRequest) -> Option<ActiveCheckpoint> {
        let store = self.checkpoint.as_mut()?;
        let key = SessionKey::new(&request.credentials.user, request.region, &request.identifiers);
        let checkpoint = match store.resume_from.take() {
            Some(previous) if previous.is_compatible(&key) => {
                self.logger.event(&format!("Resuming: {}", previous.summary()));
                previous
            }
            Some(_) => {
                self.logger
                    .warn("Existing checkpoint belongs to a different scan; starting fresh");
                Checkpoint::new(key)
            }
            None => Checkpoint::new(key),
        };
        Some(ActiveCheckpoint {
            dir: store.dir.clone(),
            checkpoint,
        })
    }

    fn drive(
        &mut self,
        portal: &mut Portal<L::Session>,
        request: &ScanRequest,
        checkpoint: &mut Option<ActiveCheckpoint>,
        rows: &mut Vec<ResultRow>,
        reports: &mut Vec<IdentifierReport>,
    ) -> Result<(), ScanError> {
        self.transition(ScanState::Authenticating);
        self.logger
            .event(&format!("Connecting to portal ({})...", self.config.portal.url));
        portal.open_login().map_err(ScanError::PortalUnreachable)?;

        self.logger.event("Logging in...");
        portal
            .authenticate(&request.credentials)
            .map_err(ScanError::AuthenticationFailed)?;
        if self.config.portal.verify_login {
            portal.verify_login().map_err(ScanError::AuthenticationFailed)?;
            self.logger.event("Login confirmed");
        }

        let total = request.identifiers.len();
        let pending = checkpoint
            .as_ref()
            .map_or(total, |active| active.checkpoint.remaining(&request.identifiers).len());
        let mut completed = total - pending;
        self.check_interrupt(completed, total)?;

        self.transition(ScanState::FilteringRegion);
        let selector = RegionSelector::new(&self.config.portal.state, request.region);
        self.logger.event(&format!("Filters: {}", request.region));
        filters::apply_region(&*portal, &selector)?;
        self.check_interrupt(completed, total)?;

        self.logger.start_progress(pending as u64);
        for (index, id) in request.identifiers.iter().enumerate() {
            if checkpoint.as_ref().is_some_and(|active| active.checkpoint.is_completed(id)) {
                continue;
            }
            self.check_interrupt(completed, total)?;

            self.transition(ScanState::QueryingIdentifier(index));
            self.logger.event(&format!("Querying project: {}", id));
            // Chrome shares the process group and dies with the same Ctrl-C,
            // so a failure after an interrupt is not the identifier's fault.
            let outcome = match self.query(portal, id) {
                Ok(outcome) if !(outcome.is_skipped() && self.interrupted()) => outcome,
                Err(e) if !self.interrupted() => return Err(e),
                _ => return Err(ScanError::Interrupted { completed, total }),
            };
            self.report(id, &outcome);

            rows.extend_from_slice(outcome.rows());
            // Skipped identifiers stay pending so a resumed scan retries them.
            if let (Some(active), false) = (checkpoint.as_mut(), outcome.is_skipped()) {
                active.checkpoint.mark_completed(id, outcome.rows());
                active.save(&self.logger);
            }
            reports.push(IdentifierReport {
                id: id.clone(),
                outcome,
            });
            completed += 1;
            self.logger.advance_progress(id.as_str());
        }

        Ok(())
    }

    /// Query one identifier. Only a closed session escapes as an error;
    /// everything else becomes a skip.
    fn query(&self, portal: &Portal<L::Session>, id: &ProjectId) -> Result<QueryOutcome, ScanError> {
        let page = match portal.search(id.as_str()).and_then(|_| extractor::extract_page(portal)) {
            Ok(page) => page,
            Err(DriverError::SessionClosed) => return Err(ScanError::Driver(DriverError::SessionClosed)),
            Err(reason) => return Ok(QueryOutcome::Skipped { reason }),
        };

        let now = self.clock.now();
        let retrieved_at = now.format(RETRIEVED_AT_FORMAT).to_string();
        let mut rows = Vec::new();
        let mut inspected = 0;
        let mut inactive = 0;
        let mut skipped_rows = Vec::new();

        for row in page {
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    skipped_rows.push(e);
                    continue;
                }
            };
            inspected += 1;
            match compute_validity(&record.created_at) {
                Some(end) if is_active(end, now) => {
                    rows.push(ResultRow::from_record(record, format_date(end), retrieved_at.clone()));
                }
                _ => inactive += 1,
            }
        }

        Ok(QueryOutcome::Matched {
            rows,
            inspected,
            inactive,
            skipped_rows,
        })
    }

    fn report(&self, id: &ProjectId, outcome: &QueryOutcome) {
        match outcome {
            QueryOutcome::Matched {
                rows,
                inspected,
                inactive,
                skipped_rows,
            } => {
                for row in rows {
                    self.logger.event(&format!(
                        "   ID {}: ACTIVE (expires {})",
                        row.record_id, row.validity_end
                    ));
                }
                for error in skipped_rows {
                    self.logger.warn(&format!("Project {}: skipped {}", id, error));
                }
                debug!(
                    "Project {}: {} rows read, {} active, {} inactive, {} unreadable",
                    id,
                    inspected,
                    rows.len(),
                    inactive,
                    skipped_rows.len()
                );
            }
            QueryOutcome::Skipped { reason } => {
                self.logger.warn(&format!("Project {} skipped: {}", id, reason));
            }
        }
    }
}
