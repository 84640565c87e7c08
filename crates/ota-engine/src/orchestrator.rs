//! Update orchestrator - drives one update from query to outcome.
//!
//! The orchestrator lives on the interface thread. It queries the server,
//! records the user's selection and spawns one worker thread per attempt.
//! The worker streams the package into flash, verifies every binary and
//! reports the outcome through the mailbox.
//!
//! State flow:
//!
//! ```text
//! Idle -> Querying -> VersionsAvailable -> AwaitingConfirmation
//!      -> Applying <-> Verifying -> Succeeded | Failed
//! ```
//!
//! `Failed` can be retried with the same selection. Only `Succeeded` offers
//! a device restart.
//!
//! At most one attempt touches storage at a time. The query and every
//! worker hold an [`AttemptGuard`]; a second caller gets
//! [`OtaError::UpdateInProgress`] instead of racing the first.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::catalog::VersionEntry;
use crate::context::EngineContext;
use crate::error::{NetworkError, OtaError};
use crate::events::StatusColor;
use crate::integrity::IntegrityVerifier;
use crate::package::PackageParser;
use crate::query::VersionQuery;
use crate::ui::LABEL_UPDATING;
use crate::writer::{StreamingFlashWriter, WriteOutcome};

/// Name of the worker thread.
const WORKER_THREAD_NAME: &str = "ota-worker";

/// Current state of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OtaState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Version query running
    Querying,
    /// Catalog holds newer versions
    VersionsAvailable,
    /// A version is selected and the user has been asked to confirm
    AwaitingConfirmation,
    /// Package streaming into flash
    Applying,
    /// Re-reading a written binary
    Verifying,
    /// Every binary written and verified
    Succeeded,
    /// Attempt aborted
    Failed(String),
}

impl OtaState {
    /// Whether storage may be in use by a running operation.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Querying | Self::Applying | Self::Verifying)
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Querying => f.write_str("querying"),
            Self::VersionsAvailable => f.write_str("versions available"),
            Self::AwaitingConfirmation => f.write_str("awaiting confirmation"),
            Self::Applying => f.write_str("applying"),
            Self::Verifying => f.write_str("verifying"),
            Self::Succeeded => f.write_str("succeeded"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Exclusive right to mutate the durable tables, released on drop.
pub struct AttemptGuard {
    flag: Arc<AtomicBool>,
}

impl AttemptGuard {
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, OtaError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| OtaError::UpdateInProgress)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Version chosen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub index: usize,
    pub entry: VersionEntry,
}

/// Summary of a successful attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub version: String,
    pub files_written: usize,
    pub files_skipped: usize,
    pub bytes_written: u64,
}

/// Handle on a running worker.
pub struct UpdateHandle {
    inner: JoinHandle<Result<ApplyReport, OtaError>>,
}

impl UpdateHandle {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the worker and return its outcome.
    pub fn join(self) -> Result<ApplyReport, OtaError> {
        self.inner.join().map_err(|_| OtaError::WorkerPanicked)?
    }
}

/// Drives query, selection and update attempts.
pub struct UpdateOrchestrator {
    ctx: Arc<EngineContext>,
    state: Arc<watch::Sender<OtaState>>,
    selected: Option<Selection>,
    in_progress: Arc<AtomicBool>,
}

impl UpdateOrchestrator {
    pub fn new(ctx: EngineContext) -> Self {
        let (state, _) = watch::channel(OtaState::Idle);
        Self {
            ctx: Arc::new(ctx),
            state: Arc::new(state),
            selected: None,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Current state.
    pub fn state(&self) -> OtaState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<OtaState> {
        self.state.subscribe()
    }

    pub fn selected(&self) -> Option<&Selection> {
        self.selected.as_ref()
    }

    /// Whether a query or an attempt currently holds storage.
    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn set_state(&self, state: OtaState) {
        set_state(&self.state, state);
    }

    fn ensure_idle(&self, action: &'static str) -> Result<OtaState, OtaError> {
        let state = self.state();
        if state.is_busy() {
            return Err(OtaError::InvalidState {
                action,
                state: state.to_string(),
            });
        }
        Ok(state)
    }

    /// Ask the server for newer versions and replace the catalog with them.
    ///
    /// Blocks on the network; call it from a thread other than the
    /// interface loop. Returns the number of newer versions.
    pub fn query_versions(&mut self) -> Result<usize, OtaError> {
        if self.is_busy() {
            return Err(OtaError::UpdateInProgress);
        }
        self.ensure_idle("query versions")?;
        let _guard = AttemptGuard::acquire(&self.in_progress)?;
        self.set_state(OtaState::Querying);

        let config = &self.ctx.config;
        let query = VersionQuery {
            server_url: &config.server_url,
            current_version: &config.current_version,
            max_response_bytes: config.network.max_query_response_bytes,
            locator_rewrite: config.network.locator_rewrite.as_ref(),
        };

        match query.run(&*self.ctx.transport, &self.ctx.catalog()) {
            Ok(count) => {
                self.selected = None;
                self.set_state(if count > 0 {
                    OtaState::VersionsAvailable
                } else {
                    OtaState::Idle
                });
                Ok(count)
            }
            Err(e) => {
                error!(error = %e, "version query failed");
                if e.is_network() {
                    self.ctx.events.network_error_popup();
                }
                self.set_state(OtaState::Idle);
                Err(e)
            }
        }
    }

    /// Present catalog entries, read once for building the version list.
    pub fn versions(&self) -> Result<Vec<(usize, VersionEntry)>, OtaError> {
        self.ctx.catalog().present()
    }

    /// Select catalog slot `index` and ask the user to confirm it.
    pub fn select_version(&mut self, index: usize) -> Result<&Selection, OtaError> {
        let state = self.ensure_idle("select a version")?;
        if state == OtaState::Succeeded {
            return Err(OtaError::InvalidState {
                action: "select a version",
                state: state.to_string(),
            });
        }

        let entry = self.ctx.catalog().get(index)?;
        if entry.is_absent() {
            return Err(OtaError::NotFound { index });
        }

        info!(index, name = %entry.name, "version selected");
        self.ctx.events.confirm_version(&entry.name);
        self.set_state(OtaState::AwaitingConfirmation);
        Ok(self.selected.insert(Selection { index, entry }))
    }

    /// Start an attempt for the selected version on a worker thread.
    ///
    /// Allowed after confirmation and after a failed attempt (retry).
    pub fn start_update(&mut self) -> Result<UpdateHandle, OtaError> {
        if self.is_busy() {
            return Err(OtaError::UpdateInProgress);
        }
        let state = self.state();
        if !matches!(state, OtaState::AwaitingConfirmation | OtaState::Failed(_)) {
            return Err(OtaError::InvalidState {
                action: "start an update",
                state: state.to_string(),
            });
        }
        let selection = self.selected.clone().ok_or_else(|| OtaError::InvalidState {
            action: "start an update",
            state: "no version selected".to_string(),
        })?;

        let guard = AttemptGuard::acquire(&self.in_progress)?;
        self.set_state(OtaState::Applying);

        let ctx = Arc::clone(&self.ctx);
        let state_tx = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = {
                    let _guard = guard;
                    apply(&ctx, &state_tx, &selection)
                };
                report(&ctx, &state_tx, &outcome);
                outcome
            });

        match spawned {
            Ok(inner) => Ok(UpdateHandle { inner }),
            Err(e) => {
                error!(error = %e, "failed to spawn update worker");
                self.set_state(OtaState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Restart the device after a successful update.
    pub fn request_restart(&self) -> Result<(), OtaError> {
        let state = self.state();
        if state != OtaState::Succeeded {
            return Err(OtaError::InvalidState {
                action: "restart",
                state: state.to_string(),
            });
        }
        match &self.ctx.device {
            Some(device) => {
                info!("restarting device");
                device.restart();
                Ok(())
            }
            None => Err(OtaError::Config("no device control configured".to_string())),
        }
    }
}

fn set_state(tx: &watch::Sender<OtaState>, state: OtaState) {
    info!(state = %state, "update state");
    tx.send_replace(state);
}

/// One attempt, from opening the package to clearing the update flags.
///
/// Runs on the worker thread. The response is dropped, closing the session,
/// on every return path.
fn apply(
    ctx: &EngineContext,
    state: &watch::Sender<OtaState>,
    selection: &Selection,
) -> Result<ApplyReport, OtaError> {
    let entry = &selection.entry;
    info!(index = selection.index, name = %entry.name, url = %entry.source_locator, "starting update");
    ctx.events.button_label(LABEL_UPDATING);
    ctx.events.progress_color(StatusColor::Normal);

    let mut response = ctx.transport.get(&entry.source_locator)?;

    let status = response.status();
    info!(status, "package response");
    if let Some(content_type) = response.header("Content-Type") {
        info!(content_type = %content_type, "package content type");
    }
    if status != 200 {
        return Err(NetworkError::Status { status }.into());
    }
    match response.content_length() {
        Some(0) => return Err(NetworkError::InvalidPackageSize(0).into()),
        Some(size) => info!(size, "package size"),
        None => warn!("package size unknown, streaming until the manifest is satisfied"),
    }

    let store = ctx.manifest_store();
    let parsed = PackageParser::new(&store).parse(&mut *response)?;

    let storage = &*ctx.storage;
    let mut writer = StreamingFlashWriter::new(storage, &ctx.events);
    let verifier = IntegrityVerifier::new(storage);
    let mut report = ApplyReport {
        version: entry.name.to_string(),
        ..ApplyReport::default()
    };

    for file in &parsed.manifest {
        ctx.events.current_file(&file.name);
        set_state(state, OtaState::Applying);

        match writer.write_entry(file, &mut *response)? {
            WriteOutcome::Skipped => {
                report.files_skipped += 1;
                continue;
            }
            WriteOutcome::Written { bytes } => report.bytes_written += u64::from(bytes),
        }

        set_state(state, OtaState::Verifying);
        verifier.verify(file)?;
        report.files_written += 1;
    }

    ctx.catalog().clear_update_flags()?;
    Ok(report)
}

/// Publish the outcome of an attempt.
fn report(
    ctx: &EngineContext,
    state: &watch::Sender<OtaState>,
    outcome: &Result<ApplyReport, OtaError>,
) {
    match outcome {
        Ok(report) => {
            info!(
                version = %report.version,
                files = report.files_written,
                skipped = report.files_skipped,
                bytes = report.bytes_written,
                "update succeeded"
            );
            set_state(state, OtaState::Succeeded);
            ctx.events.progress_color(StatusColor::Success);
            ctx.events.button_color(StatusColor::Success);
            ctx.events.success_popup();
        }
        Err(e) => {
            error!(error = %e, "update failed");
            set_state(state, OtaState::Failed(e.to_string()));
            ctx.events.progress_color(StatusColor::Error);
            ctx.events.button_color(StatusColor::Error);
            ctx.events.failure_popup();
        }
    }
}
