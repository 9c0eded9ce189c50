//! Asynchronous dispatch of verification runs.
//!
//! The dispatcher is the polling surface: it starts runs in the background,
//! answers status queries and forwards cancellation. Throughput is bounded
//! by a semaphore sized from `max_concurrent_runs`; a release is tracked in
//! the active set from dispatch until its task finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use release_state::{CheckStatus, ReleaseId, StatusView};

use crate::error::{Result, VerifyError};
use crate::obs;
use crate::pipeline::{CancelToken, RunOutcome, VerificationPipeline};

/// Answer to a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    AlreadyVerified,
}

type ActiveRuns = Arc<Mutex<HashMap<ReleaseId, CancelToken>>>;

fn lock(
    active: &Mutex<HashMap<ReleaseId, CancelToken>>,
) -> MutexGuard<'_, HashMap<ReleaseId, CancelToken>> {
    // Entries are plain tokens; a poisoned map is still consistent.
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes a release from the active set when its task ends, however it ends.
struct ActiveGuard {
    active: ActiveRuns,
    release_id: ReleaseId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.release_id);
    }
}

/// Fire-and-forget front end for [`VerificationPipeline`].
pub struct VerificationDispatcher {
    pipeline: Arc<VerificationPipeline>,
    permits: Arc<Semaphore>,
    active: ActiveRuns,
}

impl VerificationDispatcher {
    pub fn new(pipeline: Arc<VerificationPipeline>) -> Self {
        let limit = pipeline.config().max_concurrent_runs.max(1);
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(limit)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a run for `release_id`.
    ///
    /// Refuses a release this dispatcher is already driving. Refusals that
    /// depend on the stored record (running elsewhere, already verified)
    /// come back through the returned handle.
    pub fn dispatch(&self, release_id: &ReleaseId) -> Result<JoinHandle<Result<RunOutcome>>> {
        let cancel = CancelToken::new();
        {
            let mut active = lock(&self.active);
            if active.contains_key(release_id) {
                return Err(VerifyError::AlreadyRunning {
                    release_id: release_id.clone(),
                });
            }
            active.insert(release_id.clone(), cancel.clone());
        }

        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            release_id: release_id.clone(),
        };
        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let release_id = release_id.clone();
        let span = obs::verification_span(release_id.as_str());

        Ok(tokio::spawn(
            async move {
                let _guard = guard;
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| VerifyError::DispatcherClosed)?;
                debug!("permit acquired");
                pipeline.run(&release_id, cancel).await
            }
            .instrument(span),
        ))
    }

    /// Start verification unless the release is running or already passed.
    pub async fn start(&self, release_id: &ReleaseId) -> Result<StartOutcome> {
        let release = self.pipeline.store().load_release(release_id).await?;
        match release.status {
            CheckStatus::Running => return Ok(StartOutcome::AlreadyRunning),
            CheckStatus::Passed => return Ok(StartOutcome::AlreadyVerified),
            CheckStatus::Pending | CheckStatus::Failed => {}
        }
        match self.dispatch(release_id) {
            Ok(_handle) => Ok(StartOutcome::Started),
            Err(VerifyError::AlreadyRunning { .. }) => Ok(StartOutcome::AlreadyRunning),
            Err(e) => Err(e),
        }
    }

    /// Current status projection of a release.
    pub async fn status(&self, release_id: &ReleaseId) -> Result<StatusView> {
        Ok(self.pipeline.store().status(release_id).await?)
    }

    /// Request cancellation of an active run. Returns `false` when this
    /// dispatcher is not driving the release.
    pub fn cancel(&self, release_id: &ReleaseId) -> bool {
        match lock(&self.active).get(release_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether this dispatcher is currently driving the release.
    pub fn is_active(&self, release_id: &ReleaseId) -> bool {
        lock(&self.active).contains_key(release_id)
    }
}
