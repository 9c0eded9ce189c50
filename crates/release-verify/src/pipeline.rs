//! Verification pipeline
//!
//! Drives one release from `Pending`/`Failed` through `Running` to a terminal
//! status. Stages run in order and each one advances `progress`; the first
//! rejection short-circuits through [`VerificationPipeline`]'s single failure
//! path, which also covers cancellation and unexpected faults.
//!
//! Record writes are compare-and-swap saves. The claim retries on a stale
//! write; any stale write after the claim means another writer touched a
//! running release and ends the run as `Unexpected`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn, Instrument};

use release_state::{
    CheckStatus, Product, ProductId, Release, ReleaseId, ReleaseStore, SaveOutcome,
    StorageResult,
};

use crate::config::VerifierConfig;
use crate::error::{RejectReason, Result, VerifyError};
use crate::inspect::{guess_mime, ArtifactInspector};
use crate::metrics::METRICS;
use crate::notify::{NotificationEmitter, VerificationEvent};
use crate::obs;
use crate::scanner::{MalwareScanner, ScanVerdict};
use crate::stage::Stage;

/// Attempts at claiming a release whose record keeps changing underneath us.
const CLAIM_ATTEMPTS: usize = 3;

/// Attempts at writing a terminal or publication record after a stale write.
const WRITE_ATTEMPTS: usize = 3;

/// Prefix of the log line recorded when the scan could not be performed.
pub const SCANNER_DEGRADED_WARNING: &str = "Warning: malware scanner unavailable";

/// Cooperative cancellation flag, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a passed release was made public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Publication {
    /// No release of the product was current; the product is now published.
    FirstRelease,
    /// Replaced the product's previous current release.
    Superseded { previous: ReleaseId },
}

/// Result of a run that was claimed and driven to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub release_id: ReleaseId,
    pub status: CheckStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub rejection: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<Publication>,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }
}

/// State carried through one run.
struct Run {
    release: Release,
    product_name: String,
    cancel: CancelToken,
}

impl Run {
    fn note(&mut self, line: impl Into<String>) {
        self.release.log.push(line.into());
    }

    fn checkpoint(&self) -> std::result::Result<(), RejectReason> {
        if self.cancel.is_cancelled() {
            Err(RejectReason::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One async mutex per product, serialising current-release designation.
#[derive(Default)]
struct PublishLocks(Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>);

impl PublishLocks {
    fn for_product(&self, product_id: &ProductId) -> Arc<tokio::sync::Mutex<()>> {
        // The map only hands out handles; a poisoned map is still consistent.
        let mut locks = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(product_id.clone()).or_default())
    }
}

/// The release verification state machine.
pub struct VerificationPipeline {
    store: Arc<dyn ReleaseStore>,
    inspector: Arc<dyn ArtifactInspector>,
    scanner: Arc<dyn MalwareScanner>,
    notifier: Arc<dyn NotificationEmitter>,
    config: VerifierConfig,
    publish_locks: PublishLocks,
}

impl VerificationPipeline {
    pub fn new(
        store: Arc<dyn ReleaseStore>,
        inspector: Arc<dyn ArtifactInspector>,
        scanner: Arc<dyn MalwareScanner>,
        notifier: Arc<dyn NotificationEmitter>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            store,
            inspector,
            scanner,
            notifier,
            config,
            publish_locks: PublishLocks::default(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ReleaseStore> {
        &self.store
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify a release to completion.
    pub async fn run_verification(&self, release_id: &ReleaseId) -> Result<RunOutcome> {
        self.run(release_id, CancelToken::new()).await
    }

    /// Verify a release, stopping at the next stage boundary once `cancel`
    /// is set.
    ///
    /// Returns `Err` only when the run could not be claimed; every claimed
    /// run ends `Passed` or `Failed` and is reported as a [`RunOutcome`].
    pub async fn run(&self, release_id: &ReleaseId, cancel: CancelToken) -> Result<RunOutcome> {
        let span = obs::verification_span(release_id.as_str());
        async move {
            let release = self.claim(release_id).await?;
            METRICS.inc_runs_started();
            obs::emit_run_started(release_id.as_str(), &release.extension);

            let started = Instant::now();
            let mut run = Run {
                product_name: release.product_id.to_string(),
                release,
                cancel,
            };
            let outcome = match self.drive(&mut run).await {
                Ok(publication) => {
                    METRICS.inc_runs_passed();
                    RunOutcome {
                        release_id: run.release.id.clone(),
                        status: run.release.status,
                        progress: run.release.progress,
                        reason: None,
                        rejection: None,
                        publication: Some(publication),
                    }
                }
                Err(reason) => self.fail(&mut run, reason).await,
            };

            obs::emit_run_finished(
                release_id.as_str(),
                started.elapsed().as_millis() as u64,
                outcome.status.as_str(),
                outcome.reason.as_deref(),
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Move the release to `Running`, refusing releases that are running or
    /// already verified.
    async fn claim(&self, release_id: &ReleaseId) -> Result<Release> {
        for attempt in 1..=CLAIM_ATTEMPTS {
            let mut release = self.store.load_release(release_id).await?;
            match release.status {
                CheckStatus::Running => {
                    return Err(VerifyError::AlreadyRunning {
                        release_id: release_id.clone(),
                    })
                }
                CheckStatus::Passed => {
                    return Err(VerifyError::AlreadyVerified {
                        release_id: release_id.clone(),
                    })
                }
                CheckStatus::Pending | CheckStatus::Failed => {}
            }

            let now = Utc::now();
            release.status = CheckStatus::Running;
            release.progress = 0;
            release.approved = false;
            release.is_current = false;
            release.verified_at = None;
            release.updated_at = now;
            release
                .log
                .push(format!("=== Verification started at {} ===", now.to_rfc3339()));

            match self.store.save_release(&release).await? {
                SaveOutcome::Saved { revision } => {
                    release.revision = revision;
                    return Ok(release);
                }
                SaveOutcome::StaleWrite { current_revision } => {
                    debug!(attempt, current_revision, "claim lost a race, reloading");
                }
            }
        }
        Err(VerifyError::ClaimConflict {
            release_id: release_id.clone(),
        })
    }

    async fn drive(&self, run: &mut Run) -> std::result::Result<Publication, RejectReason> {
        run.checkpoint()?;
        self.ingest(run).await?;
        self.advance(run, Stage::Ingest).await?;

        run.checkpoint()?;
        self.inspect(run).await?;
        self.advance(run, Stage::Inspect).await?;

        run.checkpoint()?;
        self.scan(run).await?;
        self.advance(run, Stage::Scan).await?;

        run.checkpoint()?;
        self.finalize(run).await
    }

    async fn ingest(&self, run: &mut Run) -> std::result::Result<(), RejectReason> {
        let product = self.store.load_product(&run.release.product_id).await?;
        run.product_name = product.name;

        let path = run.release.file_ref.clone();
        let extension = run.release.extension.clone();
        run.note(format!("Starting verification for file: {}", path.display()));
        run.note(format!(
            "Detected MIME type: {}",
            guess_mime(&extension).unwrap_or("unknown")
        ));
        run.note(format!("File extension: {extension}"));

        let size = tokio::fs::metadata(&path).await?.len();
        run.note(format!("File size: {size} bytes"));
        if size > self.config.max_artifact_bytes {
            return Err(RejectReason::OversizedArtifact {
                size,
                limit: self.config.max_artifact_bytes,
            });
        }

        let digest = blocking(move || sha256_file(&path)).await??;
        run.note(format!("SHA-256: {digest}"));
        Ok(())
    }

    async fn inspect(&self, run: &mut Run) -> std::result::Result<(), RejectReason> {
        let inspector = Arc::clone(&self.inspector);
        let path = run.release.file_ref.clone();
        let extension = run.release.extension.clone();
        let inspection = blocking(move || inspector.inspect(&path, &extension)).await??;
        run.release.log.extend(inspection.lines);
        Ok(())
    }

    async fn scan(&self, run: &mut Run) -> std::result::Result<(), RejectReason> {
        run.note("Starting malware scan.");
        match self.scanner.ping().await {
            Ok(true) => match self.scanner.scan(&run.release.file_ref).await {
                Ok(ScanVerdict::Clean) => run.note("No malware found in scan."),
                Ok(ScanVerdict::Infected(verdict)) => {
                    return Err(RejectReason::MalwareDetected { verdict })
                }
                Err(e) => degrade(run, &format!("scan failed: {e}")),
            },
            Ok(false) => degrade(run, "scanner did not answer ping"),
            Err(e) => degrade(run, &format!("scanner unreachable: {e}")),
        }
        Ok(())
    }

    /// Approve and publish a release whose checks all passed.
    ///
    /// Publication writes happen while the release is still `Running`, under
    /// the product's publish lock. The save that marks it `Passed` and
    /// current is the last write of the run.
    async fn finalize(&self, run: &mut Run) -> std::result::Result<Publication, RejectReason> {
        run.note("Verification passed.");
        self.advance(run, Stage::Approve).await?;

        let lock = self.publish_locks.for_product(&run.release.product_id);
        let publication = {
            let _held = lock.lock().await;
            self.publish(run).await?
        };

        self.notify(VerificationEvent::approved(&run.release, &run.product_name))
            .await;
        let event = match &publication {
            Publication::FirstRelease => {
                VerificationEvent::first_published(&run.release, &run.product_name)
            }
            Publication::Superseded { .. } => {
                VerificationEvent::update_published(&run.release, &run.product_name)
            }
        };
        self.notify(event).await;
        Ok(publication)
    }

    /// Designate the run's release as the product's current release.
    /// Callers hold the product's publish lock.
    async fn publish(&self, run: &mut Run) -> std::result::Result<Publication, RejectReason> {
        let previous = self
            .store
            .current_release(&run.release.product_id)
            .await?
            .filter(|prev| prev.id != run.release.id);

        let publication = match previous {
            Some(prev) => {
                run.note(format!(
                    "Found previous release: {} ({})",
                    prev.version_label, prev.id
                ));
                self.set_current(&prev.id, false).await?;
                Publication::Superseded { previous: prev.id }
            }
            None => {
                run.note("No previous release found, first publication.");
                self.publish_product(run).await?;
                Publication::FirstRelease
            }
        };

        run.release.status = CheckStatus::Passed;
        run.release.approved = true;
        run.release.verified_at = Some(Utc::now());
        run.release.is_current = true;
        if let Err(reason) = self.advance(run, Stage::Publish).await {
            if let Publication::Superseded { previous } = &publication {
                self.restore_current(previous).await;
            }
            return Err(reason);
        }
        Ok(publication)
    }

    /// Record stage completion and persist the run's record.
    async fn advance(&self, run: &mut Run, stage: Stage) -> std::result::Result<(), RejectReason> {
        run.release.progress = run.release.progress.max(stage.progress());
        self.persist(&mut run.release).await?;
        obs::emit_stage_completed(run.release.id.as_str(), stage.name(), run.release.progress);
        Ok(())
    }

    async fn persist(&self, release: &mut Release) -> std::result::Result<(), RejectReason> {
        release.updated_at = Utc::now();
        match self.store.save_release(release).await? {
            SaveOutcome::Saved { revision } => {
                release.revision = revision;
                Ok(())
            }
            SaveOutcome::StaleWrite { current_revision } => Err(RejectReason::Unexpected(format!(
                "release record was modified during verification (expected revision {}, found {current_revision})",
                release.revision
            ))),
        }
    }

    /// Set `is_current` on another release of the product.
    async fn set_current(
        &self,
        release_id: &ReleaseId,
        current: bool,
    ) -> std::result::Result<(), RejectReason> {
        for _ in 0..WRITE_ATTEMPTS {
            let mut release = self.store.load_release(release_id).await?;
            if release.is_current == current {
                return Ok(());
            }
            release.is_current = current;
            release.updated_at = Utc::now();
            if self.store.save_release(&release).await?.is_saved() {
                return Ok(());
            }
        }
        Err(RejectReason::Unexpected(format!(
            "could not set current flag on release {release_id} to {current}"
        )))
    }

    /// Hand the current flag back to a superseded release after the new
    /// release failed to take it.
    async fn restore_current(&self, release_id: &ReleaseId) {
        match self.set_current(release_id, true).await {
            Ok(()) => info!(release_id = %release_id, "restored current release"),
            Err(e) => error!(
                release_id = %release_id,
                error = %e,
                "could not restore current release"
            ),
        }
    }

    async fn publish_product(&self, run: &mut Run) -> std::result::Result<(), RejectReason> {
        for _ in 0..WRITE_ATTEMPTS {
            let mut product: Product = self.store.load_product(&run.release.product_id).await?;
            if product.published {
                run.note("Product is already published.");
                return Ok(());
            }
            product.published = true;
            product.published_at = Some(Utc::now());
            if self.store.save_product(&product).await?.is_saved() {
                run.note(format!("Product {} is now published.", product.name));
                return Ok(());
            }
        }
        Err(RejectReason::Unexpected(format!(
            "could not publish product {}",
            run.release.product_id
        )))
    }

    /// The single failure transition.
    async fn fail(&self, run: &mut Run, reason: RejectReason) -> RunOutcome {
        let error_line = format!("*** ERROR: {reason}");
        run.note(error_line.clone());
        mark_failed(&mut run.release);

        if let Err(e) = self.persist_failure(run, &error_line).await {
            error!(
                release_id = %run.release.id,
                error = %e,
                "could not persist failed verification"
            );
        }

        METRICS.inc_runs_failed();
        self.notify(VerificationEvent::failed(
            &run.release,
            &run.product_name,
            &reason,
        ))
        .await;

        RunOutcome {
            release_id: run.release.id.clone(),
            status: run.release.status,
            progress: run.release.progress,
            reason: Some(reason.to_string()),
            rejection: Some(reason),
            publication: None,
        }
    }

    /// Write the failed record, re-applying the failure to a fresh copy if
    /// the record moved on underneath the run.
    async fn persist_failure(&self, run: &mut Run, error_line: &str) -> StorageResult<()> {
        if self.persist(&mut run.release).await.is_ok() {
            return Ok(());
        }
        for _ in 0..WRITE_ATTEMPTS {
            let mut fresh = self.store.load_release(&run.release.id).await?;
            if !fresh.log.iter().any(|line| line == error_line) {
                fresh.log.push(error_line.to_string());
            }
            fresh.progress = fresh.progress.max(run.release.progress);
            mark_failed(&mut fresh);
            fresh.updated_at = Utc::now();
            if let SaveOutcome::Saved { revision } = self.store.save_release(&fresh).await? {
                fresh.revision = revision;
                run.release = fresh;
                return Ok(());
            }
        }
        Err(release_state::StorageError::Backend(format!(
            "release {} kept changing while recording failure",
            run.release.id
        )))
    }

    /// Hand `event` to the emitter, giving up after the configured timeout.
    async fn notify(&self, event: VerificationEvent) {
        let limit = self.config.notify_timeout();
        let release_id = event.release_id.clone();
        if tokio::time::timeout(limit, self.notifier.emit(event))
            .await
            .is_err()
        {
            METRICS.inc_notifications_failed();
            obs::emit_notification_failed(
                release_id.as_str(),
                "emitter",
                &format!("timed out after {limit:?}"),
            );
        }
    }
}

fn mark_failed(release: &mut Release) {
    release.status = CheckStatus::Failed;
    release.approved = false;
    release.is_current = false;
    release.verified_at = None;
}

fn degrade(run: &mut Run, detail: &str) {
    run.note(format!(
        "{SCANNER_DEGRADED_WARNING} ({detail}), continuing without malware scan."
    ));
    METRICS.inc_scanner_degraded();
    obs::emit_scanner_degraded(run.release.id.as_str(), detail);
}

/// Run blocking work on the blocking pool; a panic becomes `Unexpected`.
async fn blocking<T, F>(work: F) -> std::result::Result<T, RejectReason>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        warn!(error = %e, "blocking verification task did not complete");
        RejectReason::unexpected(format!("verification task failed: {e}"))
    })
}

/// Hex SHA-256 digest of a file.
pub fn sha256_file(path: &Path) -> std::result::Result<String, RejectReason> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
