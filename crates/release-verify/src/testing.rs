//! Test doubles for the pipeline's collaborators.
//!
//! Pair these with `release_state::fakes` to drive a full pipeline without
//! a scanner daemon or message transports.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::RejectReason;
use crate::inspect::{ArtifactInspector, FormatInspectors, Inspection};
use crate::notify::{NotificationEmitter, Transport, VerificationEvent};
use crate::scanner::{MalwareScanner, ScanError, ScanVerdict};

#[derive(Debug, Clone)]
enum ScanBehaviour {
    Clean,
    Infected(String),
    /// Ping answers `false`
    Unreachable,
    /// Ping and scan fail at the transport level
    Broken,
}

/// Lets a test hold a scanner call until it decides to continue.
#[derive(Debug, Clone, Default)]
pub struct ScanGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ScanGate {
    /// Wait until a run is parked inside the scanner.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked run continue.
    pub fn open(&self) {
        self.release.notify_one();
    }
}

/// Scripted [`MalwareScanner`].
#[derive(Debug, Clone)]
pub struct StubScanner {
    behaviour: ScanBehaviour,
    pings: Arc<AtomicUsize>,
    scans: Arc<AtomicUsize>,
    gate: Option<ScanGate>,
}

impl StubScanner {
    fn with_behaviour(behaviour: ScanBehaviour) -> Self {
        Self {
            behaviour,
            pings: Arc::new(AtomicUsize::new(0)),
            scans: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub fn clean() -> Self {
        Self::with_behaviour(ScanBehaviour::Clean)
    }

    pub fn infected(signature: impl Into<String>) -> Self {
        Self::with_behaviour(ScanBehaviour::Infected(signature.into()))
    }

    pub fn unreachable() -> Self {
        Self::with_behaviour(ScanBehaviour::Unreachable)
    }

    pub fn broken() -> Self {
        Self::with_behaviour(ScanBehaviour::Broken)
    }

    /// Park every ping until the returned gate is opened.
    pub fn gated(mut self) -> (Self, ScanGate) {
        let gate = ScanGate::default();
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Total `ping` plus `scan` calls.
    pub fn calls(&self) -> usize {
        self.pings.load(Ordering::SeqCst) + self.scans.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MalwareScanner for StubScanner {
    async fn ping(&self) -> Result<bool, ScanError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        match self.behaviour {
            ScanBehaviour::Unreachable => Ok(false),
            ScanBehaviour::Broken => Err(ScanError::Protocol("connection reset".to_string())),
            _ => Ok(true),
        }
    }

    async fn scan(&self, _path: &Path) -> Result<ScanVerdict, ScanError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            ScanBehaviour::Clean => Ok(ScanVerdict::Clean),
            ScanBehaviour::Infected(signature) => Ok(ScanVerdict::Infected(signature.clone())),
            ScanBehaviour::Unreachable | ScanBehaviour::Broken => {
                Err(ScanError::Protocol("connection reset".to_string()))
            }
        }
    }
}

/// [`ArtifactInspector`] that counts calls before delegating.
#[derive(Default)]
pub struct CountingInspector {
    inner: FormatInspectors,
    calls: AtomicUsize,
}

impl CountingInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactInspector for CountingInspector {
    fn inspect(&self, path: &Path, extension: &str) -> Result<Inspection, RejectReason> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.inspect(path, extension)
    }
}

/// [`NotificationEmitter`] that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<VerificationEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<VerificationEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationEmitter for RecordingEmitter {
    async fn emit(&self, event: VerificationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// [`Transport`] that keeps every delivered event.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<VerificationEvent>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<VerificationEvent> {
        self.delivered
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, event: &VerificationEvent) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .map_err(|_| anyhow::anyhow!("recording transport lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// [`Transport`] that always fails.
#[derive(Debug, Default)]
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn deliver(&self, _event: &VerificationEvent) -> anyhow::Result<()> {
        anyhow::bail!("transport unavailable")
    }
}

/// [`NotificationEmitter`] whose `emit` never completes, like a hung relay.
#[derive(Debug, Default)]
pub struct StalledEmitter {
    attempts: AtomicUsize,
}

impl StalledEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationEmitter for StalledEmitter {
    async fn emit(&self, _event: VerificationEvent) {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
    }
}
