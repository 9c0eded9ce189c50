//! Release-Verify: the release verification pipeline for releasegate
//!
//! A submitted release is claimed, inspected, scanned and either approved
//! and published or rejected with a recorded reason.
//!
//! ## Layer 1 - Verification
//!
//! Focus: one state machine per release, format inspectors on the blocking
//! pool, unreliable scanner tolerated, notifications best-effort.
//!
//! ## Key Components
//!
//! - `VerificationPipeline`: the per-release state machine
//! - `VerificationDispatcher`: background runs, start/status/cancel
//! - `inspect`: PE, zip package, tar.gz and gzip inspectors
//! - `ClamdScanner`: clamd `zINSTREAM` client
//! - `ChannelEmitter`: preference-aware email/push fan-out
//! - `testing`: scanner, inspector and emitter doubles

pub mod config;
pub mod dispatch;
pub mod error;
pub mod inspect;
pub mod metrics;
pub mod notify;
pub mod obs;
pub mod pipeline;
pub mod scanner;
pub mod stage;
pub mod telemetry;
pub mod testing;

pub use config::{ConfigError, VerifierConfig};
pub use dispatch::{StartOutcome, VerificationDispatcher};
pub use error::{RejectReason, Result, VerifyError};
pub use inspect::{ArtifactFormat, ArtifactInspector, FormatInspectors, Inspection, PackageKind};
pub use metrics::METRICS;
pub use notify::{
    Channel, ChannelEmitter, LogTransport, NotificationEmitter, Severity, Transport,
    VerificationEvent,
};
pub use pipeline::{
    CancelToken, Publication, RunOutcome, VerificationPipeline, SCANNER_DEGRADED_WARNING,
};
pub use scanner::{ClamdScanner, MalwareScanner, ScanError, ScanVerdict};
pub use stage::Stage;
pub use telemetry::init_tracing;
