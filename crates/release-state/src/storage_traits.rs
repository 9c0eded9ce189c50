//! Storage trait definitions for releasegate
//!
//! These traits define the record-store abstractions the verification
//! pipeline depends on:
//! - `ReleaseStore`: release and product records with optimistic concurrency
//! - `PreferenceStore`: per-account notification preferences
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Highest value `Release::progress` reaches in a completed run.
pub const MAX_PROGRESS: u8 = 5;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a submitted release
    ReleaseId
);
string_id!(
    /// Unique identifier for a catalog product
    ProductId
);
string_id!(
    /// Unique identifier for a submitting account
    AccountId
);

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

/// Verification status of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pending => "pending",
            CheckStatus::Running => "running",
            CheckStatus::Passed => "passed",
            CheckStatus::Failed => "failed",
        }
    }

    /// Whether the status ends a verification run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckStatus::Passed | CheckStatus::Failed)
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single submitted artifact for a product.
///
/// Invariants maintained by the verification pipeline:
/// - `approved` implies `status == Passed`.
/// - `progress` never decreases within one run.
/// - `log` is append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub product_id: ProductId,
    /// Account that submitted the artifact; receives all notifications
    pub submitted_by: AccountId,
    /// Human-readable version label (e.g. "1.4.0")
    pub version_label: String,
    /// Location of the submitted binary, owned by file storage
    pub file_ref: PathBuf,
    /// Lower-cased suffix without the leading dot (e.g. "apk", "tar.gz")
    pub extension: String,
    pub status: CheckStatus,
    pub progress: u8,
    pub log: Vec<String>,
    pub approved: bool,
    pub is_current: bool,
    /// Optimistic-concurrency token, bumped by the store on every save
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl Release {
    /// Create a freshly submitted release in the `Pending` state.
    pub fn new(
        product_id: ProductId,
        submitted_by: AccountId,
        version_label: impl Into<String>,
        file_ref: impl Into<PathBuf>,
    ) -> Self {
        let file_ref = file_ref.into();
        let now = Utc::now();
        Self {
            id: ReleaseId::new(),
            product_id,
            submitted_by,
            version_label: version_label.into(),
            extension: extension_of(&file_ref),
            file_ref,
            status: CheckStatus::Pending,
            progress: 0,
            log: Vec::new(),
            approved: false,
            is_current: false,
            revision: 0,
            created_at: now,
            updated_at: now,
            verified_at: None,
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: ReleaseId) -> Self {
        self.id = id;
        self
    }

    /// Read-only projection consumed by polling clients.
    pub fn status_view(&self) -> StatusView {
        StatusView {
            release_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            log: self.log.clone(),
        }
    }
}

/// Derive the lower-cased extension used to select an inspector.
///
/// Compound `.tar.gz` suffixes are kept whole; everything else uses the
/// last dot-separated segment of the file name.
pub fn extension_of(path: &Path) -> String {
    let name = match path.file_name() {
        Some(name) => name.to_string_lossy().to_ascii_lowercase(),
        None => return String::new(),
    };
    if name.ends_with(".tar.gz") {
        return "tar.gz".to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_string(),
        _ => String::new(),
    }
}

/// Status projection exposed to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub release_id: ReleaseId,
    pub status: CheckStatus,
    pub progress: u8,
    pub log: Vec<String>,
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// A catalog entry owning zero or more releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub owner: AccountId,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub revision: u64,
}

impl Product {
    pub fn new(name: impl Into<String>, owner: AccountId) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            owner,
            published: false,
            published_at: None,
            revision: 0,
        }
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: ProductId) -> Self {
        self.id = id;
        self
    }
}

// ---------------------------------------------------------------------------
// Notification preferences
// ---------------------------------------------------------------------------

/// Per-account delivery preferences.
///
/// Accounts without a stored record get `Default`, which enables both
/// channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: bool,
    pub push: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email: true,
            push: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Save outcome
// ---------------------------------------------------------------------------

/// Result of a compare-and-swap save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The write was applied; the record now carries `revision`.
    Saved { revision: u64 },
    /// The record changed since it was loaded; nothing was written.
    StaleWrite { current_revision: u64 },
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Release and product record store.
///
/// Guarantees:
/// - `save_*` applies the write only when the caller's `revision` equals the
///   stored revision, then bumps it; otherwise `StaleWrite` is returned and
///   the stored record is untouched.
/// - `current_release` returns the approved release flagged `is_current`,
///   if any.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Insert a new release. Fails with `AlreadyExists` on id collision.
    async fn insert_release(&self, release: Release) -> StorageResult<Release>;

    /// Load a release by id. Returns `ReleaseNotFound` if absent.
    async fn load_release(&self, id: &ReleaseId) -> StorageResult<Release>;

    /// Compare-and-swap save of a release record.
    async fn save_release(&self, release: &Release) -> StorageResult<SaveOutcome>;

    /// The approved, current release of a product, if any.
    async fn current_release(&self, product_id: &ProductId) -> StorageResult<Option<Release>>;

    /// All releases of a product, oldest first.
    async fn list_releases(&self, product_id: &ProductId) -> StorageResult<Vec<Release>>;

    /// Insert a new product. Fails with `AlreadyExists` on id collision.
    async fn insert_product(&self, product: Product) -> StorageResult<Product>;

    /// Load a product by id. Returns `ProductNotFound` if absent.
    async fn load_product(&self, id: &ProductId) -> StorageResult<Product>;

    /// Compare-and-swap save of a product record.
    async fn save_product(&self, product: &Product) -> StorageResult<SaveOutcome>;

    /// Read-only `{status, progress, log}` projection of a release.
    async fn status(&self, id: &ReleaseId) -> StorageResult<StatusView> {
        Ok(self.load_release(id).await?.status_view())
    }
}

/// Notification preference lookup.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Stored preferences for an account, `None` when the account never set any.
    async fn preferences(&self, account: &AccountId)
        -> StorageResult<Option<NotificationPreferences>>;
}
