//! Release-State: record model and storage contracts for releasegate
//!
//! This crate owns the persistent shape of releases and products and the
//! traits the verification pipeline uses to read and advance them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: single-record atomic updates and optimistic concurrency.
//!
//! ## Key Components
//!
//! - `Release` / `Product`: the records a verification run mutates
//! - `ReleaseStore`: compare-and-swap persistence (`SaveOutcome::StaleWrite`)
//! - `PreferenceStore`: per-account notification preferences
//! - `fakes`: in-memory implementations

mod error;
pub mod fakes;
pub mod storage_traits;

pub use error::StorageError;
pub use storage_traits::{
    extension_of, AccountId, CheckStatus, NotificationPreferences, PreferenceStore, Product,
    ProductId, Release, ReleaseId, ReleaseStore, SaveOutcome, StatusView, StorageResult,
    MAX_PROGRESS,
};
