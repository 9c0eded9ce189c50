//! Pipeline stages and the progress value each one reaches.

use std::fmt;

/// A step of a verification run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Size check, digest and MIME guess
    Ingest,
    /// Format-specific structural checks
    Inspect,
    /// Malware scan
    Scan,
    /// Status set to passed and approval recorded
    Approve,
    /// Current-release designation and product publication
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Ingest,
        Stage::Inspect,
        Stage::Scan,
        Stage::Approve,
        Stage::Publish,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Inspect => "inspect",
            Stage::Scan => "scan",
            Stage::Approve => "approve",
            Stage::Publish => "publish",
        }
    }

    /// `Release::progress` once this stage has completed.
    pub fn progress(&self) -> u8 {
        match self {
            Stage::Ingest => 1,
            Stage::Inspect => 2,
            Stage::Scan => 3,
            Stage::Approve => 4,
            Stage::Publish => 5,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
