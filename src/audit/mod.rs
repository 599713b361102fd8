//! Append-only audit trail for deployment decisions
//!
//! Every gate evaluation, role assumption, stack transition and parameter
//! store write produces one narrative line. The audit file is a user-facing
//! artifact, separate from diagnostic logging.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

/// Sink for narrative audit lines.
///
/// Implementations must never fail the caller: a deployment is not aborted
/// because its paper trail could not be written.
pub trait AuditSink: Send + Sync {
    /// Append one line to the audit trail.
    fn record(&self, line: &str);
}

/// Production sink appending to `audit.txt` under the run's output directory.
///
/// The file is truncated when the sink is created and appended to for the
/// rest of the run. Lines are mirrored to the diagnostic log at info level.
pub struct FileAudit {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAudit {
    /// Create the output directory if needed and truncate the audit file.
    pub fn create(output_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join("audit.txt");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Path of the audit file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAudit {
    fn record(&self, line: &str) {
        info!("{line}");
        let mut guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                warn!("failed to append to {}: {e}", self.path.display());
                // Stop retrying a dead file handle.
                *guard = None;
            }
        }
    }
}
