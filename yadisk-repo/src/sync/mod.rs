pub mod backoff;
pub mod disk_store;
pub mod gate;
pub mod local;
pub mod paths;
pub mod pull;
pub mod push;
pub mod report;
pub mod resolver;
pub mod store;
pub mod transfer;

#[cfg(test)]
pub(crate) mod memory_store;

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use gate::{ConfirmationGate, DeletionRequest, DeletionSide, PendingDeletion};
use report::{
    DeletionPolicy, SyncAction, SyncOptions, SyncReport, SyncReporter, TransferFailure,
};
use store::{RemoteId, StoreError};

/// Failures that stop a traversal. Per-entry transfer problems are not
/// errors; they end up in [`report::SyncReport::failures`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to list remote folder {folder}: {source}")]
    RemoteListing {
        folder: RemoteId,
        #[source]
        source: StoreError,
    },
    #[error("failed to list local directory {}: {source}", path.display())]
    LocalListing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    pub fn is_connectivity(&self) -> bool {
        match self {
            SyncError::RemoteListing { source, .. } => source.is_connectivity(),
            SyncError::LocalListing { .. } => false,
        }
    }
}

/// Path of `name` relative to the repository root, for messages.
fn child_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Report under construction plus the sink that mirrors it to the user.
struct Tally<'a> {
    report: SyncReport,
    reporter: &'a mut dyn SyncReporter,
}

impl<'a> Tally<'a> {
    fn new(reporter: &'a mut dyn SyncReporter) -> Self {
        Self {
            report: SyncReport::default(),
            reporter,
        }
    }

    fn announce(&mut self, action: SyncAction, path: &str) {
        self.reporter.action(action, path);
    }

    fn done(&mut self, action: SyncAction) {
        let counter = match action {
            SyncAction::CreateFile => &mut self.report.created_files,
            SyncAction::UpdateFile => &mut self.report.updated,
            SyncAction::CreateFolder => &mut self.report.created_folders,
            SyncAction::Delete => &mut self.report.deleted,
            SyncAction::Download => &mut self.report.downloaded,
        };
        *counter += 1;
    }

    fn skip(&mut self) {
        self.report.skipped += 1;
    }

    fn fail(&mut self, path: &str, err: &dyn Display) {
        warn!(path, error = %err, "entry failed; continuing");
        let failure = TransferFailure {
            path: path.to_string(),
            message: err.to_string(),
        };
        self.reporter.failure(&failure);
        self.report.failures.push(failure);
    }
}

fn confirm_deletions(
    options: &SyncOptions,
    gate: &mut dyn ConfirmationGate,
    side: DeletionSide,
    entries: &[PendingDeletion],
) -> bool {
    if entries.is_empty() || options.deletion == DeletionPolicy::Force {
        return true;
    }
    gate.confirm_deletion(&DeletionRequest { side, entries })
}
