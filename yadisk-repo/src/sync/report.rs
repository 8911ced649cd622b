use std::io::Write;

use tracing::debug;

use super::store::TransferProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Consult the confirmation gate before every batch of deletions.
    Ask,
    /// Delete without asking.
    Force,
}

/// Per-invocation settings, fixed before the traversal starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    pub deletion: DeletionPolicy,
    /// Last successful sync, in epoch seconds. Push uploads an existing
    /// remote file only when the local copy was modified strictly after it.
    pub reference_time: f64,
}

impl SyncOptions {
    pub fn new(deletion: DeletionPolicy, reference_time: f64) -> Self {
        Self {
            deletion,
            reference_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created_files: usize,
    pub created_folders: usize,
    pub updated: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub deleted: usize,
    pub failures: Vec<TransferFailure>,
}

impl SyncReport {
    /// Number of mutating calls made against either tree.
    pub fn changes(&self) -> usize {
        self.created_files + self.created_folders + self.updated + self.downloaded + self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// A deletion was declined; work done before that point is kept.
    Aborted(SyncReport),
}

impl SyncOutcome {
    pub fn report(&self) -> &SyncReport {
        match self {
            SyncOutcome::Completed(report) | SyncOutcome::Aborted(report) => report,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, SyncOutcome::Aborted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    CreateFile,
    UpdateFile,
    CreateFolder,
    Delete,
    Download,
}

/// Receives user-facing progress from the engines.
pub trait SyncReporter {
    fn action(&mut self, action: SyncAction, path: &str);
    fn progress(&mut self, path: &str, progress: TransferProgress);
    fn failure(&mut self, failure: &TransferFailure);
}

/// Prints progress to stdout and failures to stderr.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    last_percent: Option<u8>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncReporter for ConsoleReporter {
    fn action(&mut self, action: SyncAction, path: &str) {
        self.last_percent = None;
        match action {
            SyncAction::CreateFile => println!("Uploading new file {path}..."),
            SyncAction::UpdateFile => println!("Updating {path}..."),
            SyncAction::CreateFolder => println!("Creating folder {path}/"),
            SyncAction::Delete => println!("Deleting {path}"),
            SyncAction::Download => println!("Pulling {path}..."),
        }
    }

    fn progress(&mut self, _path: &str, progress: TransferProgress) {
        let Some(percent) = progress.percent() else {
            return;
        };
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let mut out = std::io::stdout().lock();
        let written = write!(out, "\rDownload {percent}%.")
            .and_then(|()| if percent == 100 { writeln!(out) } else { Ok(()) })
            .and_then(|()| out.flush());
        if let Err(err) = written {
            debug!(error = %err, "could not print download progress");
        }
    }

    fn failure(&mut self, failure: &TransferFailure) {
        eprintln!("Failed: {}: {}", failure.path, failure.message);
    }
}

/// Keeps every event; for tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub actions: Vec<(SyncAction, String)>,
    pub progress: Vec<(String, TransferProgress)>,
    pub failures: Vec<TransferFailure>,
}

impl RecordingReporter {
    pub fn paths_for(&self, action: SyncAction) -> Vec<&str> {
        self.actions
            .iter()
            .filter(|(a, _)| *a == action)
            .map(|(_, path)| path.as_str())
            .collect()
    }
}

impl SyncReporter for RecordingReporter {
    fn action(&mut self, action: SyncAction, path: &str) {
        self.actions.push((action, path.to_string()));
    }

    fn progress(&mut self, path: &str, progress: TransferProgress) {
        self.progress.push((path.to_string(), progress));
    }

    fn failure(&mut self, failure: &TransferFailure) {
        self.failures.push(failure.clone());
    }
}
