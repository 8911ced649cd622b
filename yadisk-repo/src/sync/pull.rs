use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{Instrument, debug, info, info_span};

use super::gate::{ConfirmationGate, DeletionSide, PendingDeletion};
use super::local::{self, LocalEntry};
use super::report::{SyncAction, SyncOptions, SyncOutcome, SyncReporter};
use super::store::{EntryKind, KindFilter, RemoteEntry, RemoteId, RemoteStore, TransferProgress};
use super::{SyncError, Tally, child_rel, confirm_deletions};

struct Frame {
    local: PathBuf,
    remote: RemoteId,
    rel: String,
}

enum Level {
    Descend(Vec<Frame>),
    Aborted,
}

/// Mirrors a remote folder into a local tree. Local entries without a
/// remote counterpart are deleted; files are downloaded unless the local
/// md5 already matches the remote checksum.
pub struct PullEngine<'a, S> {
    store: &'a S,
    options: SyncOptions,
    gate: &'a mut dyn ConfirmationGate,
    tally: Tally<'a>,
}

impl<'a, S: RemoteStore> PullEngine<'a, S> {
    pub fn new(
        store: &'a S,
        options: SyncOptions,
        gate: &'a mut dyn ConfirmationGate,
        reporter: &'a mut dyn SyncReporter,
    ) -> Self {
        Self {
            store,
            options,
            gate,
            tally: Tally::new(reporter),
        }
    }

    pub async fn pull(
        mut self,
        local_root: &Path,
        remote_root: &RemoteId,
    ) -> Result<SyncOutcome, SyncError> {
        let span = info_span!("pull", local = %local_root.display(), remote = %remote_root);
        async move {
            let mut stack = vec![Frame {
                local: local_root.to_path_buf(),
                remote: remote_root.clone(),
                rel: String::new(),
            }];
            while let Some(frame) = stack.pop() {
                match self.pull_level(&frame).await? {
                    Level::Descend(children) => stack.extend(children.into_iter().rev()),
                    Level::Aborted => {
                        info!(at = %frame.rel, "deletion declined; pull aborted");
                        return Ok(SyncOutcome::Aborted(self.tally.report));
                    }
                }
            }
            Ok(SyncOutcome::Completed(self.tally.report))
        }
        .instrument(span)
        .await
    }

    async fn pull_level(&mut self, frame: &Frame) -> Result<Level, SyncError> {
        let mut remote_entries: Vec<RemoteEntry> = self
            .store
            .list_children(&frame.remote, KindFilter::All)
            .await
            .map_err(|source| SyncError::RemoteListing {
                folder: frame.remote.clone(),
                source,
            })?
            .into_iter()
            .filter(|entry| !local::is_internal(&entry.name))
            .collect();
        remote_entries.sort_by(|a, b| a.name.cmp(&b.name));
        let local_entries = local::list_local(&frame.local)
            .await
            .map_err(|source| SyncError::LocalListing {
                path: frame.local.clone(),
                source,
            })?
            .entries;
        debug!(
            dir = %frame.local.display(),
            local = local_entries.len(),
            remote = remote_entries.len(),
            "comparing level"
        );

        let remote_kinds: HashMap<&str, EntryKind> = remote_entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.kind))
            .collect();
        let (stale, kept): (Vec<LocalEntry>, Vec<LocalEntry>) = local_entries
            .into_iter()
            .partition(|entry| remote_kinds.get(entry.name.as_str()) != Some(&entry.kind));

        if !stale.is_empty() {
            let pending: Vec<PendingDeletion> = stale
                .iter()
                .map(|entry| PendingDeletion {
                    path: child_rel(&frame.rel, &entry.name),
                    kind: entry.kind,
                })
                .collect();
            if !confirm_deletions(&self.options, self.gate, DeletionSide::Local, &pending) {
                return Ok(Level::Aborted);
            }
            for (entry, pending) in stale.iter().zip(&pending) {
                self.tally.announce(SyncAction::Delete, &pending.path);
                match local::remove_entry(entry).await {
                    Ok(()) => self.tally.done(SyncAction::Delete),
                    Err(err) => self.tally.fail(&pending.path, &err),
                }
            }
        }

        let present: HashMap<&str, &LocalEntry> = kept
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();
        let mut children = Vec::new();
        for entry in &remote_entries {
            let rel = child_rel(&frame.rel, &entry.name);
            let target = frame.local.join(&entry.name);
            let exists = present.contains_key(entry.name.as_str());
            match entry.kind {
                EntryKind::Folder => {
                    if !exists && !self.create_local_folder(&target, &rel).await {
                        continue;
                    }
                    children.push(Frame {
                        local: target,
                        remote: entry.id.clone(),
                        rel,
                    });
                }
                EntryKind::File => self.pull_file(entry, &target, exists, &rel).await,
            }
        }
        Ok(Level::Descend(children))
    }

    async fn create_local_folder(&mut self, target: &Path, rel: &str) -> bool {
        self.tally.announce(SyncAction::CreateFolder, rel);
        match tokio::fs::create_dir(target).await {
            Ok(()) => {
                self.tally.done(SyncAction::CreateFolder);
                true
            }
            Err(err) => {
                self.tally.fail(rel, &err);
                false
            }
        }
    }

    async fn pull_file(&mut self, entry: &RemoteEntry, target: &Path, exists: bool, rel: &str) {
        if exists && self.matches_checksum(entry, target).await {
            debug!(path = rel, "checksum matches; skipping");
            self.tally.skip();
            return;
        }

        self.tally.announce(SyncAction::Download, rel);
        let store = self.store;
        let reporter = &mut *self.tally.reporter;
        let mut on_progress = |progress: TransferProgress| reporter.progress(rel, progress);
        let result = store
            .download(&entry.id, target, entry.checksum.as_deref(), &mut on_progress)
            .await;
        match result {
            Ok(()) => self.tally.done(SyncAction::Download),
            Err(err) => self.tally.fail(rel, &err),
        }
    }

    async fn matches_checksum(&self, entry: &RemoteEntry, target: &Path) -> bool {
        let Some(expected) = entry.checksum.as_deref() else {
            return false;
        };
        match local::file_md5(target).await {
            Ok(actual) => actual.eq_ignore_ascii_case(expected),
            Err(err) => {
                debug!(path = %target.display(), error = %err, "could not hash local file");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "pull_tests.rs"]
mod tests;
