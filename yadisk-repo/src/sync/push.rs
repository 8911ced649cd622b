use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{Instrument, debug, info, info_span};

use super::gate::{ConfirmationGate, DeletionSide, PendingDeletion};
use super::local::{self, LocalEntry};
use super::report::{SyncAction, SyncOptions, SyncOutcome, SyncReporter};
use super::store::{EntryKind, KindFilter, RemoteEntry, RemoteId, RemoteStore};
use super::{SyncError, Tally, child_rel, confirm_deletions};

/// Remote side of a pending directory: either known, or to be created
/// right before the directory is processed.
enum RemoteFolder {
    Existing(RemoteId),
    Missing { parent: RemoteId, name: String },
}

struct Frame {
    local: PathBuf,
    remote: RemoteFolder,
    rel: String,
}

enum Level {
    Descend(Vec<Frame>),
    Aborted,
}

/// Mirrors a local tree onto a remote folder. Remote entries without a
/// local counterpart are deleted; existing remote files are overwritten
/// only when the local copy changed after `reference_time`.
pub struct PushEngine<'a, S> {
    store: &'a S,
    options: SyncOptions,
    gate: &'a mut dyn ConfirmationGate,
    tally: Tally<'a>,
}

impl<'a, S: RemoteStore> PushEngine<'a, S> {
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

    pub async fn push(
        mut self,
        local_root: &Path,
        remote_root: &RemoteId,
    ) -> Result<SyncOutcome, SyncError> {
        let span = info_span!("push", local = %local_root.display(), remote = %remote_root);
        async move {
            let mut stack = vec![Frame {
                local: local_root.to_path_buf(),
                remote: RemoteFolder::Existing(remote_root.clone()),
                rel: String::new(),
            }];
            while let Some(frame) = stack.pop() {
                let Some(remote_id) = self.materialize(frame.remote, &frame.rel).await else {
                    continue;
                };
                match self.push_level(&frame.local, &remote_id, &frame.rel).await? {
                    Level::Descend(children) => stack.extend(children.into_iter().rev()),
                    Level::Aborted => {
                        info!(at = %frame.rel, "deletion declined; push aborted");
                        return Ok(SyncOutcome::Aborted(self.tally.report));
                    }
                }
            }
            Ok(SyncOutcome::Completed(self.tally.report))
        }
        .instrument(span)
        .await
    }

    async fn materialize(&mut self, remote: RemoteFolder, rel: &str) -> Option<RemoteId> {
        match remote {
            RemoteFolder::Existing(id) => Some(id),
            RemoteFolder::Missing { parent, name } => {
                self.tally.announce(SyncAction::CreateFolder, rel);
                match self.store.create_folder(&parent, &name).await {
                    Ok(id) => {
                        self.tally.done(SyncAction::CreateFolder);
                        Some(id)
                    }
                    Err(err) => {
                        self.tally.fail(rel, &err);
                        None
                    }
                }
            }
        }
    }

    async fn push_level(
        &mut self,
        dir: &Path,
        remote_id: &RemoteId,
        rel: &str,
    ) -> Result<Level, SyncError> {
        let local::LocalListing {
            entries: local_entries,
            unreadable,
        } = local::list_local(dir)
            .await
            .map_err(|source| SyncError::LocalListing {
                path: dir.to_path_buf(),
                source,
            })?;
        let remote_entries: Vec<RemoteEntry> = self
            .store
            .list_children(remote_id, KindFilter::All)
            .await
            .map_err(|source| SyncError::RemoteListing {
                folder: remote_id.clone(),
                source,
            })?
            .into_iter()
            .filter(|entry| !local::is_internal(&entry.name))
            .collect();
        debug!(
            dir = %dir.display(),
            local = local_entries.len(),
            remote = remote_entries.len(),
            "comparing level"
        );

        let local_kinds: HashMap<&str, EntryKind> = local_entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.kind))
            .collect();
        // A local name of unknown kind still exists; its remote twin stays.
        let (stale, remote_entries): (Vec<RemoteEntry>, Vec<RemoteEntry>) =
            remote_entries.into_iter().partition(|entry| {
                !unreadable.contains(&entry.name)
                    && local_kinds.get(entry.name.as_str()) != Some(&entry.kind)
            });

        if !stale.is_empty() {
            let pending: Vec<PendingDeletion> = stale
                .iter()
                .map(|entry| PendingDeletion {
                    path: child_rel(rel, &entry.name),
                    kind: entry.kind,
                })
                .collect();
            if !confirm_deletions(&self.options, self.gate, DeletionSide::Remote, &pending) {
                return Ok(Level::Aborted);
            }
            for (entry, pending) in stale.iter().zip(&pending) {
                self.tally.announce(SyncAction::Delete, &pending.path);
                match self.store.delete_entry(&entry.id).await {
                    Ok(()) => self.tally.done(SyncAction::Delete),
                    Err(err) => self.tally.fail(&pending.path, &err),
                }
            }
        }

        let remote_by_name: HashMap<&str, &RemoteEntry> = remote_entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry))
            .collect();
        let mut children = Vec::new();
        for entry in &local_entries {
            let entry_rel = child_rel(rel, &entry.name);
            let counterpart = remote_by_name.get(entry.name.as_str()).copied();
            match entry.kind {
                EntryKind::File => {
                    self.push_file(entry, counterpart, remote_id, &entry_rel)
                        .await
                }
                EntryKind::Folder => children.push(Frame {
                    local: entry.path.clone(),
                    remote: match counterpart {
                        Some(remote) => RemoteFolder::Existing(remote.id.clone()),
                        None => RemoteFolder::Missing {
                            parent: remote_id.clone(),
                            name: entry.name.clone(),
                        },
                    },
                    rel: entry_rel,
                }),
            }
        }
        Ok(Level::Descend(children))
    }

    async fn push_file(
        &mut self,
        entry: &LocalEntry,
        counterpart: Option<&RemoteEntry>,
        parent: &RemoteId,
        rel: &str,
    ) {
        let Some(remote) = counterpart else {
            self.tally.announce(SyncAction::CreateFile, rel);
            match self.store.create_file(parent, &entry.name, &entry.path).await {
                Ok(_) => self.tally.done(SyncAction::CreateFile),
                Err(err) => self.tally.fail(rel, &err),
            }
            return;
        };

        let modified = match local::modified_secs(&entry.path).await {
            Ok(modified) => modified,
            Err(err) => {
                self.tally.fail(rel, &err);
                return;
            }
        };
        if modified <= self.options.reference_time {
            debug!(path = rel, "unchanged since last sync");
            self.tally.skip();
            return;
        }
        self.tally.announce(SyncAction::UpdateFile, rel);
        match self.store.update_file(&remote.id, &entry.path).await {
            Ok(()) => self.tally.done(SyncAction::UpdateFile),
            Err(err) => self.tally.fail(rel, &err),
        }
    }
}

#[cfg(test)]
#[path = "push_tests.rs"]
mod tests;
