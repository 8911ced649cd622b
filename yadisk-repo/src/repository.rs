use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::sync::SyncError;
use crate::sync::gate::ConfirmationGate;
use crate::sync::local::{MARKER_FILE_NAME, MARKER_TEMP_NAME};
use crate::sync::paths::{PathError, display_name, normalize_logical};
use crate::sync::pull::PullEngine;
use crate::sync::push::PushEngine;
use crate::sync::report::{DeletionPolicy, SyncOptions, SyncOutcome, SyncReport, SyncReporter};
use crate::sync::resolver::{Creation, PathResolver, ResolveError};
use crate::sync::store::{RemoteId, RemoteStore, StoreError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("a repository already exists in {}", .0.display())]
    Conflict(PathBuf),
    #[error("remote folder {0} already exists; use `clone` to fetch it")]
    AlreadyExists(String),
    #[error(
        "repository in {} is corrupt: remote folder {path} cannot be found; run `init` to create it again",
        root.display()
    )]
    Corrupt { root: PathBuf, path: String },
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("repository marker {} is invalid: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

impl RepoError {
    pub fn is_connectivity(&self) -> bool {
        match self {
            RepoError::Store(err) => err.is_connectivity(),
            RepoError::Sync(err) => err.is_connectivity(),
            RepoError::Resolve(err) => err.is_connectivity(),
            _ => false,
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        RepoError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Contents of the `.ydrepo` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Logical remote path, `/a/b`.
    pub path: String,
    pub name: String,
    /// Epoch seconds of the last completed push or pull.
    pub sync_time: f64,
    /// `None` when the path did not resolve at clone time.
    #[serde(default)]
    pub path_id: Option<RemoteId>,
}

impl RepositoryConfig {
    pub fn new(logical_path: &str, path_id: Option<RemoteId>) -> Result<Self, PathError> {
        Ok(Self {
            path: normalize_logical(logical_path)?,
            name: display_name(logical_path)?,
            sync_time: 0.0,
            path_id,
        })
    }

    /// `Ok(None)` when `root` holds no marker.
    pub async fn load(root: &Path) -> Result<Option<Self>, RepoError> {
        let path = marker_path(root);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RepoError::io(&path, err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| RepoError::Json { path, source })
    }

    /// Replaces the marker through a temporary sibling.
    pub async fn save(&self, root: &Path) -> Result<(), RepoError> {
        let path = marker_path(root);
        let tmp = root.join(MARKER_TEMP_NAME);
        let json = serde_json::to_vec_pretty(self).map_err(|source| RepoError::Json {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|err| RepoError::io(&tmp, err))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|err| RepoError::io(&path, err))
    }

    fn advance(&mut self, candidate: f64) {
        self.sync_time = self.sync_time.max(candidate);
    }
}

pub fn marker_path(root: &Path) -> PathBuf {
    root.join(MARKER_FILE_NAME)
}

async fn has_marker(root: &Path) -> Result<bool, RepoError> {
    let path = marker_path(root);
    tokio::fs::try_exists(&path)
        .await
        .map_err(|err| RepoError::io(&path, err))
}

fn now_secs() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1e9
}

/// A local tree bound to a remote folder.
#[derive(Debug)]
pub struct Repository<S> {
    root: PathBuf,
    config: RepositoryConfig,
    store: S,
    corrupt: bool,
}

impl<S: RemoteStore> Repository<S> {
    /// Loads the binding in `root`; `Ok(None)` when there is none.
    pub async fn open(store: S, root: impl Into<PathBuf>) -> Result<Option<Self>, RepoError> {
        let root = root.into();
        let Some(config) = RepositoryConfig::load(&root).await? else {
            return Ok(None);
        };
        let corrupt = match &config.path_id {
            Some(id) => !store.folder_exists(id).await?,
            None => true,
        };
        if corrupt {
            warn!(root = %root.display(), path = %config.path, "bound remote folder is missing");
        }
        Ok(Some(Self {
            root,
            config,
            store,
            corrupt,
        }))
    }

    /// Creates `logical_path` remotely and binds `root` to it. Both an
    /// existing binding and an existing remote folder are refused.
    pub async fn init(
        store: S,
        root: impl Into<PathBuf>,
        logical_path: &str,
    ) -> Result<Self, RepoError> {
        let root = root.into();
        if has_marker(&root).await? {
            return Err(RepoError::Conflict(root));
        }
        let path = normalize_logical(logical_path)?;
        let id = match PathResolver::new(&store)
            .create_fail_if_exists(logical_path)
            .await?
        {
            Creation::Created(id) => id,
            Creation::AlreadyExists(_) => return Err(RepoError::AlreadyExists(path)),
        };
        let config = RepositoryConfig::new(logical_path, Some(id))?;
        config.save(&root).await?;
        info!(root = %root.display(), path = %config.path, "repository initialised");
        Ok(Self {
            root,
            config,
            store,
            corrupt: false,
        })
    }

    /// Binds `container/<name>` to `logical_path`, where `<name>` is the
    /// last path segment. The marker is written even when the path does not
    /// resolve; the result is then corrupt and nothing is pulled.
    pub async fn clone_into(
        store: S,
        container: &Path,
        logical_path: &str,
    ) -> Result<Self, RepoError> {
        let root = container.join(display_name(logical_path)?);
        if has_marker(&root).await? {
            return Err(RepoError::Conflict(root));
        }
        let path_id = PathResolver::new(&store).resolve(logical_path).await?;
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|err| RepoError::io(&root, err))?;
        let corrupt = path_id.is_none();
        let config = RepositoryConfig::new(logical_path, path_id)?;
        config.save(&root).await?;
        debug!(root = %root.display(), corrupt, "clone bound");
        Ok(Self {
            root,
            config,
            store,
            corrupt,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    pub async fn push(
        &mut self,
        deletion: DeletionPolicy,
        gate: &mut dyn ConfirmationGate,
        reporter: &mut dyn SyncReporter,
    ) -> Result<SyncOutcome, RepoError> {
        let remote = self.bound_folder()?;
        let started = now_secs();
        let options = SyncOptions::new(deletion, self.config.sync_time);
        let outcome = PushEngine::new(&self.store, options, gate, reporter)
            .push(&self.root, &remote)
            .await?;
        self.finish(&outcome, started).await?;
        Ok(outcome)
    }

    pub async fn pull(
        &mut self,
        deletion: DeletionPolicy,
        gate: &mut dyn ConfirmationGate,
        reporter: &mut dyn SyncReporter,
    ) -> Result<SyncOutcome, RepoError> {
        let remote = self.bound_folder()?;
        let options = SyncOptions::new(deletion, self.config.sync_time);
        let outcome = PullEngine::new(&self.store, options, gate, reporter)
            .pull(&self.root, &remote)
            .await?;
        self.finish(&outcome, now_secs()).await?;
        Ok(outcome)
    }

    fn bound_folder(&self) -> Result<RemoteId, RepoError> {
        match (&self.config.path_id, self.corrupt) {
            (Some(id), false) => Ok(id.clone()),
            _ => Err(RepoError::Corrupt {
                root: self.root.clone(),
                path: self.config.path.clone(),
            }),
        }
    }

    async fn finish(&mut self, outcome: &SyncOutcome, candidate: f64) -> Result<(), RepoError> {
        let SyncOutcome::Completed(report) = outcome else {
            debug!("sync aborted; keeping previous sync time");
            return Ok(());
        };
        warn_failures(report);
        self.config.advance(candidate);
        self.config.save(&self.root).await
    }
}

fn warn_failures(report: &SyncReport) {
    if report.failures.is_empty() {
        return;
    }
    let paths: Vec<&str> = report.failures.iter().map(|f| f.path.as_str()).collect();
    warn!(
        failed = ?paths,
        "sync time advanced although some entries failed"
    );
}

#[cfg(test)]
#[path = "repository_tests.rs"]
mod tests;
