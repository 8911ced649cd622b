use thiserror::Error;
use tracing::debug;

use super::paths::{PathError, logical_segments};
use super::store::{KindFilter, RemoteId, RemoteStore, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ResolveError::Store(err) if err.is_connectivity())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation {
    Created(RemoteId),
    AlreadyExists(RemoteId),
}

impl Creation {
    pub fn id(&self) -> &RemoteId {
        match self {
            Creation::Created(id) | Creation::AlreadyExists(id) => id,
        }
    }
}

/// Walks slash-delimited logical paths from the store root, one folder
/// listing per segment.
pub struct PathResolver<'a, S> {
    store: &'a S,
}

impl<'a, S: RemoteStore> PathResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// `None` as soon as one segment has no matching folder.
    pub async fn resolve(&self, path: &str) -> Result<Option<RemoteId>, ResolveError> {
        let mut current = self.store.root();
        for segment in logical_segments(path)? {
            match self.find_folder(&current, segment).await? {
                Some(id) => current = id,
                None => {
                    debug!(path, missing = segment, "logical path does not resolve");
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    pub async fn resolve_or_create(&self, path: &str) -> Result<RemoteId, ResolveError> {
        Ok(self.walk_creating(path).await?.id().clone())
    }

    /// Like [`Self::resolve_or_create`], but tells whether the last segment
    /// was already there. The root always exists.
    pub async fn create_fail_if_exists(&self, path: &str) -> Result<Creation, ResolveError> {
        self.walk_creating(path).await
    }

    async fn walk_creating(&self, path: &str) -> Result<Creation, ResolveError> {
        let segments = logical_segments(path)?;
        let mut outcome = Creation::AlreadyExists(self.store.root());
        let mut creating = false;
        for segment in segments {
            let parent = outcome.id().clone();
            let existing = if creating {
                None
            } else {
                self.find_folder(&parent, segment).await?
            };
            outcome = match existing {
                Some(id) => Creation::AlreadyExists(id),
                None => {
                    creating = true;
                    debug!(parent = %parent, name = segment, "creating folder");
                    Creation::Created(self.store.create_folder(&parent, segment).await?)
                }
            };
        }
        Ok(outcome)
    }

    async fn find_folder(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<Option<RemoteId>, StoreError> {
        let children = self
            .store
            .list_children(parent, KindFilter::Folders)
            .await?;
        Ok(children
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.id))
    }
}
