use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use yadisk_core::YadiskError;

use super::transfer::TransferError;

/// Opaque handle of a remote file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Files,
    Folders,
    All,
}

impl KindFilter {
    pub fn accepts(self, kind: EntryKind) -> bool {
        match self {
            KindFilter::Files => kind == EntryKind::File,
            KindFilter::Folders => kind == EntryKind::Folder,
            KindFilter::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub id: RemoteId,
    pub kind: EntryKind,
    /// Hex md5 of the content; only files carry one.
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    pub fn percent(&self) -> Option<u8> {
        let total = self.total.filter(|total| *total > 0)?;
        Some((self.received.min(total) * 100 / total) as u8)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("api error: {0}")]
    Api(#[from] YadiskError),
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("remote entry not found: {0}")]
    NotFound(String),
    #[error("remote operation failed: {0}")]
    OperationFailed(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Api(err) => err.is_not_found(),
            _ => false,
        }
    }

    pub fn is_connectivity(&self) -> bool {
        match self {
            StoreError::Api(err) => err.is_connectivity(),
            StoreError::Transfer(TransferError::Request(err)) => {
                err.is_connect() || err.is_timeout()
            }
            _ => false,
        }
    }
}

/// Hierarchical file store the engines synchronize against.
///
/// Every call is awaited to completion before the engines issue the next one,
/// so implementations need no internal ordering guarantees.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Identifier of the top-level folder logical paths are resolved from.
    fn root(&self) -> RemoteId;

    async fn folder_exists(&self, id: &RemoteId) -> Result<bool, StoreError>;

    async fn list_children(
        &self,
        folder: &RemoteId,
        filter: KindFilter,
    ) -> Result<Vec<RemoteEntry>, StoreError>;

    async fn create_folder(&self, parent: &RemoteId, name: &str) -> Result<RemoteId, StoreError>;

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        source: &Path,
    ) -> Result<RemoteId, StoreError>;

    async fn update_file(&self, id: &RemoteId, source: &Path) -> Result<(), StoreError>;

    async fn delete_entry(&self, id: &RemoteId) -> Result<(), StoreError>;

    /// Streams the content of `id` into `target`, replacing it. When
    /// `expected_checksum` is given the received bytes are verified first.
    async fn download(
        &self,
        id: &RemoteId,
        target: &Path,
        expected_checksum: Option<&str>,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_is_capped_and_needs_total() {
        let half = TransferProgress {
            received: 50,
            total: Some(200),
        };
        assert_eq!(half.percent(), Some(25));
        let over = TransferProgress {
            received: 300,
            total: Some(200),
        };
        assert_eq!(over.percent(), Some(100));
        let unknown = TransferProgress {
            received: 10,
            total: None,
        };
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn kind_filter_matches_kinds() {
        assert!(KindFilter::Files.accepts(EntryKind::File));
        assert!(!KindFilter::Files.accepts(EntryKind::Folder));
        assert!(KindFilter::Folders.accepts(EntryKind::Folder));
        assert!(KindFilter::All.accepts(EntryKind::File));
    }
}
