use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::paths::join_remote;
use super::store::{
    EntryKind, KindFilter, RemoteEntry, RemoteId, RemoteStore, StoreError, TransferProgress,
};

pub const MEMORY_ROOT: &str = "mem:/";

#[derive(Debug, Clone)]
enum Node {
    Folder,
    File(Vec<u8>),
}

/// How many mutating (and listing) calls reached the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub lists: usize,
    pub folder_creates: usize,
    pub file_creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub downloads: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.folder_creates + self.file_creates + self.updates + self.deletes
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    calls: CallCounts,
    failing_uploads: HashSet<String>,
    failing_downloads: HashSet<String>,
}

/// Tree held in memory; ids are `mem:/`-rooted paths. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

fn key(rel: &str) -> String {
    let rel = rel.trim_matches('/');
    if rel.is_empty() {
        MEMORY_ROOT.to_string()
    } else {
        format!("{MEMORY_ROOT}{rel}")
    }
}

fn child_prefix(folder: &str) -> String {
    if folder.ends_with('/') {
        folder.to_string()
    } else {
        format!("{folder}/")
    }
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn id(&self, rel: &str) -> RemoteId {
        RemoteId::new(key(rel))
    }

    /// Adds a folder and any missing ancestors.
    pub fn add_folder(&self, rel: &str) -> RemoteId {
        let mut inner = self.lock();
        let mut current = String::new();
        for segment in rel.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            inner.nodes.entry(key(&current)).or_insert(Node::Folder);
        }
        RemoteId::new(key(rel))
    }

    pub fn add_file(&self, rel: &str, content: &[u8]) -> RemoteId {
        if let Some((parent, _)) = rel.rsplit_once('/') {
            self.add_folder(parent);
        }
        self.lock()
            .nodes
            .insert(key(rel), Node::File(content.to_vec()));
        RemoteId::new(key(rel))
    }

    pub fn file(&self, rel: &str) -> Option<Vec<u8>> {
        match self.lock().nodes.get(&key(rel)) {
            Some(Node::File(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn is_folder(&self, rel: &str) -> bool {
        rel.trim_matches('/').is_empty()
            || matches!(self.lock().nodes.get(&key(rel)), Some(Node::Folder))
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.lock().nodes.contains_key(&key(rel))
    }

    /// Every entry as a root-relative path, folders suffixed with `/`.
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .nodes
            .iter()
            .map(|(k, node)| {
                let rel = &k[MEMORY_ROOT.len()..];
                match node {
                    Node::Folder => format!("{rel}/"),
                    Node::File(_) => rel.to_string(),
                }
            })
            .collect()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = CallCounts::default();
    }

    /// Makes every upload of an entry called `name` fail.
    pub fn fail_uploads_named(&self, name: &str) {
        self.lock().failing_uploads.insert(name.to_string());
    }

    /// Makes every download of an entry called `name` fail.
    pub fn fail_downloads_named(&self, name: &str) {
        self.lock().failing_downloads.insert(name.to_string());
    }

    fn ensure_folder(inner: &Inner, id: &RemoteId) -> Result<(), StoreError> {
        if id.as_str() == MEMORY_ROOT
            || matches!(inner.nodes.get(id.as_str()), Some(Node::Folder))
        {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    fn check_upload(inner: &Inner, id: &str) -> Result<(), StoreError> {
        let name = id.rsplit('/').next().unwrap_or(id);
        if inner.failing_uploads.contains(name) {
            return Err(StoreError::OperationFailed(format!("upload of {id} refused")));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    fn root(&self) -> RemoteId {
        RemoteId::new(MEMORY_ROOT)
    }

    async fn folder_exists(&self, id: &RemoteId) -> Result<bool, StoreError> {
        Ok(Self::ensure_folder(&self.lock(), id).is_ok())
    }

    async fn list_children(
        &self,
        folder: &RemoteId,
        filter: KindFilter,
    ) -> Result<Vec<RemoteEntry>, StoreError> {
        let mut inner = self.lock();
        inner.calls.lists += 1;
        Self::ensure_folder(&inner, folder)?;
        let prefix = child_prefix(folder.as_str());
        let entries = inner
            .nodes
            .iter()
            .filter_map(|(k, node)| {
                let name = k.strip_prefix(&prefix)?;
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                let (kind, checksum) = match node {
                    Node::Folder => (EntryKind::Folder, None),
                    Node::File(bytes) => (EntryKind::File, Some(self::checksum(bytes))),
                };
                filter.accepts(kind).then(|| RemoteEntry {
                    name: name.to_string(),
                    id: RemoteId::new(k.clone()),
                    kind,
                    checksum,
                })
            })
            .collect();
        Ok(entries)
    }

    async fn create_folder(&self, parent: &RemoteId, name: &str) -> Result<RemoteId, StoreError> {
        let mut inner = self.lock();
        inner.calls.folder_creates += 1;
        Self::ensure_folder(&inner, parent)?;
        let id = join_remote(parent.as_str(), name)
            .map_err(|err| StoreError::OperationFailed(err.to_string()))?;
        if inner.nodes.contains_key(&id) {
            return Err(StoreError::OperationFailed(format!("{id} already exists")));
        }
        inner.nodes.insert(id.clone(), Node::Folder);
        Ok(RemoteId::new(id))
    }

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        source: &Path,
    ) -> Result<RemoteId, StoreError> {
        let content = tokio::fs::read(source).await?;
        let mut inner = self.lock();
        inner.calls.file_creates += 1;
        Self::ensure_folder(&inner, parent)?;
        let id = join_remote(parent.as_str(), name)
            .map_err(|err| StoreError::OperationFailed(err.to_string()))?;
        Self::check_upload(&inner, &id)?;
        if inner.nodes.contains_key(&id) {
            return Err(StoreError::OperationFailed(format!("{id} already exists")));
        }
        inner.nodes.insert(id.clone(), Node::File(content));
        Ok(RemoteId::new(id))
    }

    async fn update_file(&self, id: &RemoteId, source: &Path) -> Result<(), StoreError> {
        let content = tokio::fs::read(source).await?;
        let mut inner = self.lock();
        inner.calls.updates += 1;
        Self::check_upload(&inner, id.as_str())?;
        match inner.nodes.get_mut(id.as_str()) {
            Some(Node::File(bytes)) => {
                *bytes = content;
                Ok(())
            }
            _ => Err(StoreError::NotFound(id.to_string())),
        }
    }

    async fn delete_entry(&self, id: &RemoteId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.deletes += 1;
        if inner.nodes.remove(id.as_str()).is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let prefix = child_prefix(id.as_str());
        inner.nodes.retain(|k, _| !k.starts_with(&prefix));
        Ok(())
    }

    async fn download(
        &self,
        id: &RemoteId,
        target: &Path,
        expected_checksum: Option<&str>,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), StoreError> {
        let content = {
            let mut inner = self.lock();
            inner.calls.downloads += 1;
            let name = id.as_str().rsplit('/').next().unwrap_or_default();
            if inner.failing_downloads.contains(name) {
                return Err(StoreError::OperationFailed(format!("download of {id} refused")));
            }
            match inner.nodes.get(id.as_str()) {
                Some(Node::File(bytes)) => bytes.clone(),
                _ => return Err(StoreError::NotFound(id.to_string())),
            }
        };
        if let Some(expected) = expected_checksum {
            if checksum(&content) != expected {
                return Err(StoreError::OperationFailed(format!(
                    "checksum mismatch for {id}"
                )));
            }
        }
        tokio::fs::write(target, &content).await?;
        let total = content.len() as u64;
        progress(TransferProgress {
            received: total,
            total: Some(total),
        });
        Ok(())
    }
}
