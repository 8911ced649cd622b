use std::path::Path;

use tracing::debug;
use yadisk_core::{DISK_ROOT, OperationStatus, Resource, ResourceType, YadiskClient};

use super::backoff::{Backoff, retry_transient};
use super::paths::join_remote;
use super::store::{
    EntryKind, KindFilter, RemoteEntry, RemoteId, RemoteStore, StoreError, TransferProgress,
};
use super::transfer::TransferClient;

const DEFAULT_PAGE_SIZE: u32 = 100;
const API_ATTEMPTS: u32 = 4;
const OPERATION_POLLS: u32 = 10;

/// [`RemoteStore`] backed by the Yandex Disk REST API. Identifiers are the
/// `disk:/…` resource paths the API reports.
#[derive(Clone)]
pub struct DiskStore {
    client: YadiskClient,
    transfer: TransferClient,
    backoff: Backoff,
    page_size: u32,
    delete_permanently: bool,
}

impl DiskStore {
    pub fn new(client: YadiskClient) -> Self {
        Self {
            client,
            transfer: TransferClient::new(),
            backoff: Backoff::default(),
            page_size: DEFAULT_PAGE_SIZE,
            delete_permanently: false,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Skip the Disk trash when deleting.
    pub fn with_permanent_delete(mut self, permanently: bool) -> Self {
        self.delete_permanently = permanently;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn client(&self) -> &YadiskClient {
        &self.client
    }

    async fn upload(&self, path: &str, source: &Path, overwrite: bool) -> Result<(), StoreError> {
        let link = retry_transient(&self.backoff, API_ATTEMPTS, "upload link", || {
            self.client.upload_link(path, overwrite)
        })
        .await?;
        self.transfer
            .upload_from_path(&link.href, source)
            .await?;
        Ok(())
    }

    async fn wait_for_operation(&self, operation_url: &str) -> Result<(), StoreError> {
        for attempt in 0..OPERATION_POLLS {
            match self.client.operation_status(operation_url).await? {
                OperationStatus::Success => return Ok(()),
                OperationStatus::Failure => {
                    return Err(StoreError::OperationFailed(operation_url.to_string()));
                }
                OperationStatus::InProgress => {
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                }
            }
        }
        Err(StoreError::OperationFailed(format!(
            "{operation_url} still in progress after {OPERATION_POLLS} polls"
        )))
    }
}

fn to_entry(resource: Resource) -> RemoteEntry {
    let kind = match resource.resource_type {
        ResourceType::File => EntryKind::File,
        ResourceType::Dir => EntryKind::Folder,
    };
    RemoteEntry {
        name: resource.name,
        id: RemoteId::new(resource.path),
        kind,
        checksum: match kind {
            EntryKind::File => resource.md5,
            EntryKind::Folder => None,
        },
    }
}

impl RemoteStore for DiskStore {
    fn root(&self) -> RemoteId {
        RemoteId::new(DISK_ROOT)
    }

    async fn folder_exists(&self, id: &RemoteId) -> Result<bool, StoreError> {
        let result = retry_transient(&self.backoff, API_ATTEMPTS, "stat", || {
            self.client.stat(id.as_str())
        })
        .await;
        match result {
            Ok(resource) => Ok(resource.resource_type == ResourceType::Dir),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_children(
        &self,
        folder: &RemoteId,
        filter: KindFilter,
    ) -> Result<Vec<RemoteEntry>, StoreError> {
        debug!(folder = %folder, "listing remote folder");
        let items = retry_transient(&self.backoff, API_ATTEMPTS, "list", || {
            self.client.list_all(folder.as_str(), self.page_size)
        })
        .await?;
        Ok(items
            .into_iter()
            .map(to_entry)
            .filter(|entry| filter.accepts(entry.kind))
            .collect())
    }

    async fn create_folder(&self, parent: &RemoteId, name: &str) -> Result<RemoteId, StoreError> {
        let path = join_remote(parent.as_str(), name)
            .map_err(|err| StoreError::OperationFailed(err.to_string()))?;
        debug!(path = %path, "creating remote folder");
        retry_transient(&self.backoff, API_ATTEMPTS, "mkdir", || {
            self.client.make_folder(&path)
        })
        .await?;
        Ok(RemoteId::new(path))
    }

    async fn create_file(
        &self,
        parent: &RemoteId,
        name: &str,
        source: &Path,
    ) -> Result<RemoteId, StoreError> {
        let path = join_remote(parent.as_str(), name)
            .map_err(|err| StoreError::OperationFailed(err.to_string()))?;
        debug!(path = %path, source = %source.display(), "uploading new remote file");
        self.upload(&path, source, false).await?;
        Ok(RemoteId::new(path))
    }

    async fn update_file(&self, id: &RemoteId, source: &Path) -> Result<(), StoreError> {
        debug!(path = %id, source = %source.display(), "overwriting remote file");
        self.upload(id.as_str(), source, true).await
    }

    async fn delete_entry(&self, id: &RemoteId) -> Result<(), StoreError> {
        debug!(path = %id, permanently = self.delete_permanently, "deleting remote entry");
        let link = retry_transient(&self.backoff, API_ATTEMPTS, "delete", || {
            self.client.remove(id.as_str(), self.delete_permanently)
        })
        .await?;
        if let Some(link) = link {
            self.wait_for_operation(link.href.as_str()).await?;
        }
        Ok(())
    }

    async fn download(
        &self,
        id: &RemoteId,
        target: &Path,
        expected_checksum: Option<&str>,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), StoreError> {
        debug!(path = %id, target = %target.display(), "downloading remote file");
        let link = retry_transient(&self.backoff, API_ATTEMPTS, "download link", || {
            self.client.download_link(id.as_str())
        })
        .await?;
        self.transfer
            .download_to_path(&link.href, target, expected_checksum, progress)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_store(server: &MockServer) -> DiskStore {
        let client = YadiskClient::with_base_url(&server.uri(), "test-token").unwrap();
        DiskStore::new(client).with_backoff(Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            false,
        ))
    }

    #[tokio::test]
    async fn list_children_maps_kinds_and_checksums() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", "disk:/Repo"))
            .and(query_param("offset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_embedded": {
                    "limit": 100,
                    "offset": 0,
                    "total": 2,
                    "items": [
                        {"path": "disk:/Repo/a.txt", "name": "a.txt", "type": "file", "md5": "5d41402abc4b2a76b9719d911017c592"},
                        {"path": "disk:/Repo/sub", "name": "sub", "type": "dir"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let store = make_store(&server);
        let all = store
            .list_children(&RemoteId::new("disk:/Repo"), KindFilter::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, RemoteId::new("disk:/Repo/a.txt"));
        assert_eq!(
            all[0].checksum.as_deref(),
            Some("5d41402abc4b2a76b9719d911017c592")
        );
        assert_eq!(all[1].kind, EntryKind::Folder);

        let folders = store
            .list_children(&RemoteId::new("disk:/Repo"), KindFilter::Folders)
            .await
            .unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "sub");
    }

    #[tokio::test]
    async fn list_children_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "_embedded": {"limit": 100, "offset": 0, "total": 0, "items": []}
            })))
            .mount(&server)
            .await;

        let store = make_store(&server);
        let items = store
            .list_children(&RemoteId::new("disk:/Repo"), KindFilter::All)
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn folder_exists_is_false_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", "disk:/Gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = make_store(&server);
        assert!(!store.folder_exists(&RemoteId::new("disk:/Gone")).await.unwrap());
    }

    #[tokio::test]
    async fn create_file_requests_non_overwriting_link_and_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources/upload"))
            .and(query_param("path", "disk:/Repo/a.txt"))
            .and(query_param("overwrite", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "href": format!("{}/upload", server.uri()),
                "method": "PUT",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("a.txt");
        std::fs::write(&source, b"payload").unwrap();

        let store = make_store(&server);
        let id = store
            .create_file(&RemoteId::new("disk:/Repo"), "a.txt", &source)
            .await
            .unwrap();
        assert_eq!(id, RemoteId::new("disk:/Repo/a.txt"));
    }

    #[tokio::test]
    async fn delete_entry_waits_for_async_operation() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", "disk:/Repo/old"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
                "href": format!("{}/v1/disk/operations/7", server.uri()),
                "method": "GET",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/operations/7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "in-progress"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/operations/7"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "success"})),
            )
            .mount(&server)
            .await;

        let store = make_store(&server);
        store
            .delete_entry(&RemoteId::new("disk:/Repo/old"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn download_follows_link_into_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources/download"))
            .and(query_param("path", "disk:/Repo/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "href": format!("{}/file", server.uri()),
                "method": "GET",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let target = dir.path().join("a.txt");
        let store = make_store(&server);
        let mut calls = 0;
        store
            .download(
                &RemoteId::new("disk:/Repo/a.txt"),
                &target,
                Some("5d41402abc4b2a76b9719d911017c592"),
                &mut |_| calls += 1,
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read(target).unwrap(), b"hello");
        assert!(calls >= 1);
    }
}
