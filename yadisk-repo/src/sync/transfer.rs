use std::io;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Body, Client, header};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::trace;
use url::Url;

use super::local::STAGING_SUFFIX;
use super::store::TransferProgress;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("local file error: {0}")]
    Io(#[from] io::Error),
    #[error("downloaded content has md5 {actual}, expected {expected}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Moves file bodies to and from the hrefs handed out by the Disk API.
/// The hrefs are pre-signed, so no token travels with these requests.
#[derive(Clone, Default)]
pub struct TransferClient {
    http: Client,
}

impl TransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Streams `href` into `target`. The body lands in a staging sibling
    /// first and replaces `target` only once it is complete and, when a
    /// checksum is given, verified.
    pub async fn download_to_path(
        &self,
        href: &Url,
        target: &Path,
        expected_md5: Option<&str>,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), TransferError> {
        let response = self.http.get(href.clone()).send().await?.error_for_status()?;
        let total = response.content_length();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut staged = Staged::create(target).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            staged.append(&chunk?).await?;
            progress(TransferProgress {
                received: staged.written,
                total,
            });
        }

        if let Some(expected) = expected_md5 {
            let actual = staged.take_md5_hex();
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(TransferError::ChecksumMismatch {
                    expected: expected.to_ascii_lowercase(),
                    actual,
                });
            }
        }
        staged.commit(target).await
    }

    pub async fn upload_from_path(&self, href: &Url, source: &Path) -> Result<(), TransferError> {
        let file = File::open(source).await?;
        let length = file.metadata().await?.len();
        trace!(bytes = length, "uploading body");
        self.http
            .put(href.clone())
            .header(header::CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Download in progress. Dropping it without `commit` leaves the staging
/// file for `Drop` to remove.
struct Staged {
    path: PathBuf,
    file: Option<File>,
    digest: md5::Context,
    written: u64,
}

impl Staged {
    async fn create(target: &Path) -> io::Result<Self> {
        let path = staging_path(target);
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            digest: md5::Context::new(),
            written: 0,
        })
    }

    async fn append(&mut self, chunk: &[u8]) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
        }
        self.digest.consume(chunk);
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Hex md5 of everything appended so far; resets the running digest.
    fn take_md5_hex(&mut self) -> String {
        let digest = std::mem::replace(&mut self.digest, md5::Context::new());
        format!("{:x}", digest.compute())
    }

    async fn commit(mut self, target: &Path) -> Result<(), TransferError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&self.path, target).await?;
        self.path = PathBuf::new();
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.path.as_os_str().is_empty() {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// `notes.txt` stages as `.notes.txt.ydpart` next to it.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}{STAGING_SUFFIX}"))
}
