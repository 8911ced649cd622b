use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use md5::Context as Md5Context;
use tokio::io::AsyncReadExt;
use tracing::warn;

use super::store::EntryKind;

/// Hidden file at the root of a working tree that records its binding.
pub const MARKER_FILE_NAME: &str = ".ydrepo";
/// Sibling the marker is written to before it is renamed into place.
pub const MARKER_TEMP_NAME: &str = ".ydrepo.tmp";
/// Suffix of the hidden `.<name>.ydpart` files downloads stage into.
pub const STAGING_SUFFIX: &str = ".ydpart";

/// Names this tool writes for its own bookkeeping. They are never synced,
/// on either side and at any level.
pub fn is_internal(name: &str) -> bool {
    name == MARKER_FILE_NAME
        || name == MARKER_TEMP_NAME
        || (name.len() > STAGING_SUFFIX.len() + 1
            && name.starts_with('.')
            && name.ends_with(STAGING_SUFFIX))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// One directory level as seen on disk.
#[derive(Debug, Default)]
pub struct LocalListing {
    /// Sorted by name.
    pub entries: Vec<LocalEntry>,
    /// Names that exist but whose kind is unknown (dangling symlinks,
    /// permission errors). They must not be mistaken for deletions.
    pub unreadable: Vec<String>,
}

/// Children of `dir` without the internal files. Entries whose name is not
/// valid UTF-8 are skipped.
pub async fn list_local(dir: &Path) -> io::Result<LocalListing> {
    let mut listing = LocalListing::default();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %path.display(), "skipping entry with non UTF-8 name");
            continue;
        };
        if is_internal(&name) {
            continue;
        }
        // Follows symlinks, so a linked directory syncs as a directory.
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "entry kind unknown; leaving it alone");
                listing.unreadable.push(name);
                continue;
            }
        };
        let kind = if meta.is_dir() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        listing.entries.push(LocalEntry { name, path, kind });
    }
    listing.entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listing)
}

pub async fn file_md5(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = Md5Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        ctx.consume(&buf[..read]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// Modification time in fractional epoch seconds.
pub async fn modified_secs(path: &Path) -> io::Result<f64> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

pub async fn remove_entry(entry: &LocalEntry) -> io::Result<()> {
    match entry.kind {
        EntryKind::Folder => tokio::fs::remove_dir_all(&entry.path).await,
        EntryKind::File => tokio::fs::remove_file(&entry.path).await,
    }
}
