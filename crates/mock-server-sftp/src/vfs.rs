//! Virtual filesystem adapter
//!
//! Executes routed requests against a real directory tree. Peer paths are
//! cleaned lexically and joined under the root; nothing stops a relative
//! `..` path from resolving above the root, but such paths are flagged and
//! logged.

use crate::handlers::{FileCmd, FileLister, FileReader, FileWriter, ReaderAt, WriterAt};
use crate::lister::{FileEntry, ListerAt, ListingSnapshot};
use crate::request::{CmdOutcome, ListMode, Method, Request};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::{debug, warn};

#[cfg(unix)]
const FILE_MODE: u32 = 0o644;
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// Peer path translated to a location under the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    full: PathBuf,
    escapes: bool,
}

impl ResolvedPath {
    /// Clean `peer` lexically and join it under `root`.
    pub fn resolve(root: &Path, peer: &str) -> Self {
        let rooted = peer.starts_with('/');
        let parts = clean_components(peer, rooted);

        let escapes = parts.first().is_some_and(|p| *p == "..");
        let mut full = root.to_path_buf();
        for part in parts {
            if part == ".." {
                full.pop();
            } else {
                full.push(part);
            }
        }

        Self { full, escapes }
    }

    pub fn as_path(&self) -> &Path {
        &self.full
    }

    /// Whether the cleaned path climbs above the root
    pub const fn escapes_root(&self) -> bool {
        self.escapes
    }
}

/// Cleaned absolute form of a peer path, `"/"` for empty or `"."`
pub fn clean_peer_path(peer: &str) -> String {
    let parts = clean_components(peer, true);
    format!("/{}", parts.join("/"))
}

/// Drop empty and `.` segments and fold `..` into its parent. A rooted path
/// cannot climb above `/`; a relative one keeps its leading `..` segments.
fn clean_components(peer: &str, rooted: bool) -> Vec<&str> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in peer.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    parts
}

/// Filesystem adapter over an immutable root
#[derive(Debug, Clone)]
pub struct VirtualFs {
    root: PathBuf,
}

impl VirtualFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a peer path, logging attempts to leave the root
    pub fn resolve(&self, peer: &str) -> ResolvedPath {
        let resolved = ResolvedPath::resolve(&self.root, peer);
        if resolved.escapes_root() {
            warn!(
                event = "path_escapes_root",
                peer_path = %peer,
                resolved = %resolved.as_path().display(),
                "Peer path resolves outside the root directory"
            );
        }
        resolved
    }

    async fn single_entry(&self, request: &Request) -> Result<ListingSnapshot> {
        let resolved = self.resolve(&request.filepath);
        let metadata = fs::metadata(resolved.as_path())
            .await
            .map_err(|e| Error::from_io(e, &request.filepath))?;

        let name = resolved
            .as_path()
            .file_name()
            .map_or_else(|| "/".to_string(), |n| n.to_string_lossy().into_owned());

        Ok(ListingSnapshot::single(FileEntry::from_metadata(name, &metadata)))
    }

    async fn directory_entries(&self, request: &Request) -> Result<ListingSnapshot> {
        let resolved = self.resolve(&request.filepath);
        let mut dir = fs::read_dir(resolved.as_path())
            .await
            .map_err(|e| Error::from_io(e, &request.filepath))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::from_io(e, &request.filepath))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata().await {
                Ok(metadata) => entries.push(FileEntry::from_metadata(name, &metadata)),
                Err(e) => {
                    warn!(
                        event = "list_entry_skipped",
                        path = %request.filepath,
                        entry = %name,
                        error = %e,
                        "Skipping unreadable directory entry"
                    );
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ListingSnapshot::new(entries))
    }
}

struct FsReader {
    file: File,
}

#[async_trait]
impl ReaderAt for FsReader {
    async fn read_at(&mut self, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        (&mut self.file).take(u64::from(len)).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

struct FsWriter {
    file: File,
}

#[async_trait]
impl WriterAt for FsWriter {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl FileReader for VirtualFs {
    async fn file_read(&self, request: &Request) -> Result<Box<dyn ReaderAt>> {
        let resolved = self.resolve(&request.filepath);
        let file = File::open(resolved.as_path())
            .await
            .map_err(|e| Error::from_io(e, &request.filepath))?;

        debug!(event = "file_opened", path = %request.filepath, mode = "read");
        Ok(Box::new(FsReader { file }))
    }
}

#[async_trait]
impl FileWriter for VirtualFs {
    async fn file_write(&self, request: &Request) -> Result<Box<dyn WriterAt>> {
        let resolved = self.resolve(&request.filepath);
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let file = options
            .open(resolved.as_path())
            .await
            .map_err(|e| Error::from_io(e, &request.filepath))?;

        debug!(event = "file_opened", path = %request.filepath, mode = "write");
        Ok(Box::new(FsWriter { file }))
    }
}

#[async_trait]
impl FileCmd for VirtualFs {
    async fn file_cmd(&self, request: &Request) -> Result<CmdOutcome> {
        let resolved = self.resolve(&request.filepath);
        let path = resolved.as_path();
        let io_err = |e| Error::from_io(e, &request.filepath);

        match request.method {
            Method::Stat | Method::Lstat => {
                let metadata = if request.method == Method::Lstat {
                    fs::symlink_metadata(path).await
                } else {
                    fs::metadata(path).await
                }
                .map_err(io_err)?;

                debug!(
                    event = "stat",
                    path = %request.filepath,
                    size = metadata.len(),
                    is_dir = metadata.is_dir(),
                );
                Ok(CmdOutcome::Done)
            }
            Method::Setstat | Method::Rename | Method::Realpath => {
                debug!(
                    event = "command_not_performed",
                    method = %request.method,
                    path = %request.filepath,
                    target = request.target.as_deref().unwrap_or(""),
                );
                Ok(CmdOutcome::Unimplemented(request.method))
            }
            Method::Remove => {
                fs::remove_file(path).await.map_err(io_err)?;
                debug!(event = "file_removed", path = %request.filepath);
                Ok(CmdOutcome::Done)
            }
            Method::Mkdir => {
                let mut builder = fs::DirBuilder::new();
                #[cfg(unix)]
                builder.mode(DIR_MODE);
                builder.create(path).await.map_err(io_err)?;
                debug!(event = "directory_created", path = %request.filepath);
                Ok(CmdOutcome::Done)
            }
            Method::Rmdir => {
                fs::remove_dir_all(path).await.map_err(io_err)?;
                debug!(event = "directory_removed", path = %request.filepath);
                Ok(CmdOutcome::Done)
            }
            Method::Read | Method::Write | Method::List => {
                Err(Error::NotSupported(request.method.to_string()))
            }
        }
    }
}

#[async_trait]
impl FileLister for VirtualFs {
    async fn file_list(&self, request: &Request) -> Result<Box<dyn ListerAt>> {
        let snapshot = match request.list_mode {
            ListMode::Single => self.single_entry(request).await?,
            ListMode::Directory => self.directory_entries(request).await?,
        };

        debug!(
            event = "listing_captured",
            path = %request.filepath,
            mode = ?request.list_mode,
            entries = snapshot.len(),
        );
        Ok(Box::new(snapshot))
    }
}
