//! Paginated directory listings
//!
//! A List request captures its entries once into a [`ListingSnapshot`]; the
//! router then pulls pages out of it by offset until the snapshot reports
//! [`Cursor::EndOfSequence`]. A new List request builds a new snapshot.

use crate::protocol::{FileAttrs, NameEntry};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::time::{SystemTime, UNIX_EPOCH};

/// Attributes of one directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Base name of the entry
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
    /// File-type and permission bits
    pub mode: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileEntry {
    /// Build an entry from filesystem metadata
    pub fn from_metadata(name: impl Into<String>, metadata: &Metadata) -> Self {
        #[cfg(unix)]
        let (mode, uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (metadata.mode(), Some(metadata.uid()), Some(metadata.gid()))
        };

        #[cfg(not(unix))]
        let (mode, uid, gid) = {
            let bits = if metadata.is_dir() { 0o040_755 } else { 0o100_644 };
            let bits = if metadata.permissions().readonly() { bits & !0o222 } else { bits };
            (bits, None, None)
        };

        Self {
            name: name.into(),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            modified: metadata.modified().ok(),
            mode,
            uid,
            gid,
        }
    }

    /// Modification time in whole seconds since the epoch, clamped to `u32`
    pub fn mtime_secs(&self) -> Option<u32> {
        self.modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
    }

    /// SFTP attributes for ATTRS and NAME replies
    pub fn to_attrs(&self) -> FileAttrs {
        let mtime = self.mtime_secs();
        FileAttrs {
            size: Some(self.size),
            uid: self.uid,
            gid: self.gid,
            permissions: Some(self.mode),
            atime: mtime,
            mtime,
        }
    }

    /// `ls -l` style line for NAME replies
    pub fn longname(&self) -> String {
        let modified = self.modified.map_or_else(
            || "Jan  1 00:00".to_string(),
            |t| DateTime::<Utc>::from(t).format("%b %e %H:%M").to_string(),
        );

        format!(
            "{} {:>4} {:<8} {:<8} {:>8} {} {}",
            mode_string(self.mode),
            1,
            self.uid.unwrap_or(0),
            self.gid.unwrap_or(0),
            self.size,
            modified,
            self.name
        )
    }

    pub fn to_name_entry(&self) -> NameEntry {
        NameEntry {
            filename: self.name.clone(),
            longname: self.longname(),
            attrs: self.to_attrs(),
        }
    }
}

/// Render mode bits as `drwxr-xr-x`
fn mode_string(mode: u32) -> String {
    let kind = match mode & 0o170_000 {
        0o040_000 => 'd',
        0o120_000 => 'l',
        0o020_000 => 'c',
        0o060_000 => 'b',
        0o010_000 => 'p',
        0o140_000 => 's',
        _ => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// Whether a page exhausted the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Entries remain after this page
    More,
    /// This page reached the last entry (or there was nothing to return)
    EndOfSequence,
}

/// One page pulled from a lister
#[derive(Debug, PartialEq, Eq)]
pub struct Page<'a> {
    pub entries: &'a [FileEntry],
    pub cursor: Cursor,
}

impl Page<'_> {
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_end(&self) -> bool {
        self.cursor == Cursor::EndOfSequence
    }
}

/// Offset-based pull interface over a fixed sequence of entries
pub trait ListerAt: Send + Sync {
    /// Return up to `capacity` entries starting at `offset`.
    fn list_at(&self, offset: u64, capacity: usize) -> Page<'_>;

    /// Total number of entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable capture of a directory (or a single entry)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingSnapshot {
    entries: Vec<FileEntry>,
}

impl ListingSnapshot {
    pub const fn new(entries: Vec<FileEntry>) -> Self {
        Self { entries }
    }

    /// Snapshot holding one entry, used for stat-as-list
    pub fn single(entry: FileEntry) -> Self {
        Self { entries: vec![entry] }
    }
}

impl ListerAt for ListingSnapshot {
    fn list_at(&self, offset: u64, capacity: usize) -> Page<'_> {
        let total = self.entries.len();
        let start = match usize::try_from(offset) {
            Ok(start) if start < total => start,
            _ => {
                return Page {
                    entries: &[],
                    cursor: Cursor::EndOfSequence,
                };
            }
        };

        let end = start + capacity.min(total - start);
        let cursor = if end == total { Cursor::EndOfSequence } else { Cursor::More };

        Page {
            entries: &self.entries[start..end],
            cursor,
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
