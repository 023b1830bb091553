//! Routed file operations
//!
//! The router turns each SFTP packet into a [`Request`] and hands it to
//! exactly one handler capability.

use crate::protocol::{FileAttrs, OpenFlags};
use std::fmt;

/// File operation vocabulary
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Read,
    Write,
    Stat,
    Lstat,
    Setstat,
    Rename,
    Remove,
    Mkdir,
    Rmdir,
    Realpath,
    List,
}

impl Method {
    /// Name used in log events
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::Stat => "Stat",
            Self::Lstat => "Lstat",
            Self::Setstat => "Setstat",
            Self::Rename => "Rename",
            Self::Remove => "Remove",
            Self::Mkdir => "Mkdir",
            Self::Rmdir => "Rmdir",
            Self::Realpath => "Realpath",
            Self::List => "List",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a List request enumerates its path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListMode {
    /// Every entry of the directory
    #[default]
    Directory,
    /// The path itself as a one-entry listing (stat-as-list)
    Single,
}

/// One file operation, consumed by a single handler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Which handler call this request is for
    pub method: Method,
    /// Path as sent by the peer
    pub filepath: String,
    /// Destination path for Rename
    pub target: Option<String>,
    /// Attributes carried by Setstat and Mkdir
    pub attrs: FileAttrs,
    /// Open flags carried by Read and Write
    pub flags: OpenFlags,
    pub list_mode: ListMode,
}

impl Request {
    /// A request with no target, default attributes and Directory listing
    pub fn new(method: Method, filepath: impl Into<String>) -> Self {
        Self {
            method,
            filepath: filepath.into(),
            target: None,
            attrs: FileAttrs::default(),
            flags: OpenFlags(0),
            list_mode: ListMode::Directory,
        }
    }

    /// Set the Rename destination.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn with_attrs(mut self, attrs: FileAttrs) -> Self {
        self.attrs = attrs;
        self
    }

    #[must_use]
    pub const fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Switch between directory and stat-as-list enumeration.
    #[must_use]
    pub const fn with_list_mode(mut self, mode: ListMode) -> Self {
        self.list_mode = mode;
        self
    }
}

/// Result of a `file_cmd` call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdOutcome {
    /// The operation ran
    Done,
    /// Accepted but deliberately not performed; the filesystem is unchanged
    Unimplemented(Method),
}
