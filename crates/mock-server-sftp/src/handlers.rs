//! Handler capabilities
//!
//! The router talks to the filesystem through four independent traits. Each
//! can be implemented and replaced on its own; [`Handlers`] is the bundle a
//! channel is bound to.
//!
//! ```no_run
//! use mock_server_sftp::handlers::Handlers;
//! use mock_server_sftp::vfs::VirtualFs;
//! use std::sync::Arc;
//!
//! let vfs = Arc::new(VirtualFs::new("/srv/sftp"));
//! let handlers = Handlers::from_vfs(vfs);
//! ```

use crate::Result;
use crate::lister::ListerAt;
use crate::request::{CmdOutcome, Request};
use crate::vfs::VirtualFs;
use async_trait::async_trait;
use std::sync::Arc;

/// Positioned reader returned by Read
#[async_trait]
pub trait ReaderAt: Send {
    /// Read up to `len` bytes at `offset`. An empty buffer means end of file.
    async fn read_at(&mut self, offset: u64, len: u32) -> Result<Vec<u8>>;
}

/// Positioned writer returned by Write
#[async_trait]
pub trait WriterAt: Send {
    /// Write all of `data` at `offset`.
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
}

/// Opens files for reading
#[async_trait]
pub trait FileReader: Send + Sync {
    /// Open `request.filepath` and return a positioned reader.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileNotFound`] or
    /// [`crate::Error::PermissionDenied`] when the file cannot be opened.
    async fn file_read(&self, request: &Request) -> Result<Box<dyn ReaderAt>>;
}

/// Opens files for writing
#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Create or truncate `request.filepath` and return a positioned writer.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created.
    async fn file_write(&self, request: &Request) -> Result<Box<dyn WriterAt>>;
}

/// Path commands that produce no data stream
#[async_trait]
pub trait FileCmd: Send + Sync {
    /// Run one path command.
    ///
    /// # Errors
    ///
    /// Returns the filesystem error of a command that was attempted and failed.
    async fn file_cmd(&self, request: &Request) -> Result<CmdOutcome>;
}

/// Produces listings for directories and single paths
#[async_trait]
pub trait FileLister: Send + Sync {
    /// Snapshot the listing described by `request.list_mode`.
    ///
    /// # Errors
    ///
    /// Returns an error when the path cannot be read.
    async fn file_list(&self, request: &Request) -> Result<Box<dyn ListerAt>>;
}

/// Capability set bound to each serving channel
#[derive(Clone)]
#[allow(missing_docs)]
pub struct Handlers {
    pub reader: Arc<dyn FileReader>,
    pub writer: Arc<dyn FileWriter>,
    pub cmd: Arc<dyn FileCmd>,
    pub lister: Arc<dyn FileLister>,
}

impl Handlers {
    /// All four capabilities served by one filesystem adapter
    pub fn from_vfs(vfs: Arc<VirtualFs>) -> Self {
        Self {
            reader: vfs.clone(),
            writer: vfs.clone(),
            cmd: vfs.clone(),
            lister: vfs,
        }
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}
