//! # Mock Server SFTP
//!
//! SFTP test-double gateway: terminates SSH, authenticates peers with the
//! fixed-literal credential gate, and serves a fixed vocabulary of file
//! operations against a sandboxed directory tree.
//!
//! This crate implements the SFTP protocol as defined in:
//! - RFC 4251: SSH Protocol Architecture
//! - RFC 4252: SSH Authentication Protocol
//! - RFC 4253: SSH Transport Layer Protocol
//! - RFC 4254: SSH Connection Protocol
//! - draft-ietf-secsh-filexfer-02: SSH File Transfer Protocol
//!
//! ## Layout
//!
//! - [`server`]: TCP listener, SSH handshake, password authentication
//! - [`multiplexer`]: channel admission (only `session` channels)
//! - [`negotiator`]: per-channel `sftp` subsystem state machine
//! - [`router`]: SFTP request/response loop bound to one channel
//! - [`vfs`]: filesystem adapter behind the four [`handlers`] capabilities
//! - [`lister`]: paginated, offset-based directory listings
//! - [`client`]: SFTP client used by the integration tests

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod lister;
pub mod multiplexer;
pub mod negotiator;
pub mod protocol;
pub mod request;
pub mod router;
pub mod server;
pub mod vfs;

pub use client::{Connection, SftpClient};
pub use config::{Config, LogFormat, LoggingConfig};
pub use error::{Error, Result};
pub use handlers::Handlers;
pub use lister::{Cursor, FileEntry, ListerAt, ListingSnapshot, Page};
pub use request::{CmdOutcome, ListMode, Method, Request};
pub use server::Server;
pub use vfs::VirtualFs;
