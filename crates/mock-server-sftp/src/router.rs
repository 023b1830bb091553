//! SFTP request router
//!
//! Runs the sequential request/response loop for one channel. Every packet
//! becomes a [`Request`] for exactly one handler capability; handler errors
//! turn into STATUS replies and never end the loop. Only transport failures
//! and malformed framing do.

use crate::handlers::{Handlers, ReaderAt, WriterAt};
use crate::lister::ListerAt;
use crate::protocol::{
    FileAttrs, NameEntry, OpenFlags, RequestPacket, ResponsePacket, SFTP_VERSION, StatusCode,
    read_packet, write_packet,
};
use crate::request::{ListMode, Method, Request};
use crate::vfs::clean_peer_path;
use crate::{Error, Result};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Entries returned per READDIR reply
pub const READDIR_PAGE_SIZE: usize = 100;

/// Largest DATA payload per READ reply
pub const MAX_READ_LEN: u32 = 32 * 1024;

enum OpenHandle {
    Reader {
        path: String,
        reader: Box<dyn ReaderAt>,
    },
    Writer {
        path: String,
        writer: Box<dyn WriterAt>,
    },
    Dir {
        path: String,
        lister: Box<dyn ListerAt>,
        offset: u64,
    },
}

impl OpenHandle {
    fn path(&self) -> &str {
        match self {
            Self::Reader { path, .. } | Self::Writer { path, .. } | Self::Dir { path, .. } => path,
        }
    }
}

/// Binds one channel stream to a handler set
pub struct Router {
    handlers: Handlers,
    max_packet: u32,
    handles: HashMap<Vec<u8>, OpenHandle>,
    next_handle: u64,
}

impl Router {
    pub fn new(handlers: Handlers, max_packet: u32) -> Self {
        Self {
            handlers,
            max_packet,
            handles: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Serve until the peer closes the stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream fails, the first packet is not INIT,
    /// or a packet cannot be framed or attributed to a request id.
    pub async fn serve<S>(mut self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(first) = read_packet(&mut stream, self.max_packet).await? else {
            debug!(event = "sftp_closed_before_init");
            return Ok(());
        };

        match RequestPacket::decode(&first)? {
            RequestPacket::Init { version } => {
                info!(event = "sftp_init", client_version = version, server_version = SFTP_VERSION);
                let reply = ResponsePacket::Version {
                    version: SFTP_VERSION,
                };
                write_packet(&mut stream, &reply.encode()).await?;
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Expected INIT as first packet, got request {:?}",
                    other.id()
                )));
            }
        }

        let mut served = 0u64;
        while let Some(body) = read_packet(&mut stream, self.max_packet).await? {
            let response = match RequestPacket::decode(&body) {
                Ok(packet) => self.handle(packet).await,
                Err(e) => {
                    let Some(id) = peek_request_id(&body) else {
                        return Err(e);
                    };
                    warn!(event = "sftp_bad_message", request_id = id, error = %e);
                    ResponsePacket::from_error(id, &e)
                }
            };

            write_packet(&mut stream, &response.encode()).await?;
            served += 1;
        }

        info!(
            event = "sftp_session_ended",
            requests = served,
            open_handles = self.handles.len(),
        );
        Ok(())
    }

    /// Answer one decoded request.
    pub async fn handle(&mut self, packet: RequestPacket) -> ResponsePacket {
        let id = packet.id().unwrap_or(0);
        match self.dispatch(packet).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_client_error() {
                    debug!(event = "sftp_request_failed", request_id = id, error = %e);
                } else {
                    warn!(event = "sftp_request_failed", request_id = id, error = %e);
                }
                ResponsePacket::from_error(id, &e)
            }
        }
    }

    async fn dispatch(&mut self, packet: RequestPacket) -> Result<ResponsePacket> {
        match packet {
            RequestPacket::Init { .. } => Ok(ResponsePacket::Version {
                version: SFTP_VERSION,
            }),
            RequestPacket::Open {
                id,
                path,
                flags,
                attrs,
            } => {
                self.open(id, path, flags, attrs).await
            }
            RequestPacket::Close { id, handle } => {
                let open = self
                    .handles
                    .remove(&handle)
                    .ok_or_else(|| invalid_handle(&handle))?;
                debug!(event = "handle_closed", path = open.path());
                Ok(ok(id))
            }
            RequestPacket::Read {
                id,
                handle,
                offset,
                len,
            } => {
                let Some(OpenHandle::Reader { reader, .. }) = self.handles.get_mut(&handle) else {
                    return Err(invalid_handle(&handle));
                };
                let data = reader.read_at(offset, len.min(MAX_READ_LEN)).await?;
                if data.is_empty() {
                    Ok(ResponsePacket::status(id, StatusCode::Eof))
                } else {
                    Ok(ResponsePacket::Data { id, data })
                }
            }
            RequestPacket::Write {
                id,
                handle,
                offset,
                data,
            } => {
                let Some(OpenHandle::Writer { writer, .. }) = self.handles.get_mut(&handle) else {
                    return Err(invalid_handle(&handle));
                };
                writer.write_at(offset, &data).await?;
                Ok(ok(id))
            }
            RequestPacket::Stat { id, path } | RequestPacket::Lstat { id, path } => {
                stat(&self.handlers, id, path).await
            }
            RequestPacket::Fstat { id, handle } => {
                let path = self.handle_path(&handle)?;
                stat(&self.handlers, id, path).await
            }
            RequestPacket::Setstat { id, path, attrs } => {
                command(&self.handlers, id, Request::new(Method::Setstat, path).with_attrs(attrs))
                    .await
            }
            RequestPacket::Fsetstat { id, handle, attrs } => {
                let path = self.handle_path(&handle)?;
                command(&self.handlers, id, Request::new(Method::Setstat, path).with_attrs(attrs))
                    .await
            }
            RequestPacket::Opendir { id, path } => {
                let request = Request::new(Method::List, path);
                let lister = self.handlers.lister.file_list(&request).await?;
                let handle = self.insert(OpenHandle::Dir {
                    path: request.filepath,
                    lister,
                    offset: 0,
                });
                Ok(ResponsePacket::Handle { id, handle })
            }
            RequestPacket::Readdir { id, handle } => {
                let Some(OpenHandle::Dir { lister, offset, .. }) = self.handles.get_mut(&handle)
                else {
                    return Err(invalid_handle(&handle));
                };
                let page = lister.list_at(*offset, READDIR_PAGE_SIZE);
                if page.is_empty() && page.is_end() {
                    return Ok(ResponsePacket::status(id, StatusCode::Eof));
                }
                let entries: Vec<NameEntry> =
                    page.entries.iter().map(|entry| entry.to_name_entry()).collect();
                *offset += entries.len() as u64;
                Ok(ResponsePacket::Name { id, entries })
            }
            RequestPacket::Remove { id, path } => {
                command(&self.handlers, id, Request::new(Method::Remove, path)).await
            }
            RequestPacket::Mkdir { id, path, attrs } => {
                command(&self.handlers, id, Request::new(Method::Mkdir, path).with_attrs(attrs))
                    .await
            }
            RequestPacket::Rmdir { id, path } => {
                command(&self.handlers, id, Request::new(Method::Rmdir, path)).await
            }
            RequestPacket::Rename { id, from, to } => {
                command(&self.handlers, id, Request::new(Method::Rename, from).with_target(to))
                    .await
            }
            RequestPacket::Realpath { id, path } => {
                self.handlers
                    .cmd
                    .file_cmd(&Request::new(Method::Realpath, path.clone()))
                    .await?;
                let cleaned = clean_peer_path(&path);
                Ok(ResponsePacket::Name {
                    id,
                    entries: vec![NameEntry {
                        filename: cleaned.clone(),
                        longname: cleaned,
                        attrs: FileAttrs::default(),
                    }],
                })
            }
            RequestPacket::Unsupported { kind, .. } => {
                Err(Error::NotSupported(format!("SFTP message type {kind}")))
            }
        }
    }

    async fn open(
        &mut self,
        id: u32,
        path: String,
        flags: OpenFlags,
        attrs: FileAttrs,
    ) -> Result<ResponsePacket> {
        let open = if flags.has_write() {
            let request = Request::new(Method::Write, path).with_flags(flags).with_attrs(attrs);
            let writer = self.handlers.writer.file_write(&request).await?;
            OpenHandle::Writer {
                path: request.filepath,
                writer,
            }
        } else {
            let request = Request::new(Method::Read, path).with_flags(flags);
            let reader = self.handlers.reader.file_read(&request).await?;
            OpenHandle::Reader {
                path: request.filepath,
                reader,
            }
        };

        let handle = self.insert(open);
        Ok(ResponsePacket::Handle { id, handle })
    }

    fn handle_path(&self, handle: &[u8]) -> Result<String> {
        self.handles
            .get(handle)
            .map(|open| open.path().to_string())
            .ok_or_else(|| invalid_handle(handle))
    }

    fn insert(&mut self, open: OpenHandle) -> Vec<u8> {
        let handle = self.next_handle.to_string().into_bytes();
        self.next_handle += 1;
        debug!(
            event = "handle_opened",
            handle = %String::from_utf8_lossy(&handle),
            path = open.path(),
        );
        self.handles.insert(handle.clone(), open);
        handle
    }
}

/// Stat-as-list: a one-entry listing of the path
async fn stat(handlers: &Handlers, id: u32, path: String) -> Result<ResponsePacket> {
    let request = Request::new(Method::List, path).with_list_mode(ListMode::Single);
    let lister = handlers.lister.file_list(&request).await?;
    let page = lister.list_at(0, 1);
    let entry = page
        .entries
        .first()
        .ok_or_else(|| Error::FileNotFound(request.filepath.clone()))?;

    Ok(ResponsePacket::Attrs {
        id,
        attrs: entry.to_attrs(),
    })
}

async fn command(handlers: &Handlers, id: u32, request: Request) -> Result<ResponsePacket> {
    let outcome = handlers.cmd.file_cmd(&request).await?;
    debug!(
        event = "sftp_command",
        method = %request.method,
        path = %request.filepath,
        outcome = ?outcome,
    );
    Ok(ok(id))
}

fn ok(id: u32) -> ResponsePacket {
    ResponsePacket::status(id, StatusCode::Ok)
}

fn invalid_handle(handle: &[u8]) -> Error {
    Error::InvalidHandle(String::from_utf8_lossy(handle).into_owned())
}

/// Request id of a packet that failed to decode, if it is long enough to
/// carry one. INIT has no id.
fn peek_request_id(body: &[u8]) -> Option<u32> {
    match body {
        [kind, a, b, c, d, ..] if *kind != 1 => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}
