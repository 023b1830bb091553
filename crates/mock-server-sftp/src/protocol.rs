//! SFTP Protocol Implementation
//!
//! Wire format of the SSH File Transfer Protocol, version 3
//! (draft-ietf-secsh-filexfer-02), carried over the `sftp` subsystem of an
//! SSH session channel (RFC 4254).
//!
//! Every packet is `uint32 length || byte type || payload`. Requests carry a
//! `uint32` id that the matching response echoes.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// SFTP Protocol Version
pub const SFTP_VERSION: u32 = 3;

/// Name of the SSH subsystem this protocol runs in
pub const SUBSYSTEM_NAME: &str = "sftp";

/// SFTP message types (as defined in the SFTP specification)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initialize SFTP session
    Init = 1,
    /// Version response
    Version = 2,
    /// Open file
    Open = 3,
    /// Close file
    Close = 4,
    /// Read from file
    Read = 5,
    /// Write to file
    Write = 6,
    /// Get file attributes by path
    Lstat = 7,
    /// Get file attributes by handle
    Fstat = 8,
    /// Set file attributes by path
    Setstat = 9,
    /// Set file attributes by handle
    Fsetstat = 10,
    /// Open directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove file
    Remove = 13,
    /// Create directory
    Mkdir = 14,
    /// Remove directory
    Rmdir = 15,
    /// Get real path
    Realpath = 16,
    /// Get file attributes by path (follow symlinks)
    Stat = 17,
    /// Rename file or directory
    Rename = 18,
    /// Read symbolic link
    Readlink = 19,
    /// Create symbolic link
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response (for directory listings)
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Init),
            2 => Ok(Self::Version),
            3 => Ok(Self::Open),
            4 => Ok(Self::Close),
            5 => Ok(Self::Read),
            6 => Ok(Self::Write),
            7 => Ok(Self::Lstat),
            8 => Ok(Self::Fstat),
            9 => Ok(Self::Setstat),
            10 => Ok(Self::Fsetstat),
            11 => Ok(Self::Opendir),
            12 => Ok(Self::Readdir),
            13 => Ok(Self::Remove),
            14 => Ok(Self::Mkdir),
            15 => Ok(Self::Rmdir),
            16 => Ok(Self::Realpath),
            17 => Ok(Self::Stat),
            18 => Ok(Self::Rename),
            19 => Ok(Self::Readlink),
            20 => Ok(Self::Symlink),
            101 => Ok(Self::Status),
            102 => Ok(Self::Handle),
            103 => Ok(Self::Data),
            104 => Ok(Self::Name),
            105 => Ok(Self::Attrs),
            200 => Ok(Self::Extended),
            201 => Ok(Self::ExtendedReply),
            _ => Err(crate::Error::Protocol(format!(
                "Unknown message type: {value}"
            ))),
        }
    }
}

/// SFTP Status codes (RFC draft-ietf-secsh-filexfer)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok = 0,
    /// End of file
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Bad message
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        code as Self
    }
}

impl TryFrom<u32> for StatusCode {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Eof),
            2 => Ok(Self::NoSuchFile),
            3 => Ok(Self::PermissionDenied),
            4 => Ok(Self::Failure),
            5 => Ok(Self::BadMessage),
            6 => Ok(Self::NoConnection),
            7 => Ok(Self::ConnectionLost),
            8 => Ok(Self::OpUnsupported),
            _ => Err(crate::Error::Protocol(format!("Unknown status code: {value}"))),
        }
    }
}

/// File open flags (draft-ietf-secsh-filexfer-02)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

#[allow(missing_docs)]
impl OpenFlags {
    pub const READ: u32 = 0x0000_0001;
    pub const WRITE: u32 = 0x0000_0002;
    pub const CREAT: u32 = 0x0000_0008;
    pub const TRUNC: u32 = 0x0000_0010;

    /// Opens with WRITE go to the writer capability; the writer always
    /// creates and truncates, whatever CREAT and TRUNC say.
    pub const fn has_write(self) -> bool {
        self.0 & Self::WRITE != 0
    }
}

/// File attributes (draft-ietf-secsh-filexfer-02)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttrs {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
}

impl FileAttrs {
    const FLAG_SIZE: u32 = 0x0000_0001;
    const FLAG_UIDGID: u32 = 0x0000_0002;
    const FLAG_PERMISSIONS: u32 = 0x0000_0004;
    const FLAG_ACMODTIME: u32 = 0x0000_0008;

    /// Mask selecting the file-type bits of `permissions`
    pub const S_IFMT: u32 = 0o170_000;
    /// Directory file-type bits
    pub const S_IFDIR: u32 = 0o040_000;

    /// Whether `permissions` carries the directory file-type bits
    pub const fn is_dir(&self) -> bool {
        match self.permissions {
            Some(mode) => mode & Self::S_IFMT == Self::S_IFDIR,
            None => false,
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }

        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
    }

    /// Decode file attributes from bytes
    pub fn decode(buf: &mut &[u8]) -> crate::Result<Self> {
        let flags = codec::get_u32(buf)?;
        let mut attrs = Self::default();

        if flags & Self::FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf)?);
        }

        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf)?);
            attrs.gid = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf)?);
        }

        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf)?);
            attrs.mtime = Some(codec::get_u32(buf)?);
        }

        Ok(attrs)
    }
}

/// One entry of a NAME response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub filename: String,
    pub longname: String,
    pub attrs: FileAttrs,
}

/// Decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPacket {
    Init { version: u32 },
    Open {
        id: u32,
        path: String,
        flags: OpenFlags,
        attrs: FileAttrs,
    },
    Close { id: u32, handle: Vec<u8> },
    Read {
        id: u32,
        handle: Vec<u8>,
        offset: u64,
        len: u32,
    },
    Write {
        id: u32,
        handle: Vec<u8>,
        offset: u64,
        data: Vec<u8>,
    },
    Lstat { id: u32, path: String },
    Fstat { id: u32, handle: Vec<u8> },
    Setstat {
        id: u32,
        path: String,
        attrs: FileAttrs,
    },
    Fsetstat {
        id: u32,
        handle: Vec<u8>,
        attrs: FileAttrs,
    },
    Opendir { id: u32, path: String },
    Readdir { id: u32, handle: Vec<u8> },
    Remove { id: u32, path: String },
    Mkdir {
        id: u32,
        path: String,
        attrs: FileAttrs,
    },
    Rmdir { id: u32, path: String },
    Realpath { id: u32, path: String },
    Stat { id: u32, path: String },
    Rename { id: u32, from: String, to: String },
    /// Well-formed packet whose type the server does not implement
    Unsupported { id: u32, kind: u8 },
}

impl RequestPacket {
    /// Request id echoed by the response (`None` for INIT)
    pub const fn id(&self) -> Option<u32> {
        match self {
            Self::Init { .. } => None,
            Self::Open { id, .. }
            | Self::Close { id, .. }
            | Self::Read { id, .. }
            | Self::Write { id, .. }
            | Self::Lstat { id, .. }
            | Self::Fstat { id, .. }
            | Self::Setstat { id, .. }
            | Self::Fsetstat { id, .. }
            | Self::Opendir { id, .. }
            | Self::Readdir { id, .. }
            | Self::Remove { id, .. }
            | Self::Mkdir { id, .. }
            | Self::Rmdir { id, .. }
            | Self::Realpath { id, .. }
            | Self::Stat { id, .. }
            | Self::Rename { id, .. }
            | Self::Unsupported { id, .. } => Some(*id),
        }
    }

    /// Decode one packet body (length prefix already stripped).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Protocol`] for empty or truncated packets.
    pub fn decode(packet: &[u8]) -> crate::Result<Self> {
        let mut buf = packet;
        if buf.is_empty() {
            return Err(crate::Error::Protocol("Empty packet".into()));
        }
        let kind = buf.get_u8();

        let Ok(msg_type) = MessageType::try_from(kind) else {
            let id = codec::get_u32(&mut buf)?;
            return Ok(Self::Unsupported { id, kind });
        };

        if msg_type == MessageType::Init {
            let version = codec::get_u32(&mut buf)?;
            return Ok(Self::Init { version });
        }

        let id = codec::get_u32(&mut buf)?;
        let buf = &mut buf;

        let packet = match msg_type {
            MessageType::Open => Self::Open {
                id,
                path: codec::get_string(buf)?,
                flags: OpenFlags(codec::get_u32(buf)?),
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Close => Self::Close {
                id,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Read => Self::Read {
                id,
                handle: codec::get_bytes(buf)?,
                offset: codec::get_u64(buf)?,
                len: codec::get_u32(buf)?,
            },
            MessageType::Write => Self::Write {
                id,
                handle: codec::get_bytes(buf)?,
                offset: codec::get_u64(buf)?,
                data: codec::get_bytes(buf)?,
            },
            MessageType::Lstat => Self::Lstat {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Fstat => Self::Fstat {
                id,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Setstat => Self::Setstat {
                id,
                path: codec::get_string(buf)?,
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Fsetstat => Self::Fsetstat {
                id,
                handle: codec::get_bytes(buf)?,
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Opendir => Self::Opendir {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Readdir => Self::Readdir {
                id,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Remove => Self::Remove {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Mkdir => Self::Mkdir {
                id,
                path: codec::get_string(buf)?,
                attrs: FileAttrs::decode(buf)?,
            },
            MessageType::Rmdir => Self::Rmdir {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Realpath => Self::Realpath {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Stat => Self::Stat {
                id,
                path: codec::get_string(buf)?,
            },
            MessageType::Rename => Self::Rename {
                id,
                from: codec::get_string(buf)?,
                to: codec::get_string(buf)?,
            },
            _ => Self::Unsupported { id, kind },
        };

        Ok(packet)
    }

    /// Encode the packet body (without the length prefix)
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Self::Init { version } => {
                buf.put_u8(MessageType::Init as u8);
                buf.put_u32(*version);
            }
            Self::Open {
                id,
                path,
                flags,
                attrs,
            } => {
                header(&mut buf, MessageType::Open, *id);
                codec::put_string(&mut buf, path);
                buf.put_u32(flags.0);
                attrs.encode_into(&mut buf);
            }
            Self::Close { id, handle } => {
                header(&mut buf, MessageType::Close, *id);
                codec::put_bytes(&mut buf, handle);
            }
            Self::Read {
                id,
                handle,
                offset,
                len,
            } => {
                header(&mut buf, MessageType::Read, *id);
                codec::put_bytes(&mut buf, handle);
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            Self::Write {
                id,
                handle,
                offset,
                data,
            } => {
                header(&mut buf, MessageType::Write, *id);
                codec::put_bytes(&mut buf, handle);
                buf.put_u64(*offset);
                codec::put_bytes(&mut buf, data);
            }
            Self::Lstat { id, path } => path_packet(&mut buf, MessageType::Lstat, *id, path),
            Self::Stat { id, path } => path_packet(&mut buf, MessageType::Stat, *id, path),
            Self::Opendir { id, path } => path_packet(&mut buf, MessageType::Opendir, *id, path),
            Self::Remove { id, path } => path_packet(&mut buf, MessageType::Remove, *id, path),
            Self::Rmdir { id, path } => path_packet(&mut buf, MessageType::Rmdir, *id, path),
            Self::Realpath { id, path } => path_packet(&mut buf, MessageType::Realpath, *id, path),
            Self::Fstat { id, handle } => {
                header(&mut buf, MessageType::Fstat, *id);
                codec::put_bytes(&mut buf, handle);
            }
            Self::Readdir { id, handle } => {
                header(&mut buf, MessageType::Readdir, *id);
                codec::put_bytes(&mut buf, handle);
            }
            Self::Setstat { id, path, attrs } => {
                path_packet(&mut buf, MessageType::Setstat, *id, path);
                attrs.encode_into(&mut buf);
            }
            Self::Mkdir { id, path, attrs } => {
                path_packet(&mut buf, MessageType::Mkdir, *id, path);
                attrs.encode_into(&mut buf);
            }
            Self::Fsetstat { id, handle, attrs } => {
                header(&mut buf, MessageType::Fsetstat, *id);
                codec::put_bytes(&mut buf, handle);
                attrs.encode_into(&mut buf);
            }
            Self::Rename { id, from, to } => {
                path_packet(&mut buf, MessageType::Rename, *id, from);
                codec::put_string(&mut buf, to);
            }
            Self::Unsupported { id, kind } => {
                buf.put_u8(*kind);
                buf.put_u32(*id);
            }
        }
        buf
    }
}

/// Server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePacket {
    Version { version: u32 },
    Status {
        id: u32,
        code: StatusCode,
        message: String,
    },
    Handle { id: u32, handle: Vec<u8> },
    Data { id: u32, data: Vec<u8> },
    Name { id: u32, entries: Vec<NameEntry> },
    Attrs { id: u32, attrs: FileAttrs },
}

impl ResponsePacket {
    /// STATUS reply with the standard message for `code`
    pub fn status(id: u32, code: StatusCode) -> Self {
        let message = match code {
            StatusCode::Ok => "Success",
            StatusCode::Eof => "End of file",
            StatusCode::NoSuchFile => "No such file",
            StatusCode::PermissionDenied => "Permission denied",
            StatusCode::Failure => "Failure",
            StatusCode::BadMessage => "Bad message",
            StatusCode::NoConnection => "No connection",
            StatusCode::ConnectionLost => "Connection lost",
            StatusCode::OpUnsupported => "Operation unsupported",
        };
        Self::Status {
            id,
            code,
            message: message.to_string(),
        }
    }

    /// STATUS reply built from an error, with a sanitized message
    pub fn from_error(id: u32, error: &crate::Error) -> Self {
        Self::Status {
            id,
            code: error.to_status_code(),
            message: error.sanitized_message(),
        }
    }

    /// Encode the packet body (without the length prefix)
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            Self::Version { version } => {
                buf.put_u8(MessageType::Version as u8);
                buf.put_u32(*version);
            }
            Self::Status { id, code, message } => {
                header(&mut buf, MessageType::Status, *id);
                buf.put_u32((*code).into());
                codec::put_string(&mut buf, message);
                codec::put_string(&mut buf, "en"); // language tag
            }
            Self::Handle { id, handle } => {
                header(&mut buf, MessageType::Handle, *id);
                codec::put_bytes(&mut buf, handle);
            }
            Self::Data { id, data } => {
                header(&mut buf, MessageType::Data, *id);
                codec::put_bytes(&mut buf, data);
            }
            Self::Name { id, entries } => {
                header(&mut buf, MessageType::Name, *id);
                buf.put_u32(u32::try_from(entries.len()).unwrap_or(u32::MAX));
                for entry in entries {
                    codec::put_string(&mut buf, &entry.filename);
                    codec::put_string(&mut buf, &entry.longname);
                    entry.attrs.encode_into(&mut buf);
                }
            }
            Self::Attrs { id, attrs } => {
                header(&mut buf, MessageType::Attrs, *id);
                attrs.encode_into(&mut buf);
            }
        }
        buf
    }

    /// Decode one packet body (client side).
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Protocol`] for truncated packets or types that
    /// are not server responses.
    pub fn decode(packet: &[u8]) -> crate::Result<Self> {
        let mut buf = packet;
        if buf.is_empty() {
            return Err(crate::Error::Protocol("Empty packet".into()));
        }
        let msg_type = MessageType::try_from(buf.get_u8())?;
        let buf = &mut buf;

        let packet = match msg_type {
            MessageType::Version => Self::Version {
                version: codec::get_u32(buf)?,
            },
            MessageType::Status => {
                let id = codec::get_u32(buf)?;
                let code = StatusCode::try_from(codec::get_u32(buf)?)?;
                // Message and language tag are optional in some v3 servers.
                let message = if buf.remaining() >= 4 {
                    codec::get_string(buf)?
                } else {
                    String::new()
                };
                Self::Status { id, code, message }
            }
            MessageType::Handle => Self::Handle {
                id: codec::get_u32(buf)?,
                handle: codec::get_bytes(buf)?,
            },
            MessageType::Data => Self::Data {
                id: codec::get_u32(buf)?,
                data: codec::get_bytes(buf)?,
            },
            MessageType::Name => {
                let id = codec::get_u32(buf)?;
                let count = codec::get_u32(buf)?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(NameEntry {
                        filename: codec::get_string(buf)?,
                        longname: codec::get_string(buf)?,
                        attrs: FileAttrs::decode(buf)?,
                    });
                }
                Self::Name { id, entries }
            }
            MessageType::Attrs => Self::Attrs {
                id: codec::get_u32(buf)?,
                attrs: FileAttrs::decode(buf)?,
            },
            other => {
                return Err(crate::Error::Protocol(format!(
                    "Unexpected message type in response: {other:?}"
                )));
            }
        };

        Ok(packet)
    }
}

fn header(buf: &mut BytesMut, msg_type: MessageType, id: u32) {
    buf.put_u8(msg_type as u8);
    buf.put_u32(id);
}

fn path_packet(buf: &mut BytesMut, msg_type: MessageType, id: u32, path: &str) {
    header(buf, msg_type, id);
    codec::put_string(buf, path);
}

/// Read one length-prefixed packet body.
///
/// Returns `Ok(None)` when the stream ends cleanly between packets.
///
/// # Errors
///
/// Returns an error for I/O failures, truncated packets, and packets larger
/// than `max_len`.
pub async fn read_packet<R>(reader: &mut R, max_len: u32) -> crate::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len == 0 || len > max_len {
        return Err(crate::Error::Protocol(format!(
            "Packet length {len} outside 1..={max_len}"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one packet body with its length prefix and flush.
///
/// # Errors
///
/// Returns an error when the stream is closed or the write fails.
pub async fn write_packet<W>(writer: &mut W, body: &[u8]) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len())
        .map_err(|_| crate::Error::Protocol("Packet too large".into()))?;
    let mut framed = BytesMut::with_capacity(body.len() + 4);
    framed.put_u32(len);
    framed.put_slice(body);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Helper functions for encoding/decoding SFTP protocol primitives
pub mod codec {
    use bytes::{Buf, BufMut, BytesMut};

    /// Encode a string as SFTP string (length + data)
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }

    /// Decode an SFTP string
    pub fn get_string(buf: &mut &[u8]) -> crate::Result<String> {
        let bytes = get_bytes(buf)?;
        String::from_utf8(bytes)
            .map_err(|e| crate::Error::Protocol(format!("Invalid UTF-8 string: {e}")))
    }

    /// Encode bytes as SFTP string (length + data)
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32(u32::try_from(data.len()).unwrap_or(u32::MAX));
        buf.put_slice(data);
    }

    /// Decode SFTP bytes
    pub fn get_bytes(buf: &mut &[u8]) -> crate::Result<Vec<u8>> {
        let len = get_u32(buf)? as usize;
        if buf.remaining() < len {
            return Err(crate::Error::Protocol("Insufficient data for bytes".into()));
        }

        let bytes = buf[..len].to_vec();
        buf.advance(len);
        Ok(bytes)
    }

    pub fn get_u32(buf: &mut &[u8]) -> crate::Result<u32> {
        if buf.remaining() < 4 {
            return Err(crate::Error::Protocol("Insufficient data for u32".into()));
        }
        Ok(buf.get_u32())
    }

    pub fn get_u64(buf: &mut &[u8]) -> crate::Result<u64> {
        if buf.remaining() < 8 {
            return Err(crate::Error::Protocol("Insufficient data for u64".into()));
        }
        Ok(buf.get_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_open_request() {
        let packet = RequestPacket::Open {
            id: 7,
            path: "/a.txt".into(),
            flags: OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC),
            attrs: FileAttrs::default(),
        };
        let decoded = RequestPacket::decode(&packet.encode()).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.id(), Some(7));
    }

    #[test]
    fn test_unknown_type_decodes_as_unsupported() {
        let mut body = BytesMut::new();
        body.put_u8(99);
        body.put_u32(42);

        let decoded = RequestPacket::decode(&body).unwrap();
        assert_eq!(decoded, RequestPacket::Unsupported { id: 42, kind: 99 });
    }

    #[test]
    fn test_symlink_decodes_as_unsupported() {
        let mut body = BytesMut::new();
        body.put_u8(MessageType::Symlink as u8);
        body.put_u32(3);
        codec::put_string(&mut body, "link");
        codec::put_string(&mut body, "target");

        let decoded = RequestPacket::decode(&body).unwrap();
        assert_eq!(
            decoded,
            RequestPacket::Unsupported {
                id: 3,
                kind: MessageType::Symlink as u8,
            }
        );
    }

    #[test]
    fn test_truncated_request_rejected() {
        let mut body = BytesMut::new();
        body.put_u8(MessageType::Read as u8);
        body.put_u32(1);
        codec::put_bytes(&mut body, b"0");
        // offset and length missing

        assert!(RequestPacket::decode(&body).is_err());
        assert!(RequestPacket::decode(&[]).is_err());
    }

    #[test]
    fn test_name_response_decode() {
        let response = ResponsePacket::Name {
            id: 9,
            entries: vec![NameEntry {
                filename: "a.txt".into(),
                longname: "-rw-r--r-- 1 0 0 5 Jan  1 00:00 a.txt".into(),
                attrs: FileAttrs {
                    size: Some(5),
                    permissions: Some(0o100_644),
                    ..FileAttrs::default()
                },
            }],
        };

        assert_eq!(ResponsePacket::decode(&response.encode()).unwrap(), response);
    }

    #[test]
    fn test_status_from_error() {
        let err = crate::Error::FileNotFound("/srv/a.txt".into());
        assert_eq!(
            ResponsePacket::from_error(5, &err),
            ResponsePacket::Status {
                id: 5,
                code: StatusCode::NoSuchFile,
                message: "No such file".into(),
            }
        );
    }

    #[test]
    fn test_attrs_directory_bits() {
        let dir = FileAttrs {
            permissions: Some(0o040_755),
            ..FileAttrs::default()
        };
        let file = FileAttrs {
            permissions: Some(0o100_644),
            ..FileAttrs::default()
        };
        assert!(dir.is_dir());
        assert!(!file.is_dir());
        assert!(!FileAttrs::default().is_dir());
    }

    #[tokio::test]
    async fn test_packet_framing() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_packet(&mut a, &ResponsePacket::status(1, StatusCode::Ok).encode())
            .await
            .unwrap();
        drop(a);

        let body = read_packet(&mut b, 1024).await.unwrap().unwrap();
        assert_eq!(
            ResponsePacket::decode(&body).unwrap(),
            ResponsePacket::status(1, StatusCode::Ok)
        );
        assert!(read_packet(&mut b, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_packet_rejected() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_packet(&mut a, &[0u8; 64]).await.unwrap();

        assert!(read_packet(&mut b, 32).await.is_err());
    }
}
