//! SFTP Client Implementation
//!
//! A small SFTP v3 client used to drive the gateway in tests and by hand.
//! [`SftpClient`] speaks the protocol over any byte stream; [`Connection`]
//! dials the gateway over SSH and hands out such streams.

use crate::protocol::{
    FileAttrs, NameEntry, OpenFlags, RequestPacket, ResponsePacket, SFTP_VERSION, SUBSYSTEM_NAME,
    StatusCode, read_packet, write_packet,
};
use crate::{Error, Result};
use russh::client::{self, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg, ChannelStream, Disconnect};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Bytes requested per READ and sent per WRITE
const CHUNK_SIZE: u32 = 32 * 1024;

/// Largest reply the client accepts
const MAX_REPLY: u32 = 256 * 1024;

/// SFTP v3 client over an arbitrary stream
pub struct SftpClient<S> {
    stream: S,
    next_id: u32,
    server_version: u32,
}

impl<S> SftpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Exchange INIT/VERSION over `stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the server does not answer with VERSION.
    pub async fn init(mut stream: S) -> Result<Self> {
        let init = RequestPacket::Init {
            version: SFTP_VERSION,
        };
        write_packet(&mut stream, &init.encode()).await?;

        let body = read_packet(&mut stream, MAX_REPLY)
            .await?
            .ok_or_else(|| Error::ChannelClosed("Closed before VERSION".into()))?;

        match ResponsePacket::decode(&body)? {
            ResponsePacket::Version { version } => {
                debug!(event = "sftp_version", version);
                Ok(Self {
                    stream,
                    next_id: 1,
                    server_version: version,
                })
            }
            other => Err(Error::Protocol(format!("Expected VERSION, got {other:?}"))),
        }
    }

    pub const fn server_version(&self) -> u32 {
        self.server_version
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    async fn call(&mut self, packet: RequestPacket) -> Result<ResponsePacket> {
        let id = packet.id().unwrap_or(0);
        write_packet(&mut self.stream, &packet.encode()).await?;

        let body = read_packet(&mut self.stream, MAX_REPLY)
            .await?
            .ok_or_else(|| Error::ChannelClosed("Closed while awaiting reply".into()))?;
        let response = ResponsePacket::decode(&body)?;

        let reply_id = match &response {
            ResponsePacket::Version { .. } => None,
            ResponsePacket::Status { id, .. }
            | ResponsePacket::Handle { id, .. }
            | ResponsePacket::Data { id, .. }
            | ResponsePacket::Name { id, .. }
            | ResponsePacket::Attrs { id, .. } => Some(*id),
        };
        if reply_id != Some(id) {
            return Err(Error::Protocol(format!(
                "Reply id {reply_id:?} does not match request {id}"
            )));
        }
        Ok(response)
    }

    /// Send a request whose only successful answer is an OK status
    async fn call_ok(&mut self, packet: RequestPacket) -> Result<()> {
        match self.call(packet).await? {
            ResponsePacket::Status {
                code: StatusCode::Ok,
                ..
            } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn open(&mut self, path: &str, flags: u32) -> Result<Vec<u8>> {
        let id = self.next_id();
        let packet = RequestPacket::Open {
            id,
            path: path.to_string(),
            flags: OpenFlags(flags),
            attrs: FileAttrs::default(),
        };
        match self.call(packet).await? {
            ResponsePacket::Handle { handle, .. } => Ok(handle),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&mut self, handle: Vec<u8>) -> Result<()> {
        let id = self.next_id();
        self.call_ok(RequestPacket::Close { id, handle }).await
    }

    /// Download a whole file
    ///
    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn read(&mut self, path: &str) -> Result<Vec<u8>> {
        let handle = self.open(path, OpenFlags::READ).await?;
        let mut contents = Vec::new();

        loop {
            let id = self.next_id();
            let packet = RequestPacket::Read {
                id,
                handle: handle.clone(),
                offset: contents.len() as u64,
                len: CHUNK_SIZE,
            };
            match self.call(packet).await? {
                ResponsePacket::Data { data, .. } => contents.extend_from_slice(&data),
                ResponsePacket::Status {
                    code: StatusCode::Eof,
                    ..
                } => break,
                other => return Err(unexpected(other)),
            }
        }

        self.close(handle).await?;
        Ok(contents)
    }

    /// Create or truncate `path` and upload `data`
    ///
    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn write(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let handle = self
            .open(path, OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC)
            .await?;

        let mut offset = 0u64;
        for chunk in data.chunks(CHUNK_SIZE as usize) {
            let id = self.next_id();
            self.call_ok(RequestPacket::Write {
                id,
                handle: handle.clone(),
                offset,
                data: chunk.to_vec(),
            })
            .await?;
            offset += chunk.len() as u64;
        }

        self.close(handle).await
    }

    /// Every READDIR page for `path`, in order
    ///
    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn list_pages(&mut self, path: &str) -> Result<Vec<Vec<NameEntry>>> {
        let id = self.next_id();
        let handle = match self
            .call(RequestPacket::Opendir {
                id,
                path: path.to_string(),
            })
            .await?
        {
            ResponsePacket::Handle { handle, .. } => handle,
            other => return Err(unexpected(other)),
        };

        let mut pages = Vec::new();
        loop {
            let packet = RequestPacket::Readdir {
                id: self.next_id(),
                handle: handle.clone(),
            };
            match self.call(packet).await? {
                ResponsePacket::Name { entries, .. } => pages.push(entries),
                ResponsePacket::Status {
                    code: StatusCode::Eof,
                    ..
                } => break,
                other => return Err(unexpected(other)),
            }
        }

        self.close(handle).await?;
        Ok(pages)
    }

    /// All directory entries of `path`
    ///
    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn list(&mut self, path: &str) -> Result<Vec<NameEntry>> {
        Ok(self.list_pages(path).await?.into_iter().flatten().collect())
    }

    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `path` does not exist.
    pub async fn stat(&mut self, path: &str) -> Result<FileAttrs> {
        let id = self.next_id();
        self.attrs(RequestPacket::Stat {
            id,
            path: path.to_string(),
        })
        .await
    }

    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `path` does not exist.
    pub async fn lstat(&mut self, path: &str) -> Result<FileAttrs> {
        let id = self.next_id();
        self.attrs(RequestPacket::Lstat {
            id,
            path: path.to_string(),
        })
        .await
    }

    async fn attrs(&mut self, packet: RequestPacket) -> Result<FileAttrs> {
        match self.call(packet).await? {
            ResponsePacket::Attrs { attrs, .. } => Ok(attrs),
            other => Err(unexpected(other)),
        }
    }

    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn setstat(&mut self, path: &str, attrs: FileAttrs) -> Result<()> {
        let id = self.next_id();
        self.call_ok(RequestPacket::Setstat {
            id,
            path: path.to_string(),
            attrs,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let id = self.next_id();
        self.call_ok(RequestPacket::Rename {
            id,
            from: from.to_string(),
            to: to.to_string(),
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn remove(&mut self, path: &str) -> Result<()> {
        let id = self.next_id();
        self.call_ok(RequestPacket::Remove {
            id,
            path: path.to_string(),
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn mkdir(&mut self, path: &str) -> Result<()> {
        let id = self.next_id();
        self.call_ok(RequestPacket::Mkdir {
            id,
            path: path.to_string(),
            attrs: FileAttrs::default(),
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn rmdir(&mut self, path: &str) -> Result<()> {
        let id = self.next_id();
        self.call_ok(RequestPacket::Rmdir {
            id,
            path: path.to_string(),
        })
        .await
    }

    /// # Errors
    ///
    /// Returns the error carried by the server's STATUS reply.
    pub async fn realpath(&mut self, path: &str) -> Result<String> {
        let packet = RequestPacket::Realpath {
            id: self.next_id(),
            path: path.to_string(),
        };
        match self.call(packet).await? {
            ResponsePacket::Name { mut entries, .. } if !entries.is_empty() => {
                Ok(entries.swap_remove(0).filename)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Send a raw request and return whatever the server answers
    ///
    /// # Errors
    ///
    /// Returns an error only for transport or framing failures.
    pub async fn raw(&mut self, packet: RequestPacket) -> Result<ResponsePacket> {
        self.call(packet).await
    }

    /// Allocate a request id for [`SftpClient::raw`]
    pub fn request_id(&mut self) -> u32 {
        self.next_id()
    }
}

fn unexpected(response: ResponsePacket) -> Error {
    match response {
        ResponsePacket::Status { code, message, .. } => Error::from_status(code, message),
        other => Error::Protocol(format!("Unexpected reply: {other:?}")),
    }
}

/// Accepts whatever host key the gateway presents
struct TrustingHandler;

impl client::Handler for TrustingHandler {
    type Error = Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool> {
        debug!(event = "server_key_accepted", algorithm = %server_public_key.algorithm());
        Ok(true)
    }
}

/// Authenticated SSH connection to the gateway
pub struct Connection {
    handle: client::Handle<TrustingHandler>,
}

impl Connection {
    /// Dial `addr` and authenticate with a password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ssh`] for transport failures and
    /// [`Error::Authentication`] if the password is refused.
    pub async fn connect(addr: SocketAddr, user: &str, password: &str) -> Result<Self> {
        let config = Arc::new(client::Config::default());
        let mut handle = client::connect(config, addr, TrustingHandler).await?;

        let auth = handle.authenticate_password(user, password).await?;
        if !auth.success() {
            return Err(Error::Authentication(
                mock_server_core::CoreError::InvalidCredential,
            ));
        }

        info!(event = "client_authenticated", address = %addr, user);
        Ok(Self { handle })
    }

    /// Open a session channel and bind the `sftp` subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SubsystemUnsupported`] if the server refuses the
    /// subsystem.
    pub async fn open_sftp(&self) -> Result<SftpClient<ChannelStream<Msg>>> {
        let channel = self.open_session().await?;
        bind_sftp(channel).await
    }

    /// Open a bare session channel with no subsystem bound.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ssh`] if the server refuses the open.
    pub async fn open_session(&self) -> Result<Channel<Msg>> {
        Ok(self.handle.channel_open_session().await?)
    }

    /// Ask for subsystem `name` on a fresh session channel and report whether
    /// the server accepted it.
    ///
    /// # Errors
    ///
    /// Returns an error if the session channel itself cannot be opened.
    pub async fn request_subsystem(&self, name: &str) -> Result<bool> {
        let mut channel = self.open_session().await?;
        channel.request_subsystem(true, name).await?;
        let accepted = wait_for_reply(&mut channel).await;
        channel.close().await?;
        Ok(accepted)
    }

    /// Try to open a `direct-tcpip` channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelRejected`] when the server refuses the open.
    pub async fn open_direct_tcpip(&self, host: &str, port: u32) -> Result<()> {
        match self
            .handle
            .channel_open_direct_tcpip(host, port, "127.0.0.1", 0)
            .await
        {
            Ok(channel) => {
                channel.close().await?;
                Ok(())
            }
            Err(e) => Err(Error::ChannelRejected(e.to_string())),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Ssh`] if the disconnect message cannot be sent.
    pub async fn disconnect(self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// Bind the `sftp` subsystem on an open session channel and run INIT.
///
/// # Errors
///
/// Returns [`Error::SubsystemUnsupported`] if the server refuses the
/// subsystem.
pub async fn bind_sftp(mut channel: Channel<Msg>) -> Result<SftpClient<ChannelStream<Msg>>> {
    channel.request_subsystem(true, SUBSYSTEM_NAME).await?;

    if !wait_for_reply(&mut channel).await {
        return Err(Error::SubsystemUnsupported(SUBSYSTEM_NAME.into()));
    }

    SftpClient::init(channel.into_stream()).await
}

/// Wait for the success/failure reply to a channel request.
///
/// Returns `false` on failure or if the channel closes first.
pub async fn wait_for_reply(channel: &mut Channel<Msg>) -> bool {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Success => return true,
            ChannelMsg::Failure => return false,
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::Handlers;
    use crate::router::Router;
    use crate::vfs::VirtualFs;
    use tempfile::TempDir;

    async fn in_process(temp: &TempDir) -> SftpClient<tokio::io::DuplexStream> {
        let (client_end, server_end) = tokio::io::duplex(512 * 1024);
        let handlers = Handlers::from_vfs(Arc::new(VirtualFs::new(temp.path())));
        let router = Router::new(handlers, 262_144);
        tokio::spawn(router.serve(server_end));
        SftpClient::init(client_end).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_negotiates_version_3() {
        let temp = TempDir::new().unwrap();
        let client = in_process(&temp).await;
        assert_eq!(client.server_version(), 3);
    }

    #[tokio::test]
    async fn test_large_write_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let mut client = in_process(&temp).await;

        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        client.write("/big.bin", &data).await.unwrap();

        assert_eq!(client.read("/big.bin").await.unwrap(), data);
        assert_eq!(client.stat("/big.bin").await.unwrap().size, Some(100_000));
    }

    #[tokio::test]
    async fn test_status_errors_surface() {
        let temp = TempDir::new().unwrap();
        let mut client = in_process(&temp).await;

        assert!(matches!(client.read("/missing").await, Err(Error::FileNotFound(_))));
        assert!(matches!(client.remove("/missing").await, Err(Error::FileNotFound(_))));
        assert!(matches!(client.stat("/missing").await, Err(Error::FileNotFound(_))));
    }
}
