//! SFTP Server Implementation
//!
//! SSH transport (RFC 4251-4254) for the `sftp` subsystem. russh runs one
//! task per connection. Each admitted session channel gets its own worker
//! task from the moment it opens, watched by a supervisor so a failing
//! channel never takes the process down.
//!
//! The worker drains the channel until the negotiator binds it, so requests
//! and data sent before `subsystem` never fill the channel's queue and stall
//! the connection's session loop.

use crate::handlers::Handlers;
use crate::multiplexer::{self, ChannelKind};
use crate::negotiator::{ChannelRequest, Negotiator, RequestKind, Verdict};
use crate::router::Router;
use crate::vfs::VirtualFs;
use crate::{Config, Error, Result};
use mock_server_core::{CredentialGate, Identity, StaticCredentialGate};
use russh::keys::PrivateKey;
use russh::server::{self, Auth, Msg, Server as _, Session};
use russh::{Channel, ChannelId, ChannelMsg, Sig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};
use uuid::Uuid;

/// SFTP Server
pub struct Server {
    config: Arc<Config>,
    ssh_config: Arc<server::Config>,
    gate: Arc<dyn CredentialGate>,
    handlers: Handlers,
}

impl Server {
    /// Validate the configuration and load the host key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the root is invalid or the host key at
    /// `<root>/ssh/id_rsa_mockapi` cannot be read or parsed.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let host_key = load_host_key(&config.host_key_path()).await?;
        let root = config.canonical_root()?;

        let ssh_config = server::Config {
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![host_key],
            ..Default::default()
        };

        info!(
            event = "server_configured",
            root = %root.display(),
            host_key = %config.host_key_path().display(),
            max_packet_size = config.max_packet_size,
        );

        Ok(Self {
            config: Arc::new(config),
            ssh_config: Arc::new(ssh_config),
            gate: Arc::new(StaticCredentialGate::new()),
            handlers: Handlers::from_vfs(Arc::new(VirtualFs::new(root))),
        })
    }

    /// Replace the password authenticator
    #[must_use]
    pub fn with_credential_gate(mut self, gate: Arc<dyn CredentialGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Bind `bind_address:port` and serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the address cannot be bound or the
    /// accept loop stops.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.listen_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Connection(format!("Failed to bind {addr}: {e}")))?;

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the accept loop stops.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!(event = "server_listening", address = %local, "SFTP gateway accepting connections");

        let mut acceptor = Acceptor {
            gate: self.gate,
            handlers: self.handlers,
            max_packet: self.config.max_packet_size,
        };

        acceptor
            .run_on_socket(self.ssh_config, &listener)
            .await
            .map_err(|e| Error::Connection(format!("Server error: {e}")))
    }
}

async fn load_host_key(path: &Path) -> Result<PrivateKey> {
    let pem = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Config(format!("Failed to read host key {}: {e}", path.display()))
    })?;

    let key = russh::keys::decode_secret_key(&pem, None).map_err(|e| {
        Error::Config(format!("Failed to parse host key {}: {e}", path.display()))
    })?;

    debug!(event = "host_key_loaded", algorithm = %key.algorithm());
    Ok(key)
}

/// Creates one handler per accepted TCP connection
struct Acceptor {
    gate: Arc<dyn CredentialGate>,
    handlers: Handlers,
    max_packet: u32,
}

impl server::Server for Acceptor {
    type Handler = ConnectionHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        let handler = ConnectionHandler {
            id: Uuid::new_v4().to_string(),
            peer_addr,
            gate: self.gate.clone(),
            handlers: self.handlers.clone(),
            max_packet: self.max_packet,
            identity: None,
            channels: HashMap::new(),
        };

        info!(
            event = "connection_accepted",
            connection_id = %handler.id,
            peer = ?peer_addr,
        );
        handler
    }

    fn handle_session_error(&mut self, error: Error) {
        warn!(event = "session_error", error = %error, "SSH session ended with an error");
    }
}

struct ChannelSlot {
    negotiator: Negotiator,
    /// Verdicts on `subsystem` requests, consumed by the channel worker in
    /// the order the requests arrived
    verdicts: mpsc::UnboundedSender<Verdict>,
}

/// One SSH connection: authentication, channel admission and subsystem
/// negotiation
pub struct ConnectionHandler {
    id: String,
    peer_addr: Option<SocketAddr>,
    gate: Arc<dyn CredentialGate>,
    handlers: Handlers,
    max_packet: u32,
    identity: Option<Identity>,
    channels: HashMap<ChannelId, ChannelSlot>,
}

impl ConnectionHandler {
    fn admit_channel(&self, kind: &ChannelKind) -> bool {
        multiplexer::admit(kind, &self.id).is_accept()
    }

    /// Route a channel request through the channel's negotiator.
    ///
    /// russh only sends the reply when the peer asked for one, so every
    /// request is negotiated as if a reply were wanted.
    fn negotiate(
        &mut self,
        channel_id: ChannelId,
        kind: RequestKind,
        session: &mut Session,
    ) -> Result<()> {
        let is_subsystem = matches!(kind, RequestKind::Subsystem(_));
        let request = ChannelRequest::new(kind, true);

        let Some(slot) = self.channels.get_mut(&channel_id) else {
            debug!(
                event = "request_for_unknown_channel",
                connection_id = %self.id,
                channel = %channel_id,
            );
            session.channel_failure(channel_id)?;
            return Ok(());
        };

        let verdict = slot.negotiator.on_request(&request);
        // The worker parks on each `subsystem` message until its verdict
        // arrives, so every subsystem request must produce exactly one.
        let delivered = !is_subsystem || slot.verdicts.send(verdict).is_ok();

        match verdict {
            Verdict::Serve if delivered => {
                session.channel_success(channel_id)?;
                slot.negotiator.begin_serving();
            }
            Verdict::Serve | Verdict::Refuse => session.channel_failure(channel_id)?,
            Verdict::Ignore => {}
        }
        Ok(())
    }

    /// Start the worker that owns an admitted session channel.
    fn spawn_channel_worker(
        &self,
        channel: Channel<Msg>,
        verdicts: mpsc::UnboundedReceiver<Verdict>,
    ) {
        let username = self.identity.as_ref().map_or("", |i| i.username.as_str());
        let span = info_span!(
            "sftp_channel",
            connection_id = %self.id,
            channel = %channel.id(),
            user = %username,
        );

        let router = Router::new(self.handlers.clone(), self.max_packet);
        let worker =
            tokio::spawn(drain_until_bound(channel, verdicts, router).instrument(span.clone()));
        tokio::spawn(supervise(worker).instrument(span));
    }
}

/// Consume channel messages until a `subsystem` request is granted, then
/// hand the channel to the router.
///
/// russh queues the request message before calling the handler, so any
/// data the peer sends after `subsystem` is still queued when the router
/// takes over.
async fn drain_until_bound(
    mut channel: Channel<Msg>,
    mut verdicts: mpsc::UnboundedReceiver<Verdict>,
    router: Router,
) -> Result<()> {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::RequestSubsystem { name, .. } => match verdicts.recv().await {
                Some(Verdict::Serve) => return router.serve(channel.into_stream()).await,
                Some(_) => debug!(event = "subsystem_not_bound", subsystem = %name),
                None => break,
            },
            ChannelMsg::Data { data } => {
                trace!(event = "unbound_data_discarded", bytes = data.len());
            }
            _ => trace!(event = "unbound_message_discarded"),
        }
    }

    debug!(event = "channel_closed_unbound");
    Ok(())
}

/// Await a channel worker and log how it ended
async fn supervise(worker: JoinHandle<Result<()>>) {
    match worker.await {
        Ok(Ok(())) => info!(event = "channel_worker_finished"),
        Ok(Err(e)) => warn!(event = "channel_worker_failed", error = %e),
        Err(e) if e.is_panic() => error!(event = "channel_worker_panicked", error = %e),
        Err(e) => warn!(event = "channel_worker_cancelled", error = %e),
    }
}

impl server::Handler for ConnectionHandler {
    type Error = Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth> {
        match self.gate.validate(password) {
            Ok(identity) => {
                info!(
                    event = "authentication_success",
                    connection_id = %self.id,
                    ssh_user = %user,
                    username = %identity.username,
                    peer = ?self.peer_addr,
                );
                self.identity = Some(identity);
                Ok(Auth::Accept)
            }
            Err(e) => {
                let err = Error::from(e);
                warn!(
                    event = "authentication_failed",
                    connection_id = %self.id,
                    ssh_user = %user,
                    peer = ?self.peer_addr,
                    security_event = err.is_security_event(),
                    error = %err,
                );
                Ok(Auth::reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool> {
        if !self.admit_channel(&ChannelKind::Session) {
            return Ok(false);
        }

        let (verdicts, pending) = mpsc::unbounded_channel();
        self.channels.insert(
            channel.id(),
            ChannelSlot {
                negotiator: Negotiator::new(),
                verdicts,
            },
        );
        self.spawn_channel_worker(channel, pending);
        Ok(true)
    }

    async fn channel_open_x11(
        &mut self,
        _channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        Ok(self.admit_channel(&ChannelKind::X11))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        _channel: Channel<Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        Ok(self.admit_channel(&ChannelKind::DirectTcpip))
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        _port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool> {
        debug!(event = "forward_address_ignored", address);
        Ok(multiplexer::discard_global_request("tcpip-forward", &self.id))
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool> {
        Ok(multiplexer::discard_global_request("cancel-tcpip-forward", &self.id))
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<()> {
        info!(
            event = "subsystem_request",
            connection_id = %self.id,
            channel = %channel,
            subsystem = name,
        );
        self.negotiate(channel, RequestKind::Subsystem(name.to_string()), session)
    }

    async fn shell_request(&mut self, channel: ChannelId, session: &mut Session) -> Result<()> {
        self.negotiate(channel, RequestKind::Shell, session)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<()> {
        self.negotiate(channel, RequestKind::Exec, session)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<()> {
        self.negotiate(channel, RequestKind::PtyReq, session)
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        _variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<()> {
        self.negotiate(channel, RequestKind::Env, session)
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<()> {
        self.negotiate(channel, RequestKind::X11Req, session)
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<()> {
        self.negotiate(channel, RequestKind::WindowChange, session)
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        session: &mut Session,
    ) -> Result<()> {
        trace!(event = "signal_request", connection_id = %self.id, signal = ?signal);
        self.negotiate(channel, RequestKind::Signal, session)
    }

    async fn channel_close(&mut self, channel: ChannelId, _session: &mut Session) -> Result<()> {
        if let Some(mut slot) = self.channels.remove(&channel) {
            slot.negotiator.close();
            debug!(
                event = "channel_closed",
                connection_id = %self.id,
                channel = %channel,
                state = ?slot.negotiator.state(),
            );
        }
        Ok(())
    }
}
