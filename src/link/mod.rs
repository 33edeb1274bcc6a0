pub mod serial_dialer;

use crate::{
    configuration::AppConfig,
    platform::{
        Capability, CapabilityCheck, ConfiguredPeers, GrantedCapabilities, Peer, PeerDirectory,
        RadioAdapter, SerialAdapter,
    },
    protocol::{Command, RoverProtocol},
};
use async_trait::async_trait;
use futures::SinkExt;
use serde::Deserialize;
use std::{io, sync::Arc, time::Duration};
use tokio::{io::AsyncWrite, runtime, sync::mpsc, task::JoinHandle};
use tokio_util::codec::FramedWrite;
use tracing::*;

pub use serial_dialer::SerialDialer;

/// How long a closed link may spend flushing before its writer is aborted.
pub const LINK_CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("{0} not found. Please pair first.")]
    PeerNotFound(String),
    #[error("radio adapter is not available")]
    AdapterUnavailable,
    #[error("{0} permission required")]
    PermissionDenied(Capability),
    #[error("not connected to device")]
    NotConnected,
    #[error("link failed: {0}")]
    TransportError(#[from] io::Error),
    #[error("connect attempt timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Deserialize, Debug, Clone)]
pub struct LinkConfig {
    #[serde(default = "default_peer_name")]
    pub peer_name: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_peer_name() -> String {
    String::from("ESP32_Direction_Control")
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            peer_name: default_peer_name(),
            baud_rate: default_baud_rate(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

pub type LinkStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the byte stream to an already paired peer.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, peer: &Peer) -> io::Result<LinkStream>;
}

/// Posted by background link work back to the foreground.
#[derive(Debug)]
pub enum LinkEvent {
    Connected { attempt: u64, handle: LinkHandle },
    ConnectFailed { attempt: u64, error: LinkError },
    Lost { link: u64, error: LinkError },
}

/// Open link to the rover.
///
/// Commands are handed to a writer task that owns the stream, so sending never
/// blocks the caller. Closing drops the queue; the writer gets [`LINK_CLOSE_GRACE`]
/// to flush what it already has and shut the stream down, then it is aborted.
#[derive(Debug)]
pub struct LinkHandle {
    id: u64,
    peer: Peer,
    commands: Option<mpsc::UnboundedSender<Command>>,
    writer: Option<JoinHandle<()>>,
}

impl LinkHandle {
    fn spawn(
        id: u64,
        peer: Peer,
        stream: LinkStream,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let framed = FramedWrite::new(stream, RoverProtocol);
        let writer = tokio::spawn(run_writer(id, framed, commands_rx, events));
        Self {
            id,
            peer,
            commands: Some(commands_tx),
            writer: Some(writer),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn is_connected(&self) -> bool {
        self.commands
            .as_ref()
            .map(|commands| !commands.is_closed())
            .unwrap_or(false)
    }

    pub fn send(&self, command: Command) -> Result<(), LinkError> {
        let commands = self.commands.as_ref().ok_or(LinkError::NotConnected)?;
        commands
            .send(command)
            .map_err(|_| LinkError::NotConnected)?;
        Ok(())
    }

    /// Safe to call any number of times.
    pub fn close(&mut self) {
        if self.commands.take().is_some() {
            info!("Closing link {} to {}", self.id, self.peer.name);
        }
        if let Some(writer) = self.writer.take() {
            reap_writer(self.id, writer);
        }
    }
}

fn reap_writer(id: u64, mut writer: JoinHandle<()>) {
    match runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                if tokio::time::timeout(LINK_CLOSE_GRACE, &mut writer)
                    .await
                    .is_err()
                {
                    warn!("Link {} writer stalled on close, aborting", id);
                    writer.abort();
                }
            });
        }
        Err(_) => writer.abort(),
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_writer(
    id: u64,
    mut framed: FramedWrite<LinkStream, RoverProtocol>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<LinkEvent>,
) {
    while let Some(command) = commands.recv().await {
        trace!("Sending {}", command);
        if let Err(err) = framed.send(command).await {
            error!("Failed to send {} over link {}: {}", command, id, err);
            if events
                .send(LinkEvent::Lost {
                    link: id,
                    error: LinkError::TransportError(err),
                })
                .is_err()
            {
                debug!("Nobody is listening for link {} failures", id);
            }
            return;
        }
    }
    if let Err(err) = framed.close().await {
        debug!("Failed to shut down link {} cleanly: {}", id, err);
    }
    debug!("Link {} writer finished", id);
}

/// Everything needed to turn a peer name into an open link.
pub struct Transport {
    peers: Arc<dyn PeerDirectory>,
    adapter: Arc<dyn RadioAdapter>,
    capabilities: Arc<dyn CapabilityCheck>,
    dialer: Arc<dyn Dialer>,
}

impl Transport {
    pub fn new(
        peers: Arc<dyn PeerDirectory>,
        adapter: Arc<dyn RadioAdapter>,
        capabilities: Arc<dyn CapabilityCheck>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Self {
            peers,
            adapter,
            capabilities,
            dialer,
        }
    }

    pub async fn connect(
        &self,
        peer_name: &str,
        id: u64,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<LinkHandle, LinkError> {
        if let Some(missing) = Capability::all()
            .into_iter()
            .find(|capability| !self.capabilities.has_capability(*capability))
        {
            return Err(LinkError::PermissionDenied(missing));
        }
        if !self.adapter.is_adapter_enabled() {
            self.adapter.request_enable();
            return Err(LinkError::AdapterUnavailable);
        }
        let peer = self
            .peers
            .find_paired_peer(peer_name)
            .ok_or_else(|| LinkError::PeerNotFound(peer_name.to_owned()))?;
        info!("Dialing {} on {}", peer.name, peer.port);
        let stream = self.dialer.dial(&peer).await?;
        Ok(LinkHandle::spawn(id, peer, stream, events))
    }
}

/// Serial transport for the peers listed in the configuration.
pub fn transport_from_config(config: &AppConfig) -> Transport {
    Transport::new(
        Arc::new(ConfiguredPeers::new(config.peers.clone())),
        Arc::new(SerialAdapter),
        Arc::new(GrantedCapabilities::new(config.capabilities.clone())),
        Arc::new(SerialDialer::new(config.link.baud_rate)),
    )
}
