use crate::{
    error::RemoteError,
    link::{LinkConfig, LinkError, LinkEvent, LinkHandle, Transport},
    platform::Peer,
    protocol::Command,
};
use serde::Serialize;
use std::{fmt, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// What a link event meant for the connection.
#[derive(Debug)]
pub enum ConnectionChange {
    Connected(Peer),
    Failed(LinkError),
    Lost(LinkError),
}

struct ConnectAttempt {
    id: u64,
    task: JoinHandle<()>,
}

/// Owns the link and the only copy of [`ConnectionState`].
///
/// Connect attempts run on a spawned task and report back through the link
/// event channel; [`ConnectionManager::handle_event`] is the single place that
/// moves the state forward.
pub struct ConnectionManager {
    transport: Arc<Transport>,
    peer_name: String,
    connect_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    link: Option<LinkHandle>,
    attempt: Option<ConnectAttempt>,
    next_id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl ConnectionManager {
    pub fn new(
        transport: Transport,
        config: &LinkConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport: Arc::new(transport),
            peer_name: config.peer_name.clone(),
            connect_timeout: config.connect_timeout(),
            state,
            link: None,
            attempt: None,
            next_id: 0,
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection {} -> {}", previous, state);
        }
    }

    pub fn request_connect(&mut self) -> Result<(), RemoteError> {
        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(RemoteError::InvalidStateTransition {
                action: "connect",
                state,
            });
        }
        self.next_id += 1;
        let id = self.next_id;
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", self.peer_name);

        let transport = Arc::clone(&self.transport);
        let peer_name = self.peer_name.clone();
        let connect_timeout = self.connect_timeout;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let result = match timeout(
                connect_timeout,
                transport.connect(&peer_name, id, events.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout(connect_timeout)),
            };
            let event = match result {
                Ok(handle) => LinkEvent::Connected { attempt: id, handle },
                Err(error) => LinkEvent::ConnectFailed { attempt: id, error },
            };
            if events.send(event).is_err() {
                debug!("Connect attempt {} finished after the remote shut down", id);
            }
        });
        self.attempt = Some(ConnectAttempt { id, task });
        Ok(())
    }

    /// Always ends up disconnected. Releases the link at most once.
    pub fn request_disconnect(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            info!("Abandoning connect attempt {}", attempt.id);
            attempt.task.abort();
        }
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn handle_event(&mut self, event: LinkEvent) -> Option<ConnectionChange> {
        match event {
            LinkEvent::Connected { attempt, handle } => {
                if !self.is_current_attempt(attempt) {
                    debug!("Dropping link from stale connect attempt {}", attempt);
                    return None;
                }
                self.attempt = None;
                let peer = handle.peer().clone();
                info!("Connected to {}", peer.name);
                self.link = Some(handle);
                self.set_state(ConnectionState::Connected);
                Some(ConnectionChange::Connected(peer))
            }
            LinkEvent::ConnectFailed { attempt, error } => {
                if !self.is_current_attempt(attempt) {
                    debug!("Ignoring failure of stale connect attempt {}", attempt);
                    return None;
                }
                self.attempt = None;
                warn!("Failed to connect to {}: {}", self.peer_name, error);
                self.set_state(ConnectionState::Disconnected);
                Some(ConnectionChange::Failed(error))
            }
            LinkEvent::Lost { link, error } => {
                if self.link.as_ref().map(|handle| handle.id()) != Some(link) {
                    debug!("Ignoring loss of old link {}", link);
                    return None;
                }
                error!("Lost link to {}: {}", self.peer_name, error);
                self.request_disconnect();
                Some(ConnectionChange::Lost(error))
            }
        }
    }

    fn is_current_attempt(&self, id: u64) -> bool {
        self.attempt.as_ref().map(|attempt| attempt.id) == Some(id)
    }

    pub fn send(&self, command: Command) -> Result<(), LinkError> {
        let link = self.link.as_ref().ok_or(LinkError::NotConnected)?;
        if !link.is_connected() {
            return Err(LinkError::NotConnected);
        }
        link.send(command)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.request_disconnect();
    }
}
