use crate::{
    configuration::AppConfig,
    connection::{ConnectionChange, ConnectionManager, ConnectionState},
    direction::{Direction, DirectionSession, PressStart},
    error::RemoteError,
    link::{LinkEvent, Transport},
    platform::{Haptics, HapticsConfig},
    protocol::Command,
    spiral::SpiralController,
};
use nalgebra as na;
use serde::Serialize;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    time::{sleep_until, Instant},
};
use tracing::*;

/// Input from whatever shell drives the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    DirectionPressStart(Direction),
    DirectionPressEnd(Direction),
    SpiralToggle,
    SpeedCycle,
    ConnectToggle,
    Shutdown,
}

/// Everything a shell needs to render its controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteStatus {
    pub connection: ConnectionState,
    pub controls_enabled: bool,
    pub spiral_active: bool,
    pub speed: u8,
    /// Legs completed by the running or last spiral search
    pub spiral_leg: u32,
    /// Where the spiral has taken the rover, in first-leg units
    pub spiral_offset: na::Vector2<f64>,
    pub notice: Option<String>,
}

/// The foreground half of the remote. Every state mutation happens here.
pub struct Remote {
    connection: ConnectionManager,
    directions: DirectionSession,
    spiral: SpiralController,
    haptics: Arc<dyn Haptics>,
    haptics_config: HapticsConfig,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    status: watch::Sender<RemoteStatus>,
    notice: Option<String>,
}

impl Remote {
    pub fn new(config: &AppConfig, transport: Transport, haptics: Arc<dyn Haptics>) -> Self {
        let (events_tx, link_events) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(transport, &config.link, events_tx);
        let spiral = SpiralController::new(config.spiral.clone());
        let (status, _) = watch::channel(RemoteStatus {
            connection: connection.state(),
            controls_enabled: false,
            spiral_active: false,
            speed: spiral.speed().value(),
            spiral_leg: spiral.leg(),
            spiral_offset: spiral.estimated_offset(),
            notice: None,
        });
        Self {
            connection,
            directions: DirectionSession::default(),
            spiral,
            haptics,
            haptics_config: config.haptics.clone(),
            link_events,
            status,
            notice: None,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// State change notifications for the connection alone.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<RemoteStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> RemoteStatus {
        let connection = self.connection.state();
        RemoteStatus {
            connection,
            controls_enabled: connection == ConnectionState::Connected,
            spiral_active: self.spiral.is_active(),
            speed: self.spiral.speed().value(),
            spiral_leg: self.spiral.leg(),
            spiral_offset: self.spiral.estimated_offset(),
            notice: self.notice.clone(),
        }
    }

    pub fn spiral(&self) -> &SpiralController {
        &self.spiral
    }

    pub fn directions(&self) -> &DirectionSession {
        &self.directions
    }

    fn publish(&self) {
        self.status.send_replace(self.status());
    }

    fn ensure_connected(&self, action: &'static str) -> Result<(), RemoteError> {
        let state = self.connection.state();
        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(RemoteError::InvalidStateTransition { action, state })
        }
    }

    fn guard(&self, action: &'static str) -> bool {
        match self.ensure_connected(action) {
            Ok(()) => true,
            Err(err) => {
                debug!("Rejected: {}", err);
                false
            }
        }
    }

    /// Hand a command to the link. Failures are logged and the command is dropped.
    fn emit(&self, command: Command, user_initiated: bool) {
        match self.connection.send(command) {
            Ok(()) => {
                trace!("Queued {}", command);
                if user_initiated && self.haptics_config.enabled {
                    self.haptics
                        .pulse(self.haptics_config.duration(), self.haptics_config.intensity);
                }
            }
            Err(err) => error!("Error sending command {}: {}", command, err),
        }
    }

    pub fn on_direction_press_start(&mut self, direction: Direction) {
        if !self.guard("direction press") {
            return;
        }
        match self
            .directions
            .press_start(direction, self.spiral.is_active())
        {
            PressStart::Start(command) => self.emit(command, true),
            PressStart::PreemptSpiral => {
                info!("{} pressed, cancelling spiral search", direction);
                if let Some(command) = self.spiral.stop() {
                    self.emit(command, true);
                }
                self.publish();
            }
            PressStart::AlreadyPressed => trace!("{} already pressed", direction),
        }
    }

    pub fn on_direction_press_end(&mut self, direction: Direction) {
        if !self.guard("direction release") {
            return;
        }
        if let Some(command) = self
            .directions
            .press_end(direction, self.spiral.is_active())
        {
            self.emit(command, true);
        }
    }

    pub fn on_spiral_toggle(&mut self) {
        if !self.guard("spiral toggle") {
            return;
        }
        let command = if self.spiral.is_active() {
            self.spiral.stop()
        } else {
            self.spiral.start(Instant::now())
        };
        if let Some(command) = command {
            self.emit(command, true);
        }
        self.publish();
    }

    pub fn on_speed_cycle(&mut self) {
        if !self.guard("speed change") {
            return;
        }
        if let Some(command) = self.spiral.cycle_speed() {
            self.emit(command, true);
        }
        self.publish();
    }

    pub fn on_connect_toggle(&mut self) {
        match self.connection.state() {
            ConnectionState::Disconnected => {
                if let Err(err) = self.connection.request_connect() {
                    warn!("Connect request rejected: {}", err);
                }
                self.notice = Some(format!("Connecting to {}", self.connection.peer_name()));
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                self.disconnect();
                self.notice = Some(String::from("Disconnected"));
            }
        }
        self.publish();
    }

    fn disconnect(&mut self) {
        self.spiral.force_inactive();
        self.directions.release_all();
        self.connection.request_disconnect();
    }

    /// Timer wake-up for the spiral. A stale wake-up after a stop sends nothing.
    pub fn on_spiral_tick(&mut self, now: Instant) {
        if !self.connection.is_connected() {
            self.spiral.force_inactive();
            return;
        }
        let commands = self.spiral.tick(now);
        if commands.is_empty() {
            return;
        }
        for command in commands {
            self.emit(command, false);
        }
        self.publish();
    }

    pub fn handle_link_event(&mut self, event: LinkEvent) {
        match self.connection.handle_event(event) {
            Some(ConnectionChange::Connected(peer)) => {
                self.notice = Some(format!("Connected to {}", peer.name));
            }
            Some(ConnectionChange::Failed(err)) => {
                self.notice = Some(format!("Failed to connect: {}", err));
            }
            Some(ConnectionChange::Lost(err)) => {
                self.spiral.force_inactive();
                self.directions.release_all();
                self.notice = Some(format!("Connection lost: {}", err));
            }
            None => return,
        }
        self.publish();
    }

    pub fn handle_ui_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::DirectionPressStart(direction) => self.on_direction_press_start(direction),
            UiEvent::DirectionPressEnd(direction) => self.on_direction_press_end(direction),
            UiEvent::SpiralToggle => self.on_spiral_toggle(),
            UiEvent::SpeedCycle => self.on_speed_cycle(),
            UiEvent::ConnectToggle => self.on_connect_toggle(),
            UiEvent::Shutdown => self.shutdown(),
        }
    }

    /// Stop the spiral while the rover can still hear it, then drop the link.
    pub fn shutdown(&mut self) {
        if self.connection.is_connected() {
            if let Some(command) = self.spiral.stop() {
                self.emit(command, false);
            }
        }
        self.disconnect();
        self.publish();
    }

    /// Foreground loop. Returns after [`UiEvent::Shutdown`] or when the shell goes away.
    pub async fn run(mut self, mut ui_events: mpsc::Receiver<UiEvent>) {
        self.publish();
        loop {
            let deadline = self.spiral.next_deadline();
            tokio::select! {
                event = ui_events.recv() => match event {
                    Some(UiEvent::Shutdown) | None => break,
                    Some(event) => self.handle_ui_event(event),
                },
                Some(event) = self.link_events.recv() => self.handle_link_event(event),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_spiral_tick(Instant::now());
                }
            }
        }
        info!("Shutting down remote");
        self.shutdown();
    }

    #[cfg(test)]
    async fn next_link_event(&mut self) {
        if let Some(event) = self.link_events.recv().await {
            self.handle_link_event(event);
        }
    }
}
