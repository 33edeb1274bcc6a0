//! Host services the remote leans on: the paired peer directory, the radio
//! adapter, capability checks and haptic feedback.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tracing::*;

/// A bonded rover. Pairing binds it to a serial device node such as `/dev/rfcomm0`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub port: String,
}

pub trait PeerDirectory: Send + Sync {
    fn find_paired_peer(&self, name: &str) -> Option<Peer>;
}

/// Peers listed in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPeers {
    peers: Vec<Peer>,
}

impl ConfiguredPeers {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self { peers }
    }
}

impl PeerDirectory for ConfiguredPeers {
    fn find_paired_peer(&self, name: &str) -> Option<Peer> {
        self.peers.iter().find(|peer| peer.name == name).cloned()
    }
}

pub trait RadioAdapter: Send + Sync {
    fn is_adapter_enabled(&self) -> bool;
    fn request_enable(&self);
}

/// Treats the host's serial ports as the radio stack. No ports, no radio.
#[derive(Debug, Default)]
pub struct SerialAdapter;

impl RadioAdapter for SerialAdapter {
    fn is_adapter_enabled(&self) -> bool {
        match tokio_serial::available_ports() {
            Ok(ports) => !ports.is_empty(),
            Err(err) => {
                warn!("Failed to enumerate serial ports: {}", err);
                false
            }
        }
    }

    fn request_enable(&self) {
        warn!("Radio is off. Power on the adapter and bind the rover with `rfcomm bind`");
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Connect,
    Scan,
}

impl Capability {
    pub fn all() -> Vec<Capability> {
        vec![Capability::Connect, Capability::Scan]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Connect => f.write_str("radio connect"),
            Capability::Scan => f.write_str("radio scan"),
        }
    }
}

pub trait CapabilityCheck: Send + Sync {
    fn has_capability(&self, capability: Capability) -> bool;
}

#[derive(Debug, Clone)]
pub struct GrantedCapabilities {
    granted: Vec<Capability>,
}

impl GrantedCapabilities {
    pub fn new(granted: Vec<Capability>) -> Self {
        Self { granted }
    }
}

impl CapabilityCheck for GrantedCapabilities {
    fn has_capability(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }
}

/// Fire and forget feedback pulse. Implementations must not block.
pub trait Haptics: Send + Sync {
    fn pulse(&self, duration: Duration, intensity: u8);
}

/// Desktop hosts have no vibrator, so the pulse only shows up in the trace log.
#[derive(Debug, Default)]
pub struct TracingHaptics;

impl Haptics for TracingHaptics {
    fn pulse(&self, duration: Duration, intensity: u8) {
        trace!(?duration, intensity, "Haptic pulse");
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct HapticsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default = "default_intensity")]
    pub intensity: u8,
}

fn default_enabled() -> bool {
    true
}

fn default_duration_ms() -> u64 {
    50
}

fn default_intensity() -> u8 {
    128
}

impl Default for HapticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            duration_ms: default_duration_ms(),
            intensity: default_intensity(),
        }
    }
}

impl HapticsConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}
