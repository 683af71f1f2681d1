//! Konfiguration der Peer-Session

use serde::Deserialize;

/// Ein STUN/TURN-Server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// Konfiguration fuer neue Peer-Sessions
///
/// Die Serverliste wird beim Erstellen der Factory festgelegt und zur
/// Laufzeit nicht neu verhandelt.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    pub ice_server: Vec<IceServerConfig>,
    /// Ausgaberate des Opus-Decoders (Hz)
    pub sample_rate: u32,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_server: Vec::new(),
            sample_rate: 48_000,
        }
    }
}
