//! Abstraktion des Peer-Backends
//!
//! Der Negotiator spricht nur diese Traits an; das `webrtc`-Backend und
//! Test-Attrappen sind austauschbar.

use std::sync::Arc;

use async_trait::async_trait;
use talky_audio::PlaybackSink;
use talky_protocol::IceCandidate;

use crate::error::RtcResult;

/// Wird fuer jeden lokal gefundenen ICE-Kandidaten aufgerufen
pub type KandidatCallback = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// Integrationspunkte die beim Erstellen einer Session registriert werden
#[derive(Clone)]
pub struct PeerHooks {
    /// Lokale Kandidaten, sofort an den Steuerkanal weiterzugeben
    pub lokaler_kandidat: KandidatCallback,
    /// Ziel fuer dekodiertes Audio eingehender Spuren; `None` verwirft Medien
    pub playback: Option<PlaybackSink>,
}

/// Eine einzelne Peer-Verbindung in der Rolle "answerer"
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Setzt das Angebot der Gegenseite als Remote-Description
    async fn set_remote_offer(&self, sdp: String) -> RtcResult<()>;

    /// Erzeugt eine lokale Antwort und liefert deren SDP
    async fn create_answer(&self) -> RtcResult<String>;

    /// Setzt die Antwort als Local-Description
    async fn set_local_answer(&self, sdp: String) -> RtcResult<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> RtcResult<()>;

    async fn close(&self) -> RtcResult<()>;
}

/// Erstellt Peer-Verbindungen
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn erstellen(&self, hooks: PeerHooks) -> RtcResult<Box<dyn PeerConnection>>;
}
