//! Fehlertypen der Peer-Session

use thiserror::Error;

/// Fehler beim Aufbau oder Verhandeln einer Peer-Session
#[derive(Debug, Error)]
pub enum RtcError {
    #[error("WebRTC-Fehler: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("Ungueltige Sitzungsbeschreibung: {0}")]
    Sdp(String),

    #[error("Ungueltiger ICE-Kandidat: {0}")]
    Kandidat(String),

    #[error("Peer-Session bereits geschlossen")]
    Geschlossen,
}

pub type RtcResult<T> = std::result::Result<T, RtcError>;
