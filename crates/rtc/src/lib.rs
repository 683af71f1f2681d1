//! # talky-rtc
//!
//! Peer-Session des Clients in der Rolle "answerer":
//! - [`PeerSessionNegotiator`]: Offer -> Answer, ICE-Kandidaten in beide Richtungen
//! - [`PeerFactory`] / [`PeerConnection`]: austauschbares Peer-Backend
//! - [`WebRtcPeerFactory`]: Backend auf Basis von `webrtc`
//! - Eingehende Opus-Spuren werden dekodiert und an das Playback uebergeben

pub mod config;
pub mod error;
pub mod media;
pub mod negotiator;
pub mod peer;
pub mod webrtc_peer;

pub use config::{IceServerConfig, PeerConfig};
pub use error::{RtcError, RtcResult};
pub use negotiator::PeerSessionNegotiator;
pub use peer::{KandidatCallback, PeerConnection, PeerFactory, PeerHooks};
pub use webrtc_peer::WebRtcPeerFactory;
