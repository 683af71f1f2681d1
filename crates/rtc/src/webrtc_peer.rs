//! Peer-Backend auf Basis von `webrtc`

use std::sync::Arc;

use async_trait::async_trait;
use talky_protocol::IceCandidate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::PeerConfig;
use crate::error::{RtcError, RtcResult};
use crate::media;
use crate::peer::{PeerConnection, PeerFactory, PeerHooks};

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Erstellt `RTCPeerConnection`s mit fester ICE-Serverliste
pub struct WebRtcPeerFactory {
    api: API,
    config: PeerConfig,
}

impl WebRtcPeerFactory {
    /// Registriert Standard-Codecs und -Interceptors
    pub fn neu(config: PeerConfig) -> RtcResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!(ice_server = config.ice_server.len(), "WebRTC-Backend initialisiert");
        Ok(Self { api, config })
    }

    fn rtc_konfiguration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .config
                .ice_server
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone(),
                    credential: s.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn erstellen(&self, hooks: PeerHooks) -> RtcResult<Box<dyn PeerConnection>> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_konfiguration()).await?);
        let cancel = CancellationToken::new();

        // Lokale Kandidaten
        let lokaler_kandidat = hooks.lokaler_kandidat.clone();
        pc.on_ice_candidate(Box::new(move |kandidat: Option<RTCIceCandidate>| {
            let callback = lokaler_kandidat.clone();
            Box::pin(async move {
                let Some(kandidat) = kandidat else {
                    debug!("ICE-Sammlung abgeschlossen");
                    return;
                };
                match kandidat.to_json() {
                    Ok(init) => callback(kandidat_von_init(init)),
                    Err(e) => warn!(fehler = %e, "Lokaler Kandidat nicht serialisierbar"),
                }
            })
        }));

        // Eingehende Spuren
        let sink = hooks.playback.clone();
        let sample_rate = self.config.sample_rate;
        let spur_cancel = cancel.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            match &sink {
                Some(sink) => {
                    tokio::spawn(media::spur_abspielen(
                        track,
                        sample_rate,
                        sink.clone(),
                        spur_cancel.child_token(),
                    ));
                }
                None => debug!(ssrc = track.ssrc(), "Eingehende Spur ohne Playback"),
            }
            Box::pin(async {})
        }));

        // Zustandswechsel nur beobachten
        pc.on_peer_connection_state_change(Box::new(|zustand: RTCPeerConnectionState| {
            info!(zustand = %zustand, "Peer-Verbindungszustand");
            Box::pin(async {})
        }));
        pc.on_signaling_state_change(Box::new(|zustand: RTCSignalingState| {
            debug!(zustand = %zustand, "Signaling-Zustand");
            Box::pin(async {})
        }));

        debug!("Peer-Verbindung erstellt");
        Ok(Box::new(WebRtcPeer { pc, cancel }))
    }
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    /// Beendet die Lese-Tasks eingehender Spuren
    cancel: CancellationToken,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn set_remote_offer(&self, sdp: String) -> RtcResult<()> {
        let offer = RTCSessionDescription::offer(sdp).map_err(|e| RtcError::Sdp(e.to_string()))?;
        self.pc.set_remote_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> RtcResult<String> {
        let answer = self.pc.create_answer(None).await?;
        Ok(answer.sdp)
    }

    async fn set_local_answer(&self, sdp: String) -> RtcResult<()> {
        let answer =
            RTCSessionDescription::answer(sdp).map_err(|e| RtcError::Sdp(e.to_string()))?;
        self.pc.set_local_description(answer).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> RtcResult<()> {
        self.pc
            .add_ice_candidate(init_von_kandidat(candidate))
            .await
            .map_err(|e| RtcError::Kandidat(e.to_string()))
    }

    async fn close(&self) -> RtcResult<()> {
        self.cancel.cancel();
        self.pc.close().await?;
        Ok(())
    }
}

impl Drop for WebRtcPeer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn kandidat_von_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn init_von_kandidat(kandidat: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: kandidat.candidate,
        sdp_mid: kandidat.sdp_mid,
        sdp_mline_index: kandidat.sdp_mline_index,
        username_fragment: kandidat.username_fragment,
    }
}
