//! Peer-Session-Negotiator
//!
//! Besitzt hoechstens eine Peer-Session und verhandelt sie als "answerer":
//!
//! ```text
//! offer -> Remote-Description -> Antwort erzeugen -> Local-Description -> answer
//! ```
//!
//! Pro Kanalbeitritt wird eine frische Session erstellt; die vorherige wird
//! vorher geschlossen. Fehler einzelner Schritte werden als
//! `NegotiationFailed` gemeldet, eine bereits gesendete Antwort wird nicht
//! zurueckgenommen.

use talky_audio::PlaybackSink;
use talky_core::event::{ClientEvent, EventBus};
use talky_core::types::{ChannelId, NicheId};
use talky_presence::PeerSignal;
use talky_protocol::{IceCandidate, OutgoingMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::peer::{PeerConnection, PeerFactory, PeerHooks};

pub use talky_core::event::schritt;

/// Die aktuelle Peer-Session
struct PeerSession {
    peer: Box<dyn PeerConnection>,
    channel_id: ChannelId,
    niche_id: NicheId,
}

/// Verhandelt die Peer-Session eines Kanals
pub struct PeerSessionNegotiator<F: PeerFactory> {
    factory: F,
    bus: EventBus,
    /// Ausgehende Signaling-Nachrichten; ueber den Presence-Client gesendet
    signal_tx: mpsc::UnboundedSender<OutgoingMessage>,
    playback: Option<PlaybackSink>,
    session: Option<PeerSession>,
}

impl<F: PeerFactory> PeerSessionNegotiator<F> {
    pub fn neu(
        factory: F,
        bus: EventBus,
        signal_tx: mpsc::UnboundedSender<OutgoingMessage>,
        playback: Option<PlaybackSink>,
    ) -> Self {
        Self {
            factory,
            bus,
            signal_tx,
            playback,
            session: None,
        }
    }

    pub fn session_aktiv(&self) -> bool {
        self.session.is_some()
    }

    /// Kanal der aktuellen Session
    pub fn kanal(&self) -> Option<(&ChannelId, &NicheId)> {
        self.session.as_ref().map(|s| (&s.channel_id, &s.niche_id))
    }

    /// Verarbeitet ein Signal des Dispatchers
    pub async fn signal_verarbeiten(&mut self, signal: PeerSignal) {
        match signal {
            PeerSignal::KanalBeigetreten {
                channel_id,
                niche_id,
            } => self.kanal_beigetreten(channel_id, niche_id).await,
            PeerSignal::Offer { sdp } => self.handle_offer(sdp).await,
            PeerSignal::Candidate(kandidat) => self.handle_candidate(kandidat).await,
        }
    }

    /// Erstellt eine frische Session fuer den Kanal.
    ///
    /// Eine bestehende Session wird vorher geschlossen und verworfen.
    pub async fn kanal_beigetreten(&mut self, channel_id: ChannelId, niche_id: NicheId) {
        self.schliessen().await;

        let signal_tx = self.signal_tx.clone();
        let kanal = channel_id.clone();
        let niche = niche_id.clone();
        let hooks = PeerHooks {
            lokaler_kandidat: std::sync::Arc::new(move |candidate: IceCandidate| {
                debug!(channel_id = %kanal, "Lokaler ICE-Kandidat");
                let nachricht = OutgoingMessage::Candidate {
                    candidate,
                    channel_id: kanal.clone(),
                    niche_id: niche.clone(),
                };
                if signal_tx.send(nachricht).is_err() {
                    warn!("Steuerkanal nicht erreichbar, Kandidat verworfen");
                }
            }),
            playback: self.playback.clone(),
        };

        match self.factory.erstellen(hooks).await {
            Ok(peer) => {
                info!(channel_id = %channel_id, niche_id = %niche_id, "Peer-Session erstellt");
                self.session = Some(PeerSession {
                    peer,
                    channel_id,
                    niche_id,
                });
            }
            Err(e) => self.fehlgeschlagen(schritt::PEER_ERSTELLEN, e.to_string()),
        }
    }

    /// Beantwortet ein Angebot des Servers.
    ///
    /// Ohne aktive Session wird das Angebot verworfen.
    pub async fn handle_offer(&mut self, sdp: String) {
        let Some(session) = &self.session else {
            warn!("Angebot ohne aktive Peer-Session verworfen");
            self.fehlgeschlagen(schritt::OFFER, "keine aktive Peer-Session".to_string());
            return;
        };
        let channel_id = session.channel_id.clone();
        let niche_id = session.niche_id.clone();

        if let Err(e) = session.peer.set_remote_offer(sdp).await {
            return self.fehlgeschlagen(schritt::REMOTE_DESCRIPTION, e.to_string());
        }
        let answer = match session.peer.create_answer().await {
            Ok(a) => a,
            Err(e) => return self.fehlgeschlagen(schritt::ANSWER_ERSTELLEN, e.to_string()),
        };
        if let Err(e) = session.peer.set_local_answer(answer.clone()).await {
            return self.fehlgeschlagen(schritt::LOCAL_DESCRIPTION, e.to_string());
        }

        info!(channel_id = %channel_id, "Sende SDP-Antwort");
        let nachricht = OutgoingMessage::Answer {
            answer,
            channel_id,
            niche_id,
        };
        if self.signal_tx.send(nachricht).is_err() {
            self.fehlgeschlagen(
                schritt::ANSWER_SENDEN,
                "Steuerkanal nicht erreichbar".to_string(),
            );
        }
    }

    /// Wendet einen Kandidaten der Gegenseite an.
    ///
    /// Unvollstaendige Kandidaten und Kandidaten ohne Session werden
    /// verworfen.
    pub async fn handle_candidate(&mut self, kandidat: IceCandidate) {
        if !kandidat.ist_vollstaendig() {
            warn!(
                candidate = %kandidat.candidate,
                sdp_mid = ?kandidat.sdp_mid,
                "Unvollstaendiger ICE-Kandidat verworfen"
            );
            return;
        }
        let Some(session) = &self.session else {
            debug!("ICE-Kandidat ohne aktive Peer-Session verworfen");
            return;
        };
        if let Err(e) = session.peer.add_ice_candidate(kandidat).await {
            self.fehlgeschlagen(schritt::ICE_CANDIDATE, e.to_string());
        }
    }

    /// Schliesst die aktuelle Session, falls vorhanden
    pub async fn schliessen(&mut self) {
        if let Some(session) = self.session.take() {
            info!(channel_id = %session.channel_id, "Schliesse Peer-Session");
            if let Err(e) = session.peer.close().await {
                warn!(fehler = %e, "Peer-Session konnte nicht sauber geschlossen werden");
            }
        }
    }

    /// Verarbeitet Signale bis zum Abbruch oder bis der Kanal endet
    pub async fn ausfuehren(
        mut self,
        mut signale: mpsc::UnboundedReceiver<PeerSignal>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = signale.recv() => match signal {
                    Some(signal) => self.signal_verarbeiten(signal).await,
                    None => break,
                },
            }
        }
        self.schliessen().await;
        debug!("Negotiator beendet");
    }

    fn fehlgeschlagen(&self, step: &str, message: String) {
        error!(step, fehler = %message, "Peer-Verhandlung fehlgeschlagen");
        self.bus.emit(ClientEvent::NegotiationFailed {
            step: step.to_string(),
            message,
        });
    }
}
