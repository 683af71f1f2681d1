//! Signaling-Dispatcher – verteilt eingehende Steuer-Nachrichten
//!
//! Jede Nachricht wird einzeln dekodiert. Dekodierfehler und unbekannte
//! Typen werden gemeldet, sind aber nie fatal und beruehren den
//! Verbindungszustand nicht. `offer` und `candidate` gehen an die
//! Peer-Session, Snapshots ersetzen den vorherigen Stand vollstaendig.

use talky_core::event::{ClientEvent, EventBus};
use talky_core::types::{ActiveChannels, ChannelId, ClientDescriptor, NicheId};
use talky_protocol::{IceCandidate, IncomingMessage};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Peer-Signale
// ---------------------------------------------------------------------------

/// Signale an die Peer-Session
#[derive(Debug, Clone, PartialEq)]
pub enum PeerSignal {
    /// Kanalbeitritt wurde gesendet; neue Session fuer diesen Kanal
    KanalBeigetreten {
        channel_id: ChannelId,
        niche_id: NicheId,
    },
    /// SDP-Angebot des Servers
    Offer { sdp: String },
    /// ICE-Kandidat der Gegenseite
    Candidate(IceCandidate),
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Snapshot der aktiven Presence-Clients
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveClients {
    pub clients: Vec<ClientDescriptor>,
    pub join_code: Option<String>,
}

/// Was der Dispatcher mit einer Nachricht gemacht hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchErgebnis {
    /// Snapshot ersetzt
    Snapshot,
    /// Als Ereignis weitergemeldet
    Gemeldet,
    /// Angebot an die Peer-Session weitergeleitet
    Offer,
    /// Kandidat an die Peer-Session weitergeleitet
    Candidate,
    Unbehandelt,
    Fehlerhaft,
}

// ---------------------------------------------------------------------------
// SignalingDispatcher
// ---------------------------------------------------------------------------

/// Dekodiert und verteilt eingehende Nachrichten
pub struct SignalingDispatcher {
    bus: EventBus,
    peer_tx: mpsc::UnboundedSender<PeerSignal>,
    clients_tx: watch::Sender<ActiveClients>,
    channels_tx: watch::Sender<ActiveChannels>,
    letzte_nachricht: Option<IncomingMessage>,
}

impl SignalingDispatcher {
    pub fn neu(bus: EventBus, peer_tx: mpsc::UnboundedSender<PeerSignal>) -> Self {
        let (clients_tx, _) = watch::channel(ActiveClients::default());
        let (channels_tx, _) = watch::channel(ActiveChannels::new());
        Self {
            bus,
            peer_tx,
            clients_tx,
            channels_tx,
            letzte_nachricht: None,
        }
    }

    pub fn subscribe_clients(&self) -> watch::Receiver<ActiveClients> {
        self.clients_tx.subscribe()
    }

    pub fn subscribe_channels(&self) -> watch::Receiver<ActiveChannels> {
        self.channels_tx.subscribe()
    }

    pub fn active_clients(&self) -> ActiveClients {
        self.clients_tx.borrow().clone()
    }

    pub fn active_channels(&self) -> ActiveChannels {
        self.channels_tx.borrow().clone()
    }

    /// Zuletzt erfolgreich dekodierte Nachricht
    pub fn letzte_nachricht(&self) -> Option<&IncomingMessage> {
        self.letzte_nachricht.as_ref()
    }

    /// Verarbeitet einen Text-Frame
    pub fn dispatch(&mut self, text: &str) -> DispatchErgebnis {
        let nachricht = match IncomingMessage::decode(text) {
            Ok(n) => n,
            Err(e) => {
                error!(fehler = %e, roh = %text, "Nachricht konnte nicht dekodiert werden");
                self.bus.emit(ClientEvent::MessageParsingError {
                    message: e.to_string(),
                    raw: text.to_string(),
                });
                return DispatchErgebnis::Fehlerhaft;
            }
        };
        self.letzte_nachricht = Some(nachricht.clone());

        match nachricht {
            IncomingMessage::ActiveClientsUpdate { clients, join_code } => {
                info!(anzahl = clients.len(), "Aktive Clients aktualisiert");
                let snapshot = ActiveClients { clients, join_code };
                self.clients_tx.send_replace(snapshot.clone());
                self.bus.emit(ClientEvent::ActiveClientsUpdated {
                    clients: snapshot.clients,
                    join_code: snapshot.join_code,
                });
                DispatchErgebnis::Snapshot
            }
            IncomingMessage::ActiveChannels { channels } => {
                debug!(anzahl = channels.len(), "Aktive Kanaele aktualisiert");
                self.channels_tx.send_replace(channels.clone());
                self.bus
                    .emit(ClientEvent::ActiveChannelsUpdated { channels });
                DispatchErgebnis::Snapshot
            }
            IncomingMessage::Error { message } => {
                error!(fehler = %message, "Fehlermeldung des Servers");
                self.bus.emit(ClientEvent::ServerError { message });
                DispatchErgebnis::Gemeldet
            }
            IncomingMessage::ChatMessageBroadcast(chat) => {
                debug!(channel_id = ?chat.channel_id, "Chat-Nachricht empfangen");
                self.bus.emit(ClientEvent::ChatMessageReceived(chat));
                DispatchErgebnis::Gemeldet
            }
            IncomingMessage::Candidate { candidate } => {
                self.an_peer(PeerSignal::Candidate(candidate));
                DispatchErgebnis::Candidate
            }
            IncomingMessage::Offer { offer } => {
                info!("SDP-Angebot empfangen");
                self.an_peer(PeerSignal::Offer { sdp: offer });
                DispatchErgebnis::Offer
            }
            IncomingMessage::Unknown { tag, raw } => {
                warn!(tag = %tag, "Unbehandelte Nachricht");
                self.bus.emit(ClientEvent::UnhandledMessage { tag, raw });
                DispatchErgebnis::Unbehandelt
            }
        }
    }

    /// Leitet ein Signal an die Peer-Session weiter
    pub fn an_peer(&self, signal: PeerSignal) {
        if self.peer_tx.send(signal).is_err() {
            warn!("Peer-Session nicht erreichbar, Signal verworfen");
        }
    }
}
