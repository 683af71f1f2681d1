//! Presence-Client – Actor um Manager und Dispatcher
//!
//! Ein einzelner tokio-Task besitzt [`ConnectionManager`] und
//! [`SignalingDispatcher`] und verarbeitet nacheinander:
//! - Transport-Ereignisse und faellige Retry-Timer
//! - Token-Aenderungen (Effekt-Schleife)
//! - UI-Befehle ueber das [`PresenceHandle`]
//! - ausgehende Signaling-Nachrichten der Peer-Session
//!
//! Damit laufen alle Zustandsaenderungen auf einer logischen Queue und der
//! Manager bleibt der einzige Schreiber des Steuerkanals.

use talky_core::event::{schritt, ClientEvent, EventBus, EventSubscription};
use talky_core::types::{ActiveChannels, ChannelId, ConnectionState, NicheId};
use talky_protocol::OutgoingMessage;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PresenceConfig;
use crate::dispatcher::{ActiveClients, DispatchErgebnis, PeerSignal, SignalingDispatcher};
use crate::error::{PresenceError, PresenceResult};
use crate::manager::{ConnectionManager, ManagerEmpfaenger};
use crate::state::ChannelConnection;
use crate::transport::Connector;

/// Groesse der Befehls-Queue
const BEFEHL_KANAL_GROESSE: usize = 64;

enum Befehl {
    KanalBeitreten {
        channel_id: ChannelId,
        niche_id: NicheId,
        antwort: oneshot::Sender<bool>,
    },
    Senden {
        nachricht: OutgoingMessage,
        antwort: oneshot::Sender<bool>,
    },
    Trennen,
    Reconnect {
        antwort: oneshot::Sender<bool>,
    },
    Beenden {
        antwort: oneshot::Sender<()>,
    },
}

// ---------------------------------------------------------------------------
// PresenceHandle
// ---------------------------------------------------------------------------

/// Befehls- und Beobachtungs-Schnittstelle fuer die UI
///
/// Clone ist billig; alle Clones sprechen denselben Actor an.
#[derive(Clone)]
pub struct PresenceHandle {
    befehl_tx: mpsc::Sender<Befehl>,
    signal_tx: mpsc::UnboundedSender<OutgoingMessage>,
    bus: EventBus,
    zustand: watch::Receiver<ConnectionState>,
    kanal: watch::Receiver<Option<ChannelConnection>>,
    clients: watch::Receiver<ActiveClients>,
    kanaele: watch::Receiver<ActiveChannels>,
}

impl PresenceHandle {
    async fn anfragen<T>(
        &self,
        befehl: impl FnOnce(oneshot::Sender<T>) -> Befehl,
    ) -> PresenceResult<T> {
        let (tx, rx) = oneshot::channel();
        self.befehl_tx
            .send(befehl(tx))
            .await
            .map_err(|_| PresenceError::Beendet)?;
        rx.await.map_err(|_| PresenceError::Beendet)
    }

    /// Tritt einem Sprachkanal bei; `true` wenn die Join-Nachricht gesendet wurde
    pub async fn join_channel(
        &self,
        channel_id: ChannelId,
        niche_id: NicheId,
    ) -> PresenceResult<bool> {
        self.anfragen(|antwort| Befehl::KanalBeitreten {
            channel_id,
            niche_id,
            antwort,
        })
        .await
    }

    /// Sendet eine Nachricht; `false` wenn nicht verbunden oder Senden scheitert
    pub async fn send_message(&self, nachricht: OutgoingMessage) -> PresenceResult<bool> {
        self.anfragen(|antwort| Befehl::Senden { nachricht, antwort })
            .await
    }

    /// Manuelles Trennen ohne Abmeldung
    pub async fn disconnect(&self) -> PresenceResult<()> {
        self.befehl_tx
            .send(Befehl::Trennen)
            .await
            .map_err(|_| PresenceError::Beendet)
    }

    /// Verbindet nach manuellem Trennen oder Fehler erneut
    pub async fn reconnect(&self) -> PresenceResult<bool> {
        self.anfragen(|antwort| Befehl::Reconnect { antwort }).await
    }

    /// Raeumt auf und beendet den Actor
    pub async fn shutdown(&self) -> PresenceResult<()> {
        self.anfragen(|antwort| Befehl::Beenden { antwort }).await
    }

    /// Ausgang fuer Signaling-Nachrichten der Peer-Session
    pub fn signal_sender(&self) -> mpsc::UnboundedSender<OutgoingMessage> {
        self.signal_tx.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.zustand.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.zustand.clone()
    }

    pub fn channel(&self) -> Option<ChannelConnection> {
        self.kanal.borrow().clone()
    }

    pub fn watch_channel(&self) -> watch::Receiver<Option<ChannelConnection>> {
        self.kanal.clone()
    }

    pub fn active_clients(&self) -> ActiveClients {
        self.clients.borrow().clone()
    }

    pub fn watch_clients(&self) -> watch::Receiver<ActiveClients> {
        self.clients.clone()
    }

    pub fn active_channels(&self) -> ActiveChannels {
        self.kanaele.borrow().clone()
    }

    pub fn watch_channels(&self) -> watch::Receiver<ActiveChannels> {
        self.kanaele.clone()
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

// ---------------------------------------------------------------------------
// PresenceClient
// ---------------------------------------------------------------------------

/// Actor-Task um Connection-Manager und Dispatcher
pub struct PresenceClient<C: Connector> {
    manager: ConnectionManager<C>,
    empfaenger: ManagerEmpfaenger,
    dispatcher: SignalingDispatcher,
    token_rx: watch::Receiver<Option<String>>,
    befehl_rx: mpsc::Receiver<Befehl>,
    signal_rx: mpsc::UnboundedReceiver<OutgoingMessage>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl<C: Connector + 'static> PresenceClient<C> {
    /// Startet den Actor.
    ///
    /// `token_rx` treibt die Effekt-Schleife; `peer_tx` erhaelt Angebote,
    /// Kandidaten und Kanalbeitritte fuer die Peer-Session.
    pub fn starten(
        config: PresenceConfig,
        connector: C,
        bus: EventBus,
        token_rx: watch::Receiver<Option<String>>,
        peer_tx: mpsc::UnboundedSender<PeerSignal>,
        cancel: CancellationToken,
    ) -> (PresenceHandle, JoinHandle<()>) {
        let (manager, empfaenger) = ConnectionManager::neu(config, connector, bus.clone());
        let dispatcher = SignalingDispatcher::neu(bus.clone(), peer_tx);
        let (befehl_tx, befehl_rx) = mpsc::channel(BEFEHL_KANAL_GROESSE);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let handle = PresenceHandle {
            befehl_tx,
            signal_tx,
            bus: bus.clone(),
            zustand: manager.subscribe_state(),
            kanal: manager.subscribe_channel(),
            clients: dispatcher.subscribe_clients(),
            kanaele: dispatcher.subscribe_channels(),
        };

        let client = Self {
            manager,
            empfaenger,
            dispatcher,
            token_rx,
            befehl_rx,
            signal_rx,
            bus,
            cancel,
        };

        (handle, tokio::spawn(client.ausfuehren()))
    }

    async fn ausfuehren(mut self) {
        info!("Presence-Client gestartet");

        let token = self.token_rx.borrow_and_update().clone();
        self.manager.set_token(token);
        let mut token_aktiv = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!("Presence-Client abgebrochen");
                    break;
                }
                Some(event) = self.empfaenger.socket_events.recv() => {
                    if let Some(text) = self.manager.handle_socket_event(event) {
                        self.nachricht_verarbeiten(&text);
                    }
                }
                Some(timer) = self.empfaenger.retry_due.recv() => {
                    self.manager.on_retry_due(timer);
                }
                aenderung = self.token_rx.changed(), if token_aktiv => match aenderung {
                    Ok(()) => {
                        let token = self.token_rx.borrow_and_update().clone();
                        self.manager.set_token(token);
                    }
                    Err(_) => {
                        warn!("Token-Quelle beendet");
                        token_aktiv = false;
                    }
                },
                Some(nachricht) = self.signal_rx.recv() => {
                    self.signal_senden(&nachricht);
                }
                befehl = self.befehl_rx.recv() => match befehl {
                    Some(Befehl::Beenden { antwort }) => {
                        self.manager.cleanup();
                        let _ = antwort.send(());
                        info!("Presence-Client beendet");
                        return;
                    }
                    Some(befehl) => self.befehl_ausfuehren(befehl),
                    None => break,
                },
            }
        }

        self.manager.cleanup();
        info!("Presence-Client beendet");
    }

    fn nachricht_verarbeiten(&mut self, text: &str) {
        if self.dispatcher.dispatch(text) == DispatchErgebnis::Offer {
            self.manager.channel_verbunden();
        }
    }

    /// Sendet Antwort oder Kandidat der Peer-Session.
    ///
    /// Scheitert das Senden, erfaehrt die UI davon als `NegotiationFailed`.
    fn signal_senden(&mut self, nachricht: &OutgoingMessage) {
        if self.manager.send_message(nachricht) {
            return;
        }
        let step = match nachricht {
            OutgoingMessage::Answer { .. } => schritt::ANSWER_SENDEN,
            OutgoingMessage::Candidate { .. } => schritt::KANDIDAT_SENDEN,
            andere => andere.tag(),
        };
        debug!(step, "Signal der Peer-Session verloren");
        self.bus.emit(ClientEvent::NegotiationFailed {
            step: step.to_string(),
            message: format!(
                "'{}' nicht gesendet (Steuerkanal {})",
                nachricht.tag(),
                self.manager.state()
            ),
        });
    }

    fn befehl_ausfuehren(&mut self, befehl: Befehl) {
        match befehl {
            Befehl::KanalBeitreten {
                channel_id,
                niche_id,
                antwort,
            } => {
                let ok = self
                    .manager
                    .join_channel(channel_id.clone(), niche_id.clone());
                if ok {
                    self.dispatcher.an_peer(PeerSignal::KanalBeigetreten {
                        channel_id,
                        niche_id,
                    });
                }
                let _ = antwort.send(ok);
            }
            Befehl::Senden { nachricht, antwort } => {
                let _ = antwort.send(self.manager.send_message(&nachricht));
            }
            Befehl::Trennen => self.manager.disconnect(false),
            Befehl::Reconnect { antwort } => {
                let _ = antwort.send(self.manager.reconnect());
            }
            // Wird in der Schleife behandelt
            Befehl::Beenden { antwort } => {
                let _ = antwort.send(());
            }
        }
    }
}
