//! Event-Bus fuer Verbindungs- und Signaling-Ereignisse
//!
//! Entkoppelt die Lebenszyklus-Meldungen des Steuerkanals von ihren
//! Konsumenten (UI, Logging, Tests). Basiert auf `tokio::sync::broadcast`:
//! Senden ist fire-and-forget, spaete Abonnenten erhalten keine alten
//! Ereignisse, und ein Abonnement kann auf Ereignisarten gefiltert werden.

use tokio::sync::broadcast;

use crate::types::{
    ActiveChannels, ChannelId, ChatMessage, ClientDescriptor, ConnectionState, NicheId,
};

/// Groesse des Broadcast-Kanals fuer Client-Events
const EVENT_KANAL_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Alle Ereignisse die der Presence-Kern nach aussen meldet
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Transport ist offen, Init-Nachricht wird gesendet
    ConnectionOpen,
    /// Der aktuelle Socket wurde geschlossen
    ConnectionClosed { code: u16, reason: String },
    /// Transportfehler am aktuellen Socket (kein Zustandswechsel)
    SocketError { message: String },
    /// Der Verbindungszustand hat sich geaendert
    StateChanged(ConnectionState),
    ActiveClientsUpdated {
        clients: Vec<ClientDescriptor>,
        join_code: Option<String>,
    },
    ActiveChannelsUpdated { channels: ActiveChannels },
    /// Fehlermeldung des Servers
    ServerError { message: String },
    ChatMessageReceived(ChatMessage),
    /// Nachricht mit unbekanntem Typ
    UnhandledMessage { tag: String, raw: String },
    /// Nachricht konnte nicht dekodiert werden
    MessageParsingError { message: String, raw: String },
    MessageSent { tag: String },
    SendMessageFailed { tag: String, reason: String },
    /// Maximale Anzahl Wiederholungen erreicht
    MaxRetriesExceeded { retries: u32 },
    /// Token ist waehrend einer Verbindung verschwunden
    UserLoggedOut,
    /// Join-Nachricht fuer einen Kanal wurde gesendet
    ChannelJoinRequested {
        channel_id: ChannelId,
        niche_id: NicheId,
    },
    /// Ein SDP/ICE-Schritt der Peer-Session ist fehlgeschlagen
    NegotiationFailed { step: String, message: String },
}

/// Verhandlungsschritte, wie sie in `NegotiationFailed` gemeldet werden
pub mod schritt {
    pub const PEER_ERSTELLEN: &str = "create_peer";
    pub const OFFER: &str = "offer";
    pub const REMOTE_DESCRIPTION: &str = "set_remote_description";
    pub const ANSWER_ERSTELLEN: &str = "create_answer";
    pub const LOCAL_DESCRIPTION: &str = "set_local_description";
    pub const ANSWER_SENDEN: &str = "send_answer";
    pub const KANDIDAT_SENDEN: &str = "send_candidate";
    pub const ICE_CANDIDATE: &str = "add_ice_candidate";
}

/// Art eines Ereignisses, ohne Nutzdaten (fuer gefilterte Abonnements)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionOpen,
    ConnectionClosed,
    SocketError,
    StateChanged,
    ActiveClientsUpdated,
    ActiveChannelsUpdated,
    ServerError,
    ChatMessageReceived,
    UnhandledMessage,
    MessageParsingError,
    MessageSent,
    SendMessageFailed,
    MaxRetriesExceeded,
    UserLoggedOut,
    ChannelJoinRequested,
    NegotiationFailed,
}

impl EventKind {
    /// Oeffentlicher Ereignisname an der UI-Grenze
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionOpen => "connectionOpen",
            Self::ConnectionClosed => "connectionClosed",
            Self::SocketError => "socketError",
            Self::StateChanged => "stateChanged",
            Self::ActiveClientsUpdated => "activeClientsUpdated",
            Self::ActiveChannelsUpdated => "activeChannelsUpdated",
            Self::ServerError => "serverError",
            Self::ChatMessageReceived => "chatMessageReceived",
            Self::UnhandledMessage => "unhandledMessage",
            Self::MessageParsingError => "messageParsingError",
            Self::MessageSent => "messageSent",
            Self::SendMessageFailed => "sendMessageFailed",
            Self::MaxRetriesExceeded => "maxRetriesExceeded",
            Self::UserLoggedOut => "userLoggedOut",
            Self::ChannelJoinRequested => "channelJoinRequested",
            Self::NegotiationFailed => "negotiationFailed",
        }
    }
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionOpen => EventKind::ConnectionOpen,
            Self::ConnectionClosed { .. } => EventKind::ConnectionClosed,
            Self::SocketError { .. } => EventKind::SocketError,
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::ActiveClientsUpdated { .. } => EventKind::ActiveClientsUpdated,
            Self::ActiveChannelsUpdated { .. } => EventKind::ActiveChannelsUpdated,
            Self::ServerError { .. } => EventKind::ServerError,
            Self::ChatMessageReceived(_) => EventKind::ChatMessageReceived,
            Self::UnhandledMessage { .. } => EventKind::UnhandledMessage,
            Self::MessageParsingError { .. } => EventKind::MessageParsingError,
            Self::MessageSent { .. } => EventKind::MessageSent,
            Self::SendMessageFailed { .. } => EventKind::SendMessageFailed,
            Self::MaxRetriesExceeded { .. } => EventKind::MaxRetriesExceeded,
            Self::UserLoggedOut => EventKind::UserLoggedOut,
            Self::ChannelJoinRequested { .. } => EventKind::ChannelJoinRequested,
            Self::NegotiationFailed { .. } => EventKind::NegotiationFailed,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Typisierter Publish/Subscribe-Bus
///
/// Clone teilt den inneren Broadcast-Kanal.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Erstellt einen neuen EventBus
    pub fn neu() -> Self {
        let (tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self { tx }
    }

    /// Sendet ein Ereignis an alle aktuellen Abonnenten
    ///
    /// Ohne Abonnenten wird das Ereignis verworfen.
    pub fn emit(&self, event: ClientEvent) {
        tracing::trace!(event = event.kind().name(), "Ereignis");
        let _ = self.tx.send(event);
    }

    /// Abonniert alle zukuenftigen Ereignisse
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    /// Abonniert nur die angegebenen Ereignisarten
    pub fn subscribe_kind(&self, kinds: &[EventKind]) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filter: Some(kinds.to_vec()),
        }
    }

    /// Anzahl aktiver Abonnenten
    pub fn abonnenten(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::neu()
    }
}

/// Empfaenger-Seite eines Abonnements
pub struct EventSubscription {
    rx: broadcast::Receiver<ClientEvent>,
    filter: Option<Vec<EventKind>>,
}

impl EventSubscription {
    fn passt(&self, event: &ClientEvent) -> bool {
        match &self.filter {
            Some(kinds) => kinds.contains(&event.kind()),
            None => true,
        }
    }

    /// Wartet auf das naechste passende Ereignis
    ///
    /// Gibt `None` zurueck wenn der Bus geschlossen wurde. Verpasste
    /// Ereignisse eines zu langsamen Abonnenten werden uebersprungen.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.passt(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(verpasst = n, "Event-Abonnent zu langsam");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Holt das naechste passende Ereignis ohne zu warten
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.passt(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Leert das Abonnement und gibt alle anstehenden passenden Ereignisse zurueck
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ereignis_an_abonnenten() {
        let bus = EventBus::neu();
        let mut sub = bus.subscribe();
        bus.emit(ClientEvent::ConnectionOpen);
        assert_eq!(sub.recv().await, Some(ClientEvent::ConnectionOpen));
    }

    #[test]
    fn spaeter_abonnent_erhaelt_nichts() {
        let bus = EventBus::neu();
        bus.emit(ClientEvent::UserLoggedOut);
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn senden_ohne_abonnenten_ist_ok() {
        let bus = EventBus::neu();
        bus.emit(ClientEvent::ConnectionOpen);
        assert_eq!(bus.abonnenten(), 0);
    }

    #[test]
    fn gefiltertes_abonnement() {
        let bus = EventBus::neu();
        let mut sub = bus.subscribe_kind(&[EventKind::ServerError]);
        bus.emit(ClientEvent::ConnectionOpen);
        bus.emit(ClientEvent::ServerError {
            message: "kaputt".into(),
        });
        bus.emit(ClientEvent::UserLoggedOut);

        let events = sub.drain();
        assert_eq!(
            events,
            vec![ClientEvent::ServerError {
                message: "kaputt".into()
            }]
        );
    }

    #[test]
    fn ereignis_namen() {
        assert_eq!(EventKind::MaxRetriesExceeded.name(), "maxRetriesExceeded");
        assert_eq!(
            ClientEvent::ConnectionClosed {
                code: 1000,
                reason: String::new()
            }
            .kind(),
            EventKind::ConnectionClosed
        );
    }
}
