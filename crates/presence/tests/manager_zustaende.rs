//! Szenarien der Verbindungs-Zustandsmaschine mit In-Memory-Transport

use std::time::Duration;

use talky_core::event::{ClientEvent, EventBus, EventKind, EventSubscription};
use talky_core::types::{ChannelId, ConnectionState, NicheId};
use talky_presence::memory::MemoryConnector;
use talky_presence::state::{ChannelStatus, RetryTimerId};
use talky_presence::{ConnectionManager, ManagerEmpfaenger, PresenceConfig, SocketId};
use talky_protocol::{close_code, OutgoingMessage};
use tokio::time::Instant;

struct Aufbau {
    manager: ConnectionManager<MemoryConnector>,
    empfaenger: ManagerEmpfaenger,
    server: MemoryConnector,
    events: EventSubscription,
}

impl Aufbau {
    fn neu() -> Self {
        let server = MemoryConnector::neu();
        let bus = EventBus::neu();
        let events = bus.subscribe();
        let (manager, empfaenger) =
            ConnectionManager::neu(PresenceConfig::default(), server.clone(), bus);
        Self {
            manager,
            empfaenger,
            server,
            events,
        }
    }

    /// Speist alle anstehenden Socket-Ereignisse in den Manager
    fn pumpen(&mut self) -> Vec<String> {
        let mut texte = Vec::new();
        while let Ok(ev) = self.empfaenger.socket_events.try_recv() {
            if let Some(text) = self.manager.handle_socket_event(ev) {
                texte.push(text);
            }
        }
        texte
    }

    fn socket(&self) -> SocketId {
        self.server.letzter().expect("kein Socket erzeugt")
    }

    /// Token -> offen -> verbunden
    fn verbinden(&mut self, token: &str) {
        self.manager.set_token(Some(token.to_string()));
        let id = self.socket();
        self.server.oeffnen(id);
        self.pumpen();
        assert_eq!(self.manager.state(), ConnectionState::Connected);
    }

    /// Wartet auf den naechsten Retry-Timer und speist ihn ein
    async fn timer_abwarten(&mut self) -> RetryTimerId {
        let id = self
            .empfaenger
            .retry_due
            .recv()
            .await
            .expect("Timer-Kanal geschlossen");
        self.manager.on_retry_due(id);
        id
    }

    fn zustaende(&mut self) -> Vec<ConnectionState> {
        self.events
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn token_bis_verbunden() {
    let mut a = Aufbau::neu();
    assert_eq!(a.manager.state(), ConnectionState::Idle);

    a.manager.set_token(Some("tok-1".into()));
    assert_eq!(a.manager.state(), ConnectionState::Connecting);
    assert_eq!(a.manager.retry_count(), 0);
    let id = a.socket();
    assert_eq!(a.server.url(id).as_deref(), Some("ws://localhost:8080/soundhouse"));

    a.server.oeffnen(id);
    a.pumpen();

    assert_eq!(a.manager.state(), ConnectionState::Connected);
    assert_eq!(a.manager.retry_count(), 0);
    assert_eq!(
        a.zustaende(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Handshaking,
            ConnectionState::Connected
        ]
    );

    let gesendet = a.server.gesendet(id);
    assert_eq!(gesendet.len(), 1);
    let init: serde_json::Value = serde_json::from_str(&gesendet[0]).unwrap();
    assert_eq!(
        init,
        serde_json::json!({"type": "init", "auth_code": "tok-1", "role": "presence"})
    );
}

#[tokio::test(start_paused = true)]
async fn abnormaler_close_plant_wiederholung() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    let erster = a.socket();

    a.server.schliessen(erster, close_code::ABNORMAL, "");
    a.pumpen();

    assert_eq!(a.manager.state(), ConnectionState::Reconnecting);
    assert_eq!(a.manager.retry_count(), 1);
    assert!(a.manager.retry_state().pending_timer.is_some());
    assert_eq!(a.manager.aktueller_socket(), None);

    let start = Instant::now();
    a.timer_abwarten().await;
    let gewartet = start.elapsed();
    assert!(gewartet >= Duration::from_millis(3000));
    assert!(gewartet < Duration::from_millis(3100));

    // Zweiter Socket, weiterhin reconnecting
    assert_eq!(a.server.sockets().len(), 2);
    assert_ne!(a.socket(), erster);
    assert_eq!(a.manager.state(), ConnectionState::Reconnecting);

    // Erfolgreicher Handshake setzt retry_count zurueck
    let zweiter = a.socket();
    a.server.oeffnen(zweiter);
    a.pumpen();
    assert_eq!(a.manager.state(), ConnectionState::Connected);
    assert_eq!(a.manager.retry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn maximale_wiederholungen_fuehren_zu_error() {
    let mut a = Aufbau::neu();
    a.manager.set_token(Some("tok".into()));

    for versuch in 1..=5u32 {
        let id = a.socket();
        a.server.schliessen(id, close_code::ABNORMAL, "");
        a.pumpen();
        assert_eq!(a.manager.state(), ConnectionState::Reconnecting);
        assert_eq!(a.manager.retry_count(), versuch);
        a.timer_abwarten().await;
    }

    // Der fuenfte geplante Versuch findet die Wiederholungen erschoepft
    assert_eq!(a.manager.state(), ConnectionState::Error);
    assert!(a.manager.fehler().is_some());
    assert_eq!(a.manager.retry_state().pending_timer, None);

    let max_events = a
        .events
        .drain()
        .into_iter()
        .filter(|e| e.kind() == EventKind::MaxRetriesExceeded)
        .count();
    assert_eq!(max_events, 1);

    // Keine weiteren automatischen Versuche
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(a.empfaenger.retry_due.try_recv().is_err());
    assert_eq!(a.server.sockets().len(), 5);

    // Gleiches Token aendert nichts, ein neues startet den Zyklus neu
    a.manager.set_token(Some("tok".into()));
    assert_eq!(a.manager.state(), ConnectionState::Error);
    a.manager.set_token(Some("tok-neu".into()));
    assert_eq!(a.manager.state(), ConnectionState::Connecting);
    assert_eq!(a.manager.retry_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn veraltete_socket_ereignisse_werden_ignoriert() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    let alt = a.socket();

    a.server.schliessen(alt, close_code::ABNORMAL, "");
    a.pumpen();
    a.timer_abwarten().await;
    let neu = a.socket();
    assert_ne!(alt, neu);
    assert_eq!(a.manager.state(), ConnectionState::Reconnecting);
    a.events.drain();

    // Spaete Ereignisse des alten Sockets, direkt eingespeist
    for kind in [
        talky_presence::SocketEventKind::Open,
        talky_presence::SocketEventKind::Message(r#"{"type":"error","message":"x"}"#.into()),
        talky_presence::SocketEventKind::Error("spaet".into()),
        talky_presence::SocketEventKind::Close {
            code: close_code::ABNORMAL,
            reason: String::new(),
        },
    ] {
        let text = a
            .manager
            .handle_socket_event(talky_presence::SocketEvent::neu(alt, kind));
        assert!(text.is_none());
    }

    assert_eq!(a.manager.state(), ConnectionState::Reconnecting);
    assert_eq!(a.manager.retry_count(), 1);
    assert_eq!(a.manager.aktueller_socket(), Some(neu));
    assert!(a.events.drain().is_empty());
    assert!(a.server.gesendet(neu).is_empty());
}

#[tokio::test(start_paused = true)]
async fn veralteter_timer_wird_ignoriert() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    a.manager.on_retry_due(RetryTimerId(999));
    assert_eq!(a.manager.state(), ConnectionState::Connected);
    assert_eq!(a.server.sockets().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn normaler_close_fuehrt_zu_closed() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    a.server.schliessen(a.socket(), close_code::NORMAL, "Server faehrt herunter");
    a.pumpen();

    assert_eq!(a.manager.state(), ConnectionState::Closed);
    assert_eq!(a.manager.retry_count(), 0);
    assert_eq!(a.manager.retry_state().pending_timer, None);
}

#[tokio::test(start_paused = true)]
async fn manuelles_trennen() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    let id = a.socket();

    a.manager.disconnect(false);
    assert_eq!(
        a.server.geschlossen(id),
        Some((close_code::NORMAL, "Manual disconnect".to_string()))
    );
    a.pumpen();
    assert_eq!(a.manager.state(), ConnectionState::Closed);
    assert!(a.manager.retry_state().explicitly_closed);

    // Token-Refresh stellt die Verbindung nicht wieder her
    a.manager.set_token(Some("tok-2".into()));
    assert_eq!(a.manager.state(), ConnectionState::Closed);
    assert!(!a.manager.send_message(&OutgoingMessage::join(ChannelId::neu("c"))));

    // Explizites reconnect schon
    assert!(a.manager.reconnect());
    assert_eq!(a.manager.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn trennen_waehrend_der_wartezeit() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    a.server.schliessen(a.socket(), close_code::ABNORMAL, "");
    a.pumpen();
    assert_eq!(a.manager.state(), ConnectionState::Reconnecting);

    a.manager.disconnect(false);
    assert_eq!(a.manager.state(), ConnectionState::Closed);
    assert_eq!(a.manager.retry_state().pending_timer, None);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(a.empfaenger.retry_due.try_recv().is_err());
    assert_eq!(a.server.sockets().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn abmeldung_waehrend_verbunden() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    let id = a.socket();
    a.events.drain();

    a.manager.set_token(None);
    assert_eq!(a.manager.state(), ConnectionState::Idle);
    assert_eq!(
        a.server.geschlossen(id),
        Some((close_code::NORMAL, "User logged out".to_string()))
    );

    a.pumpen();
    assert_eq!(a.manager.state(), ConnectionState::Idle);
    assert_eq!(a.manager.retry_count(), 0);
    assert!(a
        .events
        .drain()
        .iter()
        .any(|e| *e == ClientEvent::UserLoggedOut));

    // Erneute Anmeldung startet einen frischen Zyklus
    a.manager.set_token(Some("tok-2".into()));
    assert_eq!(a.manager.state(), ConnectionState::Connecting);
    assert!(!a.manager.retry_state().explicitly_closed);
}

#[tokio::test(start_paused = true)]
async fn init_senden_scheitert() {
    let mut a = Aufbau::neu();
    a.manager.set_token(Some("tok".into()));
    let id = a.socket();
    a.server.set_send_fehler(true);
    a.server.oeffnen(id);
    a.pumpen();

    assert_eq!(a.manager.state(), ConnectionState::Closed);
    assert_eq!(
        a.server.geschlossen(id),
        Some((close_code::INTERNAL_ERROR, "Init send failed".to_string()))
    );
    // Der Close nach 1011 ist explizit: kein Retry
    assert_eq!(a.manager.retry_state().pending_timer, None);
    let zustaende = a.zustaende();
    assert!(zustaende.contains(&ConnectionState::Error));
}

#[tokio::test(start_paused = true)]
async fn senden_nur_wenn_verbunden() {
    let mut a = Aufbau::neu();
    assert!(!a.manager.send_message(&OutgoingMessage::join(ChannelId::neu("c"))));

    a.verbinden("tok");
    a.events.drain();
    assert!(a.manager.send_message(&OutgoingMessage::join(ChannelId::neu("c"))));
    assert!(a
        .events
        .drain()
        .contains(&ClientEvent::MessageSent { tag: "join".into() }));
}

#[tokio::test(start_paused = true)]
async fn sendefehler_fuehrt_zu_error() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    let id = a.socket();
    a.events.drain();

    a.server.set_send_fehler(true);
    assert!(!a.manager.send_message(&OutgoingMessage::join(ChannelId::neu("c"))));
    assert_eq!(a.manager.state(), ConnectionState::Error);
    assert!(a.manager.retry_state().explicitly_closed);
    assert_eq!(
        a.server.geschlossen(id),
        Some((close_code::INTERNAL_ERROR, "Send message failed".to_string()))
    );
    assert!(a
        .events
        .drain()
        .iter()
        .any(|e| e.kind() == EventKind::SendMessageFailed));
}

#[tokio::test(start_paused = true)]
async fn socket_erzeugung_scheitert() {
    let mut a = Aufbau::neu();
    a.server.set_connect_fehler(true);
    a.manager.set_token(Some("tok".into()));

    assert_eq!(a.manager.state(), ConnectionState::Error);
    assert!(a.manager.fehler().is_some());
    assert!(a
        .events
        .drain()
        .iter()
        .any(|e| e.kind() == EventKind::SocketError));

    a.server.set_connect_fehler(false);
    a.manager.set_token(Some("tok-2".into()));
    assert_eq!(a.manager.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn kanal_beitreten() {
    let mut a = Aufbau::neu();
    assert!(!a
        .manager
        .join_channel(ChannelId::neu("c1"), NicheId::neu("n1")));
    assert!(a.manager.channel().is_none());

    a.verbinden("tok");
    assert!(a
        .manager
        .join_channel(ChannelId::neu("c1"), NicheId::neu("n1")));

    let kanal = a.manager.channel().unwrap();
    assert_eq!(kanal.status, ChannelStatus::Init);
    assert_eq!(kanal.id, ChannelId::neu("c1"));

    let gesendet = a.server.gesendet(a.socket());
    let join: serde_json::Value = serde_json::from_str(gesendet.last().unwrap()).unwrap();
    assert_eq!(
        join,
        serde_json::json!({"type": "join", "role": "answerer", "channel_id": "c1"})
    );

    a.manager.channel_verbunden();
    assert_eq!(a.manager.channel().unwrap().status, ChannelStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn cleanup_koppelt_ab_und_ist_idempotent() {
    let mut a = Aufbau::neu();
    a.verbinden("tok");
    let id = a.socket();

    a.manager.cleanup();
    assert!(a.server.abgekoppelt(id));
    assert_eq!(
        a.server.geschlossen(id),
        Some((close_code::NORMAL, "Client cleanup".to_string()))
    );
    assert_eq!(a.manager.state(), ConnectionState::Closed);
    // Abgekoppelt: kein Close-Ereignis
    assert!(a.empfaenger.socket_events.try_recv().is_err());

    a.manager.cleanup();
    assert_eq!(a.manager.state(), ConnectionState::Closed);

    a.manager.set_token(None);
    a.manager.cleanup();
    assert_eq!(a.manager.state(), ConnectionState::Idle);
}
