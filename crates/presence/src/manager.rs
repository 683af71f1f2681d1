//! Connection-Manager – Zustandsmaschine des Steuerkanals
//!
//! Besitzt hoechstens einen Socket, treibt den Verbindungs-/Retry-Zyklus
//! und ist der einzige Schreiber von Steuer-Nachrichten.
//!
//! ## State Machine
//! ```text
//!            token            open             init gesendet
//!   Idle ----------> Connecting ----> Handshaking -------------> Connected
//!    ^                   ^                                          |
//!    |  token weg        | Retry-Timer          abnormaler Close    |
//!    +---- (jeder) ---- Reconnecting <------------------------------+
//!                            |
//!                            +-- Retries erschoepft --> Error
//!   Close ohne Retry (explizit / Code 1000) -----------> Closed
//! ```
//!
//! Jeder Socket-Callback vergleicht zuerst die [`SocketId`] des Ereignisses
//! mit dem aktuell verfolgten Socket. Ereignisse eines abgeloesten Sockets
//! aendern nichts.

use talky_core::event::{ClientEvent, EventBus};
use talky_core::types::{ChannelId, ConnectionState, NicheId};
use talky_protocol::{close_code, OutgoingMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::PresenceConfig;
use crate::state::{ChannelConnection, ChannelStatus, RetryState, RetryTimerId};
use crate::transport::{Connector, ControlSocket, SocketEvent, SocketEventKind, SocketId, SocketIdGenerator};

/// Empfaenger-Seiten die der Besitzer des Managers bedienen muss
///
/// Beide Kanaele muessen in den Manager zurueckgespeist werden:
/// Socket-Ereignisse via [`ConnectionManager::handle_socket_event`],
/// faellige Timer via [`ConnectionManager::on_retry_due`].
pub struct ManagerEmpfaenger {
    pub socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    pub retry_due: mpsc::UnboundedReceiver<RetryTimerId>,
}

/// Zustandsmaschine des Presence-Steuerkanals
pub struct ConnectionManager<C: Connector> {
    config: PresenceConfig,
    connector: C,
    bus: EventBus,

    socket_events_tx: mpsc::UnboundedSender<SocketEvent>,
    retry_due_tx: mpsc::UnboundedSender<RetryTimerId>,

    /// Aktuell verfolgter Socket
    socket: Option<Box<dyn ControlSocket>>,
    /// Token mit dem der aktuelle Socket aufgebaut wurde
    socket_token: Option<String>,
    socket_ids: SocketIdGenerator,

    token: Option<String>,
    retry: RetryState,
    retry_task: Option<JoinHandle<()>>,
    letzter_timer: u64,
    fehler: Option<String>,

    state_tx: watch::Sender<ConnectionState>,
    channel_tx: watch::Sender<Option<ChannelConnection>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Erstellt einen neuen Manager im Zustand `Idle`
    pub fn neu(config: PresenceConfig, connector: C, bus: EventBus) -> (Self, ManagerEmpfaenger) {
        let (socket_events_tx, socket_events) = mpsc::unbounded_channel();
        let (retry_due_tx, retry_due) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (channel_tx, _) = watch::channel(None);
        let retry = RetryState::neu(config.max_retries);

        let manager = Self {
            config,
            connector,
            bus,
            socket_events_tx,
            retry_due_tx,
            socket: None,
            socket_token: None,
            socket_ids: SocketIdGenerator::default(),
            token: None,
            retry,
            retry_task: None,
            letzter_timer: 0,
            fehler: None,
            state_tx,
            channel_tx,
        };
        (
            manager,
            ManagerEmpfaenger {
                socket_events,
                retry_due,
            },
        )
    }

    // -----------------------------------------------------------------------
    // Lesezugriff
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Beobachtet den Verbindungszustand
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn channel(&self) -> Option<ChannelConnection> {
        self.channel_tx.borrow().clone()
    }

    pub fn subscribe_channel(&self) -> watch::Receiver<Option<ChannelConnection>> {
        self.channel_tx.subscribe()
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.retry_count
    }

    /// Letzte Fehlerursache, bei jedem neuen Versuch geloescht
    pub fn fehler(&self) -> Option<&str> {
        self.fehler.as_deref()
    }

    /// ID des aktuell verfolgten Sockets
    pub fn aktueller_socket(&self) -> Option<SocketId> {
        self.socket.as_ref().map(|s| s.id())
    }

    pub fn token_vorhanden(&self) -> bool {
        self.token.is_some()
    }

    // -----------------------------------------------------------------------
    // Token-Effekt
    // -----------------------------------------------------------------------

    /// Reagiert auf eine Aenderung der Token-Verfuegbarkeit.
    ///
    /// - Token erscheint im Zustand `Idle`: neuer Verbindungszyklus
    /// - Neues, anderes Token in `Error` (oder `Closed` ohne lokale
    ///   Trennung): Zyklus wird neu gestartet
    /// - Token verschwindet: Trennung, danach `Idle`
    pub fn set_token(&mut self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        let vorher = std::mem::replace(&mut self.token, token.clone());
        let state = self.state();

        debug!(
            token = if token.is_some() { "vorhanden" } else { "fehlt" },
            state = %state,
            explicitly_closed = self.retry.explicitly_closed,
            "Token-Effekt"
        );

        match token {
            Some(t) if state == ConnectionState::Idle => {
                info!("Token verfuegbar, starte Verbindungsaufbau");
                // Socket einer vorherigen Abmeldung, dessen Close noch aussteht
                if let Some(alt) = self.socket.take() {
                    alt.detach();
                }
                self.retry.explicitly_closed = false;
                self.retry.retry_count = 0;
                self.attempt_connection(&t);
            }
            Some(t)
                if vorher.as_deref() != Some(t.as_str())
                    && (state == ConnectionState::Error
                        || (state == ConnectionState::Closed && !self.retry.explicitly_closed)) =>
            {
                info!(state = %state, "Neues Token, starte Verbindungszyklus neu");
                self.retry.explicitly_closed = false;
                self.retry.retry_count = 0;
                self.attempt_connection(&t);
            }
            Some(_) => {}
            None if state != ConnectionState::Idle => {
                info!("Token entfernt, trenne Verbindung");
                self.disconnect(true);
                self.set_state(ConnectionState::Idle);
            }
            None => {}
        }
    }

    // -----------------------------------------------------------------------
    // Verbindungsaufbau
    // -----------------------------------------------------------------------

    /// Startet einen Verbindungsversuch.
    ///
    /// Kein Effekt bei bestehendem oder laufendem Versuch, nach lokaler
    /// Trennung oder mit erschoepften Wiederholungen.
    pub fn attempt_connection(&mut self, token: &str) {
        if token.is_empty() {
            warn!("Verbindungsversuch ohne Token abgebrochen");
            self.set_state(ConnectionState::Idle);
            return;
        }

        let state = self.state();
        if self.socket.is_some()
            || matches!(
                state,
                ConnectionState::Connected | ConnectionState::Connecting | ConnectionState::Handshaking
            )
        {
            warn!(state = %state, "Verbindungsversuch abgebrochen: bereits verbunden oder im Aufbau");
            return;
        }

        if self.retry.explicitly_closed {
            info!("Verbindungsversuch abgebrochen: Verbindung wurde lokal getrennt");
            if !matches!(state, ConnectionState::Closed | ConnectionState::Idle) {
                self.set_state(ConnectionState::Closed);
            }
            return;
        }

        if self.retry.erschoepft() {
            error!(
                max_retries = self.retry.max_retries,
                "Verbindungsversuch abgebrochen: maximale Wiederholungen erreicht"
            );
            self.set_state(ConnectionState::Error);
            self.fehler_merken(format!(
                "Maximale Wiederholungen ({}) erreicht",
                self.retry.max_retries
            ));
            if state != ConnectionState::Error {
                self.bus.emit(ClientEvent::MaxRetriesExceeded {
                    retries: self.retry.retry_count,
                });
            }
            return;
        }

        let erster_versuch = self.retry.retry_count == 0;
        info!(
            versuch = self.retry.retry_count + 1,
            max = self.retry.max_retries,
            "Verbinde Steuerkanal"
        );
        self.set_state(if erster_versuch {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });
        self.fehler = None;
        self.clear_retry_timer();

        let id = self.socket_ids.naechste();
        match self
            .connector
            .connect(&self.config.url, id, self.socket_events_tx.clone())
        {
            Ok(socket) => {
                debug!(socket = %id, "Socket erzeugt");
                self.socket = Some(socket);
                self.socket_token = Some(token.to_string());
            }
            Err(e) => {
                error!(fehler = %e, "Socket konnte nicht erzeugt werden");
                self.socket = None;
                self.set_state(ConnectionState::Error);
                self.fehler = Some(e.to_string());
                self.bus.emit(ClientEvent::SocketError {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Lokale Reaktivierung nach `disconnect` oder `Error`
    ///
    /// Setzt die Retry-Buchhaltung zurueck und verbindet mit dem aktuellen
    /// Token. Gibt `false` zurueck wenn kein Token vorliegt oder bereits
    /// eine Verbindung besteht.
    pub fn reconnect(&mut self) -> bool {
        let Some(token) = self.token.clone() else {
            return false;
        };
        if !matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Error | ConnectionState::Idle
        ) {
            return false;
        }
        self.retry.explicitly_closed = false;
        self.retry.retry_count = 0;
        self.attempt_connection(&token);
        self.socket.is_some()
    }

    // -----------------------------------------------------------------------
    // Socket-Ereignisse
    // -----------------------------------------------------------------------

    /// Verarbeitet ein Transport-Ereignis.
    ///
    /// Gibt fuer Text-Frames des aktuellen Sockets den Inhalt zur
    /// Weiterverarbeitung zurueck.
    pub fn handle_socket_event(&mut self, event: SocketEvent) -> Option<String> {
        if self.aktueller_socket() != Some(event.socket) {
            trace!(socket = %event.socket, "Ereignis eines veralteten Sockets ignoriert");
            return None;
        }

        match event.kind {
            SocketEventKind::Open => self.handle_open(),
            SocketEventKind::Message(text) => return Some(text),
            SocketEventKind::Error(message) => self.handle_error(message),
            SocketEventKind::Close { code, reason } => self.handle_close(code, reason),
        }
        None
    }

    fn handle_open(&mut self) {
        info!("Steuerkanal geoeffnet");
        self.set_state(ConnectionState::Handshaking);
        self.retry.retry_count = 0;
        self.retry.explicitly_closed = false;
        self.clear_retry_timer();

        self.bus.emit(ClientEvent::ConnectionOpen);

        let token = self.socket_token.clone().unwrap_or_default();
        let gesendet = match (self.socket.as_ref(), OutgoingMessage::init(token).encode()) {
            (Some(socket), Ok(text)) => socket.send_text(text).map_err(|e| e.to_string()),
            (None, _) => Err("kein Socket".to_string()),
            (_, Err(e)) => Err(e.to_string()),
        };

        match gesendet {
            Ok(()) => {
                debug!("Init-Nachricht gesendet");
                self.set_state(ConnectionState::Connected);
            }
            Err(e) => {
                error!(fehler = %e, "Init-Nachricht konnte nicht gesendet werden");
                self.set_state(ConnectionState::Error);
                self.fehler = Some(e);
                self.retry.explicitly_closed = true;
                if let Some(socket) = &self.socket {
                    socket.close(close_code::INTERNAL_ERROR, "Init send failed");
                }
            }
        }
    }

    fn handle_error(&mut self, message: String) {
        warn!(fehler = %message, "Socket-Fehler");
        self.bus.emit(ClientEvent::SocketError {
            message: message.clone(),
        });
        self.fehler = Some(message);
    }

    fn handle_close(&mut self, code: u16, reason: String) {
        info!(
            code,
            reason = %reason,
            explicitly_closed = self.retry.explicitly_closed,
            "Steuerkanal geschlossen"
        );
        self.socket = None;
        self.socket_token = None;
        self.bus.emit(ClientEvent::ConnectionClosed { code, reason });
        self.clear_retry_timer();

        let token_vorhanden = self.token.is_some();

        if self.retry.soll_wiederholen(token_vorhanden, code) {
            self.retry.retry_count += 1;
            info!(
                retry = self.retry.retry_count,
                max = self.retry.max_retries,
                delay_ms = self.config.retry_delay.as_millis() as u64,
                "Unerwartete Trennung, plane erneuten Versuch"
            );
            self.set_state(ConnectionState::Reconnecting);
            self.schedule_retry();
            return;
        }

        if self.retry.erschoepft() && !self.retry.explicitly_closed && token_vorhanden {
            error!(
                max_retries = self.retry.max_retries,
                "Maximale Wiederholungen erreicht"
            );
            let war_error = self.state() == ConnectionState::Error;
            self.set_state(ConnectionState::Error);
            self.fehler_merken(format!(
                "Verbindung nach {} Wiederholungen fehlgeschlagen",
                self.retry.max_retries
            ));
            if !war_error {
                self.bus.emit(ClientEvent::MaxRetriesExceeded {
                    retries: self.retry.retry_count,
                });
            }
        } else if !token_vorhanden {
            info!("Benutzer abgemeldet");
            self.set_state(ConnectionState::Idle);
            self.retry.retry_count = 0;
            self.bus.emit(ClientEvent::UserLoggedOut);
        } else {
            self.set_state(ConnectionState::Closed);
            if self.retry.explicitly_closed || close_code::ist_normal(code) {
                self.retry.retry_count = 0;
            }
        }
        self.clear_retry_timer();
    }

    // -----------------------------------------------------------------------
    // Retry-Timer
    // -----------------------------------------------------------------------

    fn schedule_retry(&mut self) {
        self.clear_retry_timer();
        self.letzter_timer += 1;
        let id = RetryTimerId(self.letzter_timer);
        let delay = self.config.retry_delay;
        let tx = self.retry_due_tx.clone();

        self.retry_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(id);
        }));
        self.retry.pending_timer = Some(id);
    }

    fn clear_retry_timer(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
        self.retry.pending_timer = None;
    }

    /// Ein Retry-Timer ist abgelaufen
    ///
    /// Nur der aktuell geplante Timer wird beachtet.
    pub fn on_retry_due(&mut self, id: RetryTimerId) {
        if self.retry.pending_timer != Some(id) {
            trace!(timer = id.0, "Veralteter Retry-Timer ignoriert");
            return;
        }
        self.retry.pending_timer = None;
        self.retry_task = None;

        match self.token.clone() {
            Some(token) if !self.retry.explicitly_closed => self.attempt_connection(&token),
            token => {
                info!("Wiederholung abgebrochen: Token fehlt oder Verbindung wurde lokal getrennt");
                if token.is_some() {
                    self.set_state(ConnectionState::Closed);
                } else {
                    self.set_state(ConnectionState::Idle);
                    self.retry.retry_count = 0;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Trennen / Senden / Aufraeumen
    // -----------------------------------------------------------------------

    /// Trennt die Verbindung und unterdrueckt automatische Wiederholungen.
    ///
    /// Ein offener Socket wird mit Code 1000 geschlossen; der Zustand
    /// folgt dann aus dessen Close-Ereignis. Ohne aktiven Socket wird der
    /// Zustand direkt gesetzt.
    pub fn disconnect(&mut self, is_logout: bool) {
        info!(is_logout, "Trenne Steuerkanal");
        self.retry.explicitly_closed = true;
        self.clear_retry_timer();

        let ziel = if is_logout {
            ConnectionState::Idle
        } else {
            ConnectionState::Closed
        };

        match &self.socket {
            Some(socket) if socket.ist_aktiv() => {
                let grund = if is_logout {
                    "User logged out"
                } else {
                    "Manual disconnect"
                };
                socket.close(close_code::NORMAL, grund);
            }
            Some(_) => {
                self.socket = None;
                self.set_state(ziel);
            }
            None => {
                debug!("Kein aktiver Socket");
                self.set_state(ziel);
            }
        }

        self.retry.retry_count = 0;
    }

    /// Sendet eine Nachricht; nur im Zustand `Connected`.
    ///
    /// Gibt `false` zurueck statt einen Fehler zu werfen. Ein Transportfehler
    /// fuehrt zu `Error` und schliesst den Socket mit Code 1011.
    pub fn send_message(&mut self, message: &OutgoingMessage) -> bool {
        let tag = message.tag();
        let state = self.state();
        let Some(socket) = self.socket.as_ref().filter(|_| state == ConnectionState::Connected)
        else {
            warn!(tag, state = %state, "Senden nicht moeglich: Steuerkanal nicht verbunden");
            return false;
        };

        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(tag, fehler = %e, "Nachricht konnte nicht kodiert werden");
                self.bus.emit(ClientEvent::SendMessageFailed {
                    tag: tag.to_string(),
                    reason: e.to_string(),
                });
                return false;
            }
        };

        match socket.send_text(text) {
            Ok(()) => {
                debug!(tag, "Nachricht gesendet");
                self.bus.emit(ClientEvent::MessageSent {
                    tag: tag.to_string(),
                });
                true
            }
            Err(e) => {
                error!(tag, fehler = %e, "Senden fehlgeschlagen");
                socket.close(close_code::INTERNAL_ERROR, "Send message failed");
                self.set_state(ConnectionState::Error);
                self.fehler = Some(e.to_string());
                self.retry.explicitly_closed = true;
                self.bus.emit(ClientEvent::SendMessageFailed {
                    tag: tag.to_string(),
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Tritt einem Sprachkanal bei
    ///
    /// Bei Erfolg wird der Kanal im Zustand `Init` gemerkt.
    pub fn join_channel(&mut self, channel_id: ChannelId, niche_id: NicheId) -> bool {
        if !self.send_message(&OutgoingMessage::join(channel_id.clone())) {
            return false;
        }
        info!(channel_id = %channel_id, niche_id = %niche_id, "Kanalbeitritt angefragt");
        self.channel_tx.send_replace(Some(ChannelConnection {
            status: ChannelStatus::Init,
            id: channel_id.clone(),
            niche_id: niche_id.clone(),
        }));
        self.bus.emit(ClientEvent::ChannelJoinRequested {
            channel_id,
            niche_id,
        });
        true
    }

    /// Markiert den aktuellen Kanal als verbunden (Server verhandelt)
    pub fn channel_verbunden(&mut self) {
        self.channel_tx.send_if_modified(|kanal| match kanal {
            Some(k) if k.status == ChannelStatus::Init => {
                k.status = ChannelStatus::Connected;
                true
            }
            _ => false,
        });
    }

    /// Idempotenter Abbau beim Entsorgen des Besitzers.
    ///
    /// Koppelt den Socket ab bevor er geschlossen wird, damit kein
    /// ausstehendes Ereignis mehr eintrifft.
    pub fn cleanup(&mut self) {
        debug!("Presence-Cleanup");
        self.clear_retry_timer();

        if let Some(socket) = self.socket.take() {
            socket.detach();
            if socket.ist_aktiv() {
                self.retry.explicitly_closed = true;
                socket.close(close_code::NORMAL, "Client cleanup");
            }
        }
        self.socket_token = None;

        if self.token.is_none() {
            self.set_state(ConnectionState::Idle);
            self.retry.retry_count = 0;
        } else if !matches!(
            self.state(),
            ConnectionState::Error | ConnectionState::Reconnecting
        ) {
            self.set_state(ConnectionState::Closed);
        }
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    fn set_state(&mut self, neu: ConnectionState) {
        let alt = self.state_tx.send_replace(neu);
        if alt != neu {
            debug!(von = %alt, nach = %neu, "Zustandswechsel");
            self.bus.emit(ClientEvent::StateChanged(neu));
        }
    }

    fn fehler_merken(&mut self, ursache: String) {
        if self.fehler.is_none() {
            self.fehler = Some(ursache);
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }
}
