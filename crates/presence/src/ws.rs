//! WebSocket-Transport via tokio-tungstenite
//!
//! Jeder Socket bekommt einen eigenen tokio-Task, der Verbindungsaufbau,
//! Lesen und Schreiben uebernimmt. Das Handle kommuniziert ueber einen
//! mpsc-Kanal mit dem Task; Ereignisse gehen ueber den gemeinsamen
//! Ereigniskanal an den Manager.
//!
//! ## Socket-Zustand
//! ```text
//! Connecting -> Open -> Closing -> Closed
//!     |                    ^
//!     +--------------------+   (close() waehrend des Aufbaus)
//! ```

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use talky_protocol::close_code;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{PresenceError, PresenceResult};
use crate::transport::{
    Connector, ControlSocket, SocketEvent, SocketEventKind, SocketEventSender, SocketId,
};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSING: u8 = 2;
const CLOSED: u8 = 3;

/// Close-Code wenn der Server keinen Code mitsendet
const KEIN_STATUS: u16 = 1005;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Erzeugt WebSocket-Verbindungen
///
/// Muss innerhalb einer tokio-Runtime verwendet werden.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn neu(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &str,
        id: SocketId,
        events: SocketEventSender,
    ) -> PresenceResult<Box<dyn ControlSocket>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PresenceError::Verbindung(format!("Keine tokio-Runtime: {}", e)))?;

        let geteilt = Arc::new(Geteilt {
            id,
            zustand: AtomicU8::new(CONNECTING),
            abgekoppelt: AtomicBool::new(false),
            events,
        });
        let (befehl_tx, befehl_rx) = mpsc::unbounded_channel();

        debug!(socket = %id, url, "WebSocket-Verbindungsaufbau");
        runtime.spawn(socket_task(
            url.to_string(),
            self.connect_timeout,
            Arc::clone(&geteilt),
            befehl_rx,
        ));

        Ok(Box::new(WsSocket { geteilt, befehl_tx }))
    }
}

// ---------------------------------------------------------------------------
// Socket-Handle
// ---------------------------------------------------------------------------

enum Befehl {
    Text(String),
    Close { code: u16, reason: String },
}

/// Zwischen Handle und Task geteilter Zustand
struct Geteilt {
    id: SocketId,
    zustand: AtomicU8,
    abgekoppelt: AtomicBool,
    events: SocketEventSender,
}

impl Geteilt {
    fn melden(&self, kind: SocketEventKind) {
        if self.abgekoppelt.load(Ordering::Acquire) {
            trace!(socket = %self.id, "Ereignis nach detach verworfen");
            return;
        }
        let _ = self.events.send(SocketEvent::neu(self.id, kind));
    }

    fn zustand(&self) -> u8 {
        self.zustand.load(Ordering::Acquire)
    }
}

struct WsSocket {
    geteilt: Arc<Geteilt>,
    befehl_tx: mpsc::UnboundedSender<Befehl>,
}

impl ControlSocket for WsSocket {
    fn id(&self) -> SocketId {
        self.geteilt.id
    }

    fn send_text(&self, text: String) -> PresenceResult<()> {
        if self.geteilt.zustand() != OPEN {
            return Err(PresenceError::NichtOffen);
        }
        self.befehl_tx
            .send(Befehl::Text(text))
            .map_err(|_| PresenceError::SendFehler("Socket-Task beendet".into()))
    }

    fn close(&self, code: u16, reason: &str) {
        let vorher = self.geteilt.zustand.fetch_max(CLOSING, Ordering::AcqRel);
        if vorher >= CLOSING {
            return;
        }
        let _ = self.befehl_tx.send(Befehl::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn detach(&self) {
        self.geteilt.abgekoppelt.store(true, Ordering::Release);
    }

    fn ist_aktiv(&self) -> bool {
        self.geteilt.zustand() < CLOSING
    }
}

// ---------------------------------------------------------------------------
// Socket-Task
// ---------------------------------------------------------------------------

async fn socket_task(
    url: String,
    connect_timeout: Duration,
    geteilt: Arc<Geteilt>,
    mut befehl_rx: mpsc::UnboundedReceiver<Befehl>,
) {
    let beenden = |code: u16, reason: String| {
        geteilt.zustand.store(CLOSED, Ordering::Release);
        geteilt.melden(SocketEventKind::Close { code, reason });
    };

    let stream = match tokio::time::timeout(
        connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(e)) => {
            warn!(socket = %geteilt.id, fehler = %e, "WebSocket-Verbindung fehlgeschlagen");
            geteilt.melden(SocketEventKind::Error(e.to_string()));
            beenden(close_code::ABNORMAL, String::new());
            return;
        }
        Err(_) => {
            warn!(socket = %geteilt.id, "Zeitlimit beim WebSocket-Verbindungsaufbau");
            geteilt.melden(SocketEventKind::Error("Zeitlimit beim Verbindungsaufbau".into()));
            beenden(close_code::ABNORMAL, String::new());
            return;
        }
    };

    let (mut sink, mut stream) = stream.split();

    // close() waehrend des Aufbaus: sofort schliessen, kein Open melden
    if geteilt
        .zustand
        .compare_exchange(CONNECTING, OPEN, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        geteilt.melden(SocketEventKind::Open);
    }

    loop {
        tokio::select! {
            befehl = befehl_rx.recv() => match befehl {
                Some(Befehl::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        geteilt.melden(SocketEventKind::Error(e.to_string()));
                        beenden(close_code::ABNORMAL, String::new());
                        return;
                    }
                }
                Some(Befehl::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: Cow::Owned(reason),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_err() {
                        beenden(close_code::ABNORMAL, String::new());
                        return;
                    }
                }
                // Handle gedroppt: Verbindung ohne Meldung abbauen
                None => {
                    let _ = sink.close().await;
                    geteilt.zustand.store(CLOSED, Ordering::Release);
                    return;
                }
            },
            nachricht = stream.next() => match nachricht {
                Some(Ok(Message::Text(text))) => {
                    geteilt.melden(SocketEventKind::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((KEIN_STATUS, String::new()));
                    debug!(socket = %geteilt.id, code, "Close-Frame empfangen");
                    beenden(code, reason);
                    return;
                }
                Some(Ok(Message::Binary(daten))) => {
                    debug!(socket = %geteilt.id, bytes = daten.len(), "Binaer-Frame ignoriert");
                }
                // Ping/Pong beantwortet tungstenite selbst
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    geteilt.melden(SocketEventKind::Error(e.to_string()));
                    beenden(close_code::ABNORMAL, String::new());
                    return;
                }
                None => {
                    beenden(close_code::ABNORMAL, String::new());
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fehlgeschlagener_aufbau_meldet_abnormal_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = WsConnector::neu(Duration::from_secs(2));
        // Port 9 (discard) ist lokal praktisch nie offen
        let socket = connector
            .connect("ws://127.0.0.1:9/soundhouse", SocketId(7), tx)
            .unwrap();
        assert!(socket.ist_aktiv());

        let mut close = None;
        while let Some(ev) = rx.recv().await {
            assert_eq!(ev.socket, SocketId(7));
            if let SocketEventKind::Close { code, .. } = ev.kind {
                close = Some(code);
                break;
            }
        }
        assert_eq!(close, Some(close_code::ABNORMAL));
        assert!(!socket.ist_aktiv());
    }

    #[tokio::test]
    async fn senden_vor_open_scheitert() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = WsConnector::neu(Duration::from_secs(1));
        let socket = connector
            .connect("ws://127.0.0.1:9/soundhouse", SocketId(1), tx)
            .unwrap();
        assert!(matches!(
            socket.send_text("x".into()),
            Err(PresenceError::NichtOffen)
        ));
    }
}
