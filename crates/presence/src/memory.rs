//! In-Memory-Transport
//!
//! Ersetzt den WebSocket in Tests und im Offline-Betrieb. Der
//! [`MemoryConnector`] ist gleichzeitig Steuerung: ueber ihn werden
//! Server-Ereignisse eingespielt und gesendete Frames abgefragt.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PresenceError, PresenceResult};
use crate::transport::{
    Connector, ControlSocket, SocketEvent, SocketEventKind, SocketEventSender, SocketId,
};

#[derive(Debug)]
struct SocketZustand {
    id: SocketId,
    url: String,
    events: SocketEventSender,
    gesendet: Vec<String>,
    geschlossen: Option<(u16, String)>,
    abgekoppelt: bool,
}

#[derive(Debug, Default)]
struct Inner {
    sockets: Vec<SocketZustand>,
    connect_fehler: bool,
    send_fehler: bool,
}

impl Inner {
    fn socket(&mut self, id: SocketId) -> Option<&mut SocketZustand> {
        self.sockets.iter_mut().find(|s| s.id == id)
    }

    fn melden(&mut self, id: SocketId, kind: SocketEventKind) {
        if let Some(s) = self.socket(id) {
            if !s.abgekoppelt {
                let _ = s.events.send(SocketEvent::neu(id, kind));
            }
        }
    }
}

/// In-Memory-Connector; Clone teilt den Zustand
#[derive(Clone, Default)]
pub struct MemoryConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConnector {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Laesst weitere `connect`-Aufrufe scheitern
    pub fn set_connect_fehler(&self, fehler: bool) {
        self.inner.lock().connect_fehler = fehler;
    }

    /// Laesst weitere `send_text`-Aufrufe scheitern
    pub fn set_send_fehler(&self, fehler: bool) {
        self.inner.lock().send_fehler = fehler;
    }

    /// IDs aller bisher erzeugten Sockets
    pub fn sockets(&self) -> Vec<SocketId> {
        self.inner.lock().sockets.iter().map(|s| s.id).collect()
    }

    pub fn letzter(&self) -> Option<SocketId> {
        self.inner.lock().sockets.last().map(|s| s.id)
    }

    pub fn url(&self, id: SocketId) -> Option<String> {
        self.inner.lock().socket(id).map(|s| s.url.clone())
    }

    /// Bisher auf diesem Socket gesendete Frames
    pub fn gesendet(&self, id: SocketId) -> Vec<String> {
        self.inner
            .lock()
            .socket(id)
            .map(|s| s.gesendet.clone())
            .unwrap_or_default()
    }

    /// Lokal ausgeloester Close (Code, Grund), falls vorhanden
    pub fn geschlossen(&self, id: SocketId) -> Option<(u16, String)> {
        self.inner
            .lock()
            .socket(id)
            .and_then(|s| s.geschlossen.clone())
    }

    pub fn abgekoppelt(&self, id: SocketId) -> bool {
        self.inner
            .lock()
            .socket(id)
            .map(|s| s.abgekoppelt)
            .unwrap_or(false)
    }

    /// Server akzeptiert die Verbindung
    pub fn oeffnen(&self, id: SocketId) {
        self.inner.lock().melden(id, SocketEventKind::Open);
    }

    /// Server sendet einen Text-Frame
    pub fn nachricht(&self, id: SocketId, text: impl Into<String>) {
        self.inner
            .lock()
            .melden(id, SocketEventKind::Message(text.into()));
    }

    pub fn fehler(&self, id: SocketId, text: impl Into<String>) {
        self.inner
            .lock()
            .melden(id, SocketEventKind::Error(text.into()));
    }

    /// Verbindung endet von Serverseite bzw. durch das Netz
    pub fn schliessen(&self, id: SocketId, code: u16, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.inner.lock();
        if let Some(s) = inner.socket(id) {
            if s.geschlossen.is_none() {
                s.geschlossen = Some((code, reason.clone()));
            }
        }
        inner.melden(id, SocketEventKind::Close { code, reason });
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        url: &str,
        id: SocketId,
        events: SocketEventSender,
    ) -> PresenceResult<Box<dyn ControlSocket>> {
        let mut inner = self.inner.lock();
        if inner.connect_fehler {
            return Err(PresenceError::Verbindung(format!("{}: abgelehnt", url)));
        }
        inner.sockets.push(SocketZustand {
            id,
            url: url.to_string(),
            events,
            gesendet: Vec::new(),
            geschlossen: None,
            abgekoppelt: false,
        });
        Ok(Box::new(MemorySocket {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

/// Socket-Handle des In-Memory-Transports
pub struct MemorySocket {
    id: SocketId,
    inner: Arc<Mutex<Inner>>,
}

impl ControlSocket for MemorySocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send_text(&self, text: String) -> PresenceResult<()> {
        let mut inner = self.inner.lock();
        let fehler = inner.send_fehler;
        let s = inner
            .socket(self.id)
            .ok_or(PresenceError::NichtOffen)?;
        if s.geschlossen.is_some() {
            return Err(PresenceError::NichtOffen);
        }
        if fehler {
            return Err(PresenceError::SendFehler("Transport abgelehnt".into()));
        }
        s.gesendet.push(text);
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        let mut inner = self.inner.lock();
        let Some(s) = inner.socket(self.id) else {
            return;
        };
        if s.geschlossen.is_some() {
            return;
        }
        s.geschlossen = Some((code, reason.to_string()));
        inner.melden(
            self.id,
            SocketEventKind::Close {
                code,
                reason: reason.to_string(),
            },
        );
    }

    fn detach(&self) {
        if let Some(s) = self.inner.lock().socket(self.id) {
            s.abgekoppelt = true;
        }
    }

    fn ist_aktiv(&self) -> bool {
        self.inner
            .lock()
            .socket(self.id)
            .map(|s| s.geschlossen.is_none())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn close_meldet_genau_ein_ereignis() {
        let connector = MemoryConnector::neu();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let socket = connector.connect("mem://", SocketId(1), tx).unwrap();

        socket.close(1000, "tschuess");
        socket.close(1000, "nochmal");

        assert_eq!(
            rx.try_recv().unwrap().kind,
            SocketEventKind::Close {
                code: 1000,
                reason: "tschuess".into()
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(!socket.ist_aktiv());
    }

    #[test]
    fn abgekoppelter_socket_meldet_nichts() {
        let connector = MemoryConnector::neu();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let socket = connector.connect("mem://", SocketId(1), tx).unwrap();

        socket.detach();
        connector.oeffnen(SocketId(1));
        socket.close(1000, "weg");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn senden_nach_close_scheitert() {
        let connector = MemoryConnector::neu();
        let (tx, _rx) = mpsc::unbounded_channel();
        let socket = connector.connect("mem://", SocketId(1), tx).unwrap();
        socket.send_text("a".into()).unwrap();
        connector.schliessen(SocketId(1), 1006, "");
        assert!(socket.send_text("b".into()).is_err());
        assert_eq!(connector.gesendet(SocketId(1)), vec!["a".to_string()]);
    }

    #[test]
    fn server_close_behaelt_grund() {
        let connector = MemoryConnector::neu();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _socket = connector.connect("mem://", SocketId(1), tx).unwrap();

        connector.schliessen(SocketId(1), 4001, "Token abgelaufen");
        assert_eq!(
            connector.geschlossen(SocketId(1)),
            Some((4001, "Token abgelaufen".to_string()))
        );
        assert_eq!(
            rx.try_recv().unwrap().kind,
            SocketEventKind::Close {
                code: 4001,
                reason: "Token abgelaufen".into()
            }
        );
    }
}
