//! Transport-Abstraktion des Steuerkanals
//!
//! Ein [`Connector`] erzeugt Sockets, jeder mit einer eindeutigen
//! [`SocketId`] (Generationszaehler). Alle Transport-Ereignisse laufen als
//! [`SocketEvent`] ueber einen gemeinsamen Kanal in den Manager, der sie
//! anhand der ID mit seinem aktuellen Socket vergleicht.

use tokio::sync::mpsc;

use crate::error::PresenceResult;

/// Generation eines Sockets; niemals wiederverwendet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Vergibt fortlaufende Socket-IDs
#[derive(Debug, Default)]
pub struct SocketIdGenerator {
    letzte: u64,
}

impl SocketIdGenerator {
    pub fn naechste(&mut self) -> SocketId {
        self.letzte += 1;
        SocketId(self.letzte)
    }
}

/// Art eines Transport-Ereignisses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEventKind {
    Open,
    Message(String),
    Error(String),
    Close { code: u16, reason: String },
}

/// Transport-Ereignis eines bestimmten Sockets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    pub socket: SocketId,
    pub kind: SocketEventKind,
}

impl SocketEvent {
    pub fn neu(socket: SocketId, kind: SocketEventKind) -> Self {
        Self { socket, kind }
    }
}

/// Sender-Seite fuer Transport-Ereignisse
pub type SocketEventSender = mpsc::UnboundedSender<SocketEvent>;

/// Ein einzelner, nachrichtenorientierter Socket
///
/// Nach `close` liefert der Socket genau ein `Close`-Ereignis, ausser er
/// wurde vorher mit `detach` abgekoppelt.
pub trait ControlSocket: Send {
    fn id(&self) -> SocketId;

    /// Stellt einen Text-Frame zum Senden ein
    fn send_text(&self, text: String) -> PresenceResult<()>;

    /// Schliesst den Socket mit Code und Grund
    fn close(&self, code: u16, reason: &str);

    /// Koppelt alle Ereignisse ab; danach meldet der Socket nichts mehr
    fn detach(&self);

    /// Socket verbindet sich gerade oder ist offen
    fn ist_aktiv(&self) -> bool;
}

/// Erzeugt Sockets fuer eine URL
pub trait Connector: Send {
    /// Startet den Verbindungsaufbau.
    ///
    /// Kehrt sofort zurueck; `Open`/`Close` werden spaeter als Ereignisse
    /// gemeldet. Ein Fehler bedeutet, dass kein Socket erzeugt wurde.
    fn connect(
        &self,
        url: &str,
        id: SocketId,
        events: SocketEventSender,
    ) -> PresenceResult<Box<dyn ControlSocket>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_ids_sind_fortlaufend() {
        let mut gen = SocketIdGenerator::default();
        let a = gen.naechste();
        let b = gen.naechste();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), "socket#1");
    }
}
