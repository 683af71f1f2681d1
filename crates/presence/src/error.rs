//! Fehlertypen fuer den Presence-Steuerkanal

use thiserror::Error;

/// Fehlertyp fuer den Presence-Steuerkanal
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Socket konnte nicht erzeugt werden
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    /// Socket ist (noch) nicht offen
    #[error("Socket nicht offen")]
    NichtOffen,

    /// Senden an den Transport fehlgeschlagen
    #[error("Senden fehlgeschlagen: {0}")]
    SendFehler(String),

    /// Token konnte nicht beschafft werden
    #[error("Token nicht verfuegbar: {0}")]
    Token(String),

    /// Presence-Task laeuft nicht mehr
    #[error("Presence-Client beendet")]
    Beendet,

    /// IO-Fehler
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

pub type PresenceResult<T> = Result<T, PresenceError>;
