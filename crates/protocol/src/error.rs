//! Fehlertypen fuer das Steuerkanal-Protokoll

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Kein JSON-Objekt: {0}")]
    KeinJson(#[source] serde_json::Error),

    #[error("Nachricht ohne 'type'-Feld")]
    FehlenderTyp,

    #[error("Ungueltige '{tag}'-Nachricht: {quelle}")]
    Dekodierung {
        tag: String,
        #[source]
        quelle: serde_json::Error,
    },

    #[error("Kodierung fehlgeschlagen: {0}")]
    Kodierung(#[source] serde_json::Error),
}
