//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Konfiguration):
//! - `TALKY_LOG_LEVEL`: Filter-Direktive, z.B. `debug` oder
//!   `talky_presence=trace,info`. Standard: info
//! - `TALKY_LOG_FORMAT`: `text` oder `json`. Standard: text
//!
//! Die WebRTC- und WebSocket-Crates sind sehr gespraechig; fuer sie gilt
//! `warn`, solange die Direktive sie nicht selbst nennt.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "TALKY_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "TALKY_LOG_FORMAT";

/// Abhaengigkeiten die standardmaessig auf `warn` gedrosselt werden
const LAUTE_CRATES: &[&str] = &[
    "webrtc",
    "webrtc_ice",
    "webrtc_dtls",
    "webrtc_srtp",
    "webrtc_sctp",
    "webrtc_mdns",
    "tungstenite",
    "tokio_tungstenite",
];

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Ungueltiges Log-Format: {0} (erlaubt: text, json)")]
    Format(String),

    #[error("Ungueltige Log-Direktive: {0}")]
    Filter(String),

    #[error("Logging bereits initialisiert: {0}")]
    BereitsInitialisiert(String),
}

/// Ausgabeformat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            andere => Err(LoggingError::Format(andere.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Wirksame Logging-Einstellung nach Zusammenfuehrung von Umgebung und Konfiguration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEinstellung {
    pub direktive: String,
    pub format: LogFormat,
}

impl LogEinstellung {
    /// Fuehrt Umgebungswerte und Konfigurationswerte zusammen.
    ///
    /// Leere Umgebungswerte gelten als nicht gesetzt.
    pub fn aufloesen(
        env_level: Option<String>,
        env_format: Option<String>,
        level: &str,
        format: &str,
    ) -> Result<Self, LoggingError> {
        let direktive = env_level
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| level.to_string());
        let format = env_format
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| format.to_string())
            .parse()?;
        Ok(Self { direktive, format })
    }

    /// Liest `TALKY_LOG_LEVEL` / `TALKY_LOG_FORMAT`
    pub fn aus_env(level: &str, format: &str) -> Result<Self, LoggingError> {
        Self::aufloesen(
            std::env::var(ENV_LOG_LEVEL).ok(),
            std::env::var(ENV_LOG_FORMAT).ok(),
            level,
            format,
        )
    }

    /// Baut den Filter inklusive Drosselung lauter Abhaengigkeiten
    pub fn filter(&self) -> Result<EnvFilter, LoggingError> {
        let mut filter = EnvFilter::try_new(&self.direktive)
            .map_err(|e| LoggingError::Filter(format!("{}: {}", self.direktive, e)))?;
        for krate in LAUTE_CRATES {
            if !self.direktive.contains(krate) {
                let direktive = format!("{}=warn", krate)
                    .parse()
                    .map_err(|e| LoggingError::Filter(format!("{}: {}", krate, e)))?;
                filter = filter.add_directive(direktive);
            }
        }
        Ok(filter)
    }
}

/// Initialisiert das Logging-System.
///
/// `level` und `format` stammen aus der Konfiguration; die
/// Umgebungsvariablen haben Vorrang.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<LogEinstellung, LoggingError> {
    let einstellung = LogEinstellung::aus_env(level, format)?;
    let filter = einstellung.filter()?;

    let ergebnis = match einstellung.format {
        LogFormat::Json => fmt_layer()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt_layer()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };
    ergebnis.map_err(|e| LoggingError::BereitsInitialisiert(e.to_string()))?;

    Ok(einstellung)
}

/// Validiert ob ein einfacher Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}
