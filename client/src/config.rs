//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, der Client startet also auch ohne Datei.

use std::time::Duration;

use serde::Deserialize;
use talky_audio::PlaybackConfig;
use talky_presence::config::STANDARD_URL;
use talky_presence::PresenceConfig;
use talky_rtc::{IceServerConfig, PeerConfig};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub verbindung: VerbindungsEinstellungen,
    pub rtc: RtcEinstellungen,
    pub audio: AudioEinstellungen,
    pub auth: AuthEinstellungen,
    pub kanal: KanalEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Presence-Steuerkanal
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    /// WebSocket-URL des Presence-Servers
    pub url: String,
    /// Maximale Anzahl automatischer Wiederholungen
    pub max_versuche: u32,
    /// Feste Wartezeit zwischen Wiederholungen (ms)
    pub wiederholung_ms: u64,
    /// Zeitlimit fuer den Verbindungsaufbau (ms)
    pub verbindungs_timeout_ms: u64,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        Self {
            url: STANDARD_URL.into(),
            max_versuche: 5,
            wiederholung_ms: 3000,
            verbindungs_timeout_ms: 10_000,
        }
    }
}

/// Peer-Verbindung
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RtcEinstellungen {
    pub ice_server: Vec<IceServerConfig>,
}

/// Audio-Wiedergabe
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    pub sample_rate: u32,
    /// Kanaele des Ausgabegeraets
    pub kanaele: u16,
    /// Kapazitaet des Ring-Buffers in Samples
    pub puffer_samples: usize,
    /// Ohne Wiedergabe werden eingehende Spuren verworfen
    pub aktiviert: bool,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            kanaele: 1,
            puffer_samples: 800_000,
            aktiviert: true,
        }
    }
}

/// Token-Quelle
///
/// Reihenfolge: `token`, dann `token_datei`, sonst die Umgebungsvariable
/// `TALKY_TOKEN`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthEinstellungen {
    pub token: Option<String>,
    pub token_datei: Option<String>,
    /// Vorlauf vor dem JWT-Ablauf fuer den Refresh (Sekunden)
    pub refresh_vorlauf_sek: u64,
}

impl Default for AuthEinstellungen {
    fn default() -> Self {
        Self {
            token: None,
            token_datei: None,
            refresh_vorlauf_sek: 60,
        }
    }
}

/// Kanal fuer den automatischen Beitritt
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KanalEinstellungen {
    pub id: Option<String>,
    pub niche_id: Option<String>,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level bzw. Filter-Direktive
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    pub fn aus_toml(inhalt: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(inhalt)
    }

    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            url: self.verbindung.url.clone(),
            max_retries: self.verbindung.max_versuche,
            retry_delay: Duration::from_millis(self.verbindung.wiederholung_ms),
            connect_timeout: Duration::from_millis(self.verbindung.verbindungs_timeout_ms),
        }
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            ice_server: self.rtc.ice_server.clone(),
            sample_rate: self.audio.sample_rate,
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.audio.sample_rate,
            channels: self.audio.kanaele,
            buffer_size: self.audio.puffer_samples,
        }
    }

    /// Kanal fuer den automatischen Beitritt, nur wenn beide IDs gesetzt sind
    pub fn auto_kanal(&self) -> Option<(String, String)> {
        match (&self.kanal.id, &self.kanal.niche_id) {
            (Some(id), Some(niche)) if !id.is_empty() && !niche.is_empty() => {
                Some((id.clone(), niche.clone()))
            }
            _ => None,
        }
    }
}
