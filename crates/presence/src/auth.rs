//! Token-Versorgung fuer den Steuerkanal
//!
//! Eine [`TokenSource`] liefert ein Bearer-Token oder scheitert. Der
//! [`TokenRefresher`] holt das Token erneut kurz bevor es laut JWT-`exp`
//! ablaeuft und veroeffentlicht Vorhandensein/Fehlen auf einem
//! `watch`-Kanal, den der Connection-Manager beobachtet.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PresenceError, PresenceResult};

/// Kuerzeste Wartezeit zwischen zwei Abrufen
const MIN_WARTEZEIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// TokenSource
// ---------------------------------------------------------------------------

/// Liefert ein Bearer-Token
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token_holen(&self) -> PresenceResult<String>;
}

#[async_trait]
impl TokenSource for Box<dyn TokenSource> {
    async fn token_holen(&self) -> PresenceResult<String> {
        (**self).token_holen().await
    }
}

/// Festes Token
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn neu(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token_holen(&self) -> PresenceResult<String> {
        if self.token.is_empty() {
            return Err(PresenceError::Token("leeres Token".into()));
        }
        Ok(self.token.clone())
    }
}

/// Token aus einer Umgebungsvariable
pub struct EnvTokenSource {
    variable: String,
}

impl EnvTokenSource {
    pub fn neu(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

#[async_trait]
impl TokenSource for EnvTokenSource {
    async fn token_holen(&self) -> PresenceResult<String> {
        match std::env::var(&self.variable) {
            Ok(t) if !t.trim().is_empty() => Ok(t.trim().to_string()),
            _ => Err(PresenceError::Token(format!(
                "{} ist nicht gesetzt",
                self.variable
            ))),
        }
    }
}

/// Token aus einer Datei; wird bei jedem Abruf neu gelesen
pub struct FileTokenSource {
    pfad: PathBuf,
}

impl FileTokenSource {
    pub fn neu(pfad: impl Into<PathBuf>) -> Self {
        Self { pfad: pfad.into() }
    }
}

#[async_trait]
impl TokenSource for FileTokenSource {
    async fn token_holen(&self) -> PresenceResult<String> {
        let inhalt = tokio::fs::read_to_string(&self.pfad).await?;
        let token = inhalt.trim();
        if token.is_empty() {
            return Err(PresenceError::Token(format!(
                "{} ist leer",
                self.pfad.display()
            )));
        }
        Ok(token.to_string())
    }
}

// ---------------------------------------------------------------------------
// JWT-Ablauf
// ---------------------------------------------------------------------------

/// Liest den `exp`-Claim (Unix-Sekunden) eines JWT ohne Signaturpruefung
pub fn jwt_ablauf(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("exp")?.as_u64()
}

/// Wartezeit bis zum naechsten Abruf, `None` wenn das Token nicht ablaeuft
fn wartezeit(token: &str, vorlauf: Duration, jetzt: u64) -> Option<Duration> {
    let exp = jwt_ablauf(token)?;
    let faellig = exp.saturating_sub(vorlauf.as_secs());
    Some(Duration::from_secs(faellig.saturating_sub(jetzt)).max(MIN_WARTEZEIT))
}

fn unix_jetzt() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// TokenRefresher
// ---------------------------------------------------------------------------

/// Haelt das Token aktuell und veroeffentlicht es
pub struct TokenRefresher<S: TokenSource> {
    quelle: S,
    vorlauf: Duration,
    fehler_intervall: Duration,
}

impl<S: TokenSource + 'static> TokenRefresher<S> {
    pub fn neu(quelle: S, vorlauf: Duration) -> Self {
        Self {
            quelle,
            vorlauf,
            fehler_intervall: Duration::from_secs(30),
        }
    }

    /// Wartezeit nach einem fehlgeschlagenen Abruf
    pub fn mit_fehler_intervall(mut self, intervall: Duration) -> Self {
        self.fehler_intervall = intervall;
        self
    }

    /// Startet den Refresh-Task
    ///
    /// Ein fehlgeschlagener Abruf veroeffentlicht `None` (Abmeldung).
    pub fn starten(
        self,
        tx: watch::Sender<Option<String>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let warten = match self.quelle.token_holen().await {
                    Ok(token) => {
                        let warten = wartezeit(&token, self.vorlauf, unix_jetzt());
                        debug!(naechster_abruf_s = ?warten.map(|w| w.as_secs()), "Token abgerufen");
                        tx.send_if_modified(|aktuell| {
                            if aktuell.as_deref() == Some(token.as_str()) {
                                false
                            } else {
                                *aktuell = Some(token);
                                true
                            }
                        });
                        warten
                    }
                    Err(e) => {
                        warn!(fehler = %e, "Token konnte nicht abgerufen werden");
                        tx.send_if_modified(|aktuell| aktuell.take().is_some());
                        Some(self.fehler_intervall)
                    }
                };

                match warten {
                    Some(dauer) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(dauer) => {}
                        }
                    }
                    None => {
                        cancel.cancelled().await;
                        break;
                    }
                }
            }
            info!("Token-Refresher beendet");
        })
    }
}
