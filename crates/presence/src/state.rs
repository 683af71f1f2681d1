//! Zustandstypen des Connection-Managers

use serde::{Deserialize, Serialize};
use talky_core::types::{ChannelId, NicheId};

/// Status des Sprachkanals dem der Client beitritt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Join gesendet, noch keine Verhandlung
    Init,
    /// Server hat die Peer-Verhandlung begonnen
    Connected,
}

/// Der Kanal dem der Client beitritt bzw. beigetreten ist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConnection {
    pub status: ChannelStatus,
    pub id: ChannelId,
    pub niche_id: NicheId,
}

/// Kennung eines geplanten Retry-Timers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryTimerId(pub u64);

/// Retry-Buchhaltung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    pub retry_count: u32,
    pub max_retries: u32,
    /// Lokal beabsichtigte Trennung, unterdrueckt automatische Wiederholungen
    pub explicitly_closed: bool,
    pub pending_timer: Option<RetryTimerId>,
}

impl RetryState {
    pub fn neu(max_retries: u32) -> Self {
        Self {
            retry_count: 0,
            max_retries,
            explicitly_closed: false,
            pending_timer: None,
        }
    }

    pub fn erschoepft(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Entscheidet ob nach einem Close erneut verbunden wird
    pub fn soll_wiederholen(&self, token_vorhanden: bool, close_code: u16) -> bool {
        token_vorhanden
            && !self.explicitly_closed
            && !self.erschoepft()
            && !talky_protocol::close_code::ist_normal(close_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiederholung_nur_wenn_alle_bedingungen_erfuellt() {
        for token in [false, true] {
            for explizit in [false, true] {
                for count in 0..=6u32 {
                    for code in [1000u16, 1001, 1006, 1011] {
                        let state = RetryState {
                            retry_count: count,
                            max_retries: 5,
                            explicitly_closed: explizit,
                            pending_timer: None,
                        };
                        let erwartet = token && !explizit && count < 5 && code != 1000;
                        assert_eq!(
                            state.soll_wiederholen(token, code),
                            erwartet,
                            "token={token} explizit={explizit} count={count} code={code}"
                        );
                    }
                }
            }
        }
    }
}
