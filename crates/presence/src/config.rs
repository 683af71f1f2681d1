//! Konfiguration des Presence-Steuerkanals

use std::time::Duration;

/// Standard-Adresse des Presence-Servers
pub const STANDARD_URL: &str = "ws://localhost:8080/soundhouse";

/// Laufzeit-Konfiguration des Connection-Managers
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// WebSocket-URL des Servers
    pub url: String,
    /// Maximale Anzahl aufeinanderfolgender Wiederholungen
    pub max_retries: u32,
    /// Feste Wartezeit vor jeder Wiederholung
    pub retry_delay: Duration,
    /// Zeitlimit fuer den Transport-Verbindungsaufbau
    pub connect_timeout: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            url: STANDARD_URL.to_string(),
            max_retries: 5,
            retry_delay: Duration::from_millis(3000),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardwerte() {
        let config = PresenceConfig::default();
        assert_eq!(config.url, "ws://localhost:8080/soundhouse");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(3));
    }
}
