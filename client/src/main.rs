//! Talky Client – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Client.

use anyhow::Result;
use talky_client::{config::ClientConfig, Client};
use talky_observability::logging_initialisieren;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("TALKY_CONFIG").unwrap_or_else(|_| "talky.toml".into());

    let config = ClientConfig::laden(&config_pfad)?;

    let log = logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        log_format = %log.format,
        "Talky Client wird initialisiert"
    );

    Client::neu(config).starten().await
}
