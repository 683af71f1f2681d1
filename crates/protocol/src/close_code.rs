//! Close-Codes des Steuerkanals (RFC 6455)

/// Saubere, beabsichtigte Trennung
pub const NORMAL: u16 = 1000;

/// Verbindung ohne Close-Frame abgebrochen
pub const ABNORMAL: u16 = 1006;

/// Interner Fehler; wird bei fehlgeschlagenem Senden verwendet
pub const INTERNAL_ERROR: u16 = 1011;

/// Gibt true zurueck wenn der Code eine normale Trennung bedeutet
pub fn ist_normal(code: u16) -> bool {
    code == NORMAL
}
