//! Gemeinsame Identifikations- und Zustandstypen fuer Talky
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen Kanal-,
//! Nischen- und Client-IDs zur Compilezeit auszuschliessen. Die IDs werden
//! vom Server vergeben und sind daher opake Strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $praefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Erstellt eine ID aus einem beliebigen String
            pub fn neu(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Gibt die ID als &str zurueck
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Sprachkanal-ID
    ChannelId,
    "channel"
);
string_id!(
    /// Nischen-ID (Gruppierung ueber Kanaelen)
    NicheId,
    "niche"
);
string_id!(
    /// Vom Server vergebene Client-ID einer Presence-Verbindung
    ClientId,
    "client"
);

// ---------------------------------------------------------------------------
// Verbindungszustand
// ---------------------------------------------------------------------------

/// Zustand des Steuerkanals
///
/// Genau eine Instanz pro Client-Prozess. Nur der Connection-Manager
/// schreibt, alle anderen Komponenten lesen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
    Closed,
    Error,
}

impl ConnectionState {
    /// Laeuft gerade ein Verbindungsaufbau?
    pub fn ist_versuch(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    pub fn ist_verbunden(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Name wie er in Logs und an der UI-Grenze erscheint
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Server-Snapshots
// ---------------------------------------------------------------------------

/// Eintrag der Liste aktiver Presence-Clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Teilnehmer eines aktiven Kanals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Weitere, vom Client nicht interpretierte Felder
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Beschreibung eines aktiven Kanals
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    #[serde(default)]
    pub users: Vec<ChannelUser>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChannelDescriptor {
    /// Gibt true zurueck wenn ein Teilnehmer die angegebene Rolle hat
    pub fn hat_rolle(&self, rolle: &str) -> bool {
        self.users.iter().any(|u| u.role.as_deref() == Some(rolle))
    }
}

/// Snapshot aller aktiven Kanaele, nach Kanal-ID sortiert
pub type ActiveChannels = BTreeMap<ChannelId, ChannelDescriptor>;

/// Vom Server verteilte Chat-Nachricht
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, alias = "sender_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}
