//! Steuerkanal-Nachrichten
//!
//! ## Design
//! - JSON-Serialisierung via serde, ein Objekt pro Frame
//! - Tagged Enums (`type`-Feld, snake_case) fuer typsichere Nachrichtentypen
//! - Unbekannte Typen sind kein Fehler, sondern [`IncomingMessage::Unknown`]

use serde::{Deserialize, Deserializer, Serialize};
use talky_core::types::{ActiveChannels, ChannelId, ChatMessage, ClientDescriptor, NicheId};

use crate::error::ProtocolError;

/// Rolle der Presence-Verbindung im Init-Handshake
pub const ROLLE_PRESENCE: &str = "presence";

/// Rolle des Clients in der Peer-Session
pub const ROLLE_ANSWERER: &str = "answerer";

// ---------------------------------------------------------------------------
// ICE-Kandidat
// ---------------------------------------------------------------------------

/// ICE-Kandidat im Browser-kompatiblen JSON-Format
///
/// Alle Felder sind beim Dekodieren optional; ob ein Kandidat vollstaendig
/// ist, entscheidet der Empfaenger via [`IceCandidate::ist_vollstaendig`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceCandidate {
    #[serde(default)]
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Kandidat mit nicht-leerem Kandidaten-String und `sdpMid`
    pub fn ist_vollstaendig(&self) -> bool {
        !self.candidate.is_empty() && self.sdp_mid.is_some()
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Nachrichten
// ---------------------------------------------------------------------------

/// Nachrichten vom Client an den Server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    /// Authentifizierter Handshake direkt nach dem Oeffnen
    Init { auth_code: String, role: String },
    /// Beitritt zu einem Sprachkanal
    Join { role: String, channel_id: ChannelId },
    /// Lokal gefundener ICE-Kandidat
    Candidate {
        candidate: IceCandidate,
        channel_id: ChannelId,
        niche_id: NicheId,
    },
    /// SDP-Antwort auf ein Angebot
    Answer {
        answer: String,
        channel_id: ChannelId,
        niche_id: NicheId,
    },
}

impl OutgoingMessage {
    pub fn init(token: impl Into<String>) -> Self {
        Self::Init {
            auth_code: token.into(),
            role: ROLLE_PRESENCE.to_string(),
        }
    }

    pub fn join(channel_id: ChannelId) -> Self {
        Self::Join {
            role: ROLLE_ANSWERER.to_string(),
            channel_id,
        }
    }

    /// Wert des `type`-Feldes
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Join { .. } => "join",
            Self::Candidate { .. } => "candidate",
            Self::Answer { .. } => "answer",
        }
    }

    /// Serialisiert die Nachricht als JSON-Text ohne Zeilenumbrueche
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Kodierung)
    }
}

// ---------------------------------------------------------------------------
// Eingehende Nachrichten
// ---------------------------------------------------------------------------

/// Nachrichten vom Server an den Client
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    ActiveClientsUpdate {
        clients: Vec<ClientDescriptor>,
        join_code: Option<String>,
    },
    ActiveChannels {
        channels: ActiveChannels,
    },
    Error {
        message: String,
    },
    ChatMessageBroadcast(ChatMessage),
    Candidate {
        candidate: IceCandidate,
    },
    Offer {
        offer: String,
    },
    /// Gueltiges JSON mit unbekanntem `type`
    Unknown {
        tag: String,
        raw: String,
    },
}

/// Bekannte Typen, direkt via serde dekodiert
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Bekannt {
    ActiveClientsUpdate {
        #[serde(default)]
        clients: Vec<ClientDescriptor>,
        #[serde(default)]
        join_code: Option<String>,
    },
    ActiveChannels {
        #[serde(default)]
        channels: ActiveChannels,
    },
    Error {
        message: String,
    },
    ChatMessageBroadcast(ChatMessage),
    Candidate {
        candidate: IceCandidate,
    },
    Offer {
        #[serde(deserialize_with = "sdp_text")]
        offer: String,
    },
}

const BEKANNTE_TYPEN: &[&str] = &[
    "active_clients_update",
    "active_channels",
    "error",
    "chat_message_broadcast",
    "candidate",
    "offer",
];

impl IncomingMessage {
    /// Dekodiert einen Text-Frame
    ///
    /// Fehler betreffen nur diese eine Nachricht: kein JSON-Objekt, kein
    /// `type`-Feld oder ein bekannter Typ mit ungueltigen Feldern.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let wert: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::KeinJson)?;

        let tag = wert
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::FehlenderTyp)?
            .to_string();

        if !BEKANNTE_TYPEN.contains(&tag.as_str()) {
            return Ok(Self::Unknown {
                tag,
                raw: text.to_string(),
            });
        }

        let bekannt: Bekannt = serde_json::from_value(wert)
            .map_err(|quelle| ProtocolError::Dekodierung { tag, quelle })?;

        Ok(match bekannt {
            Bekannt::ActiveClientsUpdate { clients, join_code } => {
                Self::ActiveClientsUpdate { clients, join_code }
            }
            Bekannt::ActiveChannels { channels } => Self::ActiveChannels { channels },
            Bekannt::Error { message } => Self::Error { message },
            Bekannt::ChatMessageBroadcast(chat) => Self::ChatMessageBroadcast(chat),
            Bekannt::Candidate { candidate } => Self::Candidate { candidate },
            Bekannt::Offer { offer } => Self::Offer { offer },
        })
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::ActiveClientsUpdate { .. } => "active_clients_update",
            Self::ActiveChannels { .. } => "active_channels",
            Self::Error { .. } => "error",
            Self::ChatMessageBroadcast(_) => "chat_message_broadcast",
            Self::Candidate { .. } => "candidate",
            Self::Offer { .. } => "offer",
            Self::Unknown { tag, .. } => tag,
        }
    }
}

/// Akzeptiert das Angebot als SDP-Text oder als `{ "type": "offer", "sdp": ... }`
fn sdp_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sdp {
        Text(String),
        Beschreibung { sdp: String },
    }

    Ok(match Sdp::deserialize(deserializer)? {
        Sdp::Text(s) => s,
        Sdp::Beschreibung { sdp } => sdp,
    })
}
