//! talky-core – Gemeinsame Typen und Ereignisse
//!
//! Dieses Crate stellt die Bausteine bereit, die Presence-, RTC- und
//! Audio-Crates gemeinsam nutzen: ID-Typen, den Verbindungszustand,
//! Server-Snapshots und den typisierten Event-Bus.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::{ClientEvent, EventBus, EventKind, EventSubscription};
pub use types::{
    ActiveChannels, ChannelDescriptor, ChannelId, ChannelUser, ChatMessage, ClientDescriptor, ClientId,
    ConnectionState, NicheId,
};
