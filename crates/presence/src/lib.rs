//! # talky-presence
//!
//! Persistenter Steuerkanal zum Talky-Server:
//! - Verbindungs- und Retry-Zustandsmaschine ([`ConnectionManager`])
//! - WebSocket-Transport mit Socket-Generationen gegen veraltete Callbacks
//! - Dekodierung und Verteilung eingehender Nachrichten ([`SignalingDispatcher`])
//! - Token-Versorgung mit JWT-basiertem Refresh
//! - Actor-Task der alle Ereignisse auf einer Queue serialisiert ([`PresenceClient`])

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod memory;
pub mod state;
pub mod transport;
pub mod ws;

pub use auth::{EnvTokenSource, FileTokenSource, StaticTokenSource, TokenRefresher, TokenSource};
pub use client::{PresenceClient, PresenceHandle};
pub use config::PresenceConfig;
pub use dispatcher::{ActiveClients, DispatchErgebnis, PeerSignal, SignalingDispatcher};
pub use error::{PresenceError, PresenceResult};
pub use manager::{ConnectionManager, ManagerEmpfaenger};
pub use state::{ChannelConnection, ChannelStatus, RetryState, RetryTimerId};
pub use transport::{Connector, ControlSocket, SocketEvent, SocketEventKind, SocketId};
pub use ws::WsConnector;
