//! talky-protocol – Nachrichten des Steuerkanals
//!
//! Der Steuerkanal transportiert JSON-Objekte, eines pro Frame, jeweils mit
//! einem `type`-Diskriminanten. Dieses Crate definiert die ein- und
//! ausgehenden Nachrichtentypen, die Dekodierung und die Close-Codes.

pub mod close_code;
pub mod control;
pub mod error;

pub use control::{IceCandidate, IncomingMessage, OutgoingMessage, ROLLE_ANSWERER, ROLLE_PRESENCE};
pub use error::ProtocolError;
