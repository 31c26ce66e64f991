//! Bluetooth functionality for the glasses link
//! This module handles all bluetooth operations including scanning,
//! connecting, writing to and receiving notifications from the glasses.

mod codec;
mod commands;
mod connection;
mod constants;
mod device;
mod error;
mod manager;
mod notification;
mod scanner;
mod simulated;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use codec::{decode, decode_text, encode};
pub use commands::{CommandExecutor, GlassesCommand, LinkWriter};
pub use connection::BluestTransport;
pub use constants::*; // Re-export all constants
pub use device::PeripheralRef;
pub use error::{CodecError, ConnectError, LinkError, ScanError, TransportError, WriteError};
pub use manager::ConnectionManager;
pub use notification::{NotificationHandler, NotifyCallback};
pub use simulated::{ConnectBehavior, RecordedWrite, SimulatedTransport};
pub use transport::{NotificationStream, ScanStream, Transport, TransportHandle};
pub use types::{ConnectionState, LinkEvent};
