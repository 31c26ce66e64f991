//! Smart glasses link library
//! This is the Bluetooth link layer of the smart glasses companion app:
//! discovery, the single glasses connection, and paced text delivery.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use config::LinkConfig;
pub use crate::core::bluetooth::{
    ConnectError, ConnectionManager, ConnectionState, GlassesCommand, LinkError, LinkEvent, PeripheralRef,
    ScanError, SimulatedTransport, Transport, TransportError, WriteError,
};
pub use crate::core::delivery::{Chunk, split_text};
pub use crate::core::messages::Envelope;
pub use state::GlassesLink;
