//! Core functionality for the glasses link
//! This module contains the Bluetooth link, chunked delivery and the
//! firmware message types.

pub mod bluetooth;
pub mod delivery;
pub mod messages;

// Re-export commonly used types
pub use bluetooth::ConnectionManager;
pub use delivery::Pacer;
pub use messages::Envelope;
