//! Constants used throughout the link layer
//! This module contains the fixed GATT identifiers of the glasses firmware
//! and the timing/size values of the chunked delivery protocol.

use std::time::Duration;

use uuid::Uuid;

/// The UUID of the glasses data service
pub const UUID_GLASSES_SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// The UUID of the glasses command characteristic, used for both write and notify
pub const UUID_GLASSES_CHAR: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Maximum characters per chunk the display renders in one update
pub const CHUNK_SIZE: usize = 50;

/// How far back (in characters) the splitter looks for a break character
pub const BREAK_SEARCH_WINDOW: usize = 15;

/// Characters the splitter prefers to break after
pub const BREAK_CHARS: [char; 8] = [' ', '.', ',', '!', '?', ';', ':', '\n'];

/// Delay between two consecutive chunks of one message in milliseconds
pub const INTER_CHUNK_DELAY_MS: u64 = 6000;

/// Timeout for a connect + service discovery attempt in seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Capacity of the link event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Fallback name for peripherals that do not advertise one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown";

/// Maximum note body length the firmware accepts in a `note` envelope
pub const NOTE_CONTENT_LIMIT: usize = 200;

/// Inter-chunk delay as a `Duration`
pub const INTER_CHUNK_DELAY: Duration = Duration::from_millis(INTER_CHUNK_DELAY_MS);
