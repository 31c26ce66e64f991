//! Chunked delivery of text to the glasses
//! This module splits messages into display-sized chunks and paces them
//! over the active connection.

mod chunker;
mod pacer;

pub use chunker::{Chunk, split_text};
pub use pacer::Pacer;
