//! Paced delivery of chunked messages
//! This module schedules the chunks of one message at a fixed cadence and
//! re-checks the connection when each chunk is due.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{Instant, sleep_until};

use crate::config::LinkConfig;
use crate::core::bluetooth::{LinkEvent, LinkWriter};
use crate::core::delivery::chunker::{Chunk, split_text};

/// Splits messages and sends their chunks through a [`LinkWriter`].
///
/// Every chunk runs in its own task that only holds the chunk and the
/// writer, so two messages delivered close together may interleave.
pub struct Pacer<W: LinkWriter> {
    writer: Arc<W>,
    runtime: Handle,
    events: broadcast::Sender<LinkEvent>,
    chunk_size: usize,
    break_window: usize,
    delay: Duration,
}

impl<W: LinkWriter> Pacer<W> {
    /// Chunk tasks are spawned on `runtime`, so `deliver` works from any thread
    pub fn new(writer: Arc<W>, events: broadcast::Sender<LinkEvent>, config: &LinkConfig, runtime: Handle) -> Self {
        Self {
            writer,
            runtime,
            events,
            chunk_size: config.chunk_size,
            break_window: config.break_window,
            delay: config.inter_chunk_delay(),
        }
    }

    /// Schedules `text` for delivery and returns the number of chunks.
    ///
    /// Chunk 0 goes out right away, chunk `k` at `k * delay` after this call.
    /// A chunk whose turn comes while nothing is connected is dropped.
    pub fn deliver(&self, text: &str) -> usize {
        let chunks = split_text(text, self.chunk_size, self.break_window);
        if chunks.is_empty() {
            debug!("Nothing to deliver");
            return 0;
        }

        let submitted = Instant::now();
        let total = chunks.len();
        info!("Delivering message in {} chunk(s)", total);

        for chunk in chunks {
            let due = submitted + self.delay * chunk.index as u32;
            let writer = self.writer.clone();
            let events = self.events.clone();
            self.runtime.spawn(async move {
                sleep_until(due).await;
                send_chunk(writer.as_ref(), &events, chunk).await;
            });
        }
        total
    }
}

async fn send_chunk<W: LinkWriter>(writer: &W, events: &broadcast::Sender<LinkEvent>, chunk: Chunk) {
    let position = chunk.index + 1;

    if !writer.is_connected() {
        if chunk.index == 0 {
            warn!("Not connected, message of {} chunk(s) dropped", chunk.total);
            let _ = events.send(LinkEvent::DeliveryFailed {
                reason: "No device connected".to_string(),
            });
        } else {
            debug!("Chunk {}/{} dropped, link is down", position, chunk.total);
        }
        return;
    }

    debug!(
        "Sending chunk {}/{} ({} chars): {}",
        position,
        chunk.total,
        chunk.text.chars().count(),
        chunk.text
    );
    if let Err(e) = writer.write_raw(chunk.text.as_bytes()).await {
        if chunk.index == 0 {
            warn!("First chunk could not be sent: {}", e);
            let _ = events.send(LinkEvent::DeliveryFailed { reason: e.to_string() });
        } else {
            debug!("Chunk {}/{} dropped: {}", position, chunk.total, e);
        }
    }
}
