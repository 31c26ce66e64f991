//! Notification handling for the glasses
//! This module drives the notify subscription of the active connection and
//! hands decoded payloads to the registered callbacks.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::core::bluetooth::codec;
use crate::core::bluetooth::transport::NotificationStream;
use crate::core::bluetooth::types::LinkEvent;

/// Callback invoked with the decoded text of each notification
pub type NotifyCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Notification handler for glasses data
#[derive(Clone, Default)]
pub struct NotificationHandler {
    callbacks: Arc<Mutex<Vec<NotifyCallback>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback; it stays registered across reconnects
    pub fn register(&self, callback: NotifyCallback) {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(callback);
        }
    }

    /// Start consuming `stream`, replacing any previous subscription.
    ///
    /// `link_lost` runs if the stream fails, which the transport uses to
    /// signal that the peripheral went away.
    pub fn setup_notifications(
        &self,
        stream: NotificationStream,
        events: broadcast::Sender<LinkEvent>,
        link_lost: BoxFuture<'static, ()>,
    ) {
        info!("Subscribing to notifications...");
        let callbacks = self.callbacks.clone();
        let handle = tokio::spawn(async move {
            Self::process_notifications(stream, callbacks, events, link_lost).await;
        });

        let previous = self.task.lock().ok().and_then(|mut slot| slot.replace(handle));
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn process_notifications(
        mut stream: NotificationStream,
        callbacks: Arc<Mutex<Vec<NotifyCallback>>>,
        events: broadcast::Sender<LinkEvent>,
        link_lost: BoxFuture<'static, ()>,
    ) {
        info!("Listening for glasses notifications...");
        while let Some(result) = stream.next().await {
            match result {
                Ok(wire) => match codec::decode_text(&wire) {
                    Ok(text) => {
                        debug!("Received glasses notification: {:?}", text);
                        let snapshot: Vec<NotifyCallback> = callbacks
                            .lock()
                            .map(|callbacks| callbacks.clone())
                            .unwrap_or_default();
                        for callback in &snapshot {
                            callback(&text);
                        }
                        let _ = events.send(LinkEvent::Notification { text });
                    }
                    Err(e) => warn!("Dropping undecodable notification: {}", e),
                },
                Err(e) => {
                    error!("Error in notification stream: {}", e);
                    link_lost.await;
                    return;
                }
            }
        }
        info!("Notification stream ended");
    }

    /// Stop the current subscription, if any
    pub fn stop_notifications(&self) {
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            debug!("Stopping notification task");
            task.abort();
        }
    }
}
