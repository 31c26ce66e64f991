//! Link state management
//! This module defines the entry point a companion app holds: one
//! connection manager plus the delivery and command paths built on it.

use std::sync::Arc;

use log::info;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::config::LinkConfig;
use crate::core::bluetooth::{
    BluestTransport, CommandExecutor, ConnectError, ConnectionManager, ConnectionState, GlassesCommand, LinkError,
    LinkEvent, PeripheralRef, ScanError, Transport, TransportHandle, WriteError,
};
use crate::core::delivery::Pacer;
use crate::core::messages::Envelope;

/// The glasses link of one app instance
pub struct GlassesLink {
    manager: Arc<ConnectionManager>,
    pacer: Pacer<ConnectionManager>,
    commands: CommandExecutor<Arc<ConnectionManager>>,
}

impl GlassesLink {
    /// Creates a link over an arbitrary transport, running its background
    /// work on the current tokio runtime.
    ///
    /// # Panics
    /// When called outside a tokio runtime; use [`GlassesLink::with_runtime`] there.
    pub fn new(transport: Arc<dyn Transport>, config: LinkConfig) -> Self {
        Self::with_runtime(transport, config, Handle::current())
    }

    /// Creates a link whose delivery tasks run on `runtime`
    pub fn with_runtime(transport: Arc<dyn Transport>, config: LinkConfig, runtime: Handle) -> Self {
        let manager = Arc::new(ConnectionManager::new(transport, &config));
        let pacer = Pacer::new(manager.clone(), manager.event_sender(), &config, runtime);
        let commands = CommandExecutor::new(manager.clone());
        Self {
            manager,
            pacer,
            commands,
        }
    }

    /// Creates a link over the platform Bluetooth adapter
    pub async fn with_bluetooth(config: LinkConfig) -> Result<Self, LinkError> {
        info!("Initializing Bluetooth transport...");
        let transport = BluestTransport::new(config.service_uuid).await?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Gets a reference to the connection manager
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.manager.subscribe_events()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub async fn start_scan(&self) -> Result<(), ScanError> {
        self.manager.start_scan().await
    }

    pub async fn stop_scan(&self) {
        self.manager.stop_scan().await
    }

    pub fn discovered_peripherals(&self) -> Vec<PeripheralRef> {
        self.manager.discovered_peripherals()
    }

    pub async fn connect(&self, peripheral: &PeripheralRef) -> Result<TransportHandle, ConnectError> {
        self.manager.connect(peripheral).await
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await
    }

    /// Registers a handler for notifications pushed by the glasses
    pub fn on_notify<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.manager.on_notify(callback);
    }

    /// Sends `text` to the display in paced chunks. Returns the number of
    /// chunks scheduled; none of them is guaranteed to arrive.
    pub fn deliver(&self, text: &str) -> usize {
        self.pacer.deliver(text)
    }

    /// Sends one structured message in a single write
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), LinkError> {
        let json = envelope.to_json()?;
        info!("Sending envelope: {}", json);
        self.manager.write_raw(json.as_bytes()).await?;
        Ok(())
    }

    pub async fn send_command(&self, command: GlassesCommand) -> Result<(), WriteError> {
        self.commands.send_command(command).await
    }

    pub fn commands(&self) -> &CommandExecutor<Arc<ConnectionManager>> {
        &self.commands
    }
}
