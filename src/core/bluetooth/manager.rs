//! Connection manager for the glasses
//! This module owns discovery and the single active connection. All state
//! transitions go through here; everything else only reads `is_connected`
//! or calls `write_raw`.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::core::bluetooth::codec;
use crate::core::bluetooth::commands::LinkWriter;
use crate::core::bluetooth::device::PeripheralRef;
use crate::core::bluetooth::error::{ConnectError, ScanError, TransportError, WriteError};
use crate::core::bluetooth::notification::{NotificationHandler, NotifyCallback};
use crate::core::bluetooth::transport::{ScanStream, Transport, TransportHandle};
use crate::core::bluetooth::types::{ConnectionState, LinkEvent};

/// The connection slot. `handle` is `Some` exactly when `state` is `Connected`.
#[derive(Default)]
struct Link {
    state: ConnectionState,
    handle: Option<TransportHandle>,
    /// Bumped by every connect attempt; a finishing attempt only touches the
    /// slot while this still matches the value it started with
    attempt: u64,
    /// Cancels the attempt in flight, if any
    attempt_cancel: Option<CancellationToken>,
}

impl Link {
    fn owns_attempt(&self, attempt: u64) -> bool {
        self.attempt == attempt && matches!(self.state, ConnectionState::Connecting(_))
    }
}

/// State shared with the background scan and notification tasks
struct Shared {
    link: Mutex<Link>,
    discovered: Mutex<Vec<PeripheralRef>>,
    events: broadcast::Sender<LinkEvent>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn discovered(&self) -> MutexGuard<'_, Vec<PeripheralRef>> {
        self.discovered.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Applies `state` to the locked link and announces it
    fn set_state(&self, link: &mut Link, state: ConnectionState) {
        if link.state != state {
            debug!("Connection state: {:?} -> {:?}", link.state, state);
            link.state = state.clone();
            self.emit(LinkEvent::StateChanged { state });
        }
    }

    /// `Scanning -> Disconnected`; other states are left alone
    fn leave_scanning(&self) {
        let mut link = self.link();
        if link.state == ConnectionState::Scanning {
            self.set_state(&mut link, ConnectionState::Disconnected);
        }
    }

    /// Records a sighting; returns false for an id that was already seen
    fn record_peripheral(&self, peripheral: &PeripheralRef) -> bool {
        let mut discovered = self.discovered();
        if discovered.iter().any(|p| p.id == peripheral.id) {
            return false;
        }
        discovered.push(peripheral.clone());
        true
    }
}

struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Manages discovery and the single glasses connection
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    scan_task: Mutex<Option<ScanTask>>,
    notification_handler: NotificationHandler,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    connect_timeout: Duration,
    show_nameless: bool,
    min_rssi: Option<i16>,
}

impl ConnectionManager {
    /// Creates a new ConnectionManager in the `Disconnected` state
    pub fn new(transport: Arc<dyn Transport>, config: &LinkConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            transport,
            shared: Arc::new(Shared {
                link: Mutex::new(Link::default()),
                discovered: Mutex::new(Vec::new()),
                events,
            }),
            scan_task: Mutex::new(None),
            notification_handler: NotificationHandler::new(),
            service_uuid: config.service_uuid,
            characteristic_uuid: config.characteristic_uuid,
            connect_timeout: config.connect_timeout(),
            show_nameless: config.show_nameless,
            min_rssi: config.min_rssi,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<LinkEvent> {
        self.shared.events.clone()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.link().state.clone()
    }

    /// Checks if a device is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.link().state.is_connected()
    }

    /// The peripheral of the active connection
    pub fn connected_peripheral(&self) -> Option<PeripheralRef> {
        match &self.shared.link().state {
            ConnectionState::Connected(p) => Some(p.clone()),
            _ => None,
        }
    }

    /// Peripherals found since the last scan started, in discovery order,
    /// filtered by the nameless/RSSI display settings
    pub fn discovered_peripherals(&self) -> Vec<PeripheralRef> {
        self.shared
            .discovered()
            .iter()
            .filter(|p| self.show_nameless || p.has_name())
            .filter(|p| match (self.min_rssi, p.rssi) {
                (Some(min), Some(rssi)) => rssi >= min,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Forget every discovered peripheral
    pub fn clear_discovered(&self) {
        self.shared.discovered().clear();
    }

    /// Begins discovery.
    ///
    /// Clears the discovered list and restarts a running scan. A connected
    /// manager may scan without leaving `Connected`.
    pub async fn start_scan(&self) -> Result<(), ScanError> {
        self.clear_discovered();
        self.halt_discovery().await;

        info!("Starting peripheral scan");
        let stream = match self.transport.start_scan().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start scan: {}", e);
                self.shared.leave_scanning();
                let reason = e.to_string();
                self.shared.emit(LinkEvent::ScanFailed { reason: reason.clone() });
                return Err(ScanError { reason });
            }
        };

        {
            let mut link = self.shared.link();
            if link.state == ConnectionState::Disconnected {
                self.shared.set_state(&mut link, ConnectionState::Scanning);
            }
        }
        self.shared.emit(LinkEvent::ScanStarted);

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(Self::internal_scan_task(
            stream,
            self.shared.clone(),
            cancel_token.clone(),
        ));
        if let Ok(mut slot) = self.scan_task.lock() {
            *slot = Some(ScanTask { cancel_token, handle });
        }
        Ok(())
    }

    async fn internal_scan_task(mut stream: ScanStream, shared: Arc<Shared>, cancel_token: CancellationToken) {
        loop {
            tokio::select! {
                result = stream.next() => {
                    match result {
                        Some(Ok(peripheral)) => {
                            if shared.record_peripheral(&peripheral) {
                                info!(
                                    "Found device: ID: {}, Name: {:?}, RSSI: {:?}",
                                    peripheral.id, peripheral.name, peripheral.rssi
                                );
                                shared.emit(LinkEvent::PeripheralDiscovered { peripheral });
                            } else {
                                debug!("Ignoring re-advertisement of {}", peripheral.id);
                            }
                        }
                        Some(Err(e)) => {
                            error!("Scan failed: {}", e);
                            shared.leave_scanning();
                            shared.emit(LinkEvent::ScanFailed { reason: e.to_string() });
                            return;
                        }
                        None => {
                            info!("Scan stream has ended.");
                            shared.leave_scanning();
                            shared.emit(LinkEvent::ScanStopped);
                            return;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    return;
                }
            }
        }
    }

    /// Stops discovery. Idempotent.
    pub async fn stop_scan(&self) {
        let was_running = self.halt_discovery().await;
        let was_scanning = self.state() == ConnectionState::Scanning;
        self.shared.leave_scanning();
        if was_running || was_scanning {
            self.shared.emit(LinkEvent::ScanStopped);
        }
    }

    /// Cancels the scan task and the transport scan without touching the
    /// state. Returns whether a scan task was running.
    async fn halt_discovery(&self) -> bool {
        let task = self.scan_task.lock().ok().and_then(|mut slot| slot.take());
        let Some(task) = task else {
            return false;
        };

        info!("Stopping peripheral scan.");
        task.cancel_token.cancel();
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                error!("Scan task finished with an unexpected join error: {:?}", e);
            }
        }
        if let Err(e) = self.transport.stop_scan().await {
            warn!("Transport failed to stop scanning: {}", e);
        }
        true
    }

    /// Connects to `peripheral`.
    ///
    /// Fails fast without side effects while another attempt is in flight or
    /// a peripheral is already connected. Discovery is halted first. Connect
    /// and service discovery share one deadline of the connect timeout; a
    /// `disconnect` during the attempt cancels it.
    pub async fn connect(&self, peripheral: &PeripheralRef) -> Result<TransportHandle, ConnectError> {
        let (attempt, cancel) = {
            let mut link = self.shared.link();
            match link.state {
                ConnectionState::Connecting(_) => return Err(ConnectError::AlreadyConnecting),
                ConnectionState::Connected(_) => return Err(ConnectError::AlreadyConnected),
                ConnectionState::Disconnected | ConnectionState::Scanning => {
                    link.attempt += 1;
                    let cancel = CancellationToken::new();
                    link.attempt_cancel = Some(cancel.clone());
                    self.shared
                        .set_state(&mut link, ConnectionState::Connecting(peripheral.clone()));
                    (link.attempt, cancel)
                }
            }
        };

        if self.halt_discovery().await {
            self.shared.emit(LinkEvent::ScanStopped);
        }

        info!("Connecting to {} ({})", peripheral.display_name(), peripheral.id);
        let deadline = Instant::now() + self.connect_timeout;

        let handle = match self
            .bounded(&cancel, deadline, self.transport.connect(&peripheral.id))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                error!("Connection to {} failed: {}", peripheral.id, e);
                self.abandon_attempt(attempt);
                return Err(e);
            }
        };

        let discovery = self.transport.discover_services(&handle, self.service_uuid, self.characteristic_uuid);
        if let Err(e) = self.bounded(&cancel, deadline, discovery).await {
            error!("Service discovery on {} failed: {}", peripheral.id, e);
            self.release(&handle).await;
            self.abandon_attempt(attempt);
            return Err(e);
        }

        let committed = {
            let mut link = self.shared.link();
            if link.owns_attempt(attempt) {
                link.attempt_cancel = None;
                link.handle = Some(handle.clone());
                self.shared
                    .set_state(&mut link, ConnectionState::Connected(peripheral.clone()));
                true
            } else {
                false
            }
        };

        if !committed {
            warn!("Disconnect requested while connecting to {}, releasing link", peripheral.id);
            self.release(&handle).await;
            return Err(ConnectError::Cancelled);
        }

        self.start_notifications(&handle).await;
        info!("Device successfully connected and state stored.");
        Ok(handle)
    }

    /// Runs one step of a connect attempt against the shared deadline and
    /// the attempt's cancel token
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        step: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, ConnectError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectError::Cancelled),
            result = timeout_at(deadline, step) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(ConnectError::Transport { reason: e.to_string() }),
                Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
            },
        }
    }

    /// `Connecting -> Disconnected` after a failed attempt, unless a newer
    /// attempt or a disconnect already took over the slot
    fn abandon_attempt(&self, attempt: u64) {
        let mut link = self.shared.link();
        if link.owns_attempt(attempt) {
            link.attempt_cancel = None;
            self.shared.set_state(&mut link, ConnectionState::Disconnected);
        }
    }

    async fn release(&self, handle: &TransportHandle) {
        if let Err(e) = self.transport.disconnect(handle).await {
            warn!("Failed to release link to {}: {}", handle.peripheral_id, e);
        }
    }

    /// Subscribes to the notify characteristic of a fresh connection.
    /// A failed subscription leaves the link usable for writes.
    async fn start_notifications(&self, handle: &TransportHandle) {
        let stream = match self
            .transport
            .subscribe(handle, self.service_uuid, self.characteristic_uuid)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Notifications unavailable for {}: {}", handle.peripheral_id, e);
                return;
            }
        };

        let shared = self.shared.clone();
        let transport = self.transport.clone();
        let lost_handle = handle.clone();
        let link_lost = Box::pin(async move {
            let peripheral = {
                let mut link = shared.link();
                if link.handle.as_ref() != Some(&lost_handle) {
                    return;
                }
                link.handle = None;
                let peripheral = link.state.peripheral().cloned();
                shared.set_state(&mut link, ConnectionState::Disconnected);
                peripheral
            };
            warn!("Lost connection to {}", lost_handle.peripheral_id);
            if let Some(peripheral) = peripheral {
                shared.emit(LinkEvent::LinkLost { peripheral });
            }
            if let Err(e) = transport.disconnect(&lost_handle).await {
                debug!("Releasing lost link failed: {}", e);
            }
        });

        self.notification_handler
            .setup_notifications(stream, self.shared.events.clone(), link_lost);
    }

    /// Releases the connection from any state and returns to
    /// `Disconnected`. Idempotent.
    pub async fn disconnect(&self) {
        if self.halt_discovery().await {
            self.shared.emit(LinkEvent::ScanStopped);
        }
        self.notification_handler.stop_notifications();

        let handle = {
            let mut link = self.shared.link();
            if let Some(cancel) = link.attempt_cancel.take() {
                info!("Cancelling connection attempt in flight");
                cancel.cancel();
            }
            let handle = link.handle.take();
            self.shared.set_state(&mut link, ConnectionState::Disconnected);
            handle
        };

        if let Some(handle) = handle {
            info!("Disconnecting from {}", handle.peripheral_id);
            self.release(&handle).await;
            info!("Connected state cleared, link released.");
        }
    }

    /// Registers a handler for notifications pushed by the glasses
    pub fn on_notify<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let callback: NotifyCallback = Arc::new(callback);
        self.notification_handler.register(callback);
    }

    /// Writes `bytes` to the fixed characteristic, once.
    ///
    /// Nothing is queued: when no peripheral is connected this fails with
    /// [`WriteError::NotConnected`]. A transport failure does not disconnect.
    pub async fn write_raw(&self, bytes: &[u8]) -> Result<(), WriteError> {
        let handle = {
            let link = self.shared.link();
            match (&link.state, &link.handle) {
                (ConnectionState::Connected(_), Some(handle)) => handle.clone(),
                _ => return Err(WriteError::NotConnected),
            }
        };

        let wire = codec::encode(bytes);
        self.transport
            .write(&handle, self.service_uuid, self.characteristic_uuid, &wire)
            .await
            .map_err(|e| {
                error!("Write to {} failed: {}", handle.peripheral_id, e);
                WriteError::Transport { cause: e.to_string() }
            })
    }
}

#[async_trait]
impl LinkWriter for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), WriteError> {
        ConnectionManager::write_raw(self, bytes).await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.scan_task.lock() {
            if let Some(task) = slot.take() {
                task.cancel_token.cancel();
            }
        }
        self.notification_handler.stop_notifications();
        let mut link = self.shared.link();
        if let Some(cancel) = link.attempt_cancel.take() {
            cancel.cancel();
        }
        link.handle = None;
        link.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::simulated::{ConnectBehavior, SimulatedTransport};

    fn glasses() -> PeripheralRef {
        PeripheralRef::new("glasses-1", Some("SmartGlasses".into()), Some(-50))
    }

    fn manager_with(sim: &SimulatedTransport) -> ConnectionManager {
        ConnectionManager::new(Arc::new(sim.clone()), &LinkConfig::default())
    }

    #[tokio::test]
    async fn test_stop_scan_is_idempotent() {
        let sim = SimulatedTransport::new();
        let manager = manager_with(&sim);

        manager.stop_scan().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.start_scan().await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Scanning);
        manager.stop_scan().await;
        manager.stop_scan().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!sim.is_scanning());
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let sim = SimulatedTransport::new();
        let manager = manager_with(&sim);
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(sim.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn test_scan_deduplicates_by_id() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);
        let mut events = manager.subscribe_events();

        manager.start_scan().await.unwrap();
        sim.advertise(PeripheralRef::new("glasses-1", Some("SmartGlasses".into()), Some(-90)));
        sim.add_peripheral(PeripheralRef::new("glasses-2", Some("Other".into()), None));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let found = manager.discovered_peripherals();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].rssi, Some(-50));

        let mut discovered_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, LinkEvent::PeripheralDiscovered { .. }) {
                discovered_events += 1;
            }
        }
        assert_eq!(discovered_events, 2);
    }

    #[tokio::test]
    async fn test_scan_start_failure_reverts_state() {
        let sim = SimulatedTransport::new();
        sim.fail_next_scan("radio off");
        let manager = manager_with(&sim);

        let err = manager.start_scan().await.unwrap_err();
        assert!(err.reason.contains("radio off"));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_scan_stream_error_reverts_to_disconnected() {
        let sim = SimulatedTransport::new();
        let manager = manager_with(&sim);
        manager.start_scan().await.unwrap();

        sim.fail_scan_stream("adapter reset");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_nameless_peripherals_hidden_by_default() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(PeripheralRef::new("anon", None, None));
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);
        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let visible: Vec<String> = manager.discovered_peripherals().into_iter().map(|p| p.id).collect();
        assert_eq!(visible, vec!["glasses-1".to_string()]);

        let config = LinkConfig {
            show_nameless: true,
            ..LinkConfig::default()
        };
        let manager = ConnectionManager::new(Arc::new(sim.clone()), &config);
        manager.start_scan().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.discovered_peripherals().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_halts_scan_and_connects() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);

        manager.start_scan().await.unwrap();
        manager.connect(&glasses()).await.unwrap();

        assert_eq!(manager.state(), ConnectionState::Connected(glasses()));
        assert!(manager.is_connected());
        assert!(!sim.is_scanning());
        assert_eq!(sim.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_second_connect_fails_fast() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);
        manager.connect(&glasses()).await.unwrap();

        let other = PeripheralRef::new("glasses-2", None, None);
        assert_eq!(manager.connect(&other).await, Err(ConnectError::AlreadyConnected));
        assert_eq!(manager.state(), ConnectionState::Connected(glasses()));
        assert_eq!(sim.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_connect_while_connecting_fails_fast() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::Hang);
        let manager = Arc::new(manager_with(&sim));

        let pending = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&glasses()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state(), ConnectionState::Connecting(glasses()));

        let err = manager.connect(&glasses()).await.unwrap_err();
        assert_eq!(err, ConnectError::AlreadyConnecting);
        assert_eq!(manager.state(), ConnectionState::Connecting(glasses()));
        assert_eq!(sim.connect_calls(), 1);
        pending.abort();
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::Fail("gatt 133".into()));
        let manager = manager_with(&sim);

        let err = manager.connect(&glasses()).await.unwrap_err();
        assert!(matches!(err, ConnectError::Transport { ref reason } if reason.contains("gatt 133")));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_discovery_failure_releases_handle() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::FailDiscovery("no services".into()));
        let manager = manager_with(&sim);

        assert!(manager.connect(&glasses()).await.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(sim.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::Hang);
        let manager = manager_with(&sim);

        let err = manager.connect(&glasses()).await.unwrap_err();
        assert_eq!(err, ConnectError::Timeout(LinkConfig::default().connect_timeout()));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timeout_releases_opened_link() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::HangDiscovery);
        let manager = manager_with(&sim);

        let err = manager.connect(&glasses()).await.unwrap_err();
        assert_eq!(err, ConnectError::Timeout(LinkConfig::default().connect_timeout()));
        assert_eq!(sim.connect_calls(), 1);
        assert_eq!(sim.disconnect_calls(), 1);
        assert_eq!(sim.open_sessions(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_attempt_in_flight() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::Hang);
        let manager = Arc::new(manager_with(&sim));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&glasses()).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.disconnect().await;
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sim.in_flight_connects(), 0);

        sim.set_connect_behavior(ConnectBehavior::Delay(Duration::from_secs(7)));
        let second = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&glasses()).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sim.in_flight_connects(), 1);

        assert_eq!(first.await.unwrap(), Err(ConnectError::Cancelled));
        assert!(second.await.unwrap().is_ok());
        assert_eq!(manager.state(), ConnectionState::Connected(glasses()));
        assert_eq!(sim.open_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_attempt_does_not_reset_newer_one() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        sim.set_connect_behavior(ConnectBehavior::HangDiscovery);
        let manager = Arc::new(manager_with(&sim));

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&glasses()).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.disconnect().await;

        sim.set_connect_behavior(ConnectBehavior::Succeed);
        manager.connect(&glasses()).await.unwrap();
        assert_eq!(first.await.unwrap(), Err(ConnectError::Cancelled));

        // well past the first attempt's deadline
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(manager.state(), ConnectionState::Connected(glasses()));
        assert_eq!(sim.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_write_raw_requires_connection() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);

        assert_eq!(manager.write_raw(b"lost").await, Err(WriteError::NotConnected));

        manager.connect(&glasses()).await.unwrap();
        manager.write_raw(b"kept").await.unwrap();
        assert_eq!(sim.written(), vec!["kept".to_string()]);
    }

    #[tokio::test]
    async fn test_write_failure_keeps_connection() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);
        manager.connect(&glasses()).await.unwrap();

        sim.set_write_failure(Some("peripheral busy"));
        let err = manager.write_raw(b"hello").await.unwrap_err();
        assert!(matches!(err, WriteError::Transport { .. }));
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_notifications_reach_callbacks() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        manager.on_notify(move |text| sink.lock().unwrap().push(text.to_string()));

        manager.connect(&glasses()).await.unwrap();
        sim.notify("Camera Ready");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*received.lock().unwrap(), vec!["Camera Ready".to_string()]);
    }

    #[tokio::test]
    async fn test_link_loss_resets_state() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);
        let mut events = manager.subscribe_events();
        manager.connect(&glasses()).await.unwrap();

        sim.drop_link();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        let mut lost = false;
        while let Ok(event) = events.try_recv() {
            lost |= matches!(event, LinkEvent::LinkLost { .. });
        }
        assert!(lost);

        // reconnecting is a plain connect call
        manager.connect(&glasses()).await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_releases_handle() {
        let sim = SimulatedTransport::new();
        sim.add_peripheral(glasses());
        let manager = manager_with(&sim);
        manager.connect(&glasses()).await.unwrap();

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(sim.open_sessions(), 0);
        assert_eq!(manager.write_raw(b"x").await, Err(WriteError::NotConnected));
    }
}
