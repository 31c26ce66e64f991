//! In-process glasses simulator
//!
//! Implements [`Transport`] without Bluetooth hardware. Peripherals are
//! registered in memory, every write is recorded, and failures (scan,
//! connect, discovery, write, link loss) can be scripted. Used by the test
//! suites and by host-side demos of the companion app.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::codec;
use crate::core::bluetooth::constants::{UUID_GLASSES_CHAR, UUID_GLASSES_SERVICE};
use crate::core::bluetooth::device::PeripheralRef;
use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{NotificationStream, ScanStream, Transport, TransportHandle};

/// How the simulator answers the next connect attempts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    /// The link-level connect fails with this reason
    Fail(String),
    /// Connect succeeds but service discovery fails with this reason
    FailDiscovery(String),
    /// The connect call never resolves
    Hang,
    /// Connect succeeds after this long
    Delay(Duration),
    /// Connect succeeds but service discovery never resolves
    HangDiscovery,
}

/// One recorded characteristic write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub peripheral_id: String,
    /// The base64 value as it crossed the transport boundary
    pub wire: String,
    /// The decoded payload
    pub text: String,
}

type ItemSender<T> = mpsc::UnboundedSender<Result<T, TransportError>>;

struct SimSession {
    peripheral_id: String,
    discovered: bool,
    notify_tx: Option<ItemSender<String>>,
}

struct SimState {
    peripherals: Vec<PeripheralRef>,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    scan_tx: Option<ItemSender<PeripheralRef>>,
    scan_failure: Option<String>,
    connect_behavior: ConnectBehavior,
    write_failure: Option<String>,
    writes: Vec<RecordedWrite>,
    sessions: HashMap<u64, SimSession>,
    next_session: u64,
    connect_calls: usize,
    disconnect_calls: usize,
    in_flight_connects: usize,
}

/// Cheaply clonable handle to one simulated radio environment
#[derive(Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn unbounded_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<Result<T, TransportError>>,
) -> futures_util::stream::BoxStream<'static, Result<T, TransportError>> {
    futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                peripherals: Vec::new(),
                service_uuid: UUID_GLASSES_SERVICE,
                characteristic_uuid: UUID_GLASSES_CHAR,
                scan_tx: None,
                scan_failure: None,
                connect_behavior: ConnectBehavior::Succeed,
                write_failure: None,
                writes: Vec::new(),
                sessions: HashMap::new(),
                next_session: 1,
                connect_calls: 0,
                disconnect_calls: 0,
                in_flight_connects: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the recorded state from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a connectable peripheral; it is reported by every scan
    pub fn add_peripheral(&self, peripheral: PeripheralRef) {
        let mut state = self.lock();
        if let Some(tx) = &state.scan_tx {
            let _ = tx.send(Ok(peripheral.clone()));
        }
        state.peripherals.push(peripheral);
    }

    /// Emits an advertisement on the running scan without registering anything new
    pub fn advertise(&self, peripheral: PeripheralRef) {
        if let Some(tx) = &self.lock().scan_tx {
            let _ = tx.send(Ok(peripheral));
        }
    }

    /// Makes the running scan stream report an error
    pub fn fail_scan_stream(&self, reason: &str) {
        if let Some(tx) = &self.lock().scan_tx {
            let _ = tx.send(Err(TransportError::Backend(reason.to_string())));
        }
    }

    /// Ends the running scan stream
    pub fn end_scan(&self) {
        self.lock().scan_tx = None;
    }

    /// Makes the next `start_scan` fail
    pub fn fail_next_scan(&self, reason: &str) {
        self.lock().scan_failure = Some(reason.to_string());
    }

    /// Exposes a different GATT layout, to exercise discovery failures
    pub fn set_gatt_layout(&self, service_uuid: Uuid, characteristic_uuid: Uuid) {
        let mut state = self.lock();
        state.service_uuid = service_uuid;
        state.characteristic_uuid = characteristic_uuid;
    }

    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.lock().connect_behavior = behavior;
    }

    /// Makes every write fail with `reason` until cleared with `None`
    pub fn set_write_failure(&self, reason: Option<&str>) {
        self.lock().write_failure = reason.map(str::to_string);
    }

    /// Pushes a notification to every subscribed connection
    pub fn notify(&self, payload: &str) {
        let wire = codec::encode(payload.as_bytes());
        for session in self.lock().sessions.values() {
            if let Some(tx) = &session.notify_tx {
                let _ = tx.send(Ok(wire.clone()));
            }
        }
    }

    /// Simulates the glasses going out of range: open sessions vanish and
    /// their notification streams fail
    pub fn drop_link(&self) {
        let sessions: Vec<SimSession> = self.lock().sessions.drain().map(|(_, s)| s).collect();
        for session in sessions {
            debug!("Simulated link to {} dropped", session.peripheral_id);
            if let Some(tx) = session.notify_tx {
                let _ = tx.send(Err(TransportError::Disconnected));
            }
        }
    }

    /// Decoded payloads of all writes so far, in order
    pub fn written(&self) -> Vec<String> {
        self.lock().writes.iter().map(|w| w.text.clone()).collect()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scan_tx.is_some()
    }

    pub fn open_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnect_calls
    }

    /// Connect calls that started and have neither resolved nor been dropped
    pub fn in_flight_connects(&self) -> usize {
        self.lock().in_flight_connects
    }
}

/// Counts a transport connect as in flight until it resolves or is dropped
struct InFlight(Arc<Mutex<SimState>>);

impl InFlight {
    fn enter(state: &Arc<Mutex<SimState>>) -> Self {
        state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).in_flight_connects += 1;
        Self(state.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).in_flight_connects -= 1;
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn start_scan(&self) -> Result<ScanStream, TransportError> {
        let mut state = self.lock();
        if let Some(reason) = state.scan_failure.take() {
            return Err(TransportError::Backend(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for peripheral in &state.peripherals {
            let _ = tx.send(Ok(peripheral.clone()));
        }
        state.scan_tx = Some(tx);
        Ok(unbounded_stream(rx))
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.lock().scan_tx = None;
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<TransportHandle, TransportError> {
        let behavior = {
            let mut state = self.lock();
            state.connect_calls += 1;
            state.connect_behavior.clone()
        };

        let _in_flight = InFlight::enter(&self.state);
        if let ConnectBehavior::Delay(delay) = &behavior {
            tokio::time::sleep(*delay).await;
        }

        match behavior {
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::Fail(reason) => Err(TransportError::Backend(reason)),
            ConnectBehavior::Succeed
            | ConnectBehavior::Delay(_)
            | ConnectBehavior::FailDiscovery(_)
            | ConnectBehavior::HangDiscovery => {
                let mut state = self.lock();
                if !state.peripherals.iter().any(|p| p.id == peripheral_id) {
                    return Err(TransportError::PeripheralNotFound(peripheral_id.to_string()));
                }
                let session = state.next_session;
                state.next_session += 1;
                state.sessions.insert(
                    session,
                    SimSession {
                        peripheral_id: peripheral_id.to_string(),
                        discovered: false,
                        notify_tx: None,
                    },
                );
                Ok(TransportHandle {
                    peripheral_id: peripheral_id.to_string(),
                    session,
                })
            }
        }
    }

    async fn discover_services(
        &self,
        handle: &TransportHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let hang = self.lock().connect_behavior == ConnectBehavior::HangDiscovery;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if let ConnectBehavior::FailDiscovery(reason) = &state.connect_behavior {
            return Err(TransportError::Backend(reason.clone()));
        }
        if service != state.service_uuid {
            return Err(TransportError::ServiceNotFound(service.to_string()));
        }
        if characteristic != state.characteristic_uuid {
            return Err(TransportError::CharacteristicNotFound(characteristic.to_string()));
        }
        let session = state.sessions.get_mut(&handle.session).ok_or(TransportError::Disconnected)?;
        session.discovered = true;
        Ok(())
    }

    async fn write(
        &self,
        handle: &TransportHandle,
        _service: Uuid,
        characteristic: Uuid,
        value: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        let session = state.sessions.get(&handle.session).ok_or(TransportError::Disconnected)?;
        if !session.discovered || characteristic != state.characteristic_uuid {
            return Err(TransportError::CharacteristicNotFound(characteristic.to_string()));
        }
        if let Some(reason) = &state.write_failure {
            return Err(TransportError::Backend(reason.clone()));
        }

        let text = codec::decode_text(value)?;
        let record = RecordedWrite {
            peripheral_id: session.peripheral_id.clone(),
            wire: value.to_string(),
            text,
        };
        state.writes.push(record);
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: &TransportHandle,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<NotificationStream, TransportError> {
        let mut state = self.lock();
        let session = state.sessions.get_mut(&handle.session).ok_or(TransportError::Disconnected)?;
        let (tx, rx) = mpsc::unbounded_channel();
        session.notify_tx = Some(tx);
        Ok(unbounded_stream(rx))
    }

    async fn disconnect(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.disconnect_calls += 1;
        state.sessions.remove(&handle.session);
        Ok(())
    }
}
