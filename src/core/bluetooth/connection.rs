//! Bluetooth connection handling for the glasses
//! This module implements [`Transport`] on top of the bluest adapter:
//! connecting, characteristic discovery, writes and notifications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::bluetooth::codec;
use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::scanner::BluestScanner;
use crate::core::bluetooth::transport::{NotificationStream, ScanStream, Transport, TransportHandle};

/// Handles held for one open connection
struct Session {
    device: Device,
    characteristic: Option<Characteristic>,
    notify_task: Option<JoinHandle<()>>,
}

/// [`Transport`] backed by the platform Bluetooth stack
pub struct BluestTransport {
    adapter: Adapter,
    scanner: BluestScanner,
    /// Devices seen while scanning, keyed by platform id
    devices: Arc<Mutex<HashMap<String, Device>>>,
    sessions: Mutex<HashMap<u64, Session>>,
    next_session: AtomicU64,
}

impl BluestTransport {
    /// Opens the default adapter and waits until it is powered on.
    ///
    /// `service_uuid` is used to find peripherals the OS is already connected to.
    pub async fn new(service_uuid: Uuid) -> Result<Self, TransportError> {
        let adapter = Adapter::default().await.ok_or(TransportError::Unavailable)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let devices = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluestScanner::new(adapter.clone(), service_uuid, devices.clone());

        Ok(Self {
            adapter,
            scanner,
            devices,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    fn session_device(&self, handle: &TransportHandle) -> Result<Device, TransportError> {
        let sessions = self.lock_sessions()?;
        sessions
            .get(&handle.session)
            .map(|s| s.device.clone())
            .ok_or(TransportError::Disconnected)
    }

    fn session_characteristic(&self, handle: &TransportHandle, uuid: Uuid) -> Result<Characteristic, TransportError> {
        let sessions = self.lock_sessions()?;
        let session = sessions.get(&handle.session).ok_or(TransportError::Disconnected)?;
        session
            .characteristic
            .as_ref()
            .filter(|c| c.uuid() == uuid)
            .cloned()
            .ok_or_else(|| TransportError::CharacteristicNotFound(uuid.to_string()))
    }

    fn lock_sessions(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u64, Session>>, TransportError> {
        self.sessions
            .lock()
            .map_err(|_| TransportError::Backend("session table poisoned".to_string()))
    }

    /// Pumps the characteristic's notifications into a channel.
    ///
    /// Reports through `started` whether the subscription was accepted.
    async fn process_notifications(
        characteristic: Characteristic,
        tx: mpsc::Sender<Result<String, TransportError>>,
        started: oneshot::Sender<Result<(), TransportError>>,
    ) {
        info!("Listening for glasses notifications...");
        match characteristic.notify().await {
            Ok(mut notification_stream) => {
                let _ = started.send(Ok(()));
                while let Some(result) = notification_stream.next().await {
                    let item = match result {
                        Ok(value) => {
                            debug!("Received notification: {} bytes", value.len());
                            Ok(codec::encode(&value))
                        }
                        Err(e) => {
                            error!("Error in notification stream: {}", e);
                            Err(TransportError::from(e))
                        }
                    };
                    let failed = item.is_err();
                    if tx.send(item).await.is_err() || failed {
                        break;
                    }
                }
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = started.send(Err(e.into()));
            }
        }
        info!("Notification stream ended");
    }
}

#[async_trait]
impl Transport for BluestTransport {
    async fn start_scan(&self) -> Result<ScanStream, TransportError> {
        self.scanner.start_scan().await
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.scanner.stop_scan().await;
        Ok(())
    }

    async fn connect(&self, peripheral_id: &str) -> Result<TransportHandle, TransportError> {
        let device = {
            let devices = self
                .devices
                .lock()
                .map_err(|_| TransportError::Backend("device table poisoned".to_string()))?;
            devices
                .get(peripheral_id)
                .cloned()
                .ok_or_else(|| TransportError::PeripheralNotFound(peripheral_id.to_string()))?
        };

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", peripheral_id, name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", peripheral_id);
            self.adapter.connect_device(&device).await?;
        }

        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.lock_sessions()?.insert(
            session,
            Session {
                device,
                characteristic: None,
                notify_task: None,
            },
        );

        Ok(TransportHandle {
            peripheral_id: peripheral_id.to_string(),
            session,
        })
    }

    async fn discover_services(
        &self,
        handle: &TransportHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let device = self.session_device(handle)?;

        info!("Connection successful, discovering services...");
        let services = device.discover_services_with_uuid(service).await?;
        let glasses_service = services
            .first()
            .ok_or_else(|| TransportError::ServiceNotFound(service.to_string()))?;
        info!("Found glasses service: {}", glasses_service.uuid());

        let found = glasses_service
            .characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == characteristic)
            .ok_or_else(|| TransportError::CharacteristicNotFound(characteristic.to_string()))?;
        info!("Found glasses characteristic: {}", found.uuid());

        let mut sessions = self.lock_sessions()?;
        let session = sessions.get_mut(&handle.session).ok_or(TransportError::Disconnected)?;
        session.characteristic = Some(found);
        Ok(())
    }

    async fn write(
        &self,
        handle: &TransportHandle,
        _service: Uuid,
        characteristic: Uuid,
        value: &str,
    ) -> Result<(), TransportError> {
        let characteristic = self.session_characteristic(handle, characteristic)?;
        let bytes = codec::decode(value)?;
        characteristic.write(&bytes).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        handle: &TransportHandle,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, TransportError> {
        let characteristic = self.session_characteristic(handle, characteristic)?;

        let (tx, rx) = mpsc::channel(32);
        let (started_tx, started_rx) = oneshot::channel();
        let task = tokio::spawn(Self::process_notifications(characteristic, tx, started_tx));

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Backend("notification task exited early".to_string())),
        }

        let previous = {
            let mut sessions = self.lock_sessions()?;
            let session = sessions.get_mut(&handle.session).ok_or(TransportError::Disconnected)?;
            session.notify_task.replace(task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn disconnect(&self, handle: &TransportHandle) -> Result<(), TransportError> {
        let session = self.lock_sessions()?.remove(&handle.session);
        let Some(session) = session else {
            debug!("Session {} already released", handle.session);
            return Ok(());
        };

        if let Some(task) = session.notify_task {
            task.abort();
        }

        if session.device.is_connected().await {
            info!("Disconnecting from device {}", handle.peripheral_id);
            self.adapter.disconnect_device(&session.device).await?;
            info!("Successfully disconnected");
        } else {
            warn!("Device {} not connected", handle.peripheral_id);
        }
        Ok(())
    }
}
