//! Peripheral discovery on top of the bluest adapter

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::device::PeripheralRef;
use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::ScanStream;

type ScanSender = mpsc::Sender<Result<PeripheralRef, TransportError>>;

pub struct BluestScanner {
    adapter: Adapter,
    service_uuid: Uuid,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    scan_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl BluestScanner {
    pub fn new(adapter: Adapter, service_uuid: Uuid, devices: Arc<Mutex<HashMap<String, Device>>>) -> Self {
        Self {
            adapter,
            service_uuid,
            devices,
            scan_task: Mutex::new(None),
        }
    }

    /// Starts a scan task and returns the stream it reports into.
    ///
    /// Resolves only after the adapter accepted the scan request, so a
    /// failure to start is returned here rather than on the stream.
    pub async fn start_scan(&self) -> Result<ScanStream, TransportError> {
        self.stop_scan().await;

        let (tx, rx) = mpsc::channel(32);
        let (started_tx, started_rx) = oneshot::channel();
        let cancel_token = CancellationToken::new();

        let handle = tokio::spawn(Self::internal_scan_task(
            self.adapter.clone(),
            self.service_uuid,
            self.devices.clone(),
            tx,
            started_tx,
            cancel_token.clone(),
        ));

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::Backend("scan task exited before starting".to_string())),
        }

        if let Ok(mut slot) = self.scan_task.lock() {
            *slot = Some((cancel_token, handle));
        }
        info!("Device scan task started.");

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn internal_scan_task(
        adapter: Adapter,
        service_uuid: Uuid,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        tx: ScanSender,
        started: oneshot::Sender<Result<(), TransportError>>,
        cancel_token: CancellationToken,
    ) {
        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => {
                let _ = started.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to start bluetooth scan: {}", e);
                let _ = started.send(Err(e.into()));
                return;
            }
        };

        // Peripherals already connected at the OS level never advertise, report them up front
        info!("Checking for connected devices");
        match adapter.connected_devices_with_services(&[service_uuid]).await {
            Ok(connected) => {
                for device in connected {
                    let rssi = device.rssi().await.ok();
                    let peripheral = Self::record_device(&devices, device, None, rssi);
                    if tx.send(Ok(peripheral)).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => debug!("Could not list connected devices: {}", e),
        }

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
                            let peripheral = Self::record_device(
                                &devices,
                                discovered.device,
                                discovered.adv_data.local_name,
                                discovered.rssi,
                            );
                            if tx.send(Ok(peripheral)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }

    /// Remembers the device for a later connect and builds its reference
    fn record_device(
        devices: &Mutex<HashMap<String, Device>>,
        device: Device,
        advertised_name: Option<String>,
        rssi: Option<i16>,
    ) -> PeripheralRef {
        let id = device.id().to_string();
        let name = advertised_name.or_else(|| device.name().ok());
        if let Ok(mut devices) = devices.lock() {
            devices.entry(id.clone()).or_insert(device);
        }
        PeripheralRef::new(id, name, rssi)
    }

    pub async fn stop_scan(&self) {
        let task = self.scan_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some((cancel_token, handle)) = task {
            info!("Stopping Bluetooth scan.");
            cancel_token.cancel();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
            }
        }
    }
}
