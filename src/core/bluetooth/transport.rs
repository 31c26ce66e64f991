//! Transport capability consumed by the connection manager
//! The platform BLE stack (or a simulator) is hidden behind [`Transport`]:
//! an event stream for scan results, an async connect, and a notification
//! subscription stream.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::core::bluetooth::device::PeripheralRef;
use crate::core::bluetooth::error::TransportError;

/// Stream of discovered peripherals (not deduplicated) or discovery errors
pub type ScanStream = BoxStream<'static, Result<PeripheralRef, TransportError>>;

/// Stream of base64 wire values pushed by the peripheral
pub type NotificationStream = BoxStream<'static, Result<String, TransportError>>;

/// Opaque reference to an open connection.
///
/// `session` is unique per successful connect, so a handle from an earlier
/// connection never compares equal to the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    pub peripheral_id: String,
    pub session: u64,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Begin discovery; peripherals are reported on the returned stream
    async fn start_scan(&self) -> Result<ScanStream, TransportError>;

    /// Stop discovery; must be safe to call when not scanning
    async fn stop_scan(&self) -> Result<(), TransportError>;

    /// Open a connection to the peripheral with the given platform id
    async fn connect(&self, peripheral_id: &str) -> Result<TransportHandle, TransportError>;

    /// Discover the service and characteristic that later calls address
    async fn discover_services(
        &self,
        handle: &TransportHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    /// Write-with-response of a base64 wire value
    async fn write(
        &self,
        handle: &TransportHandle,
        service: Uuid,
        characteristic: Uuid,
        value: &str,
    ) -> Result<(), TransportError>;

    /// Subscribe to notifications; the stream ends when the subscription does
    async fn subscribe(
        &self,
        handle: &TransportHandle,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, TransportError>;

    /// Release the connection
    async fn disconnect(&self, handle: &TransportHandle) -> Result<(), TransportError>;
}
