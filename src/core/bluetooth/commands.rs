//! Glasses commands implementation
//! This module contains the write seam shared by every sender and the
//! single-byte control commands understood by the glasses firmware.

use async_trait::async_trait;
use log::info;

use crate::core::bluetooth::error::WriteError;

/// Control commands the firmware recognizes when a write is exactly one byte long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlassesCommand {
    /// Take a picture with the on-board camera ('C')
    CaptureImage,
    /// Ask the glasses to notify their camera status ('S')
    StatusRequest,
    /// Reset the camera frame size ('R')
    ResetCamera,
}

impl GlassesCommand {
    /// Convert the command to its byte representation
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::CaptureImage => vec![b'C'],
            Self::StatusRequest => vec![b'S'],
            Self::ResetCamera => vec![b'R'],
        }
    }
}

/// The two link operations the delivery protocol and the command executor need.
///
/// Implemented by the connection manager; tests substitute recording writers.
#[async_trait]
pub trait LinkWriter: Send + Sync + 'static {
    /// Pure read of whether a peripheral is connected right now
    fn is_connected(&self) -> bool;

    /// Single write to the fixed characteristic; fails with
    /// [`WriteError::NotConnected`] when nothing is connected
    async fn write_raw(&self, bytes: &[u8]) -> Result<(), WriteError>;
}

#[async_trait]
impl<W: LinkWriter + ?Sized> LinkWriter for std::sync::Arc<W> {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), WriteError> {
        (**self).write_raw(bytes).await
    }
}

/// Command executor for the glasses
pub struct CommandExecutor<W: LinkWriter> {
    writer: W,
}

impl<W: LinkWriter> CommandExecutor<W> {
    /// Create a new CommandExecutor
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Send one command
    pub async fn send_command(&self, command: GlassesCommand) -> Result<(), WriteError> {
        info!("Sending command to glasses: {:?}", command);
        self.writer.write_raw(&command.to_bytes()).await
    }

    pub async fn capture_image(&self) -> Result<(), WriteError> {
        self.send_command(GlassesCommand::CaptureImage).await
    }

    /// The answer arrives as a notification ("Camera Ready")
    pub async fn request_status(&self) -> Result<(), WriteError> {
        self.send_command(GlassesCommand::StatusRequest).await
    }

    pub async fn reset_camera(&self) -> Result<(), WriteError> {
        self.send_command(GlassesCommand::ResetCamera).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        connected: bool,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl LinkWriter for Recorder {
        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn write_raw(&self, bytes: &[u8]) -> Result<(), WriteError> {
            if !self.connected {
                return Err(WriteError::NotConnected);
            }
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(GlassesCommand::CaptureImage.to_bytes(), b"C");
        assert_eq!(GlassesCommand::StatusRequest.to_bytes(), b"S");
        assert_eq!(GlassesCommand::ResetCamera.to_bytes(), b"R");
    }

    #[tokio::test]
    async fn test_executor_writes_single_byte() {
        let executor = CommandExecutor::new(Recorder {
            connected: true,
            sent: Mutex::new(Vec::new()),
        });
        executor.capture_image().await.unwrap();
        executor.request_status().await.unwrap();
        assert_eq!(*executor.writer.sent.lock().unwrap(), vec![b"C".to_vec(), b"S".to_vec()]);
    }

    #[tokio::test]
    async fn test_executor_surfaces_not_connected() {
        let executor = CommandExecutor::new(Recorder {
            connected: false,
            sent: Mutex::new(Vec::new()),
        });
        assert_eq!(executor.reset_camera().await, Err(WriteError::NotConnected));
    }
}
