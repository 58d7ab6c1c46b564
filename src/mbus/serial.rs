//! # M-Bus Serial Communication
//!
//! The [`Transport`] trait is the seam between the poll cycle and the
//! physical link. [`SerialTransport`] drives an optical head on a serial
//! device through the timing the meter's photodiode needs:
//!
//! 1. `wake`: 2400 baud 8N1, `0x55` repeated for the wake window.
//! 2. `send_command`: 2400 baud 8E1, write and flush, no reply awaited.
//! 3. `read_response`: collect bytes until a whole long frame is buffered or
//!    the window closes.
//!
//! Nothing here retries; every failure ends the current poll.

use crate::config::TransportConfig;
use crate::constants::{MBUS_OPTICAL_BAUDRATE, MBUS_WAKEUP_BYTE};
use crate::error::MBusError;
use crate::logging::log_frame_hex;
use crate::mbus::frame::{find_long_frame, FrameScan};
use async_trait::async_trait;
use bytes::BytesMut;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{ClearBuffer, Parity, SerialPort, SerialPortBuilderExt, SerialStream};

/// Half-duplex link to one meter.
#[async_trait]
pub trait Transport: Send {
    /// Opens the device. Opening an already open transport reopens it.
    async fn open(&mut self, path: &str) -> Result<(), MBusError>;

    /// Sends the wake-up preamble. No response is read.
    async fn wake(&mut self) -> Result<(), MBusError>;

    /// Sends one command frame at 8E1 and returns once it is flushed.
    async fn send_command(&mut self, command: &[u8]) -> Result<(), MBusError>;

    /// Returns the first long-frame candidate received within `timeout`.
    async fn read_response(&mut self, timeout: Duration) -> Result<Vec<u8>, MBusError>;

    /// Releases the line. Safe to call at any time, any number of times.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Turns whatever arrived during a read window into the bytes handed to the
/// frame codec.
///
/// A complete candidate is cut out exactly. A truncated one is returned as is
/// so the codec reports what is wrong with it. ACKs and noise alone count as
/// no response.
pub fn response_from_window(buf: &[u8], window: Duration) -> Result<Vec<u8>, MBusError> {
    match find_long_frame(buf) {
        FrameScan::Complete(range) => Ok(buf[range].to_vec()),
        FrameScan::Partial { start } => Ok(buf[start..].to_vec()),
        FrameScan::Nothing => Err(MBusError::Timeout(window)),
    }
}

/// Maps an open failure to the error the operator can act on.
pub(crate) fn map_open_error(path: &str, e: tokio_serial::Error) -> MBusError {
    match e.kind {
        tokio_serial::ErrorKind::NoDevice
        | tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            MBusError::DeviceNotFound(path.to_string())
        }
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            MBusError::PermissionDenied(path.to_string())
        }
        _ => MBusError::SerialPortError(format!("{path}: {e}")),
    }
}

/// [`Transport`] over a tokio-serial stream.
pub struct SerialTransport {
    config: TransportConfig,
    port: Option<SerialStream>,
}

impl SerialTransport {
    pub fn new(config: TransportConfig) -> Self {
        SerialTransport { config, port: None }
    }

    fn port_mut(&mut self) -> Result<&mut SerialStream, MBusError> {
        self.port.as_mut().ok_or(MBusError::NotConnected)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&mut self, path: &str) -> Result<(), MBusError> {
        self.close().await;

        // Device nodes are files on unix; report a missing one before the driver does.
        if path.starts_with('/') && !Path::new(path).exists() {
            return Err(MBusError::DeviceNotFound(path.to_string()));
        }

        let port = tokio_serial::new(path, MBUS_OPTICAL_BAUDRATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(Parity::None)
            .open_native_async()
            .map_err(|e| map_open_error(path, e))?;

        log::debug!("opened {path} at {MBUS_OPTICAL_BAUDRATE} baud");
        self.port = Some(port);
        Ok(())
    }

    async fn wake(&mut self) -> Result<(), MBusError> {
        let window = self.config.wake_duration();
        let chunk = vec![MBUS_WAKEUP_BYTE; self.config.wake_chunk_len];
        let port = self.port_mut()?;

        port.set_baud_rate(MBUS_OPTICAL_BAUDRATE)?;
        port.set_parity(Parity::None)?;
        port.clear(ClearBuffer::All)?;

        // write_all paces itself on the UART, so the loop ends close to the window.
        let started = Instant::now();
        let mut sent = 0usize;
        while started.elapsed() < window {
            port.write_all(&chunk).await?;
            sent += chunk.len();
        }
        port.flush().await?;

        log::trace!("wake-up: {sent} bytes of 0x55 in {:?}", started.elapsed());
        Ok(())
    }

    async fn send_command(&mut self, command: &[u8]) -> Result<(), MBusError> {
        let port = self.port_mut()?;

        port.set_parity(Parity::Even)?;
        port.clear(ClearBuffer::Input)?;

        log_frame_hex("TX", command);
        port.write_all(command).await?;
        port.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self, timeout: Duration) -> Result<Vec<u8>, MBusError> {
        let port = self.port_mut()?;
        let deadline = Instant::now() + timeout;
        let mut buf = BytesMut::with_capacity(512);
        let mut chunk = [0u8; 256];

        loop {
            if let FrameScan::Complete(_) = find_long_frame(&buf) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, port.read(&mut chunk)).await {
                Err(_) | Ok(Ok(0)) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        if !buf.is_empty() {
            log_frame_hex("RX", &buf);
        }
        response_from_window(&buf, timeout)
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("serial line closed");
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
