use async_trait::async_trait;
use serial2_tokio::{CharSize, Parity, SerialPort, StopBits};
use std::{path::Path, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    protocol::{FrameAccumulator, ResponseFrame},
    BAUD_RATE,
};

/// Raw byte transmit seam between the driver and its serial link
///
/// Transmission is fire-and-forget: the protocol delivers responses
/// asynchronously, so `send` never waits for a reply. Tests substitute a
/// recording implementation here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transmit raw bytes to the device
    async fn send(&self, bytes: &[u8]) -> Result<()>;
}

/// RS-232 transport for TrackMaster treadmills
///
/// Owns the serial port and a background reader task that reassembles the
/// incoming byte stream into response frames. The device link runs at
/// 4800 baud, 8 data bits, no parity, 1 stop bit, full duplex.
pub struct SerialTransport {
    port: Arc<SerialPort>,
}

impl SerialTransport {
    /// Open a serial port and start the frame reader
    ///
    /// Returns the transport together with the channel on which complete
    /// response frames arrive.
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::Io`](crate::TreadmillError::Io) if the port
    /// cannot be opened or configured.
    pub fn open(
        path: impl AsRef<Path>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ResponseFrame>)> {
        let port = SerialPort::open(path.as_ref(), |mut settings: serial2_tokio::Settings| {
            settings.set_raw();
            settings.set_baud_rate(BAUD_RATE)?;
            settings.set_char_size(CharSize::Bits8);
            settings.set_parity(Parity::None);
            settings.set_stop_bits(StopBits::One);
            Ok(settings)
        })?;
        let port = Arc::new(port);

        info!("Opened serial port {:?} at {} baud", path.as_ref(), BAUD_RATE);

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_frames(port.clone(), frame_tx));

        Ok((Self { port }, frame_rx))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        debug!("Sending command: {:02X?}", bytes);

        let mut written = 0;
        while written < bytes.len() {
            written += self.port.write(&bytes[written..]).await?;
        }
        Ok(())
    }
}

/// Pump received bytes through the frame accumulator until the port closes
async fn read_frames(port: Arc<SerialPort>, sender: mpsc::UnboundedSender<ResponseFrame>) {
    let mut accumulator = FrameAccumulator::new();
    let mut buf = [0u8; 64];

    loop {
        match port.read(&mut buf).await {
            Ok(0) => {
                warn!("Serial port closed");
                break;
            }
            Ok(n) => {
                for frame in accumulator.extend(&buf[..n]) {
                    if sender.send(frame).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, bytes: &[u8]) -> Result<()> {
            self.sent.lock().await.extend_from_slice(bytes);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transport_is_object_safe() {
        let transport: Arc<dyn Transport> = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });

        transport.send(&[0xA1]).await.unwrap();
        transport.send(&[0xA3, b'0', b'0', b'5', b'0']).await.unwrap();
    }
}
