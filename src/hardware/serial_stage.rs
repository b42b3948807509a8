//! Serial motion controller for the camera slider.
//!
//! Protocol Overview:
//! - Host -> controller: `m<position>` (ASCII), position on a 0..=1000 scale
//! - Controller -> host: one line once the stage is stationary
//! - No acknowledgement of the move command itself
//!
//! # Example Usage
//!
//! ```no_run
//! use lightfield_rig::hardware::{MotionStage, SerialStage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut stage = SerialStage::open("/dev/ttyACM0", 9600)?;
//!
//!     stage.move_to(500).await?;
//!     let status = stage.wait_ready().await?;
//!     println!("Stage ready: {}", String::from_utf8_lossy(&status));
//!
//!     Ok(())
//! }
//! ```

use crate::error::{RigError, RigResult};
use crate::hardware::capabilities::MotionStage;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

#[cfg(feature = "serial")]
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Build the move command for a stage coordinate.
pub fn move_command(position_units: u32) -> String {
    format!("m{position_units}")
}

/// Driver for the slider's motion controller.
///
/// Generic over the byte stream so the protocol can run over a real serial
/// port or an in-memory pipe.
pub struct SerialStage<S> {
    stream: BufReader<S>,
    /// Appended to every command (empty for the stock firmware)
    terminator: String,
}

impl<S> SerialStage<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already-open stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            terminator: String::new(),
        }
    }

    /// Append `terminator` to every command.
    #[must_use]
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Recover the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

#[cfg(feature = "serial")]
impl SerialStage<SerialStream> {
    /// Open the controller's serial port (8N1, no flow control).
    ///
    /// # Errors
    /// Returns error if serial port cannot be opened
    pub fn open(port_path: &str, baud_rate: u32) -> RigResult<Self> {
        let port = tokio_serial::new(port_path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(std::io::Error::from)?;

        debug!("Stage serial port '{}' opened at {} baud", port_path, baud_rate);
        Ok(Self::new(port))
    }

    /// Open the port described by the `[stage]` configuration section.
    pub fn from_config(config: &crate::config::StageConfig) -> RigResult<Self> {
        Ok(Self::open(&config.port, config.baud_rate)?.with_terminator(&config.command_terminator))
    }
}

#[async_trait]
impl<S> MotionStage for SerialStage<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn move_to(&mut self, position_units: u32) -> RigResult<()> {
        let payload = format!("{}{}", move_command(position_units), self.terminator);
        let port = self.stream.get_mut();
        port.write_all(payload.as_bytes()).await?;
        port.flush().await?;

        debug!("Sent stage command: {}", payload.trim_end());
        Ok(())
    }

    async fn wait_ready(&mut self) -> RigResult<Vec<u8>> {
        let mut line = Vec::with_capacity(32);
        let read = self.stream.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Err(RigError::SerialUnexpectedEof);
        }

        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }

        debug!("Stage ready: {}", String::from_utf8_lossy(&line));
        Ok(line)
    }
}
