//! Physical transport for the point-to-point link.
//!
//! This module moves raw bytes between the serial channel and the link
//! engine without any protocol knowledge. The inbound side is a pump task
//! with a bounded read; the outbound side is a writer the engine calls with
//! a bounded write.

mod bridge;

pub use bridge::{inbound_pump, Outbound, TransportWriter};

use tokio::io::{ReadHalf, WriteHalf};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::config::LinkConfig;
use crate::error::Result;
use crate::tracing::prelude::*;

/// Open the serial device carrying the PPP byte stream and split it into
/// independently owned read and write halves.
pub fn open_serial(
    config: &LinkConfig,
) -> Result<(ReadHalf<SerialStream>, WriteHalf<SerialStream>)> {
    let path = config.serial_device.to_string_lossy();
    let port = tokio_serial::new(path.as_ref(), config.baud_rate).open_native_async()?;
    info!(device = %path, baud = config.baud_rate, "Serial transport opened");
    Ok(tokio::io::split(port))
}
