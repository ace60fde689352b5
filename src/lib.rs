#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Trackmaster 🏃‍♂️
//!
//! A Rust library for controlling TrackMaster treadmill ergometers over
//! RS-232 serial.
//!
//! The TrackMaster protocol is a fixed-format ASCII-over-serial scheme: each
//! command is one opcode byte, optionally followed by exactly four ASCII
//! digits carrying a fixed-point value (value × 10, no decimal point). The
//! device answers asynchronously with status frames for belt state, current
//! speed and current elevation. The Axelero Cardio variant speaks the same
//! frames but takes speed in km/h-tenths instead of the TrackMaster's native
//! mph-tenths; it is selected via [`DeviceModel`].
//!
//! While the device's communication-disconnect stop is enabled it must see a
//! command or status request at least every 500 ms or it decelerates to a
//! stop on its own. The driver's periodic status poll doubles as that
//! keep-alive; see [`PollConfig`] for the interval.
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library controls physical exercise equipment.
//! Always ensure:
//! - Users can stop the belt independently of software control
//! - Physical safety measures are in place
//! - Proper error handling is implemented in your application
//!
//! ## Quick Start
//!
//! ```no_run
//! use trackmaster::{DeviceModel, SpeedUnit, Treadmill};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the serial link to the treadmill
//!     let treadmill = Treadmill::open("/dev/ttyUSB0", DeviceModel::TrackMaster)?;
//!
//!     // Start the session and the status poll
//!     treadmill.start().await?;
//!
//!     // Run the belt at 5 km/h on a 2.5% grade
//!     treadmill.set_speed(5.0, SpeedUnit::Kilometers).await?;
//!     treadmill.set_elevation(2.5).await?;
//!
//!     // End the session; the device auto-stops
//!     treadmill.stop().await?;
//!
//!     Ok(())
//! }
//! ```

/// Main device control interface
pub mod device;
/// Error types and handling
pub mod error;
/// Protocol frame structures, encoding and parsing
pub mod protocol;
/// Serial transport and the transport seam
pub mod serial;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use device::Treadmill;
pub use error::{Result, TreadmillError};
pub use serial::{SerialTransport, Transport};
pub use types::{
    BeltState, BeltStatusReport, DeviceEvent, DeviceModel, DeviceStatus, PollConfig, SpeedUnit,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serial link speed required by the device
///
/// The treadmill's RS-232 interface runs at 4800 baud, 8 data bits, no
/// parity, 1 stop bit, full duplex.
pub const BAUD_RATE: u32 = 4800;
