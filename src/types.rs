use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, SystemTime},
};

/// Speed unit accepted by speed commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedUnit {
    /// Kilometers per hour
    Kilometers,
    /// Miles per hour
    Miles,
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kilometers => write!(f, "km/h"),
            Self::Miles => write!(f, "mph"),
        }
    }
}

/// Operating state of the belt
///
/// Transitions happen only through [`run_belt`](crate::Treadmill::run_belt) and
/// [`stop_belt`](crate::Treadmill::stop_belt) calls (including the ones
/// `set_speed` triggers internally). The belt status the device reports via
/// 0xD0 is decoded as [`BeltStatusReport`] but never drives this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeltState {
    /// Belt is stopped
    Stopped,
    /// Belt is running
    Running,
}

impl fmt::Display for BeltState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Treadmill model, selecting the speed encoding convention
///
/// The AxeleroCardio speaks the same frame format as the TrackMaster but takes
/// the speed payload in km/h-tenths instead of the TrackMaster's native
/// mph-tenths. Elevation and response handling are identical across models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceModel {
    /// TrackMaster treadmill (speed payload in mph-tenths)
    TrackMaster,
    /// Axelero Cardio treadmill (speed payload in km/h-tenths)
    AxeleroCardio,
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrackMaster => write!(f, "TrackMaster"),
            Self::AxeleroCardio => write!(f, "Axelero Cardio"),
        }
    }
}

/// Belt status as reported by the device in a 0xD0 response
///
/// Informational only; the driver's [`BeltState`] is not derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeltStatusReport {
    /// Belt stopped ('1')
    Stopped,
    /// Belt started, communication-disconnect stop enabled ('2')
    RunningCdsEnabled,
    /// Belt started, communication-disconnect stop disabled ('3')
    RunningCdsDisabled,
}

impl fmt::Display for BeltStatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::RunningCdsEnabled => write!(f, "Running (CDS enabled)"),
            Self::RunningCdsDisabled => write!(f, "Running (CDS disabled)"),
        }
    }
}

/// Cached device readings and belt state
///
/// `speed` is written from two paths with different unit conventions: a
/// `set_speed` call caches the clamped km/h value, while a 0xD1 response
/// caches the device's own reading divided by 10, which on the TrackMaster is
/// in its native mph-based units. This mirrors the established behavior of
/// deployed controllers and is deliberately left unreconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Last known belt speed
    pub speed: f32,
    /// Last known elevation in percent grade
    pub elevation: f32,
    /// Belt state as tracked by issued commands
    pub belt: BeltState,
    /// Last status update timestamp
    pub timestamp: SystemTime,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            speed: 0.0,
            elevation: 0.0,
            belt: BeltState::Stopped,
            timestamp: SystemTime::now(),
        }
    }
}

/// Event published on the device's broadcast channel
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Cached state changed through a command or a recognized response
    Changed(DeviceStatus),
    /// A response frame was delivered, recognized or not
    DataExchanged,
}

/// Periodic status poll configuration
///
/// Each tick requests belt status, current speed and current elevation, which
/// also keeps the device's communication-disconnect-stop watchdog fed. The
/// watchdog threshold documented by the vendor is 500 ms; the historical
/// controller polled at 1000 ms and that default is preserved here. Tighten
/// the interval when running with CDS enabled.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between status request rounds
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
        }
    }
}
