use crate::{
    error::{Result, TreadmillError},
    types::{BeltStatusReport, DeviceModel, SpeedUnit},
};
use bytes::{BufMut, Bytes, BytesMut};

/// Number of ASCII digit bytes carried by a numeric command or response frame
pub const DATA_DIGITS: usize = 4;

/// Largest value representable in a 4-digit tenths payload
pub const MAX_ENCODED_TENTHS: u16 = 9999;

/// Kilometers per mile, as used by the historical controller firmware
pub const KMH_PER_MPH: f32 = 1.609;

/// Maximum belt speed in miles per hour
pub const MAX_SPEED_MPH: f32 = 16.0;

/// Maximum elevation in percent grade
pub const MAX_ELEVATION_PERCENT: f32 = 25.0;

/// Auto-stop sequence sent when an ergometry session ends
///
/// Two raw 0xAA bytes: the device sets speed and elevation to minimum and
/// stops the belt.
pub const AUTO_STOP_SEQUENCE: [u8; 2] = [0xAA, 0xAA];

/// Command opcodes from the TrackMaster serial protocol
///
/// A command frame is a single opcode byte, optionally followed by exactly
/// four ASCII digit bytes. Numeric payloads carry the value multiplied by ten
/// with no decimal point transmitted (e.g. 5.0 mph is sent as `0050`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Start belt with communication-disconnect stop enabled
    StartBeltCdsEnable = 0xA0,
    /// Start belt with communication-disconnect stop disabled
    StartBelt = 0xA1,
    /// Stop belt
    StopBelt = 0xA2,
    /// Set speed to the next 4 bytes of ASCII data
    SetSpeed = 0xA3,
    /// Set elevation to the next 4 bytes of ASCII data
    SetElevation = 0xA4,
    /// Auto stop - sets speed and elevation to minimum and stops the belt
    AutoStop = 0xAA,
}

/// Status request bytes
///
/// Each request asks the device to transmit one current reading. Sending any
/// request also feeds the device's communication-disconnect-stop watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusRequest {
    /// Transmit belt status
    BeltStatus = 0xC0,
    /// Transmit current actual speed
    CurrentSpeed = 0xC1,
    /// Transmit current actual elevation
    CurrentElevation = 0xC2,
}

/// Status request round sent on every poll tick
pub const POLL_SEQUENCE: [StatusRequest; 3] = [
    StatusRequest::BeltStatus,
    StatusRequest::CurrentSpeed,
    StatusRequest::CurrentElevation,
];

/// Response status bytes recognized by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    /// Belt status followed by 1 byte of data ('1' stopped, '2'/'3' started)
    BeltStatus = 0xD0,
    /// Current belt speed followed by 4 bytes of ASCII data
    CurrentSpeed = 0xD1,
    /// Current elevation followed by 4 bytes of ASCII data
    CurrentElevation = 0xD2,
}

impl ResponseCode {
    /// Convert from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xD0 => Some(Self::BeltStatus),
            0xD1 => Some(Self::CurrentSpeed),
            0xD2 => Some(Self::CurrentElevation),
            _ => None,
        }
    }
}

/// Payload length implied by a response status byte
///
/// Covers the full status and acknowledgment ranges of the protocol so the
/// frame accumulator stays byte-aligned even for responses this driver does
/// not act on (set-point echoes, lap time, distance, protocol/stage and so
/// on). Returns `None` for bytes that do not open a frame.
#[must_use]
pub const fn response_payload_len(status: u8) -> Option<usize> {
    match status {
        // Input command acknowledgments, including BE (out of range) and
        // BF (illegal command), carry no data
        0xB0..=0xBF => Some(0),
        // Belt status carries a single flag byte
        0xD0 => Some(1),
        // Protocol and stage are 2-digit values
        0xD8 | 0xD9 => Some(2),
        // All remaining readings are 4-digit values
        0xD1..=0xD7 | 0xDA..=0xDD => Some(4),
        // Status request not recognized
        0xDF => Some(0),
        _ => None,
    }
}

/// Encode a tenths value as exactly four zero-padded ASCII digits
fn encode_tenths(tenths: u16) -> [u8; DATA_DIGITS] {
    let clamped = if tenths > MAX_ENCODED_TENTHS {
        MAX_ENCODED_TENTHS
    } else {
        tenths
    };
    [
        b'0' + (clamped / 1000) as u8,
        b'0' + (clamped / 100 % 10) as u8,
        b'0' + (clamped / 10 % 10) as u8,
        b'0' + (clamped % 10) as u8,
    ]
}

/// Parse a 4-digit ASCII tenths payload into its decimal value
fn parse_tenths(payload: &[u8]) -> Result<f32> {
    if payload.len() != DATA_DIGITS {
        return Err(TreadmillError::Parse(format!(
            "Numeric payload has {} bytes, expected {}",
            payload.len(),
            DATA_DIGITS
        )));
    }
    if !payload.iter().all(u8::is_ascii_digit) {
        return Err(TreadmillError::Parse(format!(
            "Numeric payload is not ASCII digits: {payload:02X?}"
        )));
    }
    let mut value = 0u32;
    for digit in payload {
        value = value * 10 + u32::from(digit - b'0');
    }
    Ok(value as f32 / 10.0)
}

/// Normalize a speed input to km/h and clamp it to the device's range
///
/// Miles-per-hour inputs are converted to km/h first; the result is clamped
/// to [0, 16 mph] expressed in km/h. Out-of-range values are clamped, never
/// rejected.
#[must_use]
pub fn clamp_speed_kmh(value: f32, unit: SpeedUnit) -> f32 {
    let kmh = match unit {
        SpeedUnit::Kilometers => value,
        SpeedUnit::Miles => value * KMH_PER_MPH,
    };
    kmh.clamp(0.0, MAX_SPEED_MPH * KMH_PER_MPH)
}

/// Clamp an elevation input to the device's range of [0, 25] percent grade
#[must_use]
pub fn clamp_elevation(value: f32) -> f32 {
    value.clamp(0.0, MAX_ELEVATION_PERCENT)
}

impl DeviceModel {
    /// Convert a clamped km/h speed into the model's wire representation
    ///
    /// This is the only point where the two supported models differ: the
    /// TrackMaster expects its native mph-tenths, the Axelero Cardio takes
    /// km/h-tenths directly. New models differing only in numeric convention
    /// plug in here.
    #[must_use]
    pub fn speed_device_units(self, speed_kmh: f32) -> u16 {
        let tenths = match self {
            Self::TrackMaster => speed_kmh / KMH_PER_MPH * 10.0,
            Self::AxeleroCardio => speed_kmh * 10.0,
        };
        tenths.round() as u16
    }
}

/// Command frame: one opcode byte plus an optional 4-digit tenths payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command opcode
    pub opcode: Opcode,
    /// Numeric payload in tenths, when the opcode carries data
    pub data: Option<u16>,
}

impl CommandFrame {
    /// Create a set-speed frame from wire units (tenths)
    #[must_use]
    pub const fn set_speed(device_units: u16) -> Self {
        Self {
            opcode: Opcode::SetSpeed,
            data: Some(device_units),
        }
    }

    /// Create a set-elevation frame from percent-grade tenths
    #[must_use]
    pub const fn set_elevation(tenths: u16) -> Self {
        Self {
            opcode: Opcode::SetElevation,
            data: Some(tenths),
        }
    }

    /// Create a start-belt frame
    #[must_use]
    pub const fn run_belt() -> Self {
        Self {
            opcode: Opcode::StartBelt,
            data: None,
        }
    }

    /// Create a stop-belt frame
    #[must_use]
    pub const fn stop_belt() -> Self {
        Self {
            opcode: Opcode::StopBelt,
            data: None,
        }
    }

    /// Serialize the frame to wire bytes
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + DATA_DIGITS);
        buf.put_u8(self.opcode as u8);
        if let Some(tenths) = self.data {
            buf.extend_from_slice(&encode_tenths(tenths));
        }
        buf.freeze()
    }
}

/// A complete response frame as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Status byte
    pub status: u8,
    /// Payload bytes, length implied by the status byte
    pub payload: Vec<u8>,
}

/// Decoded response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Response {
    /// Belt status report (0xD0)
    BeltStatus(BeltStatusReport),
    /// Current belt speed in the device's native units (0xD1)
    CurrentSpeed(f32),
    /// Current elevation in percent grade (0xD2)
    CurrentElevation(f32),
    /// Input command acknowledgment (0xB0-0xBF)
    Ack(u8),
}

impl Response {
    /// Decode a response frame
    ///
    /// # Errors
    ///
    /// Returns [`TreadmillError::Parse`] for status bytes this driver does not
    /// act on and for malformed numeric payloads. Callers treat that as an
    /// ignorable condition, not a fault.
    pub fn from_frame(frame: &ResponseFrame) -> Result<Self> {
        if let Some(code) = ResponseCode::from_u8(frame.status) {
            return match code {
                ResponseCode::BeltStatus => match frame.payload.first().copied() {
                    Some(b'1') => Ok(Self::BeltStatus(BeltStatusReport::Stopped)),
                    Some(b'2') => Ok(Self::BeltStatus(BeltStatusReport::RunningCdsEnabled)),
                    Some(b'3') => Ok(Self::BeltStatus(BeltStatusReport::RunningCdsDisabled)),
                    other => Err(TreadmillError::Parse(format!(
                        "Invalid belt status payload: {other:02X?}"
                    ))),
                },
                ResponseCode::CurrentSpeed => parse_tenths(&frame.payload).map(Self::CurrentSpeed),
                ResponseCode::CurrentElevation => {
                    parse_tenths(&frame.payload).map(Self::CurrentElevation)
                }
            };
        }
        if (0xB0..=0xBF).contains(&frame.status) {
            return Ok(Self::Ack(frame.status));
        }
        Err(TreadmillError::Parse(format!(
            "Unrecognized status byte: {:02X}",
            frame.status
        )))
    }
}

/// Push-based framer for the raw serial byte stream
///
/// Feed it received bytes one at a time; it emits a [`ResponseFrame`] once a
/// status byte and its implied payload have arrived. Bytes that do not open a
/// frame are discarded, which resynchronizes the stream after line noise.
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    pending: Option<(u8, usize)>,
    payload: Vec<u8>,
}

impl FrameAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received byte, returning a frame when one completes
    pub fn push(&mut self, byte: u8) -> Option<ResponseFrame> {
        match self.pending {
            None => match response_payload_len(byte) {
                Some(0) => Some(ResponseFrame {
                    status: byte,
                    payload: Vec::new(),
                }),
                Some(len) => {
                    self.pending = Some((byte, len));
                    self.payload.clear();
                    None
                }
                None => None,
            },
            Some((status, len)) => {
                self.payload.push(byte);
                if self.payload.len() == len {
                    self.pending = None;
                    Some(ResponseFrame {
                        status,
                        payload: std::mem::take(&mut self.payload),
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Feed a slice of received bytes, returning all completed frames
    pub fn extend(&mut self, bytes: &[u8]) -> Vec<ResponseFrame> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }
}
