use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Identifier of a unit, 1-based and dense across the roster.
pub type UnitId = u16;

/// Size of the length header preceding every frame body.
pub const HEADER_LEN: usize = 2;

/// Size of the message id field at the start of every frame body.
pub const MESSAGE_ID_LEN: usize = 2;

/// Largest payload that still fits the one-byte body length.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - MESSAGE_ID_LEN;

/// Message types carried in the second byte of the message id field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    AskAvailability = 0x01,
    SetAvailability = 0x02,
    AskCommand = 0x03,
    SetSelection = 0x04,
    AskMode = 0x05,
    SetMode = 0x06,
    AskLogs = 0x07,
    SetLogs = 0x08,
    Alert = 0x09,
    AskDisconnect = 0x10,
    AckDisconnection = 0x11,
    SetRadar = 0x12,
    SetClock = 0x13,
    SetupInfo = 0x14,
    LogsReceived = 0x15,
}

impl From<MessageId> for u8 {
    fn from(id: MessageId) -> Self {
        id as u8
    }
}

impl TryFrom<u8> for MessageId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageId::AskAvailability),
            0x02 => Ok(MessageId::SetAvailability),
            0x03 => Ok(MessageId::AskCommand),
            0x04 => Ok(MessageId::SetSelection),
            0x05 => Ok(MessageId::AskMode),
            0x06 => Ok(MessageId::SetMode),
            0x07 => Ok(MessageId::AskLogs),
            0x08 => Ok(MessageId::SetLogs),
            0x09 => Ok(MessageId::Alert),
            0x10 => Ok(MessageId::AskDisconnect),
            0x11 => Ok(MessageId::AckDisconnection),
            0x12 => Ok(MessageId::SetRadar),
            0x13 => Ok(MessageId::SetClock),
            0x14 => Ok(MessageId::SetupInfo),
            0x15 => Ok(MessageId::LogsReceived),
            _ => Err(()),
        }
    }
}

/// Movement command sent to the selected unit.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward = 0,
    Right = 1,
    Left = 2,
    Backward = 3,
    Stop = 4,
}

impl TryFrom<u8> for Direction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::Forward),
            1 => Ok(Direction::Right),
            2 => Ok(Direction::Left),
            3 => Ok(Direction::Backward),
            4 => Ok(Direction::Stop),
            _ => Err(()),
        }
    }
}

/// Wire value of a selected unit in `SetSelection`.
pub const SELECTED: u8 = 0x02;

/// Wire value of an unselected unit in `SetSelection`.
pub const UNSELECTED: u8 = 0x03;

/// One of the independently switchable peripherals of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Peripheral {
    Camera,
    Radar,
    Buzzer,
    Leds,
}

/// Enable flags of the four peripherals of a unit.
///
/// Every peripheral is enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatingMode {
    pub camera: bool,
    pub radar: bool,
    pub buzzer: bool,
    pub leds: bool,
}

impl Default for OperatingMode {
    fn default() -> Self {
        Self {
            camera: true,
            radar: true,
            buzzer: true,
            leds: true,
        }
    }
}

impl OperatingMode {
    pub fn new(camera: bool, radar: bool, buzzer: bool, leds: bool) -> Self {
        Self {
            camera,
            radar,
            buzzer,
            leds,
        }
    }

    /// Replace every flag at once.
    pub fn replace(&mut self, other: OperatingMode) {
        *self = other;
    }

    /// Switch a single peripheral.
    pub fn set(&mut self, peripheral: Peripheral, enabled: bool) {
        match peripheral {
            Peripheral::Camera => self.camera = enabled,
            Peripheral::Radar => self.radar = enabled,
            Peripheral::Buzzer => self.buzzer = enabled,
            Peripheral::Leds => self.leds = enabled,
        }
    }

    pub fn get(&self, peripheral: Peripheral) -> bool {
        match peripheral {
            Peripheral::Camera => self.camera,
            Peripheral::Radar => self.radar,
            Peripheral::Buzzer => self.buzzer,
            Peripheral::Leds => self.leds,
        }
    }

    /// Flags in wire order: camera, radar, buzzer, leds.
    pub fn to_wire(&self) -> [u8; 4] {
        [
            self.camera as u8,
            self.radar as u8,
            self.buzzer as u8,
            self.leds as u8,
        ]
    }

    /// Any non-zero byte enables the peripheral.
    pub fn from_wire(bytes: [u8; 4]) -> Self {
        Self {
            camera: bytes[0] != 0,
            radar: bytes[1] != 0,
            buzzer: bytes[2] != 0,
            leds: bytes[3] != 0,
        }
    }
}

/// Obstacle detection reported by a unit's radar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RadarState {
    Detected,
    #[default]
    NotDetected,
}

/// Calendar time pushed to a unit with `SetClock`.
///
/// Callers validate ranges; encoding only casts each field to a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Decoded content of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    /// Answer to an availability probe.
    Availability,
    /// Current peripheral configuration of the unit.
    Mode(OperatingMode),
    /// Log lines flushed by the unit.
    Logs(Vec<String>),
    /// Alert code, clamped to `0..=99`.
    Alert { code: u8 },
    /// The unit acknowledged a disconnection request.
    DisconnectedOk,
    /// Obstacle detection changed.
    Radar(RadarState),
    /// Unknown or malformed frame.
    Nothing,
}

/// An inbound event attributed to the unit whose socket carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEvent {
    pub unit_id: UnitId,
    pub event: InboundEvent,
}

/// Outbound request as seen by a unit. Used by unit-side tooling and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    AskAvailability,
    AskCommand(Direction),
    SetSelection(bool),
    AskMode,
    SetMode(OperatingMode),
    AskLogs,
    AskDisconnect,
    SetClock(ClockTime),
    SetupInfo { ip: [u8; 4], port: u16 },
    LogsReceived,
}

/// A single frame split into message id and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(message_id: MessageId, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: message_id.into(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> Option<MessageId> {
        MessageId::try_from(self.message_id).ok()
    }

    /// Serialize into `[0x00][bodyLen][0x00][id][payload..]`.
    ///
    /// Payloads longer than [`MAX_PAYLOAD_LEN`] are truncated.
    pub fn write_to(&self, dst: &mut BytesMut) {
        let payload = &self.payload[..self.payload.len().min(MAX_PAYLOAD_LEN)];
        dst.reserve(HEADER_LEN + MESSAGE_ID_LEN + payload.len());
        dst.put_u8(0x00);
        dst.put_u8((MESSAGE_ID_LEN + payload.len()) as u8);
        dst.put_u8(0x00);
        dst.put_u8(self.message_id);
        dst.put_slice(payload);
    }

    pub fn into_bytes(self) -> Bytes {
        let mut dst = BytesMut::new();
        self.write_to(&mut dst);
        dst.freeze()
    }
}
