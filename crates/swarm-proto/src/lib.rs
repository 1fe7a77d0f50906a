pub mod codec;
pub mod de;
pub mod error;
pub mod ser;
pub mod types;

pub use crate::{
    codec::FrameCodec,
    de::{decode, decode_command, decode_frame},
    error::ProtoError,
    types::{
        ClockTime, Command, Direction, Frame, InboundEvent, MessageId, OperatingMode, Peripheral,
        RadarState, UnitEvent, UnitId,
    },
};
