//! Frame decoders.
//!
//! Decoding never fails: unknown ids and truncated payloads turn into
//! [`InboundEvent::Nothing`].

use std::net::Ipv4Addr;

use crate::{
    ser::join_port,
    types::{
        ClockTime, Command, Direction, HEADER_LEN, InboundEvent, MESSAGE_ID_LEN, MessageId,
        OperatingMode, RadarState, SELECTED, UNSELECTED, UnitEvent, UnitId,
    },
};

/// Highest alert code a unit may report.
pub const MAX_ALERT_CODE: i8 = 99;

/// Read the message id of a frame body.
///
/// The id may sit in either byte of the two-byte field, so both
/// `[0x00, id]` and `[id, 0x00]` are accepted.
pub fn message_id(body: &[u8]) -> Option<u8> {
    match body {
        [0x00, id, ..] if *id != 0 => Some(*id),
        [id, ..] if *id != 0 => Some(*id),
        _ => None,
    }
}

fn payload(body: &[u8]) -> &[u8] {
    body.get(MESSAGE_ID_LEN..).unwrap_or(&[])
}

/// Decode a frame body (everything after the length header).
pub fn decode(unit_id: UnitId, body: &[u8]) -> UnitEvent {
    UnitEvent {
        unit_id,
        event: decode_event(body),
    }
}

/// Decode a complete frame including its length header.
pub fn decode_frame(unit_id: UnitId, frame: &[u8]) -> UnitEvent {
    decode(unit_id, frame.get(HEADER_LEN..).unwrap_or(&[]))
}

fn decode_event(body: &[u8]) -> InboundEvent {
    let Some(id) = message_id(body).and_then(|id| MessageId::try_from(id).ok()) else {
        return InboundEvent::Nothing;
    };
    let payload = payload(body);

    match id {
        MessageId::SetAvailability => InboundEvent::Availability,
        MessageId::SetMode => match payload {
            [camera, radar, buzzer, leds, ..] => {
                InboundEvent::Mode(OperatingMode::from_wire([*camera, *radar, *buzzer, *leds]))
            }
            _ => InboundEvent::Nothing,
        },
        MessageId::SetLogs => InboundEvent::Logs(decode_log_lines(payload)),
        MessageId::Alert => match payload {
            [code, ..] => InboundEvent::Alert {
                code: clamp_alert(*code as i8),
            },
            _ => InboundEvent::Nothing,
        },
        MessageId::AckDisconnection => InboundEvent::DisconnectedOk,
        MessageId::SetRadar => match payload {
            [1, ..] => InboundEvent::Radar(RadarState::Detected),
            [_, ..] => InboundEvent::Radar(RadarState::NotDetected),
            [] => InboundEvent::Nothing,
        },
        _ => InboundEvent::Nothing,
    }
}

/// Alert codes are signed on the wire and clamped to `0..=99`.
pub fn clamp_alert(code: i8) -> u8 {
    code.clamp(0, MAX_ALERT_CODE) as u8
}

fn decode_log_lines(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    String::from_utf8_lossy(payload)
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Decode a controller request from a frame body, as a unit would.
///
/// Returns `None` for ids that are not controller requests or when the
/// payload is too short.
pub fn decode_command(body: &[u8]) -> Option<Command> {
    let id = MessageId::try_from(message_id(body)?).ok()?;
    let payload = payload(body);

    let command = match id {
        MessageId::AskAvailability => Command::AskAvailability,
        MessageId::AskCommand => Command::AskCommand(Direction::try_from(*payload.first()?).ok()?),
        MessageId::SetSelection => match *payload.first()? {
            SELECTED => Command::SetSelection(true),
            UNSELECTED => Command::SetSelection(false),
            _ => return None,
        },
        MessageId::AskMode => Command::AskMode,
        MessageId::SetMode => match payload {
            [camera, radar, buzzer, leds, ..] => Command::SetMode(OperatingMode::from_wire([
                *camera, *radar, *buzzer, *leds,
            ])),
            _ => return None,
        },
        MessageId::AskLogs => Command::AskLogs,
        MessageId::AskDisconnect => Command::AskDisconnect,
        MessageId::SetClock => match payload {
            [century, year, month, day, hour, minute, second, ..] => {
                Command::SetClock(ClockTime {
                    year: *century as u16 * 100 + *year as u16,
                    month: *month,
                    day: *day,
                    hour: *hour,
                    minute: *minute,
                    second: *second,
                })
            }
            _ => return None,
        },
        MessageId::SetupInfo => match payload {
            [a, b, c, d, high, low, ..] => Command::SetupInfo {
                ip: Ipv4Addr::new(*a, *b, *c, *d).octets(),
                port: join_port([*high, *low]),
            },
            _ => return None,
        },
        MessageId::LogsReceived => Command::LogsReceived,
        _ => return None,
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ser::{self, unit};
    use proptest::prelude::*;

    #[test]
    fn test_decode_alert_signed_byte() {
        let event = decode(1, &[0x09, 0x00, 0xFF]);
        assert_eq!(event.unit_id, 1);
        assert_eq!(event.event, InboundEvent::Alert { code: 0 });
    }

    #[test]
    fn test_decode_alert_clamps_high_codes() {
        assert_eq!(
            decode(1, &[0x09, 0x00, 111]).event,
            InboundEvent::Alert { code: 99 }
        );
        assert_eq!(
            decode(1, &[0x09, 0x00, 11]).event,
            InboundEvent::Alert { code: 11 }
        );
    }

    #[test]
    fn test_decode_mode_nonzero_enables() {
        let event = decode(2, &[0x00, 0x06, 0x00, 0x07, 0x00, 0xFF]);
        assert_eq!(
            event.event,
            InboundEvent::Mode(OperatingMode::new(false, true, false, true))
        );
    }

    #[test]
    fn test_decode_ack_disconnection_maps_to_disconnected_ok() {
        assert_eq!(
            decode(3, &[0x00, 0x11]).event,
            InboundEvent::DisconnectedOk
        );
    }

    #[test]
    fn test_decode_radar() {
        assert_eq!(
            decode(1, &[0x00, 0x12, 0x01]).event,
            InboundEvent::Radar(RadarState::Detected)
        );
        assert_eq!(
            decode(1, &[0x00, 0x12, 0x02]).event,
            InboundEvent::Radar(RadarState::NotDetected)
        );
    }

    #[test]
    fn test_decode_unknown_is_nothing() {
        assert_eq!(decode(1, &[0x00, 0x7F]).event, InboundEvent::Nothing);
        assert_eq!(decode(1, &[]).event, InboundEvent::Nothing);
        assert_eq!(decode(1, &[0x00, 0x00]).event, InboundEvent::Nothing);
        // Requests are not inbound events.
        assert_eq!(decode(1, &[0x00, 0x01]).event, InboundEvent::Nothing);
    }

    #[test]
    fn test_decode_truncated_payload_is_nothing() {
        assert_eq!(decode(1, &[0x00, 0x06, 0x01]).event, InboundEvent::Nothing);
        assert_eq!(decode(1, &[0x00, 0x09]).event, InboundEvent::Nothing);
    }

    #[test]
    fn test_decode_logs() {
        let frame = unit::encode_set_logs(&["boot ok".to_string(), "motor ready".to_string()]);
        assert_eq!(
            decode_frame(4, &frame).event,
            InboundEvent::Logs(vec!["boot ok".to_string(), "motor ready".to_string()])
        );
        assert_eq!(
            decode(4, &[0x00, 0x08]).event,
            InboundEvent::Logs(Vec::new())
        );
    }

    #[test]
    fn test_decode_command_set_clock() {
        let time = ClockTime {
            year: 2370,
            month: 12,
            day: 14,
            hour: 22,
            minute: 20,
            second: 54,
        };
        let frame = ser::encode_set_clock(time);
        assert_eq!(
            decode_command(&frame[HEADER_LEN..]),
            Some(Command::SetClock(time))
        );
    }

    #[test]
    fn test_decode_command_rejects_inbound_ids() {
        assert_eq!(decode_command(&[0x00, 0x02]), None);
        assert_eq!(decode_command(&[0x00, 0x03]), None);
    }

    proptest! {
        #[test]
        fn prop_alert_clamp_law(byte in any::<u8>()) {
            let event = decode(1, &[0x00, 0x09, byte]);
            let expected = (byte as i8).clamp(0, 99) as u8;
            prop_assert_eq!(event.event, InboundEvent::Alert { code: expected });
        }

        #[test]
        fn prop_alert_round_trip(code in 0u8..=99) {
            let frame = ser::encode_alert(code);
            prop_assert_eq!(decode_frame(1, &frame).event, InboundEvent::Alert { code });
        }

        #[test]
        fn prop_mode_round_trip(camera: bool, radar: bool, buzzer: bool, leds: bool) {
            let mode = OperatingMode::new(camera, radar, buzzer, leds);
            let frame = unit::encode_set_mode(mode);
            prop_assert_eq!(decode_frame(1, &frame).event, InboundEvent::Mode(mode));
            prop_assert_eq!(decode_command(&frame[HEADER_LEN..]), Some(Command::SetMode(mode)));
        }

        #[test]
        fn prop_radar_round_trip(detected: bool) {
            let state = if detected { RadarState::Detected } else { RadarState::NotDetected };
            let frame = unit::encode_set_radar(state);
            prop_assert_eq!(decode_frame(1, &frame).event, InboundEvent::Radar(state));
        }

        #[test]
        fn prop_direction_round_trip(value in 0u8..=4) {
            let direction = Direction::try_from(value).unwrap();
            let frame = ser::encode_ask_command(direction);
            prop_assert_eq!(
                decode_command(&frame[HEADER_LEN..]),
                Some(Command::AskCommand(direction))
            );
        }

        #[test]
        fn prop_hex_port_law(port in 1u16..=u16::MAX, a: u8, b: u8, c: u8, d: u8) {
            let frame = ser::encode_setup_info(Ipv4Addr::new(a, b, c, d), port);
            prop_assert_eq!(
                decode_command(&frame[HEADER_LEN..]),
                Some(Command::SetupInfo { ip: [a, b, c, d], port })
            );
        }

        #[test]
        fn prop_decode_never_panics(body in proptest::collection::vec(any::<u8>(), 0..16)) {
            let _ = decode(1, &body);
            let _ = decode_command(&body);
        }
    }
}
