//! Frame encoders.
//!
//! Every encoder is total: it never fails and performs no range checks
//! beyond casting each field to a byte.

use std::net::Ipv4Addr;

use bytes::Bytes;

use crate::{
    error::ProtoError,
    types::{
        ClockTime, Direction, Frame, MAX_PAYLOAD_LEN, MessageId, OperatingMode, RadarState,
        SELECTED, UNSELECTED,
    },
};

fn empty(id: MessageId) -> Bytes {
    Frame::new(id, Bytes::new()).into_bytes()
}

fn with_payload(id: MessageId, payload: &[u8]) -> Bytes {
    Frame::new(id, Bytes::copy_from_slice(payload)).into_bytes()
}

pub fn encode_ask_availability() -> Bytes {
    empty(MessageId::AskAvailability)
}

pub fn encode_ask_command(direction: Direction) -> Bytes {
    with_payload(MessageId::AskCommand, &[direction as u8])
}

pub fn encode_set_selection(selected: bool) -> Bytes {
    let state = if selected { SELECTED } else { UNSELECTED };
    with_payload(MessageId::SetSelection, &[state])
}

pub fn encode_ask_mode() -> Bytes {
    empty(MessageId::AskMode)
}

pub fn encode_set_mode(mode: OperatingMode) -> Bytes {
    with_payload(MessageId::SetMode, &mode.to_wire())
}

pub fn encode_ask_logs() -> Bytes {
    empty(MessageId::AskLogs)
}

pub fn encode_alert(code: u8) -> Bytes {
    with_payload(MessageId::Alert, &[code])
}

pub fn encode_ask_disconnect() -> Bytes {
    empty(MessageId::AskDisconnect)
}

/// The year travels as its two decimal halves: 2023 becomes `20, 23`.
pub fn encode_set_clock(time: ClockTime) -> Bytes {
    let (century, year) = split_year(time.year);
    with_payload(
        MessageId::SetClock,
        &[
            century,
            year,
            time.month,
            time.day,
            time.hour,
            time.minute,
            time.second,
        ],
    )
}

pub fn encode_setup_info(ip: Ipv4Addr, port: u16) -> Bytes {
    let [a, b, c, d] = ip.octets();
    let [high, low] = split_port(port);
    with_payload(MessageId::SetupInfo, &[a, b, c, d, high, low])
}

/// Same as [`encode_setup_info`] for an address still in dotted form.
pub fn encode_setup_info_str(ip: &str, port: u16) -> Result<Bytes, ProtoError> {
    let ip: Ipv4Addr = ip
        .trim()
        .parse()
        .map_err(|_| ProtoError::InvalidAddress(ip.to_string()))?;
    Ok(encode_setup_info(ip, port))
}

pub fn encode_logs_received() -> Bytes {
    empty(MessageId::LogsReceived)
}

/// Frames sent by units. The controller never emits these; they back
/// unit simulators and tests.
pub mod unit {
    use super::*;

    pub fn encode_set_availability() -> Bytes {
        empty(MessageId::SetAvailability)
    }

    pub fn encode_set_mode(mode: OperatingMode) -> Bytes {
        super::encode_set_mode(mode)
    }

    /// Lines are joined with `\n`; output beyond one frame is cut.
    pub fn encode_set_logs(lines: &[String]) -> Bytes {
        let text = lines.join("\n");
        let bytes = text.as_bytes();
        with_payload(MessageId::SetLogs, &bytes[..bytes.len().min(MAX_PAYLOAD_LEN)])
    }

    pub fn encode_alert(code: u8) -> Bytes {
        super::encode_alert(code)
    }

    pub fn encode_ack_disconnection() -> Bytes {
        empty(MessageId::AckDisconnection)
    }

    pub fn encode_set_radar(state: RadarState) -> Bytes {
        let value = match state {
            RadarState::Detected => 1,
            RadarState::NotDetected => 0,
        };
        with_payload(MessageId::SetRadar, &[value])
    }
}

fn split_year(year: u16) -> (u8, u8) {
    ((year / 100) as u8, (year % 100) as u8)
}

/// Split a port through its hexadecimal text: four hex digits, two per byte.
pub fn split_port(port: u16) -> [u8; 2] {
    let hex = format!("{port:04X}");
    // `{:04X}` of a u16 is always exactly four hex digits.
    let high = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
    let low = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
    [high, low]
}

/// Inverse of [`split_port`].
pub fn join_port(bytes: [u8; 2]) -> u16 {
    let hex = format!("{:02X}{:02X}", bytes[0], bytes[1]);
    u16::from_str_radix(&hex, 16).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frames() {
        assert_eq!(&encode_ask_availability()[..], &[0x00, 0x02, 0x00, 0x01]);
        assert_eq!(&encode_ask_mode()[..], &[0x00, 0x02, 0x00, 0x05]);
        assert_eq!(&encode_ask_logs()[..], &[0x00, 0x02, 0x00, 0x07]);
        assert_eq!(&encode_ask_disconnect()[..], &[0x00, 0x02, 0x00, 0x10]);
        assert_eq!(&encode_logs_received()[..], &[0x00, 0x02, 0x00, 0x15]);
    }

    #[test]
    fn test_ask_command() {
        assert_eq!(
            &encode_ask_command(Direction::Right)[..],
            &[0x00, 0x03, 0x00, 0x03, 0x01]
        );
        assert_eq!(
            &encode_ask_command(Direction::Stop)[..],
            &[0x00, 0x03, 0x00, 0x03, 0x04]
        );
    }

    #[test]
    fn test_set_selection() {
        assert_eq!(
            &encode_set_selection(true)[..],
            &[0x00, 0x03, 0x00, 0x04, 0x02]
        );
        assert_eq!(
            &encode_set_selection(false)[..],
            &[0x00, 0x03, 0x00, 0x04, 0x03]
        );
    }

    #[test]
    fn test_set_mode_layout() {
        let frame = encode_set_mode(OperatingMode::new(true, false, true, false));
        assert_eq!(
            &frame[..],
            &[0x00, 0x06, 0x00, 0x06, 0x01, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn test_alert() {
        assert_eq!(&encode_alert(1)[..], &[0x00, 0x03, 0x00, 0x09, 0x01]);
    }

    #[test]
    fn test_set_clock_splits_year() {
        let frame = encode_set_clock(ClockTime {
            year: 2023,
            month: 5,
            day: 13,
            hour: 17,
            minute: 5,
            second: 1,
        });
        assert_eq!(
            &frame[..],
            &[0x00, 0x09, 0x00, 0x13, 20, 23, 5, 13, 17, 5, 1]
        );
    }

    #[test]
    fn test_setup_info() {
        let frame = encode_setup_info(Ipv4Addr::new(127, 23, 1, 52), 12345);
        assert_eq!(
            &frame[..],
            &[0x00, 0x08, 0x00, 0x14, 127, 23, 1, 52, 0x30, 0x39]
        );
    }

    #[test]
    fn test_setup_info_str_rejects_garbage() {
        assert!(encode_setup_info_str("10.0.0.1", 80).is_ok());
        assert!(matches!(
            encode_setup_info_str("10.0.0", 80),
            Err(ProtoError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_split_port_small_values() {
        assert_eq!(split_port(1), [0x00, 0x01]);
        assert_eq!(split_port(255), [0x00, 0xFF]);
        assert_eq!(split_port(0xABCD), [0xAB, 0xCD]);
    }
}
