use serde::Deserialize;

use crate::{error::RelayError, registry::DEVICE_COUNT};

pub const CMD_TOGGLE: &str = "toggle";
pub const MAX_COMMAND_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Toggle { relay: usize },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    relay: Option<serde_json::Value>,
}

/// Parses one inbound text frame. Unknown fields are ignored.
pub fn parse_command(raw: &[u8]) -> Result<Command, RelayError> {
    if raw.len() > MAX_COMMAND_BYTES {
        return Err(RelayError::MalformedMessage(format!(
            "{} bytes exceeds {MAX_COMMAND_BYTES}",
            raw.len()
        )));
    }

    let envelope: Envelope = serde_json::from_slice(raw)
        .map_err(|err| RelayError::MalformedMessage(err.to_string()))?;

    match envelope.kind.as_str() {
        CMD_TOGGLE => {
            let relay = envelope
                .relay
                .as_ref()
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| {
                    RelayError::MalformedMessage("toggle requires an integer `relay`".to_string())
                })?;

            let index = usize::try_from(relay)
                .ok()
                .filter(|index| *index < DEVICE_COUNT)
                .ok_or(RelayError::OutOfRange { index: relay })?;

            Ok(Command::Toggle { relay: index })
        }
        other => Err(RelayError::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_toggle() {
        assert_eq!(
            parse_command(br#"{"type":"toggle","relay":2}"#),
            Ok(Command::Toggle { relay: 2 })
        );
    }

    #[test]
    fn ignores_extra_fields() {
        assert_eq!(
            parse_command(br#"{"relay":0,"source":"ui","type":"toggle"}"#),
            Ok(Command::Toggle { relay: 0 })
        );
    }

    #[test]
    fn rejects_out_of_range_relays() {
        assert_eq!(
            parse_command(br#"{"type":"toggle","relay":4}"#),
            Err(RelayError::OutOfRange { index: 4 })
        );
        assert_eq!(
            parse_command(br#"{"type":"toggle","relay":-1}"#),
            Err(RelayError::OutOfRange { index: -1 })
        );
    }

    #[test]
    fn unknown_type_is_reported_separately() {
        assert_eq!(
            parse_command(br#"{"type":"dim","relay":1}"#),
            Err(RelayError::UnknownCommand("dim".to_string()))
        );
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let cases: [&[u8]; 5] = [
            b"not json",
            br#"{"relay":1}"#,
            br#"{"type":"toggle"}"#,
            br#"{"type":"toggle","relay":"2"}"#,
            br#"{"type":"toggle","relay":1.5}"#,
        ];

        for raw in cases {
            assert!(
                matches!(parse_command(raw), Err(RelayError::MalformedMessage(_))),
                "expected malformed: {}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let raw = vec![b' '; MAX_COMMAND_BYTES + 1];
        assert!(matches!(
            parse_command(&raw),
            Err(RelayError::MalformedMessage(_))
        ));
    }
}
