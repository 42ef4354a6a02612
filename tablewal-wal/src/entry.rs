//! Log entry line format.
//!
//! Every entry occupies exactly one line of a log file:
//!
//! ```text
//! <sequence> <kind> <payload>\n
//! ```
//!
//! `sequence` is a decimal `u64`, `kind` is `1` (insert) or `2` (delete) and
//! `payload` is the JSON encoding of the record. The payload runs to the end of
//! the line and therefore must not contain a line terminator.

use crate::error::WalError;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of mutation recorded by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EntryKind {
    /// Payload holds the full row.
    Insert = 1,
    /// Payload holds enough of the row to find it by primary key.
    Delete = 2,
}

impl EntryKind {
    /// Returns the on-disk code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns a short lowercase name, used for logging and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Insert => "insert",
            EntryKind::Delete => "delete",
        }
    }
}

impl TryFrom<u8> for EntryKind {
    type Error = WalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EntryKind::Insert),
            2 => Ok(EntryKind::Delete),
            _ => Err(WalError::invalid_entry(
                None,
                format!("unknown entry kind: {}", value),
            )),
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parsed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sequence: u64,
    pub kind: EntryKind,
    pub payload: String,
}

impl LogEntry {
    pub fn new(sequence: u64, kind: EntryKind, payload: impl Into<String>) -> Self {
        Self {
            sequence,
            kind,
            payload: payload.into(),
        }
    }

    /// Encodes the entry as a newline-terminated line.
    pub fn encode(&self) -> Result<BytesMut, WalError> {
        encode_line(self.sequence, self.kind, &self.payload)
    }

    /// Parses one line (without its trailing newline).
    ///
    /// When the sequence field is readable but the rest of the line is not, the
    /// error still carries the sequence so callers can keep the global counter
    /// ahead of it.
    pub fn parse(line: &str) -> Result<Self, WalError> {
        let (sequence_field, rest) = match line.split_once(' ') {
            Some((sequence, rest)) => (sequence, Some(rest)),
            None => (line, None),
        };

        let sequence: u64 = sequence_field.parse().map_err(|_| {
            WalError::invalid_entry(
                None,
                format!("invalid sequence number: {:?}", sequence_field),
            )
        })?;

        let rest =
            rest.ok_or_else(|| WalError::invalid_entry(Some(sequence), "missing entry kind"))?;
        let (kind_field, payload) = rest
            .split_once(' ')
            .ok_or_else(|| WalError::invalid_entry(Some(sequence), "missing payload"))?;

        let kind = kind_field
            .parse::<u8>()
            .ok()
            .and_then(|code| EntryKind::try_from(code).ok())
            .ok_or_else(|| {
                WalError::invalid_entry(
                    Some(sequence),
                    format!("unknown entry kind: {:?}", kind_field),
                )
            })?;

        Ok(Self {
            sequence,
            kind,
            payload: payload.to_string(),
        })
    }

    /// Decodes the payload as a JSON record.
    pub fn record(&self) -> Result<Value, WalError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Rejects payloads that would break the one-entry-per-line framing.
pub fn validate_payload(payload: &str) -> Result<(), WalError> {
    if payload.contains(['\n', '\r']) {
        return Err(WalError::InvalidPayload(
            "payload must not contain a line terminator".to_string(),
        ));
    }
    Ok(())
}

/// Encodes `<sequence> <kind> <payload>\n` without building a [`LogEntry`].
pub fn encode_line(sequence: u64, kind: EntryKind, payload: &str) -> Result<BytesMut, WalError> {
    validate_payload(payload)?;

    let sequence = sequence.to_string();
    let mut buf = BytesMut::with_capacity(sequence.len() + payload.len() + 4);
    buf.put_slice(sequence.as_bytes());
    buf.put_u8(b' ');
    buf.put_u8(b'0' + kind.code());
    buf.put_u8(b' ');
    buf.put_slice(payload.as_bytes());
    buf.put_u8(b'\n');

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_line() {
        let buf = encode_line(42, EntryKind::Insert, r#"{"id":1,"name":"a b"}"#).unwrap();
        assert_eq!(&buf[..], b"42 1 {\"id\":1,\"name\":\"a b\"}\n");

        let buf = encode_line(7, EntryKind::Delete, r#"{"id":1}"#).unwrap();
        assert_eq!(&buf[..], b"7 2 {\"id\":1}\n");
    }

    #[test]
    fn test_parse_keeps_spaces_in_payload() {
        let entry = LogEntry::parse(r#"3 1 {"name": "x y z"}"#).unwrap();
        assert_eq!(entry.sequence, 3);
        assert_eq!(entry.kind, EntryKind::Insert);
        assert_eq!(entry.payload, r#"{"name": "x y z"}"#);
        assert_eq!(entry.record().unwrap()["name"], "x y z");
    }

    #[test]
    fn test_parse_empty_payload() {
        let entry = LogEntry::parse("9 2 ").unwrap();
        assert_eq!(entry.kind, EntryKind::Delete);
        assert_eq!(entry.payload, "");
        assert!(entry.record().is_err());
    }

    #[test]
    fn test_parse_reports_sequence_when_rest_is_bad() {
        match LogEntry::parse("15 9 {}") {
            Err(WalError::InvalidEntry { sequence, .. }) => assert_eq!(sequence, Some(15)),
            other => panic!("unexpected: {:?}", other),
        }
        match LogEntry::parse("16") {
            Err(WalError::InvalidEntry { sequence, reason }) => {
                assert_eq!(sequence, Some(16));
                assert!(reason.contains("kind"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        match LogEntry::parse("17 1") {
            Err(WalError::InvalidEntry { sequence, reason }) => {
                assert_eq!(sequence, Some(17));
                assert!(reason.contains("payload"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_bad_sequence() {
        for line in ["", "abc 1 {}", "-3 1 {}", " 1 {}"] {
            match LogEntry::parse(line) {
                Err(WalError::InvalidEntry { sequence, .. }) => assert_eq!(sequence, None),
                other => panic!("unexpected for {:?}: {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_payload_with_newline_rejected() {
        assert!(matches!(
            encode_line(1, EntryKind::Insert, "{\"a\":1}\n2 1 {}"),
            Err(WalError::InvalidPayload(_))
        ));
        assert!(matches!(
            validate_payload("a\rb"),
            Err(WalError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_serde_json_output_is_single_line() {
        let record = serde_json::json!({"text": "line one\nline two"});
        let payload = serde_json::to_string(&record).unwrap();
        assert!(validate_payload(&payload).is_ok());

        let line = encode_line(1, EntryKind::Insert, &payload).unwrap();
        let text = std::str::from_utf8(&line).unwrap();
        let entry = LogEntry::parse(text.trim_end_matches('\n')).unwrap();
        assert_eq!(entry.record().unwrap(), record);
    }

    #[test]
    fn test_entry_kind_conversion() {
        assert_eq!(EntryKind::try_from(1u8).unwrap(), EntryKind::Insert);
        assert_eq!(EntryKind::try_from(2u8).unwrap(), EntryKind::Delete);
        assert!(EntryKind::try_from(0u8).is_err());
        assert!(EntryKind::try_from(3u8).is_err());
        assert_eq!(EntryKind::Delete.to_string(), "delete");
    }

    proptest! {
        #[test]
        fn parse_never_panics(line in "\\PC*") {
            let _ = LogEntry::parse(&line);
        }

        #[test]
        fn parse_accepts_any_single_line_payload(
            sequence in any::<u64>(),
            delete in any::<bool>(),
            payload in "[^\r\n]*",
        ) {
            let kind = if delete { EntryKind::Delete } else { EntryKind::Insert };
            let line = encode_line(sequence, kind, &payload).unwrap();
            let text = std::str::from_utf8(&line[..line.len() - 1]).unwrap();
            let entry = LogEntry::parse(text).unwrap();
            prop_assert_eq!(entry, LogEntry::new(sequence, kind, payload));
        }
    }
}
