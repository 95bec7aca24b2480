//! Application message payloads.
//!
//! A [`Message`] is an opaque byte payload. The transport never looks inside
//! it beyond making sure it cannot contain [`DELIMITER`], which terminates
//! every message on the wire. Payloads are compact JSON in practice.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TypesError;

/// Byte that terminates a message on the wire.
///
/// Compact JSON escapes every control character inside strings and emits no
/// whitespace between tokens, so a JSON payload never contains it.
pub const DELIMITER: u8 = b'\n';

/// One framed application message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Message(Vec<u8>);

impl Message {
    /// Wrap raw bytes, rejecting payloads that contain the delimiter.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, TypesError> {
        let bytes = bytes.into();
        if let Some(offset) = bytes.iter().position(|&b| b == DELIMITER) {
            return Err(TypesError::DelimiterInPayload { offset });
        }
        Ok(Self(bytes))
    }

    /// Wrap bytes the framer split off a stream. They never hold the
    /// delimiter, so no scan is repeated.
    pub fn from_frame(bytes: Vec<u8>) -> Self {
        debug_assert!(!bytes.contains(&DELIMITER));
        Self(bytes)
    }

    /// Serialize a value as compact JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, TypesError> {
        Ok(Self(serde_json::to_vec(value)?))
    }

    /// Build a `cmd {json}` command line, the request format tournament
    /// hosts understand.
    pub fn command<T: Serialize + ?Sized>(cmd: &str, args: &T) -> Result<Self, TypesError> {
        let mut bytes = cmd.as_bytes().to_vec();
        bytes.push(b' ');
        serde_json::to_writer(&mut bytes, args)?;
        Self::new(bytes)
    }

    /// Decode the payload as JSON.
    pub fn to_json<T: DeserializeOwned>(&self) -> Result<T, TypesError> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl TryFrom<&str> for Message {
    type Error = TypesError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s.as_bytes())
    }
}

impl TryFrom<String> for Message {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_embedded_delimiter() {
        let err = Message::new(b"one\ntwo".to_vec()).unwrap_err();
        assert!(matches!(err, TypesError::DelimiterInPayload { offset: 3 }));
    }

    #[test]
    fn json_escapes_newlines() {
        let msg = Message::json(&json!({"note": "line one\nline two"})).unwrap();
        assert!(!msg.as_bytes().contains(&DELIMITER));
        let back: serde_json::Value = msg.to_json().unwrap();
        assert_eq!(back["note"], "line one\nline two");
    }

    #[test]
    fn command_line_format() {
        let msg = Message::command("check_authorized", &json!({"authenticate": 1234})).unwrap();
        assert_eq!(msg.as_str(), Some(r#"check_authorized {"authenticate":1234}"#));
    }

    #[test]
    fn empty_message_is_valid() {
        let msg = Message::new(Vec::new()).unwrap();
        assert!(msg.is_empty());
    }
}
