//! Pre-shared authorization code.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Numeric secret a remote must present before the daemon trusts it.
///
/// On the wire the code travels as its decimal numeral, and the daemon
/// compares that numeral byte for byte: `"0042"` does not match code `42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationCode(u32);

impl AuthorizationCode {
    #[must_use]
    pub fn new(code: u32) -> Self {
        Self(code)
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Handshake payload for this code.
    pub fn to_wire(self) -> Vec<u8> {
        self.0.to_string().into_bytes()
    }

    /// Whether a handshake payload presents exactly this code.
    pub fn matches(self, payload: &[u8]) -> bool {
        payload == self.to_wire().as_slice()
    }
}

impl From<u32> for AuthorizationCode {
    fn from(code: u32) -> Self {
        Self(code)
    }
}

impl FromStr for AuthorizationCode {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TypesError::InvalidAuthorizationCode(s.to_string()));
        }
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| TypesError::InvalidAuthorizationCode(s.to_string()))
    }
}

impl std::fmt::Display for AuthorizationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_numeral() {
        let code = AuthorizationCode::new(31337);
        assert!(code.matches(b"31337"));
        assert!(!code.matches(b"31338"));
        assert!(!code.matches(b"031337"));
        assert!(!code.matches(b"31337 "));
        assert!(!code.matches(b""));
    }

    #[test]
    fn parse_rejects_non_digits() {
        assert_eq!("12".parse::<AuthorizationCode>().unwrap(), AuthorizationCode::new(12));
        assert!("-12".parse::<AuthorizationCode>().is_err());
        assert!("+12".parse::<AuthorizationCode>().is_err());
        assert!("".parse::<AuthorizationCode>().is_err());
        assert!("99999999999".parse::<AuthorizationCode>().is_err());
    }

    #[test]
    fn wire_form_is_decimal() {
        assert_eq!(AuthorizationCode::new(7).to_wire(), b"7".to_vec());
    }
}
