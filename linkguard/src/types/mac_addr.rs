//! Hardware (MAC) address of an access point client.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// 48-bit IEEE 802 hardware address.
///
/// Used as the unique key of an associated access point client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid MAC address: {0:?}")]
pub struct ParseMacError(String);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Parse the colon (or dash) separated form, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = ParseMacError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("aa:bb:cc:dd:ee:ff", [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff] ; "lowercase colons")]
    #[test_case("AA:BB:CC:01:02:03", [0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03] ; "uppercase")]
    #[test_case("00-11-22-33-44-55", [0x00, 0x11, 0x22, 0x33, 0x44, 0x55] ; "dashes")]
    #[test_case(
        " 00:11:22:33:44:55\n",
        [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]
        ; "surrounding whitespace"
    )]
    fn test_parse_valid(input: &str, expected: [u8; 6]) {
        assert_eq!(input.parse::<MacAddr>().unwrap().octets(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("aa:bb:cc:dd:ee" ; "too short")]
    #[test_case("aa:bb:cc:dd:ee:ff:00" ; "too long")]
    #[test_case("aa:bb:cc:dd:ee:gg" ; "not hex")]
    #[test_case("a:bb:cc:dd:ee:ff" ; "single digit octet")]
    #[test_case("+a:bb:cc:dd:ee:ff" ; "sign prefix")]
    #[test_case("aa:bb:cc:dd:ee:-f" ; "minus sign")]
    fn test_parse_invalid(input: &str) {
        assert!(input.parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_display_is_lowercase_colon_form() {
        let mac = MacAddr::new([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "de:ad:be:ef:00:01");
    }
}
