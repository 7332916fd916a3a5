// ── Device identity ──
//
// Devices are keyed by hardware address. The firmware reports it in upper
// case, operators type it in whatever case they like, and the store keys
// on the lower-cased form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated or dash-separated hex in any case.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw.as_ref().trim().to_lowercase().replace('-', ":");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<String> for MacAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for MacAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mac_address_normalizes_dashes() {
        let mac = MacAddress::new("AA-BB-CC-DD-EE-FF");
        assert_eq!(mac.as_str(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_address_normalizes_case() {
        let mac = MacAddress::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(mac, MacAddress::new("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn mac_address_from_str() {
        let mac: MacAddress = "DC-4F-22-3A-5F-1C".parse().unwrap();
        assert_eq!(mac.to_string(), "dc:4f:22:3a:5f:1c");
    }

    #[test]
    fn mac_address_deserializes_normalized() {
        let mac: MacAddress = serde_json::from_str(r#""DC:4F:22:3A:5F:1C""#).unwrap();
        assert_eq!(mac.as_str(), "dc:4f:22:3a:5f:1c");
        assert_eq!(serde_json::to_string(&mac).unwrap(), r#""dc:4f:22:3a:5f:1c""#);
    }
}
