use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Encodes bytes as base64url without padding.
pub fn base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes base64url, tolerating trailing padding.
pub fn decode_base64url(input: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('=')).ok()
}

macro_rules! digest_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; 32]>::try_from(bytes).ok().map(Self)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&base64url(&self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_base64url(s)
                    .and_then(|bytes| Self::from_slice(&bytes))
                    .ok_or_else(|| format!("{} is not a base64url 32-byte value", s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

digest_type!(
    /// Execution condition: the hash lock a transfer is prepared against.
    Condition
);

digest_type!(
    /// Preimage of a [`Condition`]; releasing it executes the transfer.
    Fulfillment
);

/// Opaque ILP packet carried by a transfer.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Packet(pub Vec<u8>);

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet({})", base64url(&self.0))
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64url(&self.0))
    }
}

impl<'de> Deserialize<'de> for Packet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        decode_base64url(&raw)
            .map(Packet)
            .ok_or_else(|| serde::de::Error::custom("packet is not base64url"))
    }
}

/// A conditional transfer prepared towards one of our accounts.
///
/// Owned by the ledger; the service only reacts to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingTransfer {
    pub id: String,
    /// ILP address of the sending account.
    pub from: String,
    /// ILP address of the receiving account.
    pub to: String,
    pub amount: Decimal,
    pub ilp: Packet,
    pub execution_condition: Condition,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A transfer submitted by the sender side towards a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingTransfer {
    /// Equal to the payment id so terminal events can be correlated.
    pub id: String,
    pub to: String,
    pub amount: Decimal,
    pub condition: Condition,
    pub ilp: Packet,
    pub expires_at: DateTime<Utc>,
}

/// Events emitted by a ledger plugin.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    IncomingPrepare(IncomingTransfer),
    OutgoingFulfill {
        transfer: OutgoingTransfer,
        fulfillment: Fulfillment,
    },
    OutgoingCancel {
        transfer: OutgoingTransfer,
    },
    OutgoingReject {
        transfer: OutgoingTransfer,
        rejection_message: serde_json::Value,
    },
}
