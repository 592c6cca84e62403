//! Interledger payment request (IPR) codec.
//!
//! An encoded request is `version (0x02) || condition (32 bytes) || packet`, where the
//! packet is an OER variable-length octet string. The binary form travels as base64url
//! without padding.

use super::transfer::{Condition, Packet, base64url, decode_base64url};
use thiserror::Error;

pub const IPR_VERSION: u8 = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IprError {
    #[error("contains invalid base64url")]
    InvalidBase64,
    #[error("is empty")]
    Empty,
    #[error("has unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("is truncated")]
    Truncated,
    #[error("has {0} trailing bytes")]
    TrailingBytes(usize),
}

/// A packet together with the condition it is locked by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipr {
    pub condition: Condition,
    pub packet: Packet,
}

impl Ipr {
    pub fn new(condition: Condition, packet: Packet) -> Self {
        Self { condition, packet }
    }

    pub fn encode(&self) -> Vec<u8> {
        let packet = self.packet.as_bytes();
        let mut out = Vec::with_capacity(1 + 32 + 5 + packet.len());
        out.push(IPR_VERSION);
        out.extend_from_slice(self.condition.as_bytes());
        write_length_prefix(&mut out, packet.len());
        out.extend_from_slice(packet);
        out
    }

    pub fn to_base64url(&self) -> String {
        base64url(&self.encode())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IprError> {
        let (&version, rest) = bytes.split_first().ok_or(IprError::Empty)?;
        if version != IPR_VERSION {
            return Err(IprError::UnsupportedVersion(version));
        }
        if rest.len() < 32 {
            return Err(IprError::Truncated);
        }
        let (condition, rest) = rest.split_at(32);
        let condition = Condition::from_slice(condition).ok_or(IprError::Truncated)?;

        let (length, rest) = read_length_prefix(rest)?;
        if rest.len() < length {
            return Err(IprError::Truncated);
        }
        if rest.len() > length {
            return Err(IprError::TrailingBytes(rest.len() - length));
        }

        Ok(Self {
            condition,
            packet: Packet(rest.to_vec()),
        })
    }

    pub fn from_base64url(encoded: &str) -> Result<Self, IprError> {
        let bytes = decode_base64url(encoded).ok_or(IprError::InvalidBase64)?;
        Self::decode(&bytes)
    }
}

fn write_length_prefix(out: &mut Vec<u8>, length: usize) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }
    let bytes = length.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn read_length_prefix(input: &[u8]) -> Result<(usize, &[u8]), IprError> {
    let (&first, rest) = input.split_first().ok_or(IprError::Truncated)?;
    if first & 0x80 == 0 {
        return Ok((first as usize, rest));
    }

    let count = (first & 0x7f) as usize;
    if count == 0 || count > std::mem::size_of::<usize>() || rest.len() < count {
        return Err(IprError::Truncated);
    }
    let (length_bytes, rest) = rest.split_at(count);
    let length = length_bytes
        .iter()
        .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
    Ok((length, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONDITION: &str = "itnG8nDowV8Q5VJ6hwEhc5R61oiSNQggmxI8NvF6PhI";
    const PACKET: &str = "RQCmfP2QT9C0gQAodzPuDl1it4lAL2tnec6ehWENIoA";
    const ENCODED: &str =
        "AorZxvJw6MFfEOVSeocBIXOUetaIkjUIIJsSPDbxej4SIEUApnz9kE_QtIEAKHcz7g5dYreJQC9rZ3nOnoVhDSKA";

    fn fixture() -> Ipr {
        Ipr::new(
            CONDITION.parse().unwrap(),
            Packet(decode_base64url(PACKET).unwrap()),
        )
    }

    #[test]
    fn test_encode_known_request() {
        assert_eq!(fixture().to_base64url(), ENCODED);
    }

    #[test]
    fn test_decode_known_request() {
        assert_eq!(Ipr::from_base64url(ENCODED).unwrap(), fixture());
    }

    #[test]
    fn test_long_packet_uses_multi_byte_length() {
        let ipr = Ipr::new(Condition([1u8; 32]), Packet(vec![9u8; 300]));
        let encoded = ipr.encode();
        assert_eq!(&encoded[33..36], &[0x82, 0x01, 0x2c]);
        assert_eq!(Ipr::decode(&encoded).unwrap(), ipr);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert_eq!(Ipr::decode(&[]), Err(IprError::Empty));
        assert_eq!(Ipr::decode(&[1u8; 40]), Err(IprError::UnsupportedVersion(1)));
        assert_eq!(Ipr::decode(&[2u8; 10]), Err(IprError::Truncated));
        assert_eq!(
            Ipr::from_base64url("not*base64"),
            Err(IprError::InvalidBase64)
        );

        let mut encoded = fixture().encode();
        encoded.push(0);
        assert_eq!(Ipr::decode(&encoded), Err(IprError::TrailingBytes(1)));
    }
}
