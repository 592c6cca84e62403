use super::addressing::{parse_amount, parse_payment_id};
use super::transfer::Fulfillment;
use crate::error::{Result, ServiceError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Public header carrying the payment correlation key.
pub const PAYMENT_ID_HEADER: &str = "Payment-Id";

/// Packet headers readable without decrypting the packet body.
///
/// Header names are case-insensitive; the wire form is lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicHeaders(BTreeMap<String, String>);

impl PublicHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payment_id(payment_id: Uuid) -> Self {
        let mut headers = Self::new();
        headers.insert(PAYMENT_ID_HEADER, payment_id.to_string());
        headers
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Reads and validates the `Payment-Id` header.
    pub fn payment_id(&self) -> Result<Uuid> {
        let raw = self
            .get(PAYMENT_ID_HEADER)
            .ok_or_else(|| ServiceError::validation("missing public header Payment-Id"))?;
        parse_payment_id(raw)
            .ok_or_else(|| ServiceError::validation("public header Payment-Id is an invalid uuid"))
    }
}

/// Everything the packet layer needs to build a payment request.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRequest {
    pub destination_address: String,
    /// Ledger-native (scaled) amount.
    pub destination_amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub public_headers: PublicHeaders,
    pub data: Option<Vec<u8>>,
}

/// The readable parts of a packet.
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDetails {
    pub destination_address: String,
    pub destination_amount: Decimal,
    pub public_headers: PublicHeaders,
}

/// What the packet layer recovers from an incoming transfer it can fulfill.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPayment {
    pub public_headers: PublicHeaders,
    pub data: Vec<u8>,
    pub fulfillment: Fulfillment,
}

/// Application data attached to a payment, parsed on a best-effort basis.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationData {
    Parsed(serde_json::Value),
    Absent,
}

impl ApplicationData {
    /// Anything that is not valid JSON counts as absent; it never fails a payment.
    pub fn parse(raw: &[u8]) -> Self {
        if raw.is_empty() {
            return Self::Absent;
        }
        match serde_json::from_slice(raw) {
            Ok(value) => Self::Parsed(value),
            Err(_) => Self::Absent,
        }
    }

    pub fn into_option(self) -> Option<serde_json::Value> {
        match self {
            Self::Parsed(value) => Some(value),
            Self::Absent => None,
        }
    }
}

/// Body of a create-request call, as received from the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIprRequest {
    pub payment_id: Option<String>,
    pub destination_account: Option<String>,
    pub destination_amount: Option<String>,
    pub expires_at: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIprResponse {
    pub ipr: String,
}

/// A validated payment request. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRequest {
    pub payment_id: Uuid,
    pub destination_account: String,
    /// Amount as supplied by the caller, before ledger scaling.
    pub destination_amount: Decimal,
    pub expires_at: DateTime<Utc>,
    pub data: Option<serde_json::Value>,
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::validation(format!("missing JSON body field {name}")))
}

impl PaymentRequest {
    pub fn validate(request: CreateIprRequest, now: DateTime<Utc>) -> Result<Self> {
        let raw_id = required(&request.payment_id, "paymentId")?;
        let payment_id = parse_payment_id(raw_id).ok_or_else(|| {
            ServiceError::validation(format!("paymentId ({raw_id}) is an invalid uuid"))
        })?;

        let raw_expiry = required(&request.expires_at, "expiresAt")?;
        let expires_at = DateTime::parse_from_rfc3339(raw_expiry)
            .map_err(|_| {
                ServiceError::validation(format!(
                    "expiresAt ({raw_expiry}) is an invalid ISO-8601 timestamp"
                ))
            })?
            .with_timezone(&Utc);
        if expires_at <= now {
            return Err(ServiceError::validation(format!(
                "expiresAt ({raw_expiry}) is in the past"
            )));
        }

        let destination_account = required(&request.destination_account, "destinationAccount")?;

        let raw_amount = required(&request.destination_amount, "destinationAmount")?;
        let destination_amount = parse_amount(raw_amount).ok_or_else(|| {
            ServiceError::validation(format!(
                "destinationAmount ({raw_amount}) is an invalid decimal amount"
            ))
        })?;

        Ok(Self {
            payment_id,
            destination_account: destination_account.to_string(),
            destination_amount,
            expires_at,
            data: request.data,
        })
    }
}
