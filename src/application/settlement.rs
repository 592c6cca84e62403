use crate::domain::addressing::{is_base64url, parse_amount};
use crate::domain::ipr::Ipr;
use crate::domain::payment_request::PAYMENT_ID_HEADER;
use crate::domain::ports::{LedgerFactoryRef, PaymentProtocolRef};
use crate::domain::transfer::{Fulfillment, LedgerEvent, OutgoingTransfer};
use crate::error::{Result, ServiceError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};

/// Body of a pay call, as received from the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayIprRequest {
    pub ipr: Option<String>,
    pub source_amount: Option<String>,
    pub source_account: Option<String>,
    pub connector_account: Option<String>,
    /// Seconds, as a number or a numeric string.
    pub source_expiry_duration: Option<serde_json::Value>,
}

/// Terminal disposition of an outgoing transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SettlementOutcome {
    Executed {
        fulfillment: Fulfillment,
    },
    Expired,
    Rejected {
        #[serde(rename = "rejectionMessage")]
        rejection_message: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub connector_account: String,
    pub payment_id: String,
    #[serde(flatten)]
    pub outcome: SettlementOutcome,
}

#[derive(Debug)]
struct PayOrder {
    ipr: Ipr,
    source_amount: Decimal,
    source_account: String,
    connector_account: String,
    expires_at: DateTime<Utc>,
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::validation(format!("missing JSON body field {name}")))
}

fn parse_duration(raw: &serde_json::Value) -> Option<chrono::Duration> {
    let seconds = match raw {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    chrono::Duration::try_milliseconds((seconds * 1000.0).round() as i64)
}

impl PayOrder {
    fn validate(request: PayIprRequest, now: DateTime<Utc>) -> Result<Self> {
        let raw_amount = required(&request.source_amount, "sourceAmount")?;
        let source_amount = parse_amount(raw_amount).ok_or_else(|| {
            ServiceError::validation(format!(
                "sourceAmount ({raw_amount}) is an invalid decimal amount"
            ))
        })?;

        let raw_ipr = required(&request.ipr, "ipr")?;
        if !is_base64url(raw_ipr) {
            return Err(ServiceError::validation(format!(
                "ipr ({raw_ipr}) contains invalid base64url."
            )));
        }
        let ipr = Ipr::from_base64url(raw_ipr)
            .map_err(|e| ServiceError::validation(format!("ipr ({raw_ipr}) {e}")))?;

        let raw_duration = request
            .source_expiry_duration
            .as_ref()
            .filter(|value| !value.is_null())
            .ok_or_else(|| ServiceError::validation("missing JSON body field sourceExpiryDuration"))?;
        let expiry = parse_duration(raw_duration).ok_or_else(|| {
            ServiceError::validation(format!(
                "sourceExpiryDuration ({raw_duration}) must be parseable to a valid number"
            ))
        })?;
        let expires_at = now.checked_add_signed(expiry).ok_or_else(|| {
            ServiceError::validation(format!(
                "sourceExpiryDuration ({raw_duration}) is out of range"
            ))
        })?;

        let connector_account = required(&request.connector_account, "connectorAccount")?;
        let source_account = required(&request.source_account, "sourceAccount")?;

        Ok(Self {
            ipr,
            source_amount,
            source_account: source_account.to_string(),
            connector_account: connector_account.to_string(),
            expires_at,
        })
    }
}

/// Pays encoded payment requests and reports how each transfer ended.
pub struct SettlementTracker {
    prefix: String,
    factory: LedgerFactoryRef,
    protocol: PaymentProtocolRef,
}

impl SettlementTracker {
    pub fn new(
        prefix: impl Into<String>,
        factory: LedgerFactoryRef,
        protocol: PaymentProtocolRef,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            factory,
            protocol,
        }
    }

    /// Submits a transfer for `request` and waits for its first terminal event.
    ///
    /// The transfer id is the payment id from the request's public headers, which makes
    /// retries of the same request idempotent on the ledger.
    pub async fn pay(&self, request: PayIprRequest) -> Result<PaymentResult> {
        let order = PayOrder::validate(request, Utc::now())?;
        let context = self.factory.context();

        let source_username = context
            .account_to_username(&order.source_account)
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "sourceAccount ({}) cannot be parsed to an ILP address with {}",
                    order.source_account, context.account_template
                ))
            })?;
        let connector_username = context
            .account_to_username(&order.connector_account)
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "connectorAccount ({}) cannot be parsed to an ILP address with {}",
                    order.connector_account, context.account_template
                ))
            })?;
        let connector_address = format!("{}{}", self.prefix, connector_username);

        let details = self
            .protocol
            .parse_packet(&order.ipr.packet)
            .map_err(|e| ServiceError::validation(format!("IPR packet cannot be parsed: {e}")))?;
        let payment_id = details
            .public_headers
            .get(PAYMENT_ID_HEADER)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ServiceError::validation("IPR packet public headers are missing payment-id")
            })?
            .to_string();

        let plugin = self.factory.create(&source_username).await?;
        // Subscribe before sending so a fast terminal event cannot be missed.
        let events = plugin.subscribe();

        let transfer = OutgoingTransfer {
            id: payment_id.clone(),
            to: connector_address,
            amount: order.source_amount,
            condition: order.ipr.condition,
            ilp: order.ipr.packet,
            expires_at: order.expires_at,
        };
        info!(
            %payment_id,
            to = %transfer.to,
            amount = %transfer.amount,
            "sending outgoing transfer"
        );
        plugin.send_transfer(transfer).await?;

        let outcome = await_settlement(events, &payment_id).await?;
        debug!(%payment_id, ?outcome, "outgoing transfer settled");

        Ok(PaymentResult {
            connector_account: order.connector_account,
            payment_id,
            outcome,
        })
    }
}

/// Maps an event to a terminal outcome when it concerns `transfer_id`.
fn terminal_outcome(event: LedgerEvent, transfer_id: &str) -> Option<SettlementOutcome> {
    match event {
        LedgerEvent::OutgoingFulfill {
            transfer,
            fulfillment,
        } if transfer.id == transfer_id => Some(SettlementOutcome::Executed { fulfillment }),
        LedgerEvent::OutgoingCancel { transfer } if transfer.id == transfer_id => {
            Some(SettlementOutcome::Expired)
        }
        LedgerEvent::OutgoingReject {
            transfer,
            rejection_message,
        } if transfer.id == transfer_id => Some(SettlementOutcome::Rejected { rejection_message }),
        _ => None,
    }
}

/// Resolves on the first fulfill, cancel or reject event for `transfer_id`.
///
/// Events for other transfers are skipped. The receiver is consumed, so every
/// subscription ends with the first terminal event.
///
/// Falling behind the ledger is fatal: the dropped events may include the terminal one,
/// and nothing else would ever resolve the wait.
pub async fn await_settlement(
    mut events: broadcast::Receiver<LedgerEvent>,
    transfer_id: &str,
) -> Result<SettlementOutcome> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                error!(transfer_id, skipped, "settlement tracker fell behind ledger events");
                return Err(ServiceError::Ledger(format!(
                    "settlement events lagged for {transfer_id}"
                )));
            }
            Err(RecvError::Closed) => return Err(ServiceError::LedgerClosed),
        };

        if let Some(outcome) = terminal_outcome(event, transfer_id) {
            return Ok(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transfer::{Condition, Packet};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn transfer(id: &str) -> OutgoingTransfer {
        OutgoingTransfer {
            id: id.to_string(),
            to: "example.red.connie".to_string(),
            amount: dec!(1000),
            condition: Condition([1u8; 32]),
            ilp: Packet(vec![1, 2, 3]),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ignores_unrelated_transfers() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(LedgerEvent::OutgoingCancel {
            transfer: transfer("other"),
        })
        .unwrap();
        tx.send(LedgerEvent::OutgoingReject {
            transfer: transfer("tracked"),
            rejection_message: json!({"reason": "rejected"}),
        })
        .unwrap();

        let outcome = await_settlement(rx, "tracked").await.unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::Rejected {
                rejection_message: json!({"reason": "rejected"})
            }
        );
    }

    #[tokio::test]
    async fn test_first_terminal_event_wins() {
        let (tx, rx) = broadcast::channel(16);
        let fulfillment = Fulfillment([9u8; 32]);
        tx.send(LedgerEvent::OutgoingFulfill {
            transfer: transfer("tracked"),
            fulfillment,
        })
        .unwrap();
        tx.send(LedgerEvent::OutgoingCancel {
            transfer: transfer("tracked"),
        })
        .unwrap();

        let outcome = await_settlement(rx, "tracked").await.unwrap();
        assert_eq!(outcome, SettlementOutcome::Executed { fulfillment });
        // The subscription is gone once the outcome is reported.
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_behind_the_ledger_is_an_error() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(LedgerEvent::OutgoingCancel {
            transfer: transfer("tracked"),
        })
        .unwrap();
        for _ in 0..20 {
            tx.send(LedgerEvent::OutgoingCancel {
                transfer: transfer("other"),
            })
            .unwrap();
        }

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            await_settlement(rx, "tracked"),
        )
        .await
        .expect("lag must resolve the wait");
        assert!(matches!(
            result,
            Err(ServiceError::Ledger(message)) if message == "settlement events lagged for tracked"
        ));
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let (tx, rx) = broadcast::channel::<LedgerEvent>(16);
        drop(tx);
        assert!(matches!(
            await_settlement(rx, "tracked").await,
            Err(ServiceError::LedgerClosed)
        ));
    }

    #[test]
    fn test_result_serialization() {
        let result = PaymentResult {
            connector_account: "http://example.com/accounts/connie".to_string(),
            payment_id: "be569853-5ef1-4153-bf17-64477a534f5b".to_string(),
            outcome: SettlementOutcome::Rejected {
                rejection_message: json!({"reason": "rejected"}),
            },
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "connectorAccount": "http://example.com/accounts/connie",
                "paymentId": "be569853-5ef1-4153-bf17-64477a534f5b",
                "status": "rejected",
                "rejectionMessage": {"reason": "rejected"}
            })
        );

        let expired = PaymentResult {
            outcome: SettlementOutcome::Expired,
            ..result
        };
        assert_eq!(serde_json::to_value(&expired).unwrap()["status"], "expired");
    }

    #[test]
    fn test_pay_order_validation_messages() {
        let valid = PayIprRequest {
            ipr: Some(Ipr::new(Condition([1u8; 32]), Packet(vec![1])).to_base64url()),
            source_amount: Some("1000".to_string()),
            source_account: Some("http://example.com/accounts/bob".to_string()),
            connector_account: Some("http://example.com/accounts/connie".to_string()),
            source_expiry_duration: Some(json!("10")),
        };
        let now = Utc::now();
        assert!(PayOrder::validate(valid.clone(), now).is_ok());

        let message =
            |request: PayIprRequest| PayOrder::validate(request, now).unwrap_err().to_string();

        let mut req = valid.clone();
        req.ipr = None;
        assert_eq!(message(req), "missing JSON body field ipr");

        let mut req = valid.clone();
        req.ipr = Some("abc+/".to_string());
        assert_eq!(message(req), "ipr (abc+/) contains invalid base64url.");

        let mut req = valid.clone();
        req.source_amount = None;
        assert_eq!(message(req), "missing JSON body field sourceAmount");

        let mut req = valid.clone();
        req.source_expiry_duration = None;
        assert_eq!(message(req), "missing JSON body field sourceExpiryDuration");

        let mut req = valid.clone();
        req.source_expiry_duration = Some(json!("soon"));
        assert!(message(req).contains("must be parseable to a valid number"));

        let mut req = valid.clone();
        req.connector_account = None;
        assert_eq!(message(req), "missing JSON body field connectorAccount");

        let mut req = valid.clone();
        req.source_expiry_duration = Some(json!(1e18));
        let out_of_range = message(req);
        assert!(out_of_range.starts_with("sourceExpiryDuration ("));
        assert!(out_of_range.ends_with(") is out of range"));

        let mut req = valid;
        req.source_expiry_duration = Some(json!(2.5));
        assert_eq!(
            PayOrder::validate(req, now).unwrap().expires_at,
            now + chrono::Duration::milliseconds(2500)
        );
    }
}
