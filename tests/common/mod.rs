#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ilp_service::application::service::PaymentService;
use ilp_service::config::ServiceConfig;
use ilp_service::domain::addressing::LedgerContext;
use ilp_service::domain::ipr::Ipr;
use ilp_service::domain::notification::Notification;
use ilp_service::domain::payment_request::{
    CreateIprRequest, PacketDetails, PacketRequest, PublicHeaders, ReceivedPayment,
};
use ilp_service::domain::ports::{Backend, PaymentProtocol, ReceiverSecret};
use ilp_service::domain::transfer::{Condition, Fulfillment, IncomingTransfer, Packet};
use ilp_service::error::{BackendError, Result, ServiceError};
use ilp_service::infrastructure::in_memory::{InMemoryLedger, LedgerCall};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};

pub const PREFIX: &str = "example.red.";
pub const ACCOUNT_TEMPLATE: &str = "http://example.com/accounts/:name";
pub const ALICE: &str = "http://example.com/accounts/alice";
pub const PAYMENT_ID: &str = "be569853-5ef1-4153-bf17-64477a534f5b";
pub const SECRET: [u8; 32] = [42u8; 32];

const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

/// Packet layer stand-in: the packet is JSON and the fulfillment is derived by mixing
/// the secret with the packet bytes. The condition is the reversed fulfillment.
pub struct FakeProtocol;

#[derive(Serialize, Deserialize)]
struct FakePacket {
    address: String,
    amount: Decimal,
    headers: PublicHeaders,
    data: Vec<u8>,
}

impl FakeProtocol {
    pub fn fulfillment(packet: &[u8], secret: &ReceiverSecret) -> Fulfillment {
        let secret = secret.as_bytes();
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let p = if packet.is_empty() { 0 } else { packet[i % packet.len()] };
            let s = if secret.is_empty() { 0 } else { secret[i % secret.len()] };
            *byte = p ^ s ^ i as u8;
        }
        Fulfillment(bytes)
    }

    pub fn condition(fulfillment: &Fulfillment) -> Condition {
        let mut bytes = fulfillment.0;
        bytes.reverse();
        Condition(bytes)
    }

    pub fn packet(address: &str, amount: Decimal, headers: PublicHeaders, data: &[u8]) -> Packet {
        let packet = FakePacket {
            address: address.to_string(),
            amount,
            headers,
            data: data.to_vec(),
        };
        Packet(serde_json::to_vec(&packet).unwrap())
    }

    fn decode(packet: &Packet) -> Result<FakePacket> {
        serde_json::from_slice(packet.as_bytes())
            .map_err(|e| ServiceError::Protocol(format!("unreadable packet: {e}")))
    }
}

impl PaymentProtocol for FakeProtocol {
    fn create_request(&self, request: &PacketRequest, secret: &ReceiverSecret) -> Result<Ipr> {
        let packet = Self::packet(
            &request.destination_address,
            request.destination_amount,
            request.public_headers.clone(),
            request.data.as_deref().unwrap_or_default(),
        );
        let fulfillment = Self::fulfillment(packet.as_bytes(), secret);
        Ok(Ipr::new(Self::condition(&fulfillment), packet))
    }

    fn parse_packet(&self, packet: &Packet) -> Result<PacketDetails> {
        let packet = Self::decode(packet)?;
        Ok(PacketDetails {
            destination_address: packet.address,
            destination_amount: packet.amount,
            public_headers: packet.headers,
        })
    }

    fn open_incoming(
        &self,
        transfer: &IncomingTransfer,
        secret: &ReceiverSecret,
    ) -> Result<ReceivedPayment> {
        let fulfillment = Self::fulfillment(transfer.ilp.as_bytes(), secret);
        if Self::condition(&fulfillment) != transfer.execution_condition {
            return Err(ServiceError::Protocol(
                "condition was not generated by this receiver".to_string(),
            ));
        }
        let packet = Self::decode(&transfer.ilp)?;
        if transfer.amount < packet.amount {
            return Err(ServiceError::Protocol(format!(
                "transfer amount {} is less than requested {}",
                transfer.amount, packet.amount
            )));
        }
        Ok(ReceivedPayment {
            public_headers: packet.headers,
            data: packet.data,
            fulfillment,
        })
    }
}

/// Records every notification and answers with a configurable status.
pub struct RecordingBackend {
    notifications: Mutex<Vec<Notification>>,
    count: watch::Sender<usize>,
    reject_prepared: Option<(u16, String)>,
    reject_executed: Option<(u16, String)>,
}

impl RecordingBackend {
    pub fn approving() -> Arc<Self> {
        Arc::new(Self::with(None, None))
    }

    pub fn rejecting_prepared(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self::with(Some((status, body.to_string())), None))
    }

    pub fn rejecting_executed(status: u16, body: &str) -> Arc<Self> {
        Arc::new(Self::with(None, Some((status, body.to_string()))))
    }

    fn with(reject_prepared: Option<(u16, String)>, reject_executed: Option<(u16, String)>) -> Self {
        Self {
            notifications: Mutex::new(Vec::new()),
            count: watch::channel(0).0,
            reject_prepared,
            reject_executed,
        }
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }

    pub async fn wait_for_notifications(&self, n: usize) {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for notifications")
            .unwrap();
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), BackendError> {
        let mut notifications = self.notifications.lock().await;
        notifications.push(notification.clone());
        self.count.send_replace(notifications.len());

        let rejection = match notification.fulfillment {
            None => &self.reject_prepared,
            Some(_) => &self.reject_executed,
        };
        match rejection {
            Some((status, body)) => Err(BackendError::Rejected {
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

pub fn ledger() -> InMemoryLedger {
    InMemoryLedger::new(PREFIX, LedgerContext::new(ACCOUNT_TEMPLATE, 2))
}

pub fn secret() -> ReceiverSecret {
    ReceiverSecret::new(SECRET.to_vec())
}

pub fn config() -> ServiceConfig {
    use base64::Engine;
    ServiceConfig {
        secret: Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(SECRET)),
        ilp_prefix: Some(PREFIX.to_string()),
        backend_url: Some("http://localhost:1".to_string()),
        ..ServiceConfig::default()
    }
}

pub async fn service(
    config: &ServiceConfig,
    ledger: &InMemoryLedger,
    backend: Arc<RecordingBackend>,
) -> PaymentService {
    PaymentService::connect(
        config,
        Arc::new(ledger.clone()),
        Arc::new(FakeProtocol),
        backend,
    )
    .await
    .unwrap()
}

pub fn create_request(payment_id: &str, account: &str, amount: &str) -> CreateIprRequest {
    CreateIprRequest {
        payment_id: Some(payment_id.to_string()),
        destination_account: Some(account.to_string()),
        destination_amount: Some(amount.to_string()),
        expires_at: Some((Utc::now() + Duration::seconds(30)).to_rfc3339()),
        data: None,
    }
}

/// The transfer a sender would prepare for an encoded payment request.
pub fn incoming_for(ipr: &str, id: &str, from: &str, to: &str, amount: Decimal) -> IncomingTransfer {
    let ipr = Ipr::from_base64url(ipr).unwrap();
    IncomingTransfer {
        id: id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        amount,
        ilp: ipr.packet,
        execution_condition: ipr.condition,
        expires_at: Some(Utc::now() + Duration::seconds(10)),
    }
}

/// A transfer locked by a condition this receiver can fulfill, with arbitrary headers.
pub fn signed_incoming(headers: PublicHeaders, data: &[u8], to: &str, amount: Decimal) -> IncomingTransfer {
    let packet = FakeProtocol::packet(to, amount, headers, data);
    let fulfillment = FakeProtocol::fulfillment(packet.as_bytes(), &secret());
    IncomingTransfer {
        id: "6a6b1c4e-3b1e-4c8f-9b52-5a0a3c2e9d11".to_string(),
        from: "example.red.bob".to_string(),
        to: to.to_string(),
        amount,
        ilp: packet,
        execution_condition: FakeProtocol::condition(&fulfillment),
        expires_at: None,
    }
}

pub async fn wait_for_calls(ledger: &InMemoryLedger, n: usize) -> Vec<LedgerCall> {
    let mut rx = ledger.watch_calls();
    tokio::time::timeout(WAIT, rx.wait_for(|count| *count >= n))
        .await
        .expect("timed out waiting for ledger calls")
        .unwrap();
    ledger.calls().await
}

/// Gives spawned pipelines a chance to run when asserting that nothing happens.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}
