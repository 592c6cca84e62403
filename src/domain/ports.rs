use super::addressing::LedgerContext;
use super::ipr::Ipr;
use super::notification::Notification;
use super::payment_request::{PacketDetails, PacketRequest, ReceivedPayment};
use super::transfer::{Fulfillment, IncomingTransfer, LedgerEvent, OutgoingTransfer, Packet};
use crate::error::{BackendError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Secret from which receiving conditions are derived.
///
/// It only authorizes receiving funds, never spending them, which is why one secret can
/// be shared across every account the service listens on.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceiverSecret(Vec<u8>);

impl ReceiverSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ReceiverSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReceiverSecret(<{} bytes>)", self.0.len())
    }
}

/// Per-account ledger capability.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Ledger account URI this plugin acts for.
    fn account(&self) -> &str;

    /// Events for this account. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;

    async fn send_transfer(&self, transfer: OutgoingTransfer) -> Result<()>;

    async fn fulfill_condition(&self, transfer_id: &str, fulfillment: &Fulfillment) -> Result<()>;

    async fn reject_incoming_transfer(&self, transfer_id: &str, reason: &str) -> Result<()>;
}

/// Ledger-wide capability that hands out per-account plugins.
#[async_trait]
pub trait LedgerFactory: Send + Sync {
    fn context(&self) -> &LedgerContext;

    async fn create(&self, username: &str) -> Result<Arc<dyn Plugin>>;

    /// Incoming events for every account on the ledger.
    fn subscribe_all(&self) -> broadcast::Receiver<LedgerEvent>;
}

/// Packet and condition handling.
///
/// Condition/fulfillment derivation lives behind this trait; the service only
/// orchestrates calls to it.
pub trait PaymentProtocol: Send + Sync {
    fn create_request(&self, request: &PacketRequest, secret: &ReceiverSecret) -> Result<Ipr>;

    fn parse_packet(&self, packet: &Packet) -> Result<PacketDetails>;

    /// Recovers headers, data and the fulfillment for a transfer addressed to us.
    fn open_incoming(
        &self,
        transfer: &IncomingTransfer,
        secret: &ReceiverSecret,
    ) -> Result<ReceivedPayment>;
}

/// Remote backend that approves and records payments.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn notify(&self, notification: &Notification) -> std::result::Result<(), BackendError>;
}

pub type PluginRef = Arc<dyn Plugin>;
pub type LedgerFactoryRef = Arc<dyn LedgerFactory>;
pub type PaymentProtocolRef = Arc<dyn PaymentProtocol>;
pub type BackendRef = Arc<dyn Backend>;
