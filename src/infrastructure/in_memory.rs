use crate::domain::addressing::LedgerContext;
use crate::domain::ports::{LedgerFactory, Plugin, PluginRef};
use crate::domain::transfer::{Fulfillment, IncomingTransfer, LedgerEvent, OutgoingTransfer};
use crate::error::{Result, ServiceError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// A call a plugin made against the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCall {
    Send {
        account: String,
        transfer: OutgoingTransfer,
    },
    Fulfill {
        account: String,
        transfer_id: String,
        fulfillment: Fulfillment,
    },
    Reject {
        account: String,
        transfer_id: String,
        reason: String,
    },
}

struct LedgerState {
    prefix: String,
    context: LedgerContext,
    accounts: RwLock<HashMap<String, broadcast::Sender<LedgerEvent>>>,
    all: broadcast::Sender<LedgerEvent>,
    calls: RwLock<Vec<LedgerCall>>,
    call_count: watch::Sender<usize>,
    failing_fulfillments: RwLock<HashSet<String>>,
}

impl LedgerState {
    async fn channel(&self, username: &str) -> broadcast::Sender<LedgerEvent> {
        if let Some(sender) = self.accounts.read().await.get(username) {
            return sender.clone();
        }
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(username.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    async fn record(&self, call: LedgerCall) {
        let mut calls = self.calls.write().await;
        calls.push(call);
        self.call_count.send_replace(calls.len());
    }
}

/// A ledger that lives in process memory.
///
/// Transfers never move funds; the ledger records what plugins asked it to do and lets
/// the caller inject events. Cloning shares the same ledger.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(prefix: impl Into<String>, context: LedgerContext) -> Self {
        let (call_count, _) = watch::channel(0);
        Self {
            state: Arc::new(LedgerState {
                prefix: prefix.into(),
                context,
                accounts: RwLock::new(HashMap::new()),
                all: broadcast::channel(CHANNEL_CAPACITY).0,
                calls: RwLock::new(Vec::new()),
                call_count,
                failing_fulfillments: RwLock::new(HashSet::new()),
            }),
        }
    }

    /// Prepares `transfer` towards the account its `to` address names.
    pub async fn prepare_incoming(&self, transfer: IncomingTransfer) -> Result<()> {
        let username = self
            .state
            .context
            .address_to_username(&self.state.prefix, &transfer.to)
            .ok_or_else(|| {
                ServiceError::Ledger(format!("no local account for address {}", transfer.to))
            })?
            .to_string();
        self.emit(&username, LedgerEvent::IncomingPrepare(transfer))
            .await;
        Ok(())
    }

    /// Delivers `event` to the subscribers of `username` and to ledger-wide subscribers.
    /// Returns how many account subscribers received it.
    pub async fn emit(&self, username: &str, event: LedgerEvent) -> usize {
        let sender = self.state.channel(username).await;
        // No receivers is not an error here.
        let _ = self.state.all.send(event.clone());
        sender.send(event).unwrap_or(0)
    }

    /// Makes every later `fulfill_condition` by `username` fail.
    pub async fn fail_fulfillments_for(&self, username: &str) {
        self.state
            .failing_fulfillments
            .write()
            .await
            .insert(username.to_string());
    }

    pub async fn calls(&self) -> Vec<LedgerCall> {
        self.state.calls.read().await.clone()
    }

    /// Number of recorded calls, updated as calls come in.
    pub fn watch_calls(&self) -> watch::Receiver<usize> {
        self.state.call_count.subscribe()
    }

    pub async fn subscriber_count(&self, username: &str) -> usize {
        self.state
            .accounts
            .read()
            .await
            .get(username)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl LedgerFactory for InMemoryLedger {
    fn context(&self) -> &LedgerContext {
        &self.state.context
    }

    async fn create(&self, username: &str) -> Result<PluginRef> {
        let events = self.state.channel(username).await;
        debug!(%username, "created in-memory plugin");
        Ok(Arc::new(InMemoryPlugin {
            username: username.to_string(),
            account: self.state.context.account_uri(username),
            events,
            ledger: Arc::clone(&self.state),
        }))
    }

    fn subscribe_all(&self) -> broadcast::Receiver<LedgerEvent> {
        self.state.all.subscribe()
    }
}

/// Plugin for one account of an [`InMemoryLedger`].
pub struct InMemoryPlugin {
    username: String,
    account: String,
    events: broadcast::Sender<LedgerEvent>,
    ledger: Arc<LedgerState>,
}

#[async_trait]
impl Plugin for InMemoryPlugin {
    fn account(&self) -> &str {
        &self.account
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    async fn send_transfer(&self, transfer: OutgoingTransfer) -> Result<()> {
        self.ledger
            .record(LedgerCall::Send {
                account: self.username.clone(),
                transfer,
            })
            .await;
        Ok(())
    }

    async fn fulfill_condition(&self, transfer_id: &str, fulfillment: &Fulfillment) -> Result<()> {
        if self
            .ledger
            .failing_fulfillments
            .read()
            .await
            .contains(&self.username)
        {
            return Err(ServiceError::Ledger(format!(
                "fulfillment of transfer {transfer_id} failed for {}",
                self.username
            )));
        }
        self.ledger
            .record(LedgerCall::Fulfill {
                account: self.username.clone(),
                transfer_id: transfer_id.to_string(),
                fulfillment: *fulfillment,
            })
            .await;
        Ok(())
    }

    async fn reject_incoming_transfer(&self, transfer_id: &str, reason: &str) -> Result<()> {
        self.ledger
            .record(LedgerCall::Reject {
                account: self.username.clone(),
                transfer_id: transfer_id.to_string(),
                reason: reason.to_string(),
            })
            .await;
        Ok(())
    }
}
