use crate::domain::addressing::LedgerContext;
use crate::domain::ipr::Ipr;
use crate::domain::notification::Notification;
use crate::domain::payment_request::ApplicationData;
use crate::domain::ports::{
    BackendRef, LedgerFactoryRef, PaymentProtocolRef, Plugin, PluginRef, ReceiverSecret,
};
use crate::domain::transfer::{Fulfillment, IncomingTransfer, LedgerEvent};
use crate::error::{Result, ServiceError};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Steps an incoming transfer goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentStage {
    Received,
    PreparedNotified,
    UpstreamFulfilled,
    UpstreamSkipped,
    Released,
    ExecutedNotified,
}

/// The connector whose transfers must be settled before ours are released.
#[derive(Clone)]
pub struct UpstreamConnector {
    /// ILP address incoming transfers from the connector are sent from. Matched
    /// exactly, so addresses below it are not treated as upstream.
    pub address: String,
    pub plugin: PluginRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FulfillmentReport {
    pub payment_id: Uuid,
    pub transfer_id: String,
    pub destination_account: String,
    pub fulfillment: Fulfillment,
    pub stages: Vec<FulfillmentStage>,
}

/// Backend-gated release of incoming conditional transfers.
///
/// Per transfer: notify `prepared`, settle the upstream leg when the transfer came
/// through the designated connector, release the transfer, notify `executed`. Any
/// failure stops the pipeline and leaves the transfer to the ledger's own expiry.
pub struct FulfillmentPipeline {
    prefix: String,
    secret: ReceiverSecret,
    context: LedgerContext,
    protocol: PaymentProtocolRef,
    backend: BackendRef,
    upstream: Option<UpstreamConnector>,
}

impl FulfillmentPipeline {
    pub fn new(
        prefix: impl Into<String>,
        secret: ReceiverSecret,
        context: LedgerContext,
        protocol: PaymentProtocolRef,
        backend: BackendRef,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            secret,
            context,
            protocol,
            backend,
            upstream: None,
        }
    }

    pub fn with_upstream(mut self, upstream: UpstreamConnector) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Username of the account an incoming transfer is addressed to.
    pub fn destination_username<'a>(&self, transfer: &'a IncomingTransfer) -> Option<&'a str> {
        self.context.address_to_username(&self.prefix, &transfer.to)
    }

    /// Runs the pipeline for one transfer. `receiver` is the plugin of the account the
    /// transfer was prepared to; it performs the release.
    pub async fn handle(
        &self,
        transfer: &IncomingTransfer,
        receiver: &dyn Plugin,
    ) -> Result<FulfillmentReport> {
        let mut stages = vec![FulfillmentStage::Received];

        let received = match self.protocol.open_incoming(transfer, &self.secret) {
            Ok(received) => received,
            Err(e) => {
                self.reject(receiver, transfer, &e).await;
                return Err(e);
            }
        };
        let payment_id = match received.public_headers.payment_id() {
            Ok(payment_id) => payment_id,
            Err(e) => {
                self.reject(receiver, transfer, &e).await;
                return Err(e);
            }
        };

        let destination_account = self
            .context
            .address_to_account(&self.prefix, &transfer.to)
            .ok_or_else(|| {
                ServiceError::Protocol(format!(
                    "address ({}) does not match ledger prefix ({})",
                    transfer.to, self.prefix
                ))
            })?;
        let data = ApplicationData::parse(&received.data);
        let ipr = Ipr::new(transfer.execution_condition, transfer.ilp.clone()).to_base64url();

        debug!(%payment_id, transfer_id = %transfer.id, %ipr, "incoming prepare");
        debug!(%payment_id, "submitting prepare notification to backend for review");
        let prepared = Notification::prepared(
            payment_id,
            ipr,
            destination_account.clone(),
            data.into_option(),
        );
        self.backend.notify(&prepared).await?;
        stages.push(FulfillmentStage::PreparedNotified);

        // Only the connector's own address is upstream, not addresses below it.
        match &self.upstream {
            Some(upstream) if transfer.from == upstream.address => {
                debug!(%payment_id, "fulfilling connector source transfer");
                upstream
                    .plugin
                    .fulfill_condition(&transfer.id, &received.fulfillment)
                    .await?;
                stages.push(FulfillmentStage::UpstreamFulfilled);
            }
            _ => stages.push(FulfillmentStage::UpstreamSkipped),
        }

        debug!(%payment_id, "fulfilling destination transfer");
        receiver
            .fulfill_condition(&transfer.id, &received.fulfillment)
            .await?;
        stages.push(FulfillmentStage::Released);

        debug!(%payment_id, "submitting execute notification to backend");
        if let Err(e) = self
            .backend
            .notify(&prepared.executed(received.fulfillment))
            .await
        {
            error!(%payment_id, error = %e, "transfer executed but executed notification failed");
            return Err(e.into());
        }
        stages.push(FulfillmentStage::ExecutedNotified);

        Ok(FulfillmentReport {
            payment_id,
            transfer_id: transfer.id.clone(),
            destination_account,
            fulfillment: received.fulfillment,
            stages,
        })
    }

    async fn reject(&self, receiver: &dyn Plugin, transfer: &IncomingTransfer, reason: &ServiceError) {
        warn!(transfer_id = %transfer.id, error = %reason, "rejecting incoming transfer");
        if let Err(e) = receiver
            .reject_incoming_transfer(&transfer.id, &reason.to_string())
            .await
        {
            warn!(transfer_id = %transfer.id, error = %e, "failed to reject incoming transfer");
        }
    }
}

/// Handle to a running listener task.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    task: AbortHandle,
}

impl ListenerHandle {
    /// Stops listening. Pipelines already in flight run to completion.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Clone)]
enum Dispatch {
    Account(PluginRef),
    All(LedgerFactoryRef),
}

impl Dispatch {
    async fn receiver_for(
        &self,
        pipeline: &FulfillmentPipeline,
        transfer: &IncomingTransfer,
    ) -> Result<PluginRef> {
        match self {
            Dispatch::Account(plugin) => Ok(Arc::clone(plugin)),
            Dispatch::All(factory) => {
                let username = pipeline.destination_username(transfer).ok_or_else(|| {
                    ServiceError::Protocol(format!(
                        "address ({}) does not match ledger prefix ({})",
                        transfer.to, pipeline.prefix
                    ))
                })?;
                factory.create(username).await
            }
        }
    }
}

/// Listens for incoming transfers on a single account.
pub fn listen_account(plugin: PluginRef, pipeline: Arc<FulfillmentPipeline>) -> ListenerHandle {
    let events = plugin.subscribe();
    debug!(account = plugin.account(), "listening for incoming transfers");
    spawn_listener(events, Dispatch::Account(plugin), pipeline)
}

/// Listens for incoming transfers on every account of the ledger with one subscription.
///
/// Each event is dispatched to the plugin of its destination account. Sharing the
/// receiver secret across accounts is safe: it can only be used to receive funds.
pub fn listen_all(factory: LedgerFactoryRef, pipeline: Arc<FulfillmentPipeline>) -> ListenerHandle {
    let events = factory.subscribe_all();
    debug!("listening for incoming transfers on all accounts");
    spawn_listener(events, Dispatch::All(factory), pipeline)
}

/// Runs one pipeline task per incoming prepare.
///
/// Prepares dropped because the listener lagged are neither fulfilled nor rejected; the
/// ledger expires them. They are logged at `error`.
fn spawn_listener(
    mut events: broadcast::Receiver<LedgerEvent>,
    dispatch: Dispatch,
    pipeline: Arc<FulfillmentPipeline>,
) -> ListenerHandle {
    let task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LedgerEvent::IncomingPrepare(transfer)) => {
                    let pipeline = Arc::clone(&pipeline);
                    let dispatch = dispatch.clone();
                    tokio::spawn(async move {
                        process_incoming(&pipeline, &dispatch, transfer).await;
                    });
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    error!(
                        skipped,
                        "listener fell behind ledger events, skipped prepares are left to expire"
                    );
                }
                Err(RecvError::Closed) => {
                    debug!("ledger event stream closed, listener exiting");
                    break;
                }
            }
        }
    });

    ListenerHandle {
        task: task.abort_handle(),
    }
}

async fn process_incoming(
    pipeline: &FulfillmentPipeline,
    dispatch: &Dispatch,
    transfer: IncomingTransfer,
) {
    let receiver = match dispatch.receiver_for(pipeline, &transfer).await {
        Ok(receiver) => receiver,
        Err(e) => {
            warn!(transfer_id = %transfer.id, error = %e, "no plugin for incoming transfer");
            return;
        }
    };

    match pipeline.handle(&transfer, receiver.as_ref()).await {
        Ok(report) => info!(
            payment_id = %report.payment_id,
            transfer_id = %report.transfer_id,
            "executed transfer"
        ),
        Err(e) => warn!(
            transfer_id = %transfer.id,
            error = %e,
            "incoming payment aborted"
        ),
    }
}
