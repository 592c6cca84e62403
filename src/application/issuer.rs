use super::cache::{ExpiryCallback, ListenerCache};
use super::fulfillment::{FulfillmentPipeline, ListenerHandle, listen_account};
use crate::domain::addressing::scale_amount;
use crate::domain::payment_request::{
    CreateIprRequest, CreateIprResponse, PacketRequest, PaymentRequest, PublicHeaders,
};
use crate::domain::ports::{LedgerFactoryRef, PaymentProtocolRef, ReceiverSecret};
use crate::error::{Result, ServiceError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Issues payment requests and makes sure someone is listening for them.
pub struct PaymentRequestIssuer {
    prefix: String,
    secret: ReceiverSecret,
    factory: LedgerFactoryRef,
    protocol: PaymentProtocolRef,
    pipeline: Arc<FulfillmentPipeline>,
    cache: ListenerCache<ListenerHandle>,
}

impl PaymentRequestIssuer {
    pub fn new(
        prefix: impl Into<String>,
        secret: ReceiverSecret,
        factory: LedgerFactoryRef,
        protocol: PaymentProtocolRef,
        pipeline: Arc<FulfillmentPipeline>,
        cache: ListenerCache<ListenerHandle>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            secret,
            factory,
            protocol,
            pipeline,
            cache,
        }
    }

    pub fn cache(&self) -> &ListenerCache<ListenerHandle> {
        &self.cache
    }

    /// Validates the request, encodes it, and ensures a fulfillment listener is active
    /// for the destination account until at least `expiresAt`.
    ///
    /// A listener already cached for the account serves the new request as well: the
    /// backend checks the payment id of every prepared transfer, the listener does not.
    pub async fn issue(&self, request: CreateIprRequest) -> Result<CreateIprResponse> {
        let request = PaymentRequest::validate(request, Utc::now())?;
        let context = self.factory.context();

        let username = context
            .account_to_username(&request.destination_account)
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "account ({}) cannot be parsed to an ILP address with {}",
                    request.destination_account, context.account_template
                ))
            })?;
        let destination_amount = scale_amount(request.destination_amount, context.currency_scale)
            .ok_or_else(|| {
                ServiceError::validation(format!(
                    "destinationAmount ({}) is out of range",
                    request.destination_amount
                ))
            })?;
        let data = request
            .data
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ServiceError::Protocol(e.to_string()))?;

        let ipr = self.protocol.create_request(
            &PacketRequest {
                destination_address: format!("{}{}", self.prefix, username),
                destination_amount,
                expires_at: request.expires_at,
                public_headers: PublicHeaders::with_payment_id(request.payment_id),
                data,
            },
            &self.secret,
        )?;
        debug!(payment_id = %request.payment_id, %username, "created payment request");

        self.ensure_listener(&username, request.expires_at).await?;

        Ok(CreateIprResponse {
            ipr: ipr.to_base64url(),
        })
    }

    async fn ensure_listener(
        &self,
        username: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ListenerHandle> {
        self.cache
            .get_or_try_insert_with(username, expires_at, || async {
                let plugin = self.factory.create(username).await?;
                let handle = listen_account(plugin, Arc::clone(&self.pipeline));
                info!(%username, %expires_at, "started fulfillment listener");

                let stop = handle.clone();
                let owner = username.to_string();
                let on_expire: ExpiryCallback = Box::new(move || {
                    debug!(username = %owner, "stopping fulfillment listener");
                    stop.stop();
                    Ok(())
                });
                Ok::<_, ServiceError>((handle, on_expire))
            })
            .await
    }
}
