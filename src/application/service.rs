use super::cache::ListenerCache;
use super::fulfillment::{self, FulfillmentPipeline, ListenerHandle, UpstreamConnector};
use super::issuer::PaymentRequestIssuer;
use super::settlement::{PayIprRequest, PaymentResult, SettlementTracker};
use crate::config::ServiceConfig;
use crate::domain::payment_request::{CreateIprRequest, CreateIprResponse};
use crate::domain::ports::{BackendRef, LedgerFactoryRef, PaymentProtocolRef};
use crate::error::{Result, ServiceError};
use crate::infrastructure::http_backend::HttpBackend;
use std::sync::Arc;
use tracing::info;

/// Entry point tying the issuer, the fulfillment pipeline and the settlement tracker
/// to one ledger, one backend and one receiver secret.
pub struct PaymentService {
    prefix: String,
    factory: LedgerFactoryRef,
    pipeline: Arc<FulfillmentPipeline>,
    issuer: PaymentRequestIssuer,
    tracker: SettlementTracker,
}

impl PaymentService {
    /// Validates `config` and wires the service.
    ///
    /// When a connector is configured its plugin is created up front; transfers it
    /// forwards are settled upstream before they are released locally.
    pub async fn connect(
        config: &ServiceConfig,
        factory: LedgerFactoryRef,
        protocol: PaymentProtocolRef,
        backend: BackendRef,
    ) -> Result<Self> {
        config.validate()?;
        let prefix = config.prefix()?.to_string();
        let secret = config.receiver_secret()?;

        let mut pipeline = FulfillmentPipeline::new(
            prefix.clone(),
            secret.clone(),
            factory.context().clone(),
            Arc::clone(&protocol),
            backend,
        );
        if let Some(account) = &config.connector {
            let context = factory.context();
            let connector = context.account_to_username(account).ok_or_else(|| {
                ServiceError::Config(format!(
                    "ILP_CONNECTOR ({account}) cannot be parsed to an ILP address with {}",
                    context.account_template
                ))
            })?;
            let plugin = factory.create(&connector).await?;
            pipeline = pipeline.with_upstream(UpstreamConnector {
                address: format!("{prefix}{connector}"),
                plugin,
            });
            info!(%connector, "settling connector transfers upstream");
        }
        let pipeline = Arc::new(pipeline);

        let issuer = PaymentRequestIssuer::new(
            prefix.clone(),
            secret,
            Arc::clone(&factory),
            Arc::clone(&protocol),
            Arc::clone(&pipeline),
            ListenerCache::new(config.listener_window()),
        );
        let tracker = SettlementTracker::new(prefix.clone(), Arc::clone(&factory), protocol);

        Ok(Self {
            prefix,
            factory,
            pipeline,
            issuer,
            tracker,
        })
    }

    /// Same as [`connect`](Self::connect), notifying the backend at `config.backend_url`.
    pub async fn with_http_backend(
        config: &ServiceConfig,
        factory: LedgerFactoryRef,
        protocol: PaymentProtocolRef,
    ) -> Result<Self> {
        config.validate()?;
        let backend = HttpBackend::new(config.backend_url()?)?;
        Self::connect(config, factory, protocol, Arc::new(backend)).await
    }

    pub async fn create_ipr(&self, request: CreateIprRequest) -> Result<CreateIprResponse> {
        self.issuer.issue(request).await
    }

    pub async fn pay_ipr(&self, request: PayIprRequest) -> Result<PaymentResult> {
        self.tracker.pay(request).await
    }

    /// Listens for incoming transfers on every account of the ledger.
    pub fn listen_all(&self) -> ListenerHandle {
        fulfillment::listen_all(Arc::clone(&self.factory), Arc::clone(&self.pipeline))
    }

    /// ILP address of a ledger account URI.
    pub fn ilp_address(&self, account: &str) -> Result<String> {
        let context = self.factory.context();
        let username = context.account_to_username(account).ok_or_else(|| {
            ServiceError::validation(format!(
                "account ({account}) cannot be parsed to an ILP address with {}",
                context.account_template
            ))
        })?;
        Ok(format!("{}{}", self.prefix, username))
    }

    pub fn pipeline(&self) -> &Arc<FulfillmentPipeline> {
        &self.pipeline
    }

    pub fn issuer(&self) -> &PaymentRequestIssuer {
        &self.issuer
    }
}
