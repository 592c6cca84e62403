use crate::domain::notification::Notification;
use crate::domain::ports::Backend;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Posts notifications as JSON to `{base_url}/notifications`.
///
/// Any 2xx counts as approval. Other statuses become [`BackendError::Rejected`]
/// carrying the response body.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    notifications_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("ilp-service/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            notifications_url: format!("{}/notifications", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn notify(&self, notification: &Notification) -> Result<(), BackendError> {
        debug!(
            payment_id = %notification.payment_id,
            status = ?notification.status,
            url = %self.notifications_url,
            "posting notification"
        );

        let response = self
            .client
            .post(&self.notifications_url)
            .json(notification)
            .send()
            .await
            .map_err(|e| {
                warn!(payment_id = %notification.payment_id, error = %e, "notification request failed");
                BackendError::from(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            payment_id = %notification.payment_id,
            status = status.as_u16(),
            %body,
            "backend rejected notification"
        );
        Err(BackendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}
