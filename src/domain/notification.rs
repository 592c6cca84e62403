use super::transfer::Fulfillment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Prepared,
    Executed,
}

/// Body POSTed to `{backend_url}/notifications`.
///
/// The backend is the system of record; nothing here is persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub payment_id: Uuid,
    pub ipr: String,
    pub destination_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub status: NotificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<Fulfillment>,
}

impl Notification {
    pub fn prepared(
        payment_id: Uuid,
        ipr: String,
        destination_account: String,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            payment_id,
            ipr,
            destination_account,
            data,
            status: NotificationStatus::Prepared,
            fulfillment: None,
        }
    }

    /// The executed notification repeats the prepared one and adds the fulfillment.
    pub fn executed(&self, fulfillment: Fulfillment) -> Self {
        Self {
            status: NotificationStatus::Executed,
            fulfillment: Some(fulfillment),
            ..self.clone()
        }
    }
}
