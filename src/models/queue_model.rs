use serde::{Deserialize, Serialize};

use crate::models::identity_model::ProxyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OperationType {
    CampaignSend,
    TemplateProvisioning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Queued,
    Processing,
    Sent,
    Failed,
}

/// Fila de `dispatch_queue`. `payload` es el JSON de `DispatchPayload`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DispatchQueueItem {
    pub id: String,
    pub tenant_id: String,
    pub operation_type: OperationType,
    pub payload: String,
    pub status: QueueItemStatus,
    pub attempts: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DispatchQueueItem {
    pub fn decode_payload(&self) -> anyhow::Result<DispatchPayload> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

/// Contenido de un mensaje saliente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Text {
        text: String,
    },
    Media {
        filename: String,
        mimetype: String,
        caption: Option<String>,
        #[serde(
            serialize_with = "serialize_base64",
            deserialize_with = "deserialize_base64"
        )]
        data: Vec<u8>,
    },
}

fn serialize_base64<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&base64::encode(data))
}

fn deserialize_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    base64::decode(&s).map_err(serde::de::Error::custom)
}

/// Lo que ejecuta el worker para cada tipo de operación.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchPayload {
    SendMessage {
        instance_id: String,
        target: String,
        message: MessagePayload,
        campaign_id: Option<String>,
    },
    ProvisionIdentity {
        session_name: String,
        campaign_id: Option<String>,
        proxy: Option<ProxyConfig>,
    },
}

impl DispatchPayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            DispatchPayload::SendMessage { .. } => OperationType::CampaignSend,
            DispatchPayload::ProvisionIdentity { .. } => OperationType::TemplateProvisioning,
        }
    }
}

/// Filtro para status / listado / retry_all
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    pub tenant_id: Option<String>,
    pub operation_type: Option<OperationType>,
    pub status: Option<QueueItemStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatusSummary {
    pub total: i64,
    pub queued: i64,
    pub processing: i64,
    pub sent: i64,
    pub failed: i64,
}

/// Fila de `dispatch_attempts`
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DispatchAttempt {
    pub id: String,
    pub item_id: String,
    pub attempt: i64,
    pub outcome: QueueItemStatus,
    pub error_message: Option<String>,
    pub remote_message_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetIntervalRequest {
    pub interval_ms: u64,
}
