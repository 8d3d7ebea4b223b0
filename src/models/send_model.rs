use serde::{Deserialize, Serialize};

use crate::models::queue_model::MessagePayload;

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub instance_id: String,
    pub target: String,
    pub message: MessagePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignSendRequest {
    pub targets: Vec<String>,
    pub message: MessagePayload,
}

/// Número rechazado antes de encolar.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedTarget {
    pub target: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub list_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignEnqueueReport {
    pub queued: Vec<String>,
    pub rejected: Vec<RejectedTarget>,
}

/// Lo que devuelve el proveedor al enviar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub remote_message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VerificationRecord {
    pub id: String,
    pub tenant_id: String,
    pub instance_id: String,
    pub phone_number: String,
    pub has_whatsapp: bool,
    pub detail: Option<String>,
    pub checked_at: String,
}
