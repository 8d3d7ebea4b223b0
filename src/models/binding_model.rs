use serde::{Deserialize, Serialize};

/// Motivo guardado cuando el controlador desactiva un binding al pausar la identidad.
pub const REMOVAL_INSTANCE_PAUSED: &str = "instance_paused";

/// "Esta campaña puede usar esta identidad para enviar."
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TemplateBinding {
    pub campaign_id: String,
    pub instance_id: String,
    pub tenant_id: String,
    pub is_active: bool,
    pub removed_at: Option<String>,
    pub removal_reason: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BindIdentityRequest {
    pub instance_id: String,
}
