use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum IdentityStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Proxy opcional por identidad; se reenvía tal cual al cliente del proveedor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Fila de `sender_identities`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SenderIdentity {
    pub id: String,
    pub tenant_id: String,
    pub session_name: String,
    #[serde(skip_serializing)]
    pub provider_token: Option<String>,
    pub phone_number: Option<String>,
    pub is_connected: bool,
    pub status: IdentityStatus,
    pub is_active: bool,
    pub credential_id: Option<String>,
    pub profile_name: Option<String>,
    pub profile_pic_url: Option<String>,
    /// JSON de `ProxyConfig`
    #[serde(skip_serializing)]
    pub proxy: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SenderIdentity {
    pub fn proxy_config(&self) -> Option<ProxyConfig> {
        self.proxy
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Request para crear una identidad
#[derive(Debug, Clone, Deserialize)]
pub struct CreateIdentityRequest {
    pub session_name: String,
    /// Si viene, no se crea la sesión remota.
    pub provider_token: Option<String>,
    pub proxy: Option<ProxyConfig>,
}

/// Estado que reporta el proveedor para una sesión.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub connected: bool,
    pub phone_number: Option<String>,
    pub profile_name: Option<String>,
    pub profile_pic_url: Option<String>,
    /// Estado crudo del proveedor ("connected", "connecting", "disconnected", ...)
    pub state: String,
}

/// Sesión tal como aparece en el listado del proveedor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub token: String,
    pub phone_number: Option<String>,
    pub status: String,
    pub name: Option<String>,
}

impl RemoteSession {
    pub fn is_connected(&self) -> bool {
        self.status.eq_ignore_ascii_case("connected")
    }
}

/// Resultado de `refresh_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Updated {
        identity: SenderIdentity,
        /// Teléfono recién visto en estado conectado (dispara la reconciliación).
        newly_connected_phone: Option<String>,
    },
    /// La sesión ya no existe en el proveedor; la identidad local fue borrada.
    Gone { identity_id: String },
}
