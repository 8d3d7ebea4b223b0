use serde::Serialize;

/// Cuenta del proveedor (URL del servidor + admin token).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Credential {
    pub id: String,
    pub server_url: String,
    #[serde(skip_serializing)]
    pub admin_token: String,
    pub is_default: bool,
    pub is_active: bool,
}
