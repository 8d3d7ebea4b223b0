use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Entrada activa de una lista de restricción.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RestrictionEntry {
    pub tenant_id: String,
    /// Número en cualquier formato, o prefijo de dígitos terminado en `*`
    pub phone_number_or_pattern: String,
    pub list_id: String,
    pub list_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestrictionResult {
    pub blocked: bool,
    pub list_names: Vec<String>,
    /// Presente cuando se bloqueó por fallo interno (fail-closed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type RestrictionReport = HashMap<String, RestrictionResult>;

#[derive(Debug, Clone, Deserialize)]
pub struct RestrictionCheckRequest {
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub identity_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RestrictionBlockCount {
    pub list_names: String,
    pub blocked: i64,
}
