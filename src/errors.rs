//! errors.rs
//! Taxonomía de errores del núcleo de despacho.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Identidad, credencial o item inexistente.
    #[error("not found: {0}")]
    NotFound(String),

    /// session_name duplicado, transición de estado inválida, etc.
    #[error("conflict: {0}")]
    Conflict(String),

    /// El número coincide con una o más listas de restricción del tenant.
    #[error("number {phone_number} is restricted by list(s): {}", list_names.join(", "))]
    Restricted {
        phone_number: String,
        list_names: Vec<String>,
    },

    #[error("sender identity {0} is paused")]
    Paused(String),

    #[error("sender identity {0} is not connected")]
    NotConnected(String),

    /// La sesión remota ya no existe; la identidad local se elimina.
    #[error("remote session for identity {0} no longer exists")]
    Gone(String),

    /// Red / timeout con el proveedor. Reintentable manualmente.
    #[error("remote provider unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DispatchError {
    /// Código corto para respuestas JSON y para el historial de la cola.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::NotFound(_) => "not_found",
            DispatchError::Conflict(_) => "conflict",
            DispatchError::Restricted { .. } => "restricted",
            DispatchError::Paused(_) => "paused",
            DispatchError::NotConnected(_) => "not_connected",
            DispatchError::Gone(_) => "gone",
            DispatchError::RemoteUnavailable(_) => "remote_unavailable",
            DispatchError::Invalid(_) => "invalid",
            DispatchError::Database(_) => "database",
            DispatchError::Internal(_) => "internal",
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
