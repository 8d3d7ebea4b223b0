use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Había una identidad conectada con el mismo número: se borró la nueva.
    KeptOldConnected,
    /// La coincidencia no estaba conectada: se borró la vieja.
    KeptNewDeletedOld,
    NoDuplicates,
}

/// Acción tomada sobre una coincidencia concreta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MatchAction {
    /// Identidad conectada que se conserva; `imported` si se creó la fila local.
    Kept {
        token: String,
        local_id: Option<String>,
        imported: bool,
    },
    Deleted {
        token: String,
        local_id: Option<String>,
        remote_deleted: bool,
    },
    /// Conectada pero no elegida como ganadora, o de otro tenant; queda sin tocar.
    LeftUntouched { token: String },
    /// No se pudo clasificar (fallo consultando su estado).
    Skipped { token: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub identity_id: String,
    pub phone_number: Option<String>,
    pub resolution: Resolution,
    /// `false` cuando la identidad nueva fue borrada por perder el conflicto.
    pub identity_kept: bool,
    pub actions: Vec<MatchAction>,
}

impl ReconcileReport {
    pub fn no_duplicates(identity_id: &str, phone_number: Option<String>) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            phone_number,
            resolution: Resolution::NoDuplicates,
            identity_kept: true,
            actions: Vec::new(),
        }
    }
}
