//! handlers/mod.rs
//! Handlers HTTP (identidades, envíos, cola, restricciones, campañas).

pub mod campaign_handler;
pub mod identity_handler;
pub mod queue_handler;
pub mod restriction_handler;
pub mod send_handler;

use actix_web::{http::StatusCode, HttpResponse};
use serde_json::json;

use crate::errors::DispatchError;

pub fn status_for(e: &DispatchError) -> StatusCode {
    match e {
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::Conflict(_) | DispatchError::Restricted { .. } => StatusCode::CONFLICT,
        DispatchError::Paused(_) | DispatchError::NotConnected(_) => StatusCode::LOCKED,
        DispatchError::Gone(_) => StatusCode::GONE,
        DispatchError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Invalid(_) => StatusCode::BAD_REQUEST,
        DispatchError::Database(_) | DispatchError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Respuesta de error común: `{success: false, error, kind}` y, si es un
/// bloqueo, el número y las listas que coincidieron.
pub fn error_response(e: DispatchError) -> HttpResponse {
    let status = status_for(&e);
    if status.is_server_error() {
        log::error!("Error interno: {:?}", e);
    }
    let mut body = json!({
        "success": false,
        "kind": e.kind(),
        "error": e.to_string(),
    });
    if let DispatchError::Restricted {
        phone_number,
        list_names,
    } = &e
    {
        body["phone_number"] = json!(phone_number);
        body["list_names"] = json!(list_names);
    }
    HttpResponse::build(status).json(body)
}
