//! handlers/campaign_handler.rs
//! Bindings campaña-identidad, fan-out de campaña y provisión de sesiones.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::handlers::error_response;
use crate::models::{
    binding_model::BindIdentityRequest, identity_model::ProxyConfig,
    send_model::CampaignSendRequest,
};
use crate::services::{binding_service::BindingService, send_service::SendService};

#[derive(Deserialize)]
pub struct ProvisionRequest {
    pub session_name: String,
    pub proxy: Option<ProxyConfig>,
}

/// POST /api/tenants/{tenant_id}/campaigns/{campaign_id}/bindings
pub async fn bind_identity_endpoint(
    bindings: web::Data<BindingService>,
    path: web::Path<(String, String)>,
    body: web::Json<BindIdentityRequest>,
) -> HttpResponse {
    let (tenant_id, campaign_id) = path.into_inner();
    match bindings
        .bind(&tenant_id, &campaign_id, &body.instance_id)
        .await
    {
        Ok(binding) => HttpResponse::Created().json(binding),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/campaigns/{campaign_id}/bindings
pub async fn list_bindings_endpoint(
    bindings: web::Data<BindingService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, campaign_id) = path.into_inner();
    match bindings.list_for_campaign(&tenant_id, &campaign_id).await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/campaigns/{campaign_id}/send
pub async fn campaign_send_endpoint(
    send_service: web::Data<SendService>,
    path: web::Path<(String, String)>,
    body: web::Json<CampaignSendRequest>,
) -> HttpResponse {
    let (tenant_id, campaign_id) = path.into_inner();
    match send_service
        .enqueue_campaign(&tenant_id, &campaign_id, body.into_inner())
        .await
    {
        Ok(report) => HttpResponse::Accepted().json(report),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/campaigns/{campaign_id}/provision
/// Encola la creación de una sesión que queda ligada a la campaña.
pub async fn provision_identity_endpoint(
    send_service: web::Data<SendService>,
    path: web::Path<(String, String)>,
    body: web::Json<ProvisionRequest>,
) -> HttpResponse {
    let (tenant_id, campaign_id) = path.into_inner();
    let req = body.into_inner();
    match send_service
        .provision_identity(&tenant_id, &req.session_name, Some(campaign_id), req.proxy)
        .await
    {
        Ok(queue_item_id) => HttpResponse::Accepted().json(json!({
            "success": true,
            "queue_item_id": queue_item_id
        })),
        Err(e) => error_response(e),
    }
}
