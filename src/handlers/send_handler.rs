//! handlers/send_handler.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::handlers::error_response;
use crate::models::send_model::SendMessageRequest;
use crate::services::send_service::SendService;

#[derive(Deserialize)]
pub struct LimitQuery {
    limit: Option<i64>,
}

/// POST /api/tenants/{tenant_id}/send
pub async fn send_message_endpoint(
    send_service: web::Data<SendService>,
    path: web::Path<String>,
    body: web::Json<SendMessageRequest>,
) -> HttpResponse {
    let tenant_id = path.into_inner();
    match send_service.send_single(&tenant_id, body.into_inner()).await {
        Ok(queue_item_id) => HttpResponse::Accepted().json(json!({
            "success": true,
            "queue_item_id": queue_item_id,
            "message": "Message queued"
        })),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/identities/{id}/eligibility
pub async fn eligibility_endpoint(
    send_service: web::Data<SendService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    match send_service.eligibility(&tenant_id, &id).await {
        Ok(eligibility) => HttpResponse::Ok().json(eligibility),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/verifications
pub async fn list_verifications_endpoint(
    send_service: web::Data<SendService>,
    path: web::Path<String>,
    query: web::Query<LimitQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    match send_service.verifications(&path.into_inner(), limit).await {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(e) => error_response(e),
    }
}
