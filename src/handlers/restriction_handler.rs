//! handlers/restriction_handler.rs
use actix_web::{web, HttpResponse};

use crate::handlers::error_response;
use crate::models::restriction_model::RestrictionCheckRequest;
use crate::services::restriction_service::RestrictionService;

/// POST /api/tenants/{tenant_id}/restrictions/check
pub async fn check_restrictions_endpoint(
    restrictions: web::Data<RestrictionService>,
    path: web::Path<String>,
    body: web::Json<RestrictionCheckRequest>,
) -> HttpResponse {
    let tenant_id = path.into_inner();
    let req = body.into_inner();
    let report = restrictions
        .check(&tenant_id, &req.phone_numbers, &req.identity_ids)
        .await;
    HttpResponse::Ok().json(report)
}

/// GET /api/tenants/{tenant_id}/restrictions/blocks
pub async fn block_counts_endpoint(
    restrictions: web::Data<RestrictionService>,
    path: web::Path<String>,
) -> HttpResponse {
    match restrictions.block_counts(&path.into_inner()).await {
        Ok(counts) => HttpResponse::Ok().json(counts),
        Err(e) => error_response(e),
    }
}
