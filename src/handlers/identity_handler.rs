//! handlers/identity_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::error_response;
use crate::models::identity_model::CreateIdentityRequest;
use crate::services::{
    identity_service::IdentityService, reconciliation_service::ReconciliationService,
    status_sync_service::StatusSyncService,
};

/// POST /api/tenants/{tenant_id}/identities
pub async fn create_identity_endpoint(
    identities: web::Data<IdentityService>,
    path: web::Path<String>,
    body: web::Json<CreateIdentityRequest>,
) -> HttpResponse {
    let tenant_id = path.into_inner();
    match identities.create(&tenant_id, body.into_inner()).await {
        Ok(identity) => HttpResponse::Created().json(identity),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/identities
pub async fn list_identities_endpoint(
    identities: web::Data<IdentityService>,
    path: web::Path<String>,
) -> HttpResponse {
    match identities.list(&path.into_inner()).await {
        Ok(list) => HttpResponse::Ok().json(list),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/identities/{id}
pub async fn get_identity_endpoint(
    identities: web::Data<IdentityService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    match identities.get_for_tenant(&tenant_id, &id).await {
        Ok(identity) => HttpResponse::Ok().json(identity),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/identities/{id}/refresh
/// `Gone` no es un error para el usuario: se informa como resultado.
pub async fn refresh_identity_endpoint(
    identities: web::Data<IdentityService>,
    sync: web::Data<StatusSyncService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    if let Err(e) = identities.get_for_tenant(&tenant_id, &id).await {
        return error_response(e);
    }
    match sync.sync_identity(&id).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/identities/{id}/pause
pub async fn pause_identity_endpoint(
    identities: web::Data<IdentityService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    if let Err(e) = identities.get_for_tenant(&tenant_id, &id).await {
        return error_response(e);
    }
    match identities.pause(&id).await {
        Ok(identity) => HttpResponse::Ok().json(identity),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/identities/{id}/resume
pub async fn resume_identity_endpoint(
    identities: web::Data<IdentityService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    if let Err(e) = identities.get_for_tenant(&tenant_id, &id).await {
        return error_response(e);
    }
    match identities.resume(&id).await {
        Ok(identity) => HttpResponse::Ok().json(json!({
            "success": true,
            "identity": identity,
            "message": "Bindings will be reactivated by the next sweep"
        })),
        Err(e) => error_response(e),
    }
}

/// DELETE /api/tenants/{tenant_id}/identities/{id}
pub async fn delete_identity_endpoint(
    identities: web::Data<IdentityService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    if let Err(e) = identities.get_for_tenant(&tenant_id, &id).await {
        return error_response(e);
    }
    match identities.delete(&id).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/identities/{id}/reconcile
pub async fn reconcile_identity_endpoint(
    identities: web::Data<IdentityService>,
    reconciler: web::Data<ReconciliationService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    if let Err(e) = identities.get_for_tenant(&tenant_id, &id).await {
        return error_response(e);
    }
    match reconciler.reconcile(&id).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(e),
    }
}
