//! handlers/queue_handler.rs
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::errors::DispatchError;
use crate::handlers::error_response;
use crate::models::queue_model::{OperationType, QueueFilter, QueueItemStatus, SetIntervalRequest};
use crate::services::dispatch_queue_service::DispatchQueueService;

#[derive(Deserialize)]
pub struct QueueQuery {
    operation_type: Option<OperationType>,
    status: Option<QueueItemStatus>,
    limit: Option<i64>,
}

impl QueueQuery {
    fn filter(&self, tenant_id: String) -> QueueFilter {
        QueueFilter {
            tenant_id: Some(tenant_id),
            operation_type: self.operation_type,
            status: self.status,
        }
    }
}

/// GET /api/tenants/{tenant_id}/queue/status
pub async fn queue_status_endpoint(
    queue: web::Data<DispatchQueueService>,
    path: web::Path<String>,
    query: web::Query<QueueQuery>,
) -> HttpResponse {
    match queue.status(&query.filter(path.into_inner())).await {
        Ok(summary) => HttpResponse::Ok().json(summary),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/queue/items?status=failed
pub async fn list_queue_items_endpoint(
    queue: web::Data<DispatchQueueService>,
    path: web::Path<String>,
    query: web::Query<QueueQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    match queue.list(&query.filter(path.into_inner()), limit).await {
        Ok(items) => HttpResponse::Ok().json(items),
        Err(e) => error_response(e),
    }
}

/// GET /api/tenants/{tenant_id}/queue/items/{id}
pub async fn get_queue_item_endpoint(
    queue: web::Data<DispatchQueueService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    let item = match queue.get(&id).await {
        Ok(item) if item.tenant_id == tenant_id => item,
        Ok(_) => return error_response(DispatchError::NotFound(format!("queue item {id}"))),
        Err(e) => return error_response(e),
    };
    match queue.attempts(&id).await {
        Ok(history) => HttpResponse::Ok().json(json!({
            "item": item,
            "attempts": history
        })),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/queue/items/{id}/retry
pub async fn retry_queue_item_endpoint(
    queue: web::Data<DispatchQueueService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tenant_id, id) = path.into_inner();
    match queue.get(&id).await {
        Ok(item) if item.tenant_id == tenant_id => {}
        Ok(_) => return error_response(DispatchError::NotFound(format!("queue item {id}"))),
        Err(e) => return error_response(e),
    }
    match queue.retry(&id).await {
        Ok(item) => HttpResponse::Ok().json(item),
        Err(e) => error_response(e),
    }
}

/// POST /api/tenants/{tenant_id}/queue/retry-all
pub async fn retry_all_endpoint(
    queue: web::Data<DispatchQueueService>,
    path: web::Path<String>,
    query: web::Query<QueueQuery>,
) -> HttpResponse {
    match queue.retry_all(&query.filter(path.into_inner())).await {
        Ok(count) => HttpResponse::Ok().json(json!({
            "success": true,
            "retried": count
        })),
        Err(e) => error_response(e),
    }
}

/// PUT /api/queue/interval
pub async fn set_interval_endpoint(
    queue: web::Data<DispatchQueueService>,
    body: web::Json<SetIntervalRequest>,
) -> HttpResponse {
    match queue.set_interval(body.interval_ms) {
        Ok(()) => HttpResponse::Ok().json(json!({
            "success": true,
            "interval_ms": body.interval_ms
        })),
        Err(e) => error_response(e),
    }
}
