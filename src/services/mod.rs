//! services/mod.rs
//! Módulo que agrupa los servicios del núcleo de despacho.

pub mod binding_service;
pub mod credential_service;
pub mod dispatch_queue_service;
pub mod identity_service;
pub mod phone_service;
pub mod provider_client;
pub mod reconciliation_service;
pub mod restriction_service;
pub mod send_service;
pub mod status_sync_service;
