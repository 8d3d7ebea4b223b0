//! services/status_sync_service.rs
//! Refresco de estado + reconciliación cuando aparece un número nuevo,
//! y el barrido periódico que lo corre para todas las identidades.

use std::time::Duration;

use futures::{stream, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    errors::DispatchResult,
    models::{identity_model::RefreshOutcome, reconcile_model::ReconcileReport},
    services::{
        binding_service::BindingService, identity_service::IdentityService,
        reconciliation_service::ReconciliationService,
    },
};

/// Identidades consultadas en paralelo durante el barrido
const SWEEP_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub refresh: RefreshOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconcileReport>,
    pub bindings_reactivated: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub refreshed: usize,
    pub gone: usize,
    pub reconciled: usize,
    pub errors: usize,
    pub bindings_reactivated: u64,
}

#[derive(Clone)]
pub struct StatusSyncService {
    identities: IdentityService,
    reconciler: ReconciliationService,
    bindings: BindingService,
}

impl StatusSyncService {
    pub fn new(
        identities: IdentityService,
        reconciler: ReconciliationService,
        bindings: BindingService,
    ) -> Self {
        Self {
            identities,
            reconciler,
            bindings,
        }
    }

    /// `refresh_status` y, si la identidad acaba de conectarse con un número
    /// que no tenía, la reconciliación. Un fallo de reconciliación no deshace
    /// el refresco: se loguea y se devuelve sin reporte.
    pub async fn sync_identity(&self, id: &str) -> DispatchResult<SyncReport> {
        let refresh = self.identities.refresh_status(id).await?;

        let reconciliation = match &refresh {
            RefreshOutcome::Updated {
                newly_connected_phone: Some(phone),
                ..
            } => {
                log::info!(
                    "(sync_identity) Identidad {} conectada con {}; reconciliando",
                    id,
                    phone
                );
                match self.reconciler.reconcile(id).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        log::error!("(sync_identity) Reconciliación de {} falló: {}", id, e);
                        None
                    }
                }
            }
            _ => None,
        };

        // Si la reconciliación borró la identidad, el estado devuelto debe reflejarlo
        let refresh = match &reconciliation {
            Some(r) if !r.identity_kept => RefreshOutcome::Gone {
                identity_id: id.to_string(),
            },
            _ => refresh,
        };

        // Una identidad reanudada que volvió a conectarse recupera sus campañas
        let bindings_reactivated = match &refresh {
            RefreshOutcome::Updated { identity, .. } if identity.is_active && identity.is_connected => {
                self.bindings.on_resume(id).await?
            }
            _ => 0,
        };

        Ok(SyncReport {
            refresh,
            reconciliation,
            bindings_reactivated,
        })
    }

    pub async fn sweep(&self) -> DispatchResult<SweepReport> {
        let ids = self.identities.list_all_ids().await?;

        let results: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let res = self.sync_identity(&id).await;
                (id, res)
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (id, res) in results {
            match res {
                Ok(sync) => {
                    report.refreshed += 1;
                    if matches!(sync.refresh, RefreshOutcome::Gone { .. }) {
                        report.gone += 1;
                    }
                    if sync.reconciliation.is_some() {
                        report.reconciled += 1;
                    }
                    report.bindings_reactivated += sync.bindings_reactivated;
                }
                Err(e) => {
                    log::warn!("(sweep) No se pudo refrescar {}: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        report.bindings_reactivated += self.bindings.sweep().await?;
        log::info!(
            "(sweep) refrescadas={} gone={} reconciliadas={} errores={} bindings_reactivados={}",
            report.refreshed,
            report.gone,
            report.reconciled,
            report.errors,
            report.bindings_reactivated
        );
        Ok(report)
    }

    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                if let Err(e) = sync.sweep().await {
                    log::error!("(status_sweeper) Error en barrido: {:?}", e);
                }
            }
        })
    }
}
