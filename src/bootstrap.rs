//! bootstrap.rs
//! Arma el grafo de servicios a partir del pool y del cliente del proveedor.

use std::{str::FromStr, sync::Arc};

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

use crate::{
    config::dispatch_config::DispatchConfig,
    services::{
        binding_service::BindingService,
        credential_service::CredentialService,
        dispatch_queue_service::DispatchQueueService,
        identity_service::IdentityService,
        provider_client::{ProviderClient, ProviderGateway},
        reconciliation_service::ReconciliationService,
        restriction_service::{RestrictionService, RestrictionStore, SqliteRestrictionStore},
        send_service::SendService,
        status_sync_service::StatusSyncService,
    },
};

pub async fn setup_database(database_url: &str) -> Result<Pool<Sqlite>> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("DATABASE_URL inválida: {database_url}"))?
        .create_if_missing(true)
        .foreign_keys(true);

    if let Some(parent) = options.clone().get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("No se pudo crear directorio {:?}", parent))?;
        }
    }

    log::info!("Conectando a SQLite en {}", database_url);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")?;

    run_migrations(&db_pool).await?;
    Ok(db_pool)
}

/// Corre migraciones con sqlx
pub async fn run_migrations(db_pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(db_pool)
        .await
        .context("Fallo en migraciones")?;
    Ok(())
}

#[derive(Clone)]
pub struct AppServices {
    pub bindings: BindingService,
    pub identities: IdentityService,
    pub restrictions: RestrictionService,
    pub reconciler: ReconciliationService,
    pub queue: DispatchQueueService,
    pub sender: SendService,
    pub status_sync: StatusSyncService,
}

impl AppServices {
    pub fn build(
        db_pool: Pool<Sqlite>,
        provider: Arc<dyn ProviderClient>,
        config: &DispatchConfig,
    ) -> Self {
        let store: Arc<dyn RestrictionStore> = Arc::new(SqliteRestrictionStore::new(db_pool.clone()));
        Self::build_with_store(db_pool, provider, store, config)
    }

    pub fn build_with_store(
        db_pool: Pool<Sqlite>,
        provider: Arc<dyn ProviderClient>,
        store: Arc<dyn RestrictionStore>,
        config: &DispatchConfig,
    ) -> Self {
        let gateway = ProviderGateway::new(provider, config.provider_timeout());
        let credentials = CredentialService::new(db_pool.clone());
        let bindings = BindingService::new(db_pool.clone());
        let identities = IdentityService::new(
            db_pool.clone(),
            credentials,
            gateway,
            bindings.clone(),
        );
        let restrictions = RestrictionService::new(db_pool.clone(), store);
        let reconciler = ReconciliationService::new(identities.clone());
        let queue = DispatchQueueService::new(db_pool.clone(), config.queue_interval_ms);
        let sender = SendService::new(
            db_pool,
            identities.clone(),
            restrictions.clone(),
            bindings.clone(),
            queue.clone(),
        );
        let status_sync =
            StatusSyncService::new(identities.clone(), reconciler.clone(), bindings.clone());

        Self {
            bindings,
            identities,
            restrictions,
            reconciler,
            queue,
            sender,
            status_sync,
        }
    }
}
