//! services/identity_service.rs
//! Registro de identidades de envío: CRUD y caché de estado.
//! `apply_status` es el único camino que escribe los campos de conectividad.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        credential_model::Credential,
        identity_model::{
            CreateIdentityRequest, IdentityStatus, RefreshOutcome, RemoteSession, RemoteStatus,
            SenderIdentity,
        },
    },
    services::{
        binding_service::BindingService,
        credential_service::CredentialService,
        phone_service,
        provider_client::{ProviderGateway, RemoteOutcome},
    },
};

const SELECT_IDENTITY: &str = r#"
    SELECT id, tenant_id, session_name, provider_token, phone_number,
           is_connected, status, is_active, credential_id,
           profile_name, profile_pic_url, proxy, created_at, updated_at
    FROM sender_identities
"#;

#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub identity_id: String,
    pub remote_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_error: Option<String>,
    pub bindings_removed: u64,
}

#[derive(Clone)]
pub struct IdentityService {
    db_pool: Pool<Sqlite>,
    credentials: CredentialService,
    gateway: ProviderGateway,
    bindings: BindingService,
    /// (tenant, session_name) con un create remoto en curso
    creating: Arc<Mutex<HashSet<String>>>,
}

impl IdentityService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        credentials: CredentialService,
        gateway: ProviderGateway,
        bindings: BindingService,
    ) -> Self {
        Self {
            db_pool,
            credentials,
            gateway,
            bindings,
            creating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub fn credentials(&self) -> &CredentialService {
        &self.credentials
    }

    // ----------------------------------------------------------------
    // Lectura
    // ----------------------------------------------------------------

    pub async fn find(&self, id: &str) -> DispatchResult<Option<SenderIdentity>> {
        Ok(
            sqlx::query_as::<_, SenderIdentity>(&format!("{SELECT_IDENTITY} WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.db_pool)
                .await?,
        )
    }

    pub async fn get(&self, id: &str) -> DispatchResult<SenderIdentity> {
        self.find(id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("sender identity {id}")))
    }

    /// Igual que `get`, pero una identidad de otro tenant cuenta como inexistente.
    pub async fn get_for_tenant(&self, tenant_id: &str, id: &str) -> DispatchResult<SenderIdentity> {
        let identity = self.get(id).await?;
        if identity.tenant_id != tenant_id {
            return Err(DispatchError::NotFound(format!("sender identity {id}")));
        }
        Ok(identity)
    }

    pub async fn list(&self, tenant_id: &str) -> DispatchResult<Vec<SenderIdentity>> {
        Ok(sqlx::query_as::<_, SenderIdentity>(&format!(
            "{SELECT_IDENTITY} WHERE tenant_id = ?1 ORDER BY created_at, id"
        ))
        .bind(tenant_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    pub async fn list_all_ids(&self) -> DispatchResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM sender_identities ORDER BY created_at")
            .fetch_all(&self.db_pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn find_by_token(
        &self,
        tenant_id: &str,
        token: &str,
    ) -> DispatchResult<Option<SenderIdentity>> {
        Ok(sqlx::query_as::<_, SenderIdentity>(&format!(
            "{SELECT_IDENTITY} WHERE tenant_id = ?1 AND provider_token = ?2"
        ))
        .bind(tenant_id)
        .bind(token)
        .fetch_optional(&self.db_pool)
        .await?)
    }

    /// Dueño de un token sin importar el tenant. Con credenciales compartidas
    /// una sesión remota puede pertenecer a otro tenant.
    pub async fn find_by_token_any(&self, token: &str) -> DispatchResult<Option<SenderIdentity>> {
        Ok(sqlx::query_as::<_, SenderIdentity>(&format!(
            "{SELECT_IDENTITY} WHERE provider_token = ?1 ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(token)
        .fetch_optional(&self.db_pool)
        .await?)
    }

    /// Verificación síncrona antes de encolar o enviar.
    pub async fn ensure_dispatchable(&self, id: &str) -> DispatchResult<SenderIdentity> {
        let identity = self.get(id).await?;
        if !identity.is_active {
            return Err(DispatchError::Paused(identity.id));
        }
        if !identity.is_connected || identity.status != IdentityStatus::Connected {
            return Err(DispatchError::NotConnected(identity.id));
        }
        Ok(identity)
    }

    // ----------------------------------------------------------------
    // Alta
    // ----------------------------------------------------------------

    pub async fn create(
        &self,
        tenant_id: &str,
        req: CreateIdentityRequest,
    ) -> DispatchResult<SenderIdentity> {
        let session_name = req.session_name.trim().to_string();
        if session_name.is_empty() {
            return Err(DispatchError::Invalid("session_name is required".to_string()));
        }

        let _guard = CreationGuard::acquire(&self.creating, tenant_id, &session_name)?;

        if self.session_name_taken(tenant_id, &session_name).await? {
            return Err(DispatchError::Conflict(format!(
                "session_name '{session_name}' already exists"
            )));
        }

        let proxy_json = req
            .proxy
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Error serializando proxy")?;

        let (token, credential, status) = match req.provider_token.filter(|t| !t.is_empty()) {
            Some(token) => (Some(token), None, IdentityStatus::Disconnected),
            None => {
                let credential = self.credentials.resolve(tenant_id).await?;
                log::info!(
                    "(create) Creando sesión remota '{}' para tenant {} en {}",
                    session_name,
                    tenant_id,
                    credential.server_url
                );
                let token = self
                    .gateway
                    .create_session(&credential, &session_name, req.proxy.as_ref())
                    .await?;
                (Some(token), Some(credential), IdentityStatus::Connecting)
            }
        };

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let inserted = sqlx::query(
            r#"
            INSERT INTO sender_identities (
                id, tenant_id, session_name, provider_token, phone_number,
                is_connected, status, is_active, credential_id,
                profile_name, profile_pic_url, proxy, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, NULL, 0, ?5, 1, ?6, NULL, NULL, ?7, ?8, ?8)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&session_name)
        .bind(&token)
        .bind(status)
        .bind(credential.as_ref().map(|c| c.id.clone()))
        .bind(&proxy_json)
        .bind(&now)
        .execute(&self.db_pool)
        .await;

        if let Err(e) = inserted {
            // La sesión remota quedaría huérfana
            if let (Some(cred), Some(tok)) = (&credential, &token) {
                let _ = self
                    .gateway
                    .delete_session_best_effort(cred, tok, req.proxy.as_ref())
                    .await;
            }
            return Err(e.into());
        }

        log::info!("(create) Identidad {} ('{}') creada", id, session_name);
        self.get(&id).await
    }

    async fn session_name_taken(&self, tenant_id: &str, session_name: &str) -> DispatchResult<bool> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM sender_identities WHERE tenant_id = ?1 AND session_name = ?2",
        )
        .bind(tenant_id)
        .bind(session_name)
        .fetch_optional(&self.db_pool)
        .await?;
        Ok(row.is_some())
    }

    /// Crea la fila local de una sesión que sólo existía en el proveedor (ya conectada).
    pub async fn import_remote(
        &self,
        tenant_id: &str,
        credential: &Credential,
        remote: &RemoteSession,
    ) -> DispatchResult<SenderIdentity> {
        let phone = remote
            .phone_number
            .as_deref()
            .and_then(phone_service::canonical)
            .ok_or_else(|| DispatchError::Invalid("remote session without phone number".into()))?;

        let base_name = remote
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("imported-{phone}"));
        let mut session_name = base_name.clone();
        let mut n = 1;
        while self.session_name_taken(tenant_id, &session_name).await? {
            n += 1;
            session_name = format!("{base_name}-{n}");
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO sender_identities (
                id, tenant_id, session_name, provider_token, phone_number,
                is_connected, status, is_active, credential_id,
                profile_name, profile_pic_url, proxy, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, 1, ?7, ?8, NULL, NULL, ?9, ?9)
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&session_name)
        .bind(&remote.token)
        .bind(&phone)
        .bind(IdentityStatus::Connected)
        .bind(&credential.id)
        .bind(&remote.name)
        .bind(&now)
        .execute(&self.db_pool)
        .await
        .context("Error importando identidad remota")?;

        log::info!(
            "(import_remote) Sesión remota importada como identidad {} ({})",
            id,
            phone
        );
        self.get(&id).await
    }

    // ----------------------------------------------------------------
    // Estado
    // ----------------------------------------------------------------

    /// Consulta el estado remoto y lo guarda. Si el proveedor dice que la
    /// sesión no existe, la identidad local se borra y se devuelve `Gone`.
    pub async fn refresh_status(&self, id: &str) -> DispatchResult<RefreshOutcome> {
        let identity = self.get(id).await?;
        let token = identity.provider_token.clone().ok_or_else(|| {
            DispatchError::Invalid(format!("sender identity {id} has no provider token"))
        })?;
        let credential = self.credentials.for_identity(&identity).await?;
        let proxy = identity.proxy_config();

        match self
            .gateway
            .get_status(&credential, &token, proxy.as_ref())
            .await
        {
            Ok(remote) => self.apply_status(&identity, &remote).await,
            Err(DispatchError::Gone(reason)) => {
                log::warn!(
                    "(refresh_status) Sesión remota de {} ya no existe ({}); borrando identidad local",
                    id,
                    reason
                );
                self.delete_local(id).await?;
                Ok(RefreshOutcome::Gone {
                    identity_id: id.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Único punto de escritura de is_connected / status / phone_number.
    pub async fn apply_status(
        &self,
        identity: &SenderIdentity,
        remote: &RemoteStatus,
    ) -> DispatchResult<RefreshOutcome> {
        let phone = remote.phone_number.as_deref().and_then(phone_service::canonical);

        // Conectada sin número no cumple el invariante: se trata como "conectando"
        let (is_connected, status) = match (&phone, remote.connected) {
            (Some(_), true) => (true, IdentityStatus::Connected),
            (None, true) => (false, IdentityStatus::Connecting),
            _ if matches!(
                remote.state.as_str(),
                "connecting" | "qrcode" | "pairing" | "opening"
            ) =>
            {
                (false, IdentityStatus::Connecting)
            }
            _ => (false, IdentityStatus::Disconnected),
        };

        let newly_connected_phone = match (&phone, is_connected) {
            (Some(p), true) => {
                let known = identity.is_connected
                    && identity
                        .phone_number
                        .as_deref()
                        .map(|old| phone_service::matches(old, p))
                        .unwrap_or(false);
                (!known).then(|| p.clone())
            }
            _ => None,
        };

        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            r#"
            UPDATE sender_identities
            SET is_connected = ?2,
                status = ?3,
                phone_number = COALESCE(?4, phone_number),
                profile_name = COALESCE(?5, profile_name),
                profile_pic_url = COALESCE(?6, profile_pic_url),
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&identity.id)
        .bind(is_connected)
        .bind(status)
        .bind(&phone)
        .bind(&remote.profile_name)
        .bind(&remote.profile_pic_url)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error actualizando estado de identidad")?;

        if res.rows_affected() == 0 {
            // Borrada por otro camino mientras consultábamos al proveedor
            return Ok(RefreshOutcome::Gone {
                identity_id: identity.id.clone(),
            });
        }

        Ok(RefreshOutcome::Updated {
            identity: self.get(&identity.id).await?,
            newly_connected_phone,
        })
    }

    // ----------------------------------------------------------------
    // Pausa
    // ----------------------------------------------------------------

    pub async fn pause(&self, id: &str) -> DispatchResult<SenderIdentity> {
        self.set_active(id, false).await?;
        self.bindings.on_pause(id).await?;
        log::info!("(pause) Identidad {} pausada", id);
        self.get(id).await
    }

    /// Sólo marca la identidad; los bindings vuelven con el barrido.
    pub async fn resume(&self, id: &str) -> DispatchResult<SenderIdentity> {
        self.set_active(id, true).await?;
        log::info!("(resume) Identidad {} reactivada", id);
        self.get(id).await
    }

    async fn set_active(&self, id: &str, active: bool) -> DispatchResult<()> {
        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            "UPDATE sender_identities SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(active)
        .bind(now)
        .execute(&self.db_pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(DispatchError::NotFound(format!("sender identity {id}")));
        }
        Ok(())
    }

    // ----------------------------------------------------------------
    // Baja
    // ----------------------------------------------------------------

    /// Borrado remoto best-effort y borrado local obligatorio.
    pub async fn delete(&self, id: &str) -> DispatchResult<DeleteReport> {
        let identity = self.get(id).await?;

        let remote = match &identity.provider_token {
            Some(token) => match self.credentials.for_identity(&identity).await {
                Ok(cred) => {
                    self.gateway
                        .delete_session_best_effort(&cred, token, identity.proxy_config().as_ref())
                        .await
                }
                Err(e) => {
                    log::warn!("(delete) Sin credencial para borrar remoto {}: {}", id, e);
                    RemoteOutcome::Skipped(e)
                }
            },
            None => RemoteOutcome::Done(()),
        };

        let bindings_removed = self.delete_local(id).await?;
        let (remote_deleted, remote_error) = match remote {
            RemoteOutcome::Done(()) => (true, None),
            RemoteOutcome::Skipped(e) => (false, Some(e.to_string())),
        };

        Ok(DeleteReport {
            identity_id: id.to_string(),
            remote_deleted,
            remote_error,
            bindings_removed,
        })
    }

    /// Borra la fila local y sus bindings. Devuelve los bindings quitados.
    pub async fn delete_local(&self, id: &str) -> DispatchResult<u64> {
        let removed = self.bindings.detach_identity(id).await?;
        sqlx::query("DELETE FROM sender_identities WHERE id = ?1")
            .bind(id)
            .execute(&self.db_pool)
            .await
            .context("Error borrando identidad local")?;
        log::info!("(delete_local) Identidad {} borrada ({} bindings)", id, removed);
        Ok(removed)
    }
}

/// Marca un create remoto en curso y lo libera al salir de scope.
struct CreationGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl CreationGuard {
    fn acquire(
        in_flight: &Arc<Mutex<HashSet<String>>>,
        tenant_id: &str,
        session_name: &str,
    ) -> DispatchResult<Self> {
        let key = format!("{tenant_id}/{session_name}");
        let mut set = in_flight
            .lock()
            .map_err(|_| DispatchError::Internal(anyhow::anyhow!("creation lock poisoned")))?;
        if !set.insert(key.clone()) {
            return Err(DispatchError::Conflict(format!(
                "session '{session_name}' is already being created"
            )));
        }
        Ok(Self {
            key,
            in_flight: in_flight.clone(),
        })
    }
}

impl Drop for CreationGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.key);
        }
    }
}
