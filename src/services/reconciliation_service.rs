//! services/reconciliation_service.rs
//! Resuelve conflictos cuando dos identidades resultan ser el mismo número.
//! Se invoca al detectar una conexión nueva y también bajo demanda; ambos
//! caminos pasan por `reconcile`.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::Mutex as AsyncMutex;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        credential_model::Credential,
        identity_model::{RemoteSession, RemoteStatus, SenderIdentity},
        reconcile_model::{MatchAction, ReconcileReport, Resolution},
    },
    services::{
        identity_service::IdentityService,
        phone_service,
        provider_client::RemoteOutcome,
    },
};

/// Otra identidad con el mismo número.
#[derive(Debug, Clone)]
struct DuplicateMatch {
    token: String,
    local: Option<SenderIdentity>,
    remote: Option<RemoteSession>,
    connected: bool,
}

/// Lock asíncrono por clave (tenant + teléfono canónico). Las entradas se
/// limpian cuando nadie más las usa.
#[derive(Clone, Default)]
struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release(&self, key: &str) {
        let mut map = match self.inner.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };
        // 1 = la referencia del propio mapa
        if map.get(key).map(|l| Arc::strong_count(l) == 1).unwrap_or(false) {
            map.remove(key);
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationService {
    identities: IdentityService,
    locks: KeyedLocks,
}

impl ReconciliationService {
    pub fn new(identities: IdentityService) -> Self {
        Self {
            identities,
            locks: KeyedLocks::default(),
        }
    }

    /// Reconcilia la identidad `identity_id` contra todas las que comparten su número.
    /// Ejecuciones concurrentes para el mismo (tenant, número) se serializan.
    pub async fn reconcile(&self, identity_id: &str) -> DispatchResult<ReconcileReport> {
        let identity = self.identities.get(identity_id).await?;
        let Some(phone) = identity
            .phone_number
            .as_deref()
            .and_then(phone_service::canonical)
        else {
            return Ok(ReconcileReport::no_duplicates(identity_id, None));
        };

        let key = format!("{}/{}", identity.tenant_id, phone);
        let lock = self.locks.handle(&key);
        let result = {
            let _held = lock.lock().await;
            self.reconcile_locked(identity_id, &phone).await
        };
        drop(lock);
        self.locks.release(&key);
        result
    }

    async fn reconcile_locked(&self, identity_id: &str, phone: &str) -> DispatchResult<ReconcileReport> {
        // Otra ejecución pudo haberla borrado mientras esperábamos el lock
        let Some(identity) = self.identities.find(identity_id).await? else {
            log::info!(
                "(reconcile) Identidad {} ya no existe; nada que reconciliar",
                identity_id
            );
            return Ok(ReconcileReport::no_duplicates(identity_id, Some(phone.to_string())));
        };
        if !identity.is_connected {
            return Ok(ReconcileReport::no_duplicates(identity_id, Some(phone.to_string())));
        }

        let credential = self
            .identities
            .credentials()
            .resolve(&identity.tenant_id)
            .await?;

        // Sin listado remoto no se toca nada
        let remote_sessions = match self.identities.gateway().list_sessions(&credential).await {
            Ok(list) => list,
            Err(e) => {
                log::error!(
                    "(reconcile) No se pudo listar sesiones remotas para {}: {}. Se aborta sin cambios",
                    identity_id,
                    e
                );
                return Err(e);
            }
        };

        let (matches, mut actions) = self
            .collect_matches(&identity, phone, &remote_sessions)
            .await?;

        if matches.is_empty() && actions.is_empty() {
            return Ok(ReconcileReport::no_duplicates(identity_id, Some(phone.to_string())));
        }

        let (connected, stale): (Vec<_>, Vec<_>) = matches.into_iter().partition(|m| m.connected);

        // Las viejas desconectadas sobran en cualquier caso
        for m in &stale {
            actions.push(self.delete_match(&credential, m).await?);
        }

        let mut identity_kept = true;
        let resolution = if connected.is_empty() {
            if stale.is_empty() {
                Resolution::NoDuplicates
            } else {
                log::info!(
                    "(reconcile) {} conserva el número {}; {} identidad(es) vieja(s) borradas",
                    identity_id,
                    phone,
                    stale.len()
                );
                Resolution::KeptNewDeletedOld
            }
        } else {
            let winner = pick_winner(&identity, &connected);
            let winner_token = match winner {
                Winner::Match(w) => Some(w.token.as_str()),
                Winner::Identity => None,
            };

            // Las conectadas más nuevas que la ganadora: las filas locales se borran,
            // las que sólo existen en el proveedor no son nuestras y quedan igual
            for other in connected
                .iter()
                .filter(|m| Some(m.token.as_str()) != winner_token)
            {
                if other.local.is_some() {
                    actions.push(self.delete_match(&credential, other).await?);
                } else {
                    log::warn!(
                        "(reconcile) Más de una sesión conectada con {}; {} queda sin tocar",
                        phone,
                        other.token
                    );
                    actions.push(MatchAction::LeftUntouched {
                        token: other.token.clone(),
                    });
                }
            }

            if let Winner::Match(winner) = winner {
                actions.push(self.keep_winner(&identity, &credential, winner).await?);
                actions.push(self.delete_identity(&credential, &identity).await?);
                identity_kept = false;
                log::info!(
                    "(reconcile) {} pierde contra {} (ya conectada); identidad nueva borrada",
                    identity_id,
                    winner.token
                );
            }
            Resolution::KeptOldConnected
        };

        Ok(ReconcileReport {
            identity_id: identity_id.to_string(),
            phone_number: Some(phone.to_string()),
            resolution,
            identity_kept,
            actions,
        })
    }

    /// Junta coincidencias remotas y locales (por token). Las locales que no
    /// aparecen en el listado se clasifican consultando su estado.
    async fn collect_matches(
        &self,
        identity: &SenderIdentity,
        phone: &str,
        remote_sessions: &[RemoteSession],
    ) -> DispatchResult<(Vec<DuplicateMatch>, Vec<MatchAction>)> {
        let own_token = identity.provider_token.as_deref();
        let mut by_token: HashMap<String, DuplicateMatch> = HashMap::new();
        let mut skipped = Vec::new();

        for remote in remote_sessions {
            let same_phone = remote
                .phone_number
                .as_deref()
                .map(|p| phone_service::matches(p, phone))
                .unwrap_or(false);
            if !same_phone || Some(remote.token.as_str()) == own_token {
                continue;
            }
            let local = match self.identities.find_by_token(&identity.tenant_id, &remote.token).await? {
                Some(own) => Some(own),
                None => match self.identities.find_by_token_any(&remote.token).await? {
                    // Sesión de otro tenant bajo la misma credencial: no se importa ni se borra
                    Some(foreign) => {
                        log::warn!(
                            "(reconcile) La sesión {} con {} pertenece al tenant {}; queda sin tocar",
                            remote.token,
                            phone,
                            foreign.tenant_id
                        );
                        skipped.push(MatchAction::LeftUntouched {
                            token: remote.token.clone(),
                        });
                        continue;
                    }
                    None => None,
                },
            };
            by_token.insert(
                remote.token.clone(),
                DuplicateMatch {
                    token: remote.token.clone(),
                    local,
                    remote: Some(remote.clone()),
                    connected: remote.is_connected(),
                },
            );
        }

        for local in self.identities.list(&identity.tenant_id).await? {
            if local.id == identity.id {
                continue;
            }
            let Some(token) = local.provider_token.clone() else {
                continue;
            };
            let same_phone = local
                .phone_number
                .as_deref()
                .map(|p| phone_service::matches(p, phone))
                .unwrap_or(false);
            if !same_phone || Some(token.as_str()) == own_token || by_token.contains_key(&token) {
                continue;
            }

            // No figura bajo la credencial del tenant: preguntar por su propia credencial
            let status = match self.identities.credentials().for_identity(&local).await {
                Ok(cred) => {
                    self.identities
                        .gateway()
                        .get_status(&cred, &token, local.proxy_config().as_ref())
                        .await
                }
                Err(e) => Err(e),
            };
            let connected = match status {
                Ok(RemoteStatus { connected, .. }) => connected,
                Err(DispatchError::Gone(_)) => false,
                Err(e) => {
                    log::warn!(
                        "(reconcile) No se pudo clasificar la identidad local {}: {}",
                        local.id,
                        e
                    );
                    skipped.push(MatchAction::Skipped {
                        token,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            by_token.insert(
                token.clone(),
                DuplicateMatch {
                    token,
                    local: Some(local),
                    remote: None,
                    connected,
                },
            );
        }

        let mut matches: Vec<_> = by_token.into_values().collect();
        matches.sort_by(|a, b| a.token.cmp(&b.token));
        Ok((matches, skipped))
    }

    /// Asegura que la ganadora exista localmente y figure conectada.
    async fn keep_winner(
        &self,
        identity: &SenderIdentity,
        credential: &Credential,
        winner: &DuplicateMatch,
    ) -> DispatchResult<MatchAction> {
        match (&winner.local, &winner.remote) {
            (Some(local), _) => {
                if !local.is_connected {
                    let phone = winner
                        .remote
                        .as_ref()
                        .and_then(|r| r.phone_number.clone())
                        .or_else(|| local.phone_number.clone());
                    let status = RemoteStatus {
                        connected: true,
                        phone_number: phone,
                        profile_name: None,
                        profile_pic_url: None,
                        state: "connected".to_string(),
                    };
                    self.identities.apply_status(local, &status).await?;
                }
                Ok(MatchAction::Kept {
                    token: winner.token.clone(),
                    local_id: Some(local.id.clone()),
                    imported: false,
                })
            }
            (None, Some(remote)) => {
                let imported = self
                    .identities
                    .import_remote(&identity.tenant_id, credential, remote)
                    .await?;
                Ok(MatchAction::Kept {
                    token: winner.token.clone(),
                    local_id: Some(imported.id),
                    imported: true,
                })
            }
            (None, None) => Err(DispatchError::Internal(anyhow::anyhow!(
                "duplicate match {} without local or remote record",
                winner.token
            ))),
        }
    }

    async fn delete_match(
        &self,
        credential: &Credential,
        m: &DuplicateMatch,
    ) -> DispatchResult<MatchAction> {
        match &m.local {
            Some(local) => self.delete_identity(credential, local).await,
            None => {
                let outcome = self
                    .identities
                    .gateway()
                    .delete_session_best_effort(credential, &m.token, None)
                    .await;
                Ok(MatchAction::Deleted {
                    token: m.token.clone(),
                    local_id: None,
                    remote_deleted: outcome.is_done(),
                })
            }
        }
    }

    /// Borrado remoto best-effort (con la credencial propia si la hay) y local obligatorio.
    async fn delete_identity(
        &self,
        tenant_credential: &Credential,
        identity: &SenderIdentity,
    ) -> DispatchResult<MatchAction> {
        let token = identity.provider_token.clone().unwrap_or_default();
        let remote_deleted = if token.is_empty() {
            true
        } else {
            let credential = match self.identities.credentials().for_identity(identity).await {
                Ok(c) => c,
                Err(_) => tenant_credential.clone(),
            };
            let outcome = self
                .identities
                .gateway()
                .delete_session_best_effort(&credential, &token, identity.proxy_config().as_ref())
                .await;
            matches!(outcome, RemoteOutcome::Done(()))
        };

        self.identities.delete_local(&identity.id).await?;
        Ok(MatchAction::Deleted {
            token,
            local_id: Some(identity.id.clone()),
            remote_deleted,
        })
    }
}

#[derive(Clone, Copy)]
enum Winner<'a> {
    Identity,
    Match(&'a DuplicateMatch),
}

/// Gana la más vieja entre la identidad y sus coincidencias conectadas, por
/// `created_at` local. Las que sólo existen en el proveedor no tienen fecha y se
/// consideran anteriores; en empate gana la coincidencia ya existente.
fn pick_winner<'a>(identity: &SenderIdentity, connected: &'a [DuplicateMatch]) -> Winner<'a> {
    let oldest = connected.iter().min_by(|a, b| {
        let ka = a.local.as_ref().map(|l| l.created_at.as_str());
        let kb = b.local.as_ref().map(|l| l.created_at.as_str());
        ka.cmp(&kb).then_with(|| a.token.cmp(&b.token))
    });
    match oldest {
        Some(m) if m.local.as_ref().map(|l| l.created_at.as_str())
            <= Some(identity.created_at.as_str()) =>
        {
            Winner::Match(m)
        }
        _ => Winner::Identity,
    }
}
