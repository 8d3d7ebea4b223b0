//! tests/support.rs
//! Helpers compartidos: pool en memoria, proveedor falso y datos semilla.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use uuid::Uuid;

use crate::{
    bootstrap::{run_migrations, AppServices},
    config::dispatch_config::DispatchConfig,
    errors::{DispatchError, DispatchResult},
    models::{
        credential_model::Credential,
        identity_model::{ProxyConfig, RemoteSession, RemoteStatus},
        queue_model::MessagePayload,
        send_model::SendOutcome,
    },
    services::provider_client::ProviderClient,
};

pub const TENANT: &str = "tenant-1";
pub const CREDENTIAL: &str = "cred-1";
pub const PHONE: &str = "5562999991111";

/// Una sola conexión: cada conexión a `sqlite::memory:` es una base distinta.
pub async fn test_pool() -> Pool<Sqlite> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("no se pudo abrir SQLite en memoria");
    run_migrations(&pool).await.expect("migraciones");
    pool
}

pub async fn test_services(provider: Arc<FakeProvider>) -> (Pool<Sqlite>, AppServices) {
    let pool = test_pool().await;
    seed_credential(&pool, CREDENTIAL, true).await;
    let services = AppServices::build(pool.clone(), provider, &DispatchConfig::default());
    (pool, services)
}

// --------------------------------------------------------------------------------
// Proveedor falso
// --------------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeState {
    /// Sesiones que devuelve `list_sessions`, por token
    pub sessions: BTreeMap<String, RemoteSession>,
    pub list_fails: bool,
    pub send_unavailable: bool,
    pub deleted: Vec<String>,
    pub sent: Vec<(String, String)>,
    pub created: Vec<String>,
}

#[derive(Default)]
pub struct FakeProvider {
    pub state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_session(&self, token: &str, phone: Option<&str>, status: &str) {
        let mut st = self.state.lock().unwrap();
        st.sessions.insert(
            token.to_string(),
            RemoteSession {
                token: token.to_string(),
                phone_number: phone.map(str::to_string),
                status: status.to_string(),
                name: None,
            },
        );
    }

    pub fn set_list_fails(&self, fails: bool) {
        self.state.lock().unwrap().list_fails = fails;
    }

    pub fn set_send_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().send_unavailable = unavailable;
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn create_session(
        &self,
        _credential: &Credential,
        session_name: &str,
        _proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<String> {
        let token = format!("tok-{session_name}");
        self.put_session(&token, None, "connecting");
        self.state.lock().unwrap().created.push(session_name.to_string());
        Ok(token)
    }

    async fn get_status(
        &self,
        _credential: &Credential,
        token: &str,
        _proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<RemoteStatus> {
        let st = self.state.lock().unwrap();
        let session = st
            .sessions
            .get(token)
            .ok_or_else(|| DispatchError::Gone(token.to_string()))?;
        Ok(RemoteStatus {
            connected: session.is_connected(),
            phone_number: session.phone_number.clone(),
            profile_name: None,
            profile_pic_url: None,
            state: session.status.clone(),
        })
    }

    async fn send_message(
        &self,
        _credential: &Credential,
        token: &str,
        target: &str,
        _payload: &MessagePayload,
        _proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<SendOutcome> {
        let mut st = self.state.lock().unwrap();
        if st.send_unavailable {
            return Err(DispatchError::RemoteUnavailable("connection reset".into()));
        }
        st.sent.push((token.to_string(), target.to_string()));
        Ok(SendOutcome {
            success: true,
            remote_message_id: Some(format!("msg-{}", st.sent.len())),
            error: None,
        })
    }

    async fn delete_session(
        &self,
        _credential: &Credential,
        token: &str,
        _proxy: Option<&ProxyConfig>,
    ) -> DispatchResult<()> {
        let mut st = self.state.lock().unwrap();
        if st.sessions.remove(token).is_none() {
            return Err(DispatchError::Gone(token.to_string()));
        }
        st.deleted.push(token.to_string());
        Ok(())
    }

    async fn list_sessions(&self, _credential: &Credential) -> DispatchResult<Vec<RemoteSession>> {
        let st = self.state.lock().unwrap();
        if st.list_fails {
            return Err(DispatchError::RemoteUnavailable("list timed out".into()));
        }
        Ok(st.sessions.values().cloned().collect())
    }
}

// --------------------------------------------------------------------------------
// Datos semilla
// --------------------------------------------------------------------------------

pub async fn seed_credential(pool: &Pool<Sqlite>, id: &str, is_default: bool) {
    sqlx::query(
        r#"
        INSERT INTO credentials (id, server_url, admin_token, is_default, is_active, created_at)
        VALUES (?1, 'http://provider.test', 'admin-secret', ?2, 1, ?3)
        "#,
    )
    .bind(id)
    .bind(is_default)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
}

pub async fn assign_credential(pool: &Pool<Sqlite>, tenant_id: &str, credential_id: &str) {
    sqlx::query(
        "INSERT INTO tenant_credentials (tenant_id, credential_id, assigned_at) VALUES (?1, ?2, ?3)",
    )
    .bind(tenant_id)
    .bind(credential_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .unwrap();
}

/// Fila de identidad con control total sobre el estado y la fecha de alta.
pub struct IdentitySeed<'a> {
    pub tenant_id: &'a str,
    pub session_name: &'a str,
    pub token: &'a str,
    pub phone: Option<&'a str>,
    pub connected: bool,
    pub created_at: &'a str,
}

impl<'a> IdentitySeed<'a> {
    pub fn connected(session_name: &'a str, token: &'a str, created_at: &'a str) -> Self {
        Self {
            tenant_id: TENANT,
            session_name,
            token,
            phone: Some(PHONE),
            connected: true,
            created_at,
        }
    }

    pub fn disconnected(session_name: &'a str, token: &'a str, created_at: &'a str) -> Self {
        Self {
            connected: false,
            ..Self::connected(session_name, token, created_at)
        }
    }
}

pub async fn seed_identity(pool: &Pool<Sqlite>, seed: IdentitySeed<'_>) -> String {
    let id = Uuid::new_v4().to_string();
    let status = if seed.connected { "connected" } else { "disconnected" };
    sqlx::query(
        r#"
        INSERT INTO sender_identities (
            id, tenant_id, session_name, provider_token, phone_number,
            is_connected, status, is_active, credential_id,
            profile_name, profile_pic_url, proxy, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, NULL, NULL, NULL, ?9, ?9)
        "#,
    )
    .bind(&id)
    .bind(seed.tenant_id)
    .bind(seed.session_name)
    .bind(seed.token)
    .bind(seed.phone)
    .bind(seed.connected)
    .bind(status)
    .bind(CREDENTIAL)
    .bind(seed.created_at)
    .execute(pool)
    .await
    .unwrap();
    id
}

/// Crea una lista activa con sus entradas. `instances` vacío = aplica a todas.
pub async fn seed_restriction_list(
    pool: &Pool<Sqlite>,
    tenant_id: &str,
    name: &str,
    entries: &[&str],
    instances: &[&str],
) -> String {
    let list_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO restriction_lists (id, tenant_id, name, is_active, created_at) VALUES (?1, ?2, ?3, 1, ?4)",
    )
    .bind(&list_id)
    .bind(tenant_id)
    .bind(name)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();

    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO restriction_entries (id, tenant_id, list_id, phone_number, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(&list_id)
        .bind(entry)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    for instance in instances {
        sqlx::query("INSERT INTO restriction_list_instances (list_id, instance_id) VALUES (?1, ?2)")
            .bind(&list_id)
            .bind(instance)
            .execute(pool)
            .await
            .unwrap();
    }
    list_id
}

pub fn text(body: &str) -> MessagePayload {
    MessagePayload::Text {
        text: body.to_string(),
    }
}
