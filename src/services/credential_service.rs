use sqlx::{Pool, Sqlite};

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{credential_model::Credential, identity_model::SenderIdentity},
};

/// Resuelve qué credencial del proveedor usa un tenant. Sólo lectura:
/// la asignación puede cambiar entre llamadas, así que no se cachea.
#[derive(Clone, Debug)]
pub struct CredentialService {
    db_pool: Pool<Sqlite>,
}

impl CredentialService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        CredentialService { db_pool }
    }

    /// Credencial asignada al tenant; si no tiene, la default activa.
    pub async fn resolve(&self, tenant_id: &str) -> DispatchResult<Credential> {
        let assigned = sqlx::query_as::<_, Credential>(
            r#"
            SELECT c.id, c.server_url, c.admin_token, c.is_default, c.is_active
            FROM tenant_credentials tc
            JOIN credentials c ON c.id = tc.credential_id
            WHERE tc.tenant_id = ?1 AND c.is_active = 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.db_pool)
        .await?;

        if let Some(cred) = assigned {
            return Ok(cred);
        }

        sqlx::query_as::<_, Credential>(
            r#"
            SELECT id, server_url, admin_token, is_default, is_active
            FROM credentials
            WHERE is_default = 1 AND is_active = 1
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.db_pool)
        .await?
        .ok_or_else(|| {
            DispatchError::NotFound(format!("no provider credential available for tenant {tenant_id}"))
        })
    }

    pub async fn get(&self, credential_id: &str) -> DispatchResult<Option<Credential>> {
        Ok(sqlx::query_as::<_, Credential>(
            r#"
            SELECT id, server_url, admin_token, is_default, is_active
            FROM credentials
            WHERE id = ?1
            "#,
        )
        .bind(credential_id)
        .fetch_optional(&self.db_pool)
        .await?)
    }

    /// La credencial con la que se creó la identidad (si sigue activa);
    /// si no, la que tenga hoy el tenant.
    pub async fn for_identity(&self, identity: &SenderIdentity) -> DispatchResult<Credential> {
        if let Some(cred_id) = &identity.credential_id {
            if let Some(cred) = self.get(cred_id).await? {
                if cred.is_active {
                    return Ok(cred);
                }
                log::info!(
                    "(for_identity) Credencial {} de la identidad {} está inactiva; se usa la del tenant",
                    cred_id,
                    identity.id
                );
            }
        }
        self.resolve(&identity.tenant_id).await
    }
}
