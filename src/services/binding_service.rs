use anyhow::Context;
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::{
    errors::{DispatchError, DispatchResult},
    models::binding_model::{TemplateBinding, REMOVAL_INSTANCE_PAUSED},
};

/// Activa/desactiva los bindings campaña-identidad al ritmo de la pausa de la identidad.
#[derive(Clone, Debug)]
pub struct BindingService {
    db_pool: Pool<Sqlite>,
}

impl BindingService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        BindingService { db_pool }
    }

    pub async fn bind(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        instance_id: &str,
    ) -> DispatchResult<TemplateBinding> {
        let owned: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM sender_identities WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(instance_id)
        .bind(tenant_id)
        .fetch_optional(&self.db_pool)
        .await?;
        if owned.is_none() {
            return Err(DispatchError::NotFound(format!(
                "sender identity {instance_id}"
            )));
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO template_bindings (
                campaign_id, instance_id, tenant_id, is_active,
                removed_at, removal_reason, created_at
            )
            VALUES (?1, ?2, ?3, 1, NULL, NULL, ?4)
            ON CONFLICT (campaign_id, instance_id) DO UPDATE SET
                is_active = 1,
                removed_at = NULL,
                removal_reason = NULL
            "#,
        )
        .bind(campaign_id)
        .bind(instance_id)
        .bind(tenant_id)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error creando template_binding")?;

        self.get(campaign_id, instance_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("binding {campaign_id}/{instance_id}")))
    }

    pub async fn get(
        &self,
        campaign_id: &str,
        instance_id: &str,
    ) -> DispatchResult<Option<TemplateBinding>> {
        Ok(sqlx::query_as::<_, TemplateBinding>(
            r#"
            SELECT campaign_id, instance_id, tenant_id, is_active,
                   removed_at, removal_reason, created_at
            FROM template_bindings
            WHERE campaign_id = ?1 AND instance_id = ?2
            "#,
        )
        .bind(campaign_id)
        .bind(instance_id)
        .fetch_optional(&self.db_pool)
        .await?)
    }

    pub async fn list_for_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
    ) -> DispatchResult<Vec<TemplateBinding>> {
        Ok(sqlx::query_as::<_, TemplateBinding>(
            r#"
            SELECT campaign_id, instance_id, tenant_id, is_active,
                   removed_at, removal_reason, created_at
            FROM template_bindings
            WHERE tenant_id = ?1 AND campaign_id = ?2
            ORDER BY created_at, instance_id
            "#,
        )
        .bind(tenant_id)
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    /// Desactiva todos los bindings activos de la identidad. Devuelve cuántos cambió.
    pub async fn on_pause(&self, instance_id: &str) -> DispatchResult<u64> {
        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            r#"
            UPDATE template_bindings
            SET is_active = 0,
                removed_at = ?2,
                removal_reason = ?3
            WHERE instance_id = ?1 AND is_active = 1
            "#,
        )
        .bind(instance_id)
        .bind(now)
        .bind(REMOVAL_INSTANCE_PAUSED)
        .execute(&self.db_pool)
        .await
        .context("Error desactivando bindings por pausa")?;

        log::info!(
            "(on_pause) {} binding(s) desactivados para identidad {}",
            res.rows_affected(),
            instance_id
        );
        Ok(res.rows_affected())
    }

    /// Restaura los bindings pausados por `on_pause` si la identidad está activa y conectada.
    /// Los desactivados por otro motivo no se tocan.
    pub async fn on_resume(&self, instance_id: &str) -> DispatchResult<u64> {
        let restored = self.restore_paused(Some(instance_id)).await?;
        if restored > 0 {
            log::info!(
                "(on_resume) {} binding(s) reactivados para identidad {}",
                restored,
                instance_id
            );
        }
        Ok(restored)
    }

    /// Barrido periódico: `on_resume` para todas las identidades a la vez.
    pub async fn sweep(&self) -> DispatchResult<u64> {
        let restored = self.restore_paused(None).await?;
        if restored > 0 {
            log::info!("(sweep) {} binding(s) reactivados", restored);
        }
        Ok(restored)
    }

    /// `None` = todas las identidades.
    async fn restore_paused(&self, instance_id: Option<&str>) -> DispatchResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE template_bindings
            SET is_active = 1,
                removed_at = NULL,
                removal_reason = NULL
            WHERE is_active = 0
              AND removal_reason = ?1
              AND (?2 IS NULL OR instance_id = ?2)
              AND EXISTS (
                  SELECT 1 FROM sender_identities si
                  WHERE si.id = template_bindings.instance_id
                    AND si.is_active = 1
                    AND si.is_connected = 1
              )
            "#,
        )
        .bind(REMOVAL_INSTANCE_PAUSED)
        .bind(instance_id)
        .execute(&self.db_pool)
        .await
        .context("Error reactivando bindings")?;
        Ok(res.rows_affected())
    }

    /// Quita la identidad de todas las campañas (al borrarla).
    pub async fn detach_identity(&self, instance_id: &str) -> DispatchResult<u64> {
        let res = sqlx::query("DELETE FROM template_bindings WHERE instance_id = ?1")
            .bind(instance_id)
            .execute(&self.db_pool)
            .await
            .context("Error quitando bindings de la identidad")?;
        Ok(res.rows_affected())
    }
}
