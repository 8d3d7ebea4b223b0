//! services/restriction_service.rs
//! Lista de bloqueo por tenant. Ante cualquier error interno, el número se
//! reporta bloqueado (fail-closed).

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::restriction_model::{
        RestrictionBlockCount, RestrictionEntry, RestrictionReport, RestrictionResult,
    },
    services::phone_service,
};

/// Lectura de las entradas de restricción vigentes.
#[async_trait]
pub trait RestrictionStore: Send + Sync {
    /// Entradas de listas activas que aplican a alguna de las identidades
    /// (las listas sin identidades asignadas aplican a todas).
    async fn active_entries(
        &self,
        tenant_id: &str,
        identity_ids: &[String],
    ) -> Result<Vec<RestrictionEntry>>;
}

#[derive(Clone, Debug)]
pub struct SqliteRestrictionStore {
    db_pool: Pool<Sqlite>,
}

impl SqliteRestrictionStore {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl RestrictionStore for SqliteRestrictionStore {
    async fn active_entries(
        &self,
        tenant_id: &str,
        identity_ids: &[String],
    ) -> Result<Vec<RestrictionEntry>> {
        let scoped_ids = serde_json::to_string(identity_ids)?;
        let rows = sqlx::query_as::<_, RestrictionEntry>(
            r#"
            SELECT e.tenant_id,
                   e.phone_number AS phone_number_or_pattern,
                   e.list_id,
                   l.name AS list_name
            FROM restriction_entries e
            JOIN restriction_lists l ON l.id = e.list_id
            WHERE e.tenant_id = ?1
              AND l.is_active = 1
              AND (
                  NOT EXISTS (
                      SELECT 1 FROM restriction_list_instances li WHERE li.list_id = l.id
                  )
                  OR EXISTS (
                      SELECT 1 FROM restriction_list_instances li
                      WHERE li.list_id = l.id
                        AND li.instance_id IN (SELECT value FROM json_each(?2))
                  )
              )
            "#,
        )
        .bind(tenant_id)
        .bind(scoped_ids)
        .fetch_all(&self.db_pool)
        .await
        .context("Error leyendo restriction_entries")?;
        Ok(rows)
    }
}

/// Una entrada bloquea el número si es un prefijo (`5562*`) que cubre alguna
/// variante, o si es un número equivalente.
fn entry_blocks(entry: &str, phone: &str) -> bool {
    match entry.trim().strip_suffix('*') {
        Some(prefix) => {
            let prefix: String = prefix.chars().filter(|c| c.is_ascii_digit()).collect();
            !prefix.is_empty()
                && phone_service::variants(phone)
                    .iter()
                    .any(|v| v.starts_with(&prefix))
        }
        None => phone_service::matches(entry, phone),
    }
}

#[derive(Clone)]
pub struct RestrictionService {
    db_pool: Pool<Sqlite>,
    store: Arc<dyn RestrictionStore>,
}

impl RestrictionService {
    pub fn new(db_pool: Pool<Sqlite>, store: Arc<dyn RestrictionStore>) -> Self {
        Self { db_pool, store }
    }

    /// Evalúa cada número. Nunca devuelve error: si la evaluación falla,
    /// todos los números consultados salen bloqueados.
    pub async fn check(
        &self,
        tenant_id: &str,
        phone_numbers: &[String],
        identity_ids: &[String],
    ) -> RestrictionReport {
        match self.evaluate(tenant_id, phone_numbers, identity_ids).await {
            Ok(report) => report,
            Err(e) => {
                log::error!(
                    "(check) Falló la evaluación de restricciones para tenant {}: {:?}. Bloqueando {} número(s)",
                    tenant_id,
                    e,
                    phone_numbers.len()
                );
                phone_numbers
                    .iter()
                    .map(|p| {
                        (
                            p.clone(),
                            RestrictionResult {
                                blocked: true,
                                list_names: Vec::new(),
                                error: Some(format!("restriction check unavailable: {e}")),
                            },
                        )
                    })
                    .collect()
            }
        }
    }

    async fn evaluate(
        &self,
        tenant_id: &str,
        phone_numbers: &[String],
        identity_ids: &[String],
    ) -> Result<RestrictionReport> {
        let entries = self.store.active_entries(tenant_id, identity_ids).await?;

        let mut report = RestrictionReport::new();
        for phone in phone_numbers {
            let mut list_names: Vec<String> = entries
                .iter()
                .filter(|e| entry_blocks(&e.phone_number_or_pattern, phone))
                .map(|e| e.list_name.clone())
                .collect();
            list_names.sort();
            list_names.dedup();

            report.insert(
                phone.clone(),
                RestrictionResult {
                    blocked: !list_names.is_empty(),
                    list_names,
                    error: None,
                },
            );
        }
        Ok(report)
    }

    /// Atajo para un único envío: `Err(Restricted)` si está bloqueado.
    pub async fn ensure_allowed(
        &self,
        tenant_id: &str,
        phone_number: &str,
        identity_id: &str,
    ) -> DispatchResult<()> {
        let phones = vec![phone_number.to_string()];
        let report = self
            .check(tenant_id, &phones, &[identity_id.to_string()])
            .await;
        // Un número ausente del reporte también cuenta como bloqueado
        let result = report.get(phone_number).cloned().unwrap_or(RestrictionResult {
            blocked: true,
            list_names: Vec::new(),
            error: Some("missing restriction result".to_string()),
        });
        if !result.blocked {
            return Ok(());
        }

        let list_names = if result.list_names.is_empty() {
            vec![result
                .error
                .unwrap_or_else(|| "restriction check unavailable".to_string())]
        } else {
            result.list_names
        };
        self.record_block(tenant_id, Some(identity_id), phone_number, &list_names)
            .await;
        Err(DispatchError::Restricted {
            phone_number: phone_number.to_string(),
            list_names,
        })
    }

    /// Registro para reportes; un fallo aquí no cambia la decisión de bloqueo.
    pub async fn record_block(
        &self,
        tenant_id: &str,
        instance_id: Option<&str>,
        phone_number: &str,
        list_names: &[String],
    ) {
        let res = sqlx::query(
            r#"
            INSERT INTO restriction_blocks (
                id, tenant_id, instance_id, phone_number, list_names, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(instance_id)
        .bind(phone_number)
        .bind(list_names.join(", "))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await;

        if let Err(e) = res {
            log::warn!("(record_block) No se pudo registrar bloqueo de {}: {}", phone_number, e);
        }
    }

    pub async fn block_counts(&self, tenant_id: &str) -> DispatchResult<Vec<RestrictionBlockCount>> {
        Ok(sqlx::query_as::<_, RestrictionBlockCount>(
            r#"
            SELECT list_names, COUNT(*) AS blocked
            FROM restriction_blocks
            WHERE tenant_id = ?1
            GROUP BY list_names
            ORDER BY blocked DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db_pool)
        .await?)
    }
}
