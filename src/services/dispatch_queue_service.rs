//! services/dispatch_queue_service.rs
//! Cola de despacho por (tenant, tipo de operación) con ritmo configurable en caliente.
//! Un solo item en vuelo por partición; las particiones se atienden en round-robin.
//! Los fallidos no se reintentan solos: sólo con `retry` / `retry_all`.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tokio::{sync::Mutex, task::JoinHandle};
use uuid::Uuid;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::queue_model::{
        DispatchAttempt, DispatchPayload, DispatchQueueItem, OperationType, QueueFilter,
        QueueItemStatus, QueueStatusSummary,
    },
};

const SELECT_ITEM: &str = r#"
    SELECT id, tenant_id, operation_type, payload, status, attempts,
           error_message, created_at, updated_at
    FROM dispatch_queue
"#;

/// Quien ejecuta cada item. Devuelve el id remoto del mensaje, si hay.
#[async_trait]
pub trait DispatchExecutor: Send + Sync {
    async fn execute(&self, item: &DispatchQueueItem) -> DispatchResult<Option<String>>;
}

type PartitionKey = (String, OperationType);

#[derive(Clone)]
pub struct DispatchQueueService {
    db_pool: Pool<Sqlite>,
    interval_ms: Arc<AtomicU64>,
    /// Última partición atendida (round-robin) y exclusión del claim en este proceso
    cursor: Arc<Mutex<Option<PartitionKey>>>,
}

impl DispatchQueueService {
    pub fn new(db_pool: Pool<Sqlite>, interval_ms: u64) -> Self {
        DispatchQueueService {
            db_pool,
            interval_ms: Arc::new(AtomicU64::new(interval_ms.max(1))),
            cursor: Arc::new(Mutex::new(None)),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
    }

    /// Cambia el ritmo de los workers; aplica desde el próximo ciclo.
    pub fn set_interval(&self, interval_ms: u64) -> DispatchResult<()> {
        if interval_ms == 0 {
            return Err(DispatchError::Invalid("interval_ms must be greater than 0".into()));
        }
        self.interval_ms.store(interval_ms, Ordering::Relaxed);
        log::info!("(set_interval) Intervalo de la cola ahora es {}ms", interval_ms);
        Ok(())
    }

    // ----------------------------------------------------------------
    // Encolar
    // ----------------------------------------------------------------

    pub async fn enqueue(&self, tenant_id: &str, payload: &DispatchPayload) -> DispatchResult<String> {
        if let DispatchPayload::ProvisionIdentity { session_name, .. } = payload {
            self.ensure_no_pending_provisioning(tenant_id, session_name)
                .await?;
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let payload_json = serde_json::to_string(payload).context("Error serializando payload")?;

        sqlx::query(
            r#"
            INSERT INTO dispatch_queue (
                id, tenant_id, operation_type, payload, status,
                attempts, error_message, position, created_at, updated_at
            )
            VALUES (
                ?1, ?2, ?3, ?4, 'queued', 0, NULL,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM dispatch_queue),
                ?5, ?5
            )
            "#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(payload.operation_type())
        .bind(payload_json)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Fallo al insertar item en dispatch_queue")?;

        log::debug!(
            "(enqueue) Item {} encolado ({:?}) para tenant {}",
            id,
            payload.operation_type(),
            tenant_id
        );
        Ok(id)
    }

    /// Un único create remoto por session_name: no se encola otro mientras haya uno pendiente.
    async fn ensure_no_pending_provisioning(
        &self,
        tenant_id: &str,
        session_name: &str,
    ) -> DispatchResult<()> {
        let pending: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM dispatch_queue
            WHERE tenant_id = ?1
              AND operation_type = ?2
              AND status IN ('queued', 'processing')
              AND json_extract(payload, '$.session_name') = ?3
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(OperationType::TemplateProvisioning)
        .bind(session_name)
        .fetch_optional(&self.db_pool)
        .await?;

        match pending {
            Some((id,)) => Err(DispatchError::Conflict(format!(
                "session '{session_name}' already has a pending provisioning item ({id})"
            ))),
            None => Ok(()),
        }
    }

    // ----------------------------------------------------------------
    // Procesar
    // ----------------------------------------------------------------

    /// Toma el siguiente item elegible y lo ejecuta. `None` si no había nada.
    pub async fn process_next(
        &self,
        executor: &dyn DispatchExecutor,
    ) -> DispatchResult<Option<DispatchQueueItem>> {
        let Some(item) = self.claim_next().await? else {
            return Ok(None);
        };

        let attempt = item.attempts + 1;
        let (status, error, remote_id) = match executor.execute(&item).await {
            Ok(remote_id) => (QueueItemStatus::Sent, None, remote_id),
            Err(e) => {
                log::error!(
                    "(process_next) Item {} ({:?}) falló: {}",
                    item.id,
                    item.operation_type,
                    e
                );
                (QueueItemStatus::Failed, Some(e.to_string()), None)
            }
        };

        self.finish(&item.id, status, error.as_deref()).await?;
        self.record_attempt(&item.id, attempt, status, error.as_deref(), remote_id.as_deref())
            .await?;

        Ok(Some(self.get(&item.id).await?))
    }

    /// Elige partición (round-robin) y marca su cabeza como `processing`
    /// con un update condicional.
    async fn claim_next(&self) -> DispatchResult<Option<DispatchQueueItem>> {
        let mut cursor = self.cursor.lock().await;

        let partitions: Vec<PartitionKey> = sqlx::query_as(
            r#"
            SELECT q.tenant_id, q.operation_type
            FROM dispatch_queue q
            WHERE q.status = 'queued'
              AND NOT EXISTS (
                  SELECT 1 FROM dispatch_queue p
                  WHERE p.tenant_id = q.tenant_id
                    AND p.operation_type = q.operation_type
                    AND p.status = 'processing'
              )
            GROUP BY q.tenant_id, q.operation_type
            ORDER BY q.tenant_id, q.operation_type
            "#,
        )
        .fetch_all(&self.db_pool)
        .await?;

        let Some(partition) = next_partition(&partitions, cursor.as_ref()) else {
            return Ok(None);
        };

        let head = sqlx::query_as::<_, DispatchQueueItem>(&format!(
            r#"{SELECT_ITEM}
            WHERE tenant_id = ?1 AND operation_type = ?2 AND status = 'queued'
            ORDER BY position, seq
            LIMIT 1"#
        ))
        .bind(&partition.0)
        .bind(partition.1)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(head) = head else {
            return Ok(None);
        };

        let now = Utc::now().to_rfc3339();
        let claimed = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET status = 'processing', updated_at = ?2
            WHERE id = ?1 AND status = 'queued'
            "#,
        )
        .bind(&head.id)
        .bind(now)
        .execute(&self.db_pool)
        .await?;

        *cursor = Some(partition);
        if claimed.rows_affected() == 0 {
            // Otro proceso lo tomó primero
            return Ok(None);
        }
        Ok(Some(head))
    }

    async fn finish(
        &self,
        id: &str,
        status: QueueItemStatus,
        error_message: Option<&str>,
    ) -> DispatchResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET status = ?2, error_message = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error actualizando item de la cola")?;
        Ok(())
    }

    async fn record_attempt(
        &self,
        item_id: &str,
        attempt: i64,
        outcome: QueueItemStatus,
        error_message: Option<&str>,
        remote_message_id: Option<&str>,
    ) -> DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dispatch_attempts (
                id, item_id, attempt, outcome, error_message, remote_message_id, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(item_id)
        .bind(attempt)
        .bind(outcome)
        .bind(error_message)
        .bind(remote_message_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Error registrando intento de despacho")?;
        Ok(())
    }

    /// Lanza `workers` loops que procesan un item por intervalo.
    pub fn spawn_workers(
        &self,
        executor: Arc<dyn DispatchExecutor>,
        workers: usize,
    ) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|n| {
                let queue = self.clone();
                let executor = executor.clone();
                tokio::spawn(async move {
                    log::info!("(dispatch_worker) Worker {} iniciado", n);
                    loop {
                        if let Err(e) = queue.process_next(executor.as_ref()).await {
                            log::error!("(dispatch_worker) Worker {}: {:?}", n, e);
                        }
                        tokio::time::sleep(queue.interval()).await;
                    }
                })
            })
            .collect()
    }

    /// Items que quedaron en `processing` por una caída: pasan a `failed`
    /// para que un operador decida si reintentar.
    pub async fn recover_interrupted(&self) -> DispatchResult<u64> {
        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET status = 'failed',
                error_message = 'interrupted before completion',
                updated_at = ?1
            WHERE status = 'processing'
            "#,
        )
        .bind(now)
        .execute(&self.db_pool)
        .await?;
        if res.rows_affected() > 0 {
            log::warn!(
                "(recover_interrupted) {} item(s) interrumpidos marcados como failed",
                res.rows_affected()
            );
        }
        Ok(res.rows_affected())
    }

    // ----------------------------------------------------------------
    // Reintentos
    // ----------------------------------------------------------------

    /// failed -> queued, attempts + 1, al final de su partición.
    pub async fn retry(&self, id: &str) -> DispatchResult<DispatchQueueItem> {
        let now = Utc::now().to_rfc3339();
        let res = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET status = 'queued',
                attempts = attempts + 1,
                error_message = NULL,
                position = (SELECT COALESCE(MAX(position), 0) + 1 FROM dispatch_queue),
                updated_at = ?2
            WHERE id = ?1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Error reintentando item")?;

        if res.rows_affected() == 0 {
            let item = self.get(id).await?;
            return Err(DispatchError::Conflict(format!(
                "queue item {id} is {:?}, only failed items can be retried",
                item.status
            )));
        }
        log::info!("(retry) Item {} reencolado", id);
        self.get(id).await
    }

    pub async fn retry_all(&self, filter: &QueueFilter) -> DispatchResult<usize> {
        let failed = QueueFilter {
            status: Some(QueueItemStatus::Failed),
            ..filter.clone()
        };
        let items = self.list(&failed, i64::MAX).await?;
        let mut count = 0;
        for item in items {
            match self.retry(&item.id).await {
                Ok(_) => count += 1,
                // Otro retry concurrente ya lo movió
                Err(DispatchError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        log::info!("(retry_all) {} item(s) reencolados", count);
        Ok(count)
    }

    // ----------------------------------------------------------------
    // Consultas
    // ----------------------------------------------------------------

    pub async fn get(&self, id: &str) -> DispatchResult<DispatchQueueItem> {
        sqlx::query_as::<_, DispatchQueueItem>(&format!("{SELECT_ITEM} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("queue item {id}")))
    }

    pub async fn list(&self, filter: &QueueFilter, limit: i64) -> DispatchResult<Vec<DispatchQueueItem>> {
        Ok(sqlx::query_as::<_, DispatchQueueItem>(&format!(
            r#"{SELECT_ITEM}
            WHERE (?1 IS NULL OR tenant_id = ?1)
              AND (?2 IS NULL OR operation_type = ?2)
              AND (?3 IS NULL OR status = ?3)
            ORDER BY seq
            LIMIT ?4"#
        ))
        .bind(&filter.tenant_id)
        .bind(filter.operation_type)
        .bind(filter.status)
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?)
    }

    pub async fn status(&self, filter: &QueueFilter) -> DispatchResult<QueueStatusSummary> {
        let rows: Vec<(QueueItemStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM dispatch_queue
            WHERE (?1 IS NULL OR tenant_id = ?1)
              AND (?2 IS NULL OR operation_type = ?2)
            GROUP BY status
            "#,
        )
        .bind(&filter.tenant_id)
        .bind(filter.operation_type)
        .fetch_all(&self.db_pool)
        .await?;

        let mut summary = QueueStatusSummary::default();
        for (status, count) in rows {
            match status {
                QueueItemStatus::Queued => summary.queued = count,
                QueueItemStatus::Processing => summary.processing = count,
                QueueItemStatus::Sent => summary.sent = count,
                QueueItemStatus::Failed => summary.failed = count,
            }
            summary.total += count;
        }
        Ok(summary)
    }

    pub async fn attempts(&self, item_id: &str) -> DispatchResult<Vec<DispatchAttempt>> {
        Ok(sqlx::query_as::<_, DispatchAttempt>(
            r#"
            SELECT id, item_id, attempt, outcome, error_message, remote_message_id, created_at
            FROM dispatch_attempts
            WHERE item_id = ?1
            ORDER BY attempt, created_at
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.db_pool)
        .await?)
    }
}

/// Siguiente partición después del cursor, dando la vuelta al final.
fn next_partition(partitions: &[PartitionKey], cursor: Option<&PartitionKey>) -> Option<PartitionKey> {
    let first = partitions.first()?.clone();
    match cursor {
        Some(c) => Some(partitions.iter().find(|p| *p > c).cloned().unwrap_or(first)),
        None => Some(first),
    }
}
