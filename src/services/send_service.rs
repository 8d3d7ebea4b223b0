//! services/send_service.rs
//! Camino de un envío: lista de restricción -> elegibilidad de la identidad ->
//! cola. También es el ejecutor de los items de la cola.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        identity_model::{CreateIdentityRequest, ProxyConfig, SenderIdentity},
        queue_model::{DispatchPayload, DispatchQueueItem, MessagePayload},
        send_model::{
            CampaignEnqueueReport, CampaignSendRequest, RejectedTarget, SendMessageRequest,
            VerificationRecord,
        },
    },
    services::{
        binding_service::BindingService,
        dispatch_queue_service::{DispatchExecutor, DispatchQueueService},
        identity_service::IdentityService,
        restriction_service::RestrictionService,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct Eligibility {
    pub instance_id: String,
    pub eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn has_digits(target: &str) -> bool {
    target.chars().any(|c| c.is_ascii_digit())
}

#[derive(Clone)]
pub struct SendService {
    db_pool: Pool<Sqlite>,
    identities: IdentityService,
    restrictions: RestrictionService,
    bindings: BindingService,
    queue: DispatchQueueService,
}

impl SendService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        identities: IdentityService,
        restrictions: RestrictionService,
        bindings: BindingService,
        queue: DispatchQueueService,
    ) -> Self {
        Self {
            db_pool,
            identities,
            restrictions,
            bindings,
            queue,
        }
    }

    /// "¿Puede esta identidad enviar ahora?"
    pub async fn eligibility(&self, tenant_id: &str, instance_id: &str) -> DispatchResult<Eligibility> {
        self.identities.get_for_tenant(tenant_id, instance_id).await?;
        let reason = match self.identities.ensure_dispatchable(instance_id).await {
            Ok(_) => None,
            Err(e @ (DispatchError::Paused(_) | DispatchError::NotConnected(_))) => Some(e.to_string()),
            Err(e) => return Err(e),
        };
        Ok(Eligibility {
            instance_id: instance_id.to_string(),
            eligible: reason.is_none(),
            reason,
        })
    }

    /// Envío puntual: pasa por la restricción y la elegibilidad y se encola.
    pub async fn send_single(&self, tenant_id: &str, req: SendMessageRequest) -> DispatchResult<String> {
        if !has_digits(&req.target) {
            return Err(DispatchError::Invalid(format!("invalid target '{}'", req.target)));
        }
        let identity = self
            .identities
            .get_for_tenant(tenant_id, &req.instance_id)
            .await?;

        self.restrictions
            .ensure_allowed(tenant_id, &req.target, &identity.id)
            .await?;
        let identity = self.identities.ensure_dispatchable(&identity.id).await?;
        // Falla rápido si el tenant no tiene credencial utilizable
        self.identities.credentials().for_identity(&identity).await?;

        self.queue
            .enqueue(
                tenant_id,
                &DispatchPayload::SendMessage {
                    instance_id: identity.id.clone(),
                    target: req.target,
                    message: req.message,
                    campaign_id: None,
                },
            )
            .await
    }

    /// Reparte los destinos entre las identidades habilitadas de la campaña (round-robin).
    pub async fn enqueue_campaign(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        req: CampaignSendRequest,
    ) -> DispatchResult<CampaignEnqueueReport> {
        let senders = self.campaign_senders(tenant_id, campaign_id).await?;
        if senders.is_empty() {
            return Err(DispatchError::Conflict(format!(
                "campaign {campaign_id} has no active, connected sender identity"
            )));
        }
        let sender_ids: Vec<String> = senders.iter().map(|s| s.id.clone()).collect();

        let mut report = CampaignEnqueueReport::default();
        let (valid, invalid): (Vec<String>, Vec<String>) =
            req.targets.into_iter().partition(|t| has_digits(t));
        report
            .rejected
            .extend(invalid.into_iter().map(|target| RejectedTarget {
                target,
                reason: "invalid".to_string(),
                list_names: Vec::new(),
            }));

        let restrictions = self.restrictions.check(tenant_id, &valid, &sender_ids).await;

        let mut next_sender = 0usize;
        for target in valid {
            let blocked = restrictions
                .get(&target)
                .map(|r| (r.blocked, r.list_names.clone(), r.error.clone()))
                .unwrap_or((true, Vec::new(), None));
            if blocked.0 {
                let list_names = if blocked.1.is_empty() {
                    vec![blocked.2.unwrap_or_else(|| "restriction check unavailable".to_string())]
                } else {
                    blocked.1
                };
                self.restrictions
                    .record_block(tenant_id, None, &target, &list_names)
                    .await;
                report.rejected.push(RejectedTarget {
                    target,
                    reason: "restricted".to_string(),
                    list_names,
                });
                continue;
            }

            let sender = &senders[next_sender % senders.len()];
            next_sender += 1;
            let id = self
                .queue
                .enqueue(
                    tenant_id,
                    &DispatchPayload::SendMessage {
                        instance_id: sender.id.clone(),
                        target,
                        message: req.message.clone(),
                        campaign_id: Some(campaign_id.to_string()),
                    },
                )
                .await?;
            report.queued.push(id);
        }

        log::info!(
            "(enqueue_campaign) Campaña {}: {} encolados, {} rechazados",
            campaign_id,
            report.queued.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    async fn campaign_senders(&self, tenant_id: &str, campaign_id: &str) -> DispatchResult<Vec<SenderIdentity>> {
        let mut senders = Vec::new();
        for binding in self.bindings.list_for_campaign(tenant_id, campaign_id).await? {
            if !binding.is_active {
                continue;
            }
            match self.identities.ensure_dispatchable(&binding.instance_id).await {
                Ok(identity) => senders.push(identity),
                Err(DispatchError::Paused(_) | DispatchError::NotConnected(_) | DispatchError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(senders)
    }

    /// Encola la creación de una sesión (y su binding a la campaña, si se indica).
    pub async fn provision_identity(
        &self,
        tenant_id: &str,
        session_name: &str,
        campaign_id: Option<String>,
        proxy: Option<ProxyConfig>,
    ) -> DispatchResult<String> {
        if session_name.trim().is_empty() {
            return Err(DispatchError::Invalid("session_name is required".to_string()));
        }
        self.queue
            .enqueue(
                tenant_id,
                &DispatchPayload::ProvisionIdentity {
                    session_name: session_name.trim().to_string(),
                    campaign_id,
                    proxy,
                },
            )
            .await
    }

    // ----------------------------------------------------------------
    // Ejecución (worker)
    // ----------------------------------------------------------------

    async fn deliver(
        &self,
        tenant_id: &str,
        instance_id: &str,
        target: &str,
        message: &MessagePayload,
    ) -> DispatchResult<Option<String>> {
        // La pausa se respeta aunque el item se haya encolado antes
        let identity = self.identities.ensure_dispatchable(instance_id).await?;
        if identity.tenant_id != tenant_id {
            return Err(DispatchError::NotFound(format!("sender identity {instance_id}")));
        }
        self.restrictions
            .ensure_allowed(tenant_id, target, instance_id)
            .await?;

        let credential = self.identities.credentials().for_identity(&identity).await?;
        let token = identity.provider_token.clone().ok_or_else(|| {
            DispatchError::NotConnected(format!("{instance_id} (no provider token)"))
        })?;

        let outcome = self
            .identities
            .gateway()
            .send_message(&credential, &token, target, message, identity.proxy_config().as_ref())
            .await?;

        self.record_verification(
            tenant_id,
            instance_id,
            target,
            outcome.success,
            outcome.error.as_deref(),
        )
        .await?;

        if outcome.success {
            Ok(outcome.remote_message_id)
        } else {
            Err(DispatchError::Invalid(format!(
                "provider rejected message to {target}: {}",
                outcome.error.unwrap_or_default()
            )))
        }
    }

    async fn provision(
        &self,
        tenant_id: &str,
        session_name: &str,
        campaign_id: Option<&str>,
        proxy: Option<ProxyConfig>,
    ) -> DispatchResult<Option<String>> {
        let identity = self
            .identities
            .create(
                tenant_id,
                CreateIdentityRequest {
                    session_name: session_name.to_string(),
                    provider_token: None,
                    proxy,
                },
            )
            .await?;
        if let Some(campaign_id) = campaign_id {
            self.bindings.bind(tenant_id, campaign_id, &identity.id).await?;
        }
        Ok(None)
    }

    // ----------------------------------------------------------------
    // Verificaciones
    // ----------------------------------------------------------------

    async fn record_verification(
        &self,
        tenant_id: &str,
        instance_id: &str,
        phone_number: &str,
        has_whatsapp: bool,
        detail: Option<&str>,
    ) -> DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verification_records (
                id, tenant_id, instance_id, phone_number, has_whatsapp, detail, checked_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(instance_id)
        .bind(phone_number)
        .bind(has_whatsapp)
        .bind(detail)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await
        .context("Error guardando verification_record")?;
        Ok(())
    }

    pub async fn verifications(&self, tenant_id: &str, limit: i64) -> DispatchResult<Vec<VerificationRecord>> {
        Ok(sqlx::query_as::<_, VerificationRecord>(
            r#"
            SELECT id, tenant_id, instance_id, phone_number, has_whatsapp, detail, checked_at
            FROM verification_records
            WHERE tenant_id = ?1
            ORDER BY checked_at DESC
            LIMIT ?2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?)
    }
}

#[async_trait]
impl DispatchExecutor for SendService {
    async fn execute(&self, item: &DispatchQueueItem) -> DispatchResult<Option<String>> {
        match item.decode_payload()? {
            DispatchPayload::SendMessage {
                instance_id,
                target,
                message,
                ..
            } => {
                self.deliver(&item.tenant_id, &instance_id, &target, &message)
                    .await
            }
            DispatchPayload::ProvisionIdentity {
                session_name,
                campaign_id,
                proxy,
            } => {
                self.provision(&item.tenant_id, &session_name, campaign_id.as_deref(), proxy)
                    .await
            }
        }
    }
}
