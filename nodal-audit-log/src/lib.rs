#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type AuditLogResult<T> = Result<T, AuditLogError>;

#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("corrupted chain: {0}")]
    Corrupted(String),
}

/// One state-changing operation on one entity. Emitted in the same unit of
/// work as the change it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: String,
    pub actor_role: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub before: serde_json::Value,
    #[serde(default)]
    pub after: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: String,
    pub actor_role: String,
    pub action: String,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
}

/// Denied operation worth keeping for the security trail: self-approval
/// attempts, cross-tenant access, posting into locked ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub tenant_id: String,
    pub actor: String,
    pub actor_role: String,
    pub kind: String,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub tenant_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditRecord>;

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditRecord>>;

    async fn record_denial(
        &self,
        tenant_id: &str,
        actor: &str,
        actor_role: &str,
        kind: &str,
        detail: &str,
    ) -> AuditLogResult<SecurityEvent>;

    async fn security_events(&self, tenant_id: &str) -> AuditLogResult<Vec<SecurityEvent>>;
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
    denials: RwLock<Vec<SecurityEvent>>,
}

impl InMemoryAuditLog {
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn compute_hash(
        previous: &str,
        tenant_id: &str,
        entity_id: &str,
        action: &str,
        occurred_at: DateTime<Utc>,
        before: &serde_json::Value,
        after: &serde_json::Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(tenant_id.as_bytes());
        hasher.update(entity_id.as_bytes());
        hasher.update(action.as_bytes());
        let nanos = occurred_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| occurred_at.timestamp_micros() * 1_000);
        hasher.update(nanos.to_be_bytes());
        hasher.update(before.to_string().as_bytes());
        hasher.update(after.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn validate_request(request: &AppendRequest) -> AuditLogResult<()> {
        if request.tenant_id.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "tenant_id must be provided".into(),
            ));
        }
        if request.entity_type.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "entity_type must be provided".into(),
            ));
        }
        if request.entity_id.trim().is_empty() {
            return Err(AuditLogError::Validation(
                "entity_id must be provided".into(),
            ));
        }
        if request.action.trim().is_empty() {
            return Err(AuditLogError::Validation("action must be provided".into()));
        }
        if request.actor.trim().is_empty() {
            return Err(AuditLogError::Validation("actor must be provided".into()));
        }
        Ok(())
    }

    fn verify_chain(records: &[AuditRecord]) -> AuditLogResult<()> {
        let mut previous = String::from("genesis");
        for record in records {
            if record.previous_hash != previous {
                return Err(AuditLogError::Corrupted(format!(
                    "unexpected previous hash for {}",
                    record.id
                )));
            }
            let expected = Self::compute_hash(
                &record.previous_hash,
                &record.tenant_id,
                &record.entity_id,
                &record.action,
                record.occurred_at,
                &record.before,
                &record.after,
            );
            if expected != record.hash {
                return Err(AuditLogError::Corrupted(format!(
                    "hash mismatch for {}",
                    record.id
                )));
            }
            previous = record.hash.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, request: AppendRequest) -> AuditLogResult<AuditRecord> {
        Self::validate_request(&request)?;

        let mut guard = self.records.write().await;
        let previous_hash = guard
            .last()
            .map(|record| record.hash.clone())
            .unwrap_or_else(|| "genesis".into());

        let occurred_at = Utc::now();
        let hash = Self::compute_hash(
            &previous_hash,
            &request.tenant_id,
            &request.entity_id,
            &request.action,
            occurred_at,
            &request.before,
            &request.after,
        );

        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            actor: request.actor,
            actor_role: request.actor_role,
            action: request.action,
            reason: request.reason,
            occurred_at,
            before: request.before,
            after: request.after,
            previous_hash,
            hash,
        };

        guard.push(record.clone());
        Ok(record)
    }

    async fn records(&self, filter: AuditLogFilter) -> AuditLogResult<Vec<AuditRecord>> {
        let guard = self.records.read().await;
        Self::verify_chain(&guard)?;
        let mut filtered = guard.clone();

        if let Some(tenant_id) = filter.tenant_id {
            filtered.retain(|record| record.tenant_id == tenant_id);
        }

        if let Some(entity_type) = filter.entity_type {
            filtered.retain(|record| record.entity_type == entity_type);
        }

        if let Some(entity_id) = filter.entity_id {
            filtered.retain(|record| record.entity_id == entity_id);
        }

        if let Some(limit) = filter.limit
            && filtered.len() > limit
        {
            filtered.truncate(limit);
        }

        Ok(filtered)
    }

    async fn record_denial(
        &self,
        tenant_id: &str,
        actor: &str,
        actor_role: &str,
        kind: &str,
        detail: &str,
    ) -> AuditLogResult<SecurityEvent> {
        if kind.trim().is_empty() {
            return Err(AuditLogError::Validation("kind must be provided".into()));
        }
        let event = SecurityEvent {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            actor: actor.into(),
            actor_role: actor_role.into(),
            kind: kind.into(),
            detail: detail.into(),
            occurred_at: Utc::now(),
        };
        let mut guard = self.denials.write().await;
        guard.push(event.clone());
        Ok(event)
    }

    async fn security_events(&self, tenant_id: &str) -> AuditLogResult<Vec<SecurityEvent>> {
        let guard = self.denials.read().await;
        Ok(guard
            .iter()
            .filter(|event| event.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}
