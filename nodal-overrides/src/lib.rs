#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use nodal_audit_log::AuditLog;
use nodal_audit_log::InMemoryAuditLog;
use nodal_tenancy::Role;
use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;
use nodal_tenancy::UserId;

pub type OverrideId = String;

pub type OverridesResult<T> = Result<T, OverridesError>;

const MIN_JUSTIFICATION_CHARS: usize = 10;

#[derive(Debug, Error)]
pub enum OverridesError {
    #[error("override {0} was not found")]
    NotFound(String),
    #[error("override is finalized and cannot transition")]
    Finalized,
    #[error("self-approval is forbidden: {0}")]
    SelfApprovalForbidden(String),
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideRequestType {
    SoftClosedPosting,
    ExceptionalCorrection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub id: OverrideId,
    pub tenant_id: TenantId,
    pub request_type: OverrideRequestType,
    pub requestor_id: UserId,
    pub requestor_role: String,
    pub justification: String,
    pub request_data: serde_json::Value,
    pub status: OverrideStatus,
    pub approver_id: Option<UserId>,
    pub approver_role: Option<String>,
    pub approval_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl OverrideRequest {
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        matches!(
            self.status,
            OverrideStatus::Approved | OverrideStatus::Rejected
        )
    }
}

/// Row written to the overrides log at approval time. A guarded write may
/// only proceed once its covering row exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideLogRecord {
    pub id: String,
    pub tenant_id: TenantId,
    pub override_id: OverrideId,
    pub request_type: OverrideRequestType,
    pub requestor_id: UserId,
    pub requestor_role: String,
    pub approver_id: UserId,
    pub approver_role: String,
    pub justification: String,
    pub approval_reason: String,
    pub affected_ids: Vec<String>,
    pub approved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateOverrideRequest {
    pub request_type: OverrideRequestType,
    pub justification: String,
    pub request_data: serde_json::Value,
    pub affected_ids: Vec<String>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideDecision {
    Approve { reason: String },
    Reject { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideFilter {
    pub status: Option<OverrideStatus>,
    pub request_type: Option<OverrideRequestType>,
}

#[async_trait]
pub trait OverrideApprovals: Send + Sync {
    async fn request_override(
        &self,
        request: CreateOverrideRequest,
    ) -> OverridesResult<OverrideRequest>;

    async fn decide(
        &self,
        override_id: &OverrideId,
        decision: OverrideDecision,
        approver: TenantContext,
    ) -> OverridesResult<OverrideRequest>;

    async fn get(
        &self,
        override_id: &OverrideId,
        tenant: TenantContext,
    ) -> OverridesResult<OverrideRequest>;

    async fn list(
        &self,
        filter: OverrideFilter,
        tenant: TenantContext,
    ) -> OverridesResult<Vec<OverrideRequest>>;

    /// Looks up an approved override by id for consumption at post time.
    async fn find_approved(
        &self,
        override_id: &OverrideId,
        tenant: &TenantContext,
    ) -> OverridesResult<Option<OverrideRequest>>;

    async fn override_log(&self, tenant: TenantContext)
    -> OverridesResult<Vec<OverrideLogRecord>>;
}

#[derive(Default)]
struct OverrideState {
    requests: HashMap<OverrideId, OverrideRequest>,
    affected: HashMap<OverrideId, Vec<String>>,
    log: Vec<OverrideLogRecord>,
}

pub struct InMemoryOverrideApprovals {
    audit: Arc<dyn AuditLog>,
    state: RwLock<OverrideState>,
}

impl Default for InMemoryOverrideApprovals {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOverrideApprovals {
    #[must_use]
    pub fn new() -> Self {
        Self::with_audit(InMemoryAuditLog::shared())
    }

    #[must_use]
    pub fn with_audit(audit: Arc<dyn AuditLog>) -> Self {
        Self {
            audit,
            state: RwLock::new(OverrideState::default()),
        }
    }

    #[must_use]
    pub fn audit_log(&self) -> Arc<dyn AuditLog> {
        self.audit.clone()
    }

    fn validate(request: &CreateOverrideRequest) -> OverridesResult<()> {
        if request.justification.trim().chars().count() < MIN_JUSTIFICATION_CHARS {
            return Err(OverridesError::Validation(format!(
                "justification must be at least {MIN_JUSTIFICATION_CHARS} characters"
            )));
        }
        Ok(())
    }

    fn check_dual_control(
        request: &OverrideRequest,
        approver: &TenantContext,
    ) -> Result<(), String> {
        if request.requestor_id == approver.user_id {
            return Err("requestor and approver are the same user".into());
        }
        if request.requestor_role == approver.role.to_string() {
            return Err("requestor and approver share the same role".into());
        }
        Ok(())
    }
}

#[async_trait]
impl OverrideApprovals for InMemoryOverrideApprovals {
    async fn request_override(
        &self,
        request: CreateOverrideRequest,
    ) -> OverridesResult<OverrideRequest> {
        Self::validate(&request)?;

        let record = OverrideRequest {
            id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant.tenant_id.clone(),
            request_type: request.request_type,
            requestor_id: request.tenant.user_id.clone(),
            requestor_role: request.tenant.role.to_string(),
            justification: request.justification,
            request_data: request.request_data,
            status: OverrideStatus::Pending,
            approver_id: None,
            approver_role: None,
            approval_reason: None,
            requested_at: Utc::now(),
            decided_at: None,
        };

        let mut guard = self.state.write().await;
        guard
            .affected
            .insert(record.id.clone(), request.affected_ids);
        guard.requests.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn decide(
        &self,
        override_id: &OverrideId,
        decision: OverrideDecision,
        approver: TenantContext,
    ) -> OverridesResult<OverrideRequest> {
        let mut guard = self.state.write().await;
        let request = guard
            .requests
            .get(override_id)
            .cloned()
            .ok_or_else(|| OverridesError::NotFound(override_id.clone()))?;
        approver
            .ensure_tenant(&request.tenant_id)
            .map_err(|err| OverridesError::TenantMismatch(err.to_string()))?;

        if request.is_finalized() {
            return Err(OverridesError::Finalized);
        }

        if !approver.role.can_approve_overrides() && approver.role != Role::FinanceAdmin {
            return Err(OverridesError::Validation(format!(
                "role {} cannot decide overrides",
                approver.role
            )));
        }

        if let Err(detail) = Self::check_dual_control(&request, &approver) {
            self.audit
                .record_denial(
                    &request.tenant_id,
                    &approver.user_id,
                    &approver.role.to_string(),
                    "self_approval",
                    &detail,
                )
                .await
                .ok();
            return Err(OverridesError::SelfApprovalForbidden(detail));
        }

        let now = Utc::now();
        let mut updated = request.clone();
        updated.approver_id = Some(approver.user_id.clone());
        updated.approver_role = Some(approver.role.to_string());
        updated.decided_at = Some(now);

        match decision {
            OverrideDecision::Approve { reason } => {
                updated.status = OverrideStatus::Approved;
                updated.approval_reason = Some(reason.clone());

                let affected_ids = guard
                    .affected
                    .get(override_id)
                    .cloned()
                    .unwrap_or_default();
                guard.log.push(OverrideLogRecord {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: updated.tenant_id.clone(),
                    override_id: updated.id.clone(),
                    request_type: updated.request_type,
                    requestor_id: updated.requestor_id.clone(),
                    requestor_role: updated.requestor_role.clone(),
                    approver_id: approver.user_id.clone(),
                    approver_role: approver.role.to_string(),
                    justification: updated.justification.clone(),
                    approval_reason: reason,
                    affected_ids,
                    approved_at: now,
                });
            }
            OverrideDecision::Reject { reason } => {
                updated.status = OverrideStatus::Rejected;
                updated.approval_reason = Some(reason);
            }
        }

        guard.requests.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn get(
        &self,
        override_id: &OverrideId,
        tenant: TenantContext,
    ) -> OverridesResult<OverrideRequest> {
        let guard = self.state.read().await;
        let request = guard
            .requests
            .get(override_id)
            .cloned()
            .ok_or_else(|| OverridesError::NotFound(override_id.clone()))?;
        tenant
            .ensure_tenant(&request.tenant_id)
            .map_err(|err| OverridesError::TenantMismatch(err.to_string()))?;
        Ok(request)
    }

    async fn list(
        &self,
        filter: OverrideFilter,
        tenant: TenantContext,
    ) -> OverridesResult<Vec<OverrideRequest>> {
        let guard = self.state.read().await;
        let mut requests = guard
            .requests
            .values()
            .filter(|request| request.tenant_id == tenant.tenant_id)
            .filter(|request| filter.status.is_none_or(|status| request.status == status))
            .filter(|request| {
                filter
                    .request_type
                    .is_none_or(|kind| request.request_type == kind)
            })
            .cloned()
            .collect::<Vec<_>>();
        requests.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        Ok(requests)
    }

    async fn find_approved(
        &self,
        override_id: &OverrideId,
        tenant: &TenantContext,
    ) -> OverridesResult<Option<OverrideRequest>> {
        let guard = self.state.read().await;
        Ok(guard
            .requests
            .get(override_id)
            .filter(|request| request.tenant_id == tenant.tenant_id)
            .filter(|request| request.status == OverrideStatus::Approved)
            .cloned())
    }

    async fn override_log(
        &self,
        tenant: TenantContext,
    ) -> OverridesResult<Vec<OverrideLogRecord>> {
        let guard = self.state.read().await;
        Ok(guard
            .log
            .iter()
            .filter(|record| record.tenant_id == tenant.tenant_id)
            .cloned()
            .collect())
    }
}
