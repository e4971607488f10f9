use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use nodal_audit_log::AppendRequest;
use nodal_audit_log::AuditLog;
use nodal_audit_log::InMemoryAuditLog;
use nodal_tenancy::TenantContext;

use crate::AccountingPeriod;
use crate::ApplyLockRequest;
use crate::ClosePeriodRequest;
use crate::CreatePeriodRequest;
use crate::LedgerLock;
use crate::LockId;
use crate::LockStatus;
use crate::LockType;
use crate::PeriodConfig;
use crate::PeriodError;
use crate::PeriodId;
use crate::PeriodResult;
use crate::PeriodService;
use crate::PeriodStatus;
use crate::PeriodType;
use crate::PostingGate;
use crate::ReleaseLockRequest;

pub struct InMemoryPeriodService {
    config: PeriodConfig,
    audit: Arc<dyn AuditLog>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    periods: HashMap<PeriodId, AccountingPeriod>,
    locks: HashMap<LockId, LedgerLock>,
}

impl InMemoryPeriodService {
    #[must_use]
    pub fn new(config: PeriodConfig) -> Self {
        Self::with_audit(config, InMemoryAuditLog::shared())
    }

    #[must_use]
    pub fn with_audit(config: PeriodConfig, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            config,
            audit,
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn audit_log(&self) -> Arc<dyn AuditLog> {
        self.audit.clone()
    }

    fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn snapshot<T: serde::Serialize>(value: &T) -> serde_json::Value {
        serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
    }

    async fn append_audit(
        &self,
        tenant: &TenantContext,
        entity_type: &str,
        entity_id: &str,
        action: &str,
        reason: Option<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> PeriodResult<()> {
        self.audit
            .append(AppendRequest {
                tenant_id: tenant.tenant_id.clone(),
                entity_type: entity_type.into(),
                entity_id: entity_id.into(),
                actor: tenant.user_id.clone(),
                actor_role: tenant.role.to_string(),
                action: action.into(),
                reason,
                before,
                after,
            })
            .await
            .map_err(|err| PeriodError::Internal(format!("audit append failed: {err}")))?;
        Ok(())
    }

    fn active_lock_covering(
        state: &State,
        tenant_id: &str,
        date: NaiveDate,
    ) -> Option<LedgerLock> {
        state
            .locks
            .values()
            .find(|lock| lock.tenant_id == tenant_id && lock.is_active() && lock.covers(date))
            .cloned()
    }

    fn insert_period_lock(
        state: &mut State,
        period: &AccountingPeriod,
        tenant: &TenantContext,
    ) -> LedgerLock {
        let lock = LedgerLock {
            id: Self::generate_id(),
            tenant_id: period.tenant_id.clone(),
            lock_type: LockType::PeriodLock,
            lock_start_date: period.period_start,
            lock_end_date: period.period_end,
            accounting_period_id: Some(period.id.clone()),
            lock_status: LockStatus::Active,
            reason: format!("hard close of {} period {}", period.period_type, period.id),
            reference_number: None,
            locked_by: tenant.user_id.clone(),
            locked_by_role: tenant.role.to_string(),
            released_by: None,
            released_at: None,
            release_notes: None,
        };
        state.locks.insert(lock.id.clone(), lock.clone());
        lock
    }
}

#[async_trait]
impl PeriodService for InMemoryPeriodService {
    async fn create_period(&self, request: CreatePeriodRequest) -> PeriodResult<AccountingPeriod> {
        if request.period_start >= request.period_end {
            return Err(PeriodError::Validation(
                "period start must be before period end".into(),
            ));
        }

        let mut state = self.state.lock().await;
        let tenant_id = request.tenant.tenant_id.clone();

        let mut latest_end: Option<NaiveDate> = None;
        for period in state.periods.values() {
            if period.tenant_id != tenant_id || period.period_type != request.period_type {
                continue;
            }
            if period.overlaps(request.period_start, request.period_end) {
                return Err(PeriodError::Overlap {
                    period_type: period.period_type,
                    start: period.period_start,
                    end: period.period_end,
                });
            }
            if period.status == PeriodStatus::Open {
                return Err(PeriodError::OpenPeriodExists(request.period_type));
            }
            latest_end = Some(match latest_end {
                Some(current) if current >= period.period_end => current,
                _ => period.period_end,
            });
        }

        // Contiguity is end-exclusive: starting the day after the previous
        // end is a gap of zero.
        if let Some(previous_end) = latest_end
            && request.period_start > previous_end
        {
            let gap_days = (request.period_start - previous_end).num_days() - 1;
            if gap_days > self.config.gap_tolerance_days {
                return Err(PeriodError::Gap {
                    gap_days,
                    tolerance_days: self.config.gap_tolerance_days,
                });
            }
        }

        let period = AccountingPeriod {
            id: Self::generate_id(),
            tenant_id,
            period_type: request.period_type,
            period_start: request.period_start,
            period_end: request.period_end,
            status: PeriodStatus::Open,
            closed_by: None,
            closed_at: None,
            closure_notes: None,
        };

        self.append_audit(
            &request.tenant,
            "accounting_period",
            &period.id,
            "period_created",
            None,
            serde_json::Value::Null,
            Self::snapshot(&period),
        )
        .await?;

        state.periods.insert(period.id.clone(), period.clone());
        Ok(period)
    }

    async fn close_period(&self, request: ClosePeriodRequest) -> PeriodResult<AccountingPeriod> {
        let mut state = self.state.lock().await;
        let existing = state
            .periods
            .get(&request.period_id)
            .cloned()
            .ok_or_else(|| PeriodError::NotFound(format!("period {}", request.period_id)))?;
        request
            .tenant
            .ensure_tenant(&existing.tenant_id)
            .map_err(|err| PeriodError::TenantMismatch(err.to_string()))?;

        if !existing.status.can_transition_to(request.target_status) {
            return Err(PeriodError::InvalidTransition {
                from: existing.status,
                to: request.target_status,
            });
        }

        let mut updated = existing.clone();
        updated.status = request.target_status;
        updated.closed_by = Some(request.tenant.user_id.clone());
        updated.closed_at = Some(Utc::now());
        updated.closure_notes = request.notes.clone();

        self.append_audit(
            &request.tenant,
            "accounting_period",
            &updated.id,
            "period_closed",
            request.notes.clone(),
            Self::snapshot(&existing),
            Self::snapshot(&updated),
        )
        .await?;

        state.periods.insert(updated.id.clone(), updated.clone());

        // Hard close drops a period lock over the whole range; it can only
        // be lifted by reopening the period itself.
        if request.target_status == PeriodStatus::HardClosed {
            let lock = Self::insert_period_lock(&mut state, &updated, &request.tenant);
            self.append_audit(
                &request.tenant,
                "ledger_lock",
                &lock.id,
                "period_lock_applied",
                Some(lock.reason.clone()),
                serde_json::Value::Null,
                Self::snapshot(&lock),
            )
            .await?;
        }

        Ok(updated)
    }

    async fn check_period_for_posting(
        &self,
        transaction_date: NaiveDate,
        period_type: PeriodType,
        tenant: TenantContext,
    ) -> PeriodResult<PostingGate> {
        let state = self.state.lock().await;
        let tenant_id = tenant.tenant_id.clone();

        let blocking_lock = Self::active_lock_covering(&state, &tenant_id, transaction_date);
        let period = state
            .periods
            .values()
            .find(|period| {
                period.tenant_id == tenant_id
                    && period.period_type == period_type
                    && period.covers(transaction_date)
            })
            .cloned();

        let Some(period) = period else {
            return Ok(PostingGate {
                period_id: None,
                period_status: None,
                posting_allowed: false,
                override_required: false,
                locked: blocking_lock.is_some(),
                lock: blocking_lock,
                message: Some(format!(
                    "no {period_type} accounting period covers {transaction_date}"
                )),
            });
        };

        if let Some(lock) = blocking_lock {
            return Ok(PostingGate {
                period_id: Some(period.id),
                period_status: Some(period.status),
                posting_allowed: false,
                override_required: false,
                locked: true,
                message: Some(format!(
                    "{} lock {} covers {transaction_date}",
                    lock.lock_type, lock.id
                )),
                lock: Some(lock),
            });
        }

        let gate = match period.status {
            PeriodStatus::Open => PostingGate {
                period_id: Some(period.id),
                period_status: Some(period.status),
                posting_allowed: true,
                override_required: false,
                locked: false,
                lock: None,
                message: None,
            },
            PeriodStatus::SoftClosed => PostingGate {
                period_id: Some(period.id),
                period_status: Some(period.status),
                posting_allowed: false,
                override_required: true,
                locked: false,
                lock: None,
                message: Some("period is soft-closed; a dual-confirmed override is required".into()),
            },
            PeriodStatus::HardClosed => PostingGate {
                period_id: Some(period.id),
                period_status: Some(period.status),
                posting_allowed: false,
                override_required: false,
                locked: false,
                lock: None,
                message: Some("period is hard-closed; no override is accepted".into()),
            },
        };
        Ok(gate)
    }

    async fn apply_lock(&self, request: ApplyLockRequest) -> PeriodResult<LedgerLock> {
        if request.lock_start_date >= request.lock_end_date {
            return Err(PeriodError::Validation(
                "lock start must be before lock end".into(),
            ));
        }
        if request.reason.trim().is_empty() {
            return Err(PeriodError::Validation("a lock requires a reason".into()));
        }

        let mut state = self.state.lock().await;
        let tenant_id = request.tenant.tenant_id.clone();

        for lock in state.locks.values() {
            if lock.tenant_id == tenant_id
                && lock.lock_type == request.lock_type
                && lock.is_active()
                && lock.overlaps(request.lock_start_date, request.lock_end_date)
            {
                return Err(PeriodError::LockOverlap {
                    lock_type: lock.lock_type,
                    start: lock.lock_start_date,
                    end: lock.lock_end_date,
                });
            }
        }

        let lock = LedgerLock {
            id: Self::generate_id(),
            tenant_id,
            lock_type: request.lock_type,
            lock_start_date: request.lock_start_date,
            lock_end_date: request.lock_end_date,
            accounting_period_id: None,
            lock_status: LockStatus::Active,
            reason: request.reason.clone(),
            reference_number: request.reference_number.clone(),
            locked_by: request.tenant.user_id.clone(),
            locked_by_role: request.tenant.role.to_string(),
            released_by: None,
            released_at: None,
            release_notes: None,
        };

        self.append_audit(
            &request.tenant,
            "ledger_lock",
            &lock.id,
            "lock_applied",
            Some(request.reason),
            serde_json::Value::Null,
            Self::snapshot(&lock),
        )
        .await?;

        state.locks.insert(lock.id.clone(), lock.clone());
        Ok(lock)
    }

    async fn release_lock(&self, request: ReleaseLockRequest) -> PeriodResult<LedgerLock> {
        if !request.tenant.role.can_release_locks() {
            self.audit
                .record_denial(
                    &request.tenant.tenant_id,
                    &request.tenant.user_id,
                    &request.tenant.role.to_string(),
                    "lock_release_forbidden",
                    &format!(
                        "role {} attempted to release lock {}",
                        request.tenant.role, request.lock_id
                    ),
                )
                .await
                .ok();
            return Err(PeriodError::Forbidden(
                "only finance-admin may release locks".into(),
            ));
        }

        let mut state = self.state.lock().await;
        let existing = state
            .locks
            .get(&request.lock_id)
            .cloned()
            .ok_or_else(|| PeriodError::NotFound(format!("lock {}", request.lock_id)))?;
        request
            .tenant
            .ensure_tenant(&existing.tenant_id)
            .map_err(|err| PeriodError::TenantMismatch(err.to_string()))?;

        if existing.lock_type == LockType::PeriodLock {
            return Err(PeriodError::Forbidden(
                "period locks are released by reopening the owning period".into(),
            ));
        }
        if !existing.is_active() {
            return Err(PeriodError::Validation(format!(
                "lock {} is already released",
                existing.id
            )));
        }

        let mut updated = existing.clone();
        updated.lock_status = LockStatus::Released;
        updated.released_by = Some(request.tenant.user_id.clone());
        updated.released_at = Some(Utc::now());
        updated.release_notes = request.notes.clone();

        self.append_audit(
            &request.tenant,
            "ledger_lock",
            &updated.id,
            "lock_released",
            request.notes.clone(),
            Self::snapshot(&existing),
            Self::snapshot(&updated),
        )
        .await?;

        state.locks.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn check_lock_status(
        &self,
        date: NaiveDate,
        tenant: TenantContext,
    ) -> PeriodResult<Option<LedgerLock>> {
        let state = self.state.lock().await;
        Ok(Self::active_lock_covering(&state, &tenant.tenant_id, date))
    }

    async fn list_periods(
        &self,
        period_type: Option<PeriodType>,
        tenant: TenantContext,
    ) -> PeriodResult<Vec<AccountingPeriod>> {
        let state = self.state.lock().await;
        let mut periods = state
            .periods
            .values()
            .filter(|period| period.tenant_id == tenant.tenant_id)
            .filter(|period| period_type.is_none_or(|wanted| period.period_type == wanted))
            .cloned()
            .collect::<Vec<_>>();
        periods.sort_by_key(|period| period.period_start);
        Ok(periods)
    }

    async fn active_locks(&self, tenant: TenantContext) -> PeriodResult<Vec<LedgerLock>> {
        let state = self.state.lock().await;
        let mut locks = state
            .locks
            .values()
            .filter(|lock| lock.tenant_id == tenant.tenant_id && lock.is_active())
            .cloned()
            .collect::<Vec<_>>();
        locks.sort_by_key(|lock| lock.lock_start_date);
        Ok(locks)
    }
}
