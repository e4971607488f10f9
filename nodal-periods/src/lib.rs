#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Display;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;

mod memory;

pub use memory::InMemoryPeriodService;

pub type PeriodId = String;
pub type LockId = String;

pub type PeriodResult<T> = Result<T, PeriodError>;

#[derive(Debug, Error)]
pub enum PeriodError {
    #[error("period overlaps an existing {period_type} period ({start}..{end})")]
    Overlap {
        period_type: PeriodType,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("gap of {gap_days} days to the previous period exceeds the {tolerance_days}-day tolerance")]
    Gap {
        gap_days: i64,
        tolerance_days: i64,
    },
    #[error("an open {0} period already exists")]
    OpenPeriodExists(PeriodType),
    #[error("period not found: {0}")]
    NotFound(String),
    #[error("invalid period transition: {from} -> {to}")]
    InvalidTransition {
        from: PeriodStatus,
        to: PeriodStatus,
    },
    #[error("an active {lock_type} lock already covers {start}..{end}")]
    LockOverlap {
        lock_type: LockType,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("operation forbidden: {0}")]
    Forbidden(String),
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodType {
    Daily,
    Monthly,
}

impl Display for PeriodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodType::Daily => write!(f, "DAILY"),
            PeriodType::Monthly => write!(f, "MONTHLY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodStatus {
    Open,
    SoftClosed,
    HardClosed,
}

impl Display for PeriodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeriodStatus::Open => write!(f, "OPEN"),
            PeriodStatus::SoftClosed => write!(f, "SOFT_CLOSED"),
            PeriodStatus::HardClosed => write!(f, "HARD_CLOSED"),
        }
    }
}

impl PeriodStatus {
    /// Closure only moves forward: OPEN -> SOFT_CLOSED -> HARD_CLOSED.
    #[must_use]
    pub fn can_transition_to(self, target: PeriodStatus) -> bool {
        matches!(
            (self, target),
            (PeriodStatus::Open, PeriodStatus::SoftClosed)
                | (PeriodStatus::SoftClosed, PeriodStatus::HardClosed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountingPeriod {
    pub id: PeriodId,
    pub tenant_id: TenantId,
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: PeriodStatus,
    pub closed_by: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closure_notes: Option<String>,
}

impl AccountingPeriod {
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.period_start <= date && date <= self.period_end
    }

    #[must_use]
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.period_start <= end && start <= self.period_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockType {
    PeriodLock,
    AuditLock,
    ReconciliationLock,
}

impl Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockType::PeriodLock => write!(f, "PERIOD_LOCK"),
            LockType::AuditLock => write!(f, "AUDIT_LOCK"),
            LockType::ReconciliationLock => write!(f, "RECONCILIATION_LOCK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LockStatus {
    Active,
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerLock {
    pub id: LockId,
    pub tenant_id: TenantId,
    pub lock_type: LockType,
    pub lock_start_date: NaiveDate,
    pub lock_end_date: NaiveDate,
    pub accounting_period_id: Option<PeriodId>,
    pub lock_status: LockStatus,
    pub reason: String,
    pub reference_number: Option<String>,
    pub locked_by: String,
    pub locked_by_role: String,
    pub released_by: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_notes: Option<String>,
}

impl LedgerLock {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock_status == LockStatus::Active
    }

    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.lock_start_date <= date && date <= self.lock_end_date
    }

    #[must_use]
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.lock_start_date <= end && start <= self.lock_end_date
    }
}

/// Gap tolerance between consecutive periods, configurable per tenant
/// deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodConfig {
    pub gap_tolerance_days: i64,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            gap_tolerance_days: 2,
        }
    }
}

/// Answer to "may a transaction dated D be posted right now?".
#[derive(Debug, Clone, PartialEq)]
pub struct PostingGate {
    pub period_id: Option<PeriodId>,
    pub period_status: Option<PeriodStatus>,
    pub posting_allowed: bool,
    pub override_required: bool,
    pub locked: bool,
    pub lock: Option<LedgerLock>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePeriodRequest {
    pub period_type: PeriodType,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePeriodRequest {
    pub period_id: PeriodId,
    pub target_status: PeriodStatus,
    pub notes: Option<String>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyLockRequest {
    pub lock_type: LockType,
    pub lock_start_date: NaiveDate,
    pub lock_end_date: NaiveDate,
    pub reason: String,
    pub reference_number: Option<String>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLockRequest {
    pub lock_id: LockId,
    pub notes: Option<String>,
    pub tenant: TenantContext,
}

#[async_trait]
pub trait PeriodService: Send + Sync {
    async fn create_period(&self, request: CreatePeriodRequest) -> PeriodResult<AccountingPeriod>;

    async fn close_period(&self, request: ClosePeriodRequest) -> PeriodResult<AccountingPeriod>;

    async fn check_period_for_posting(
        &self,
        transaction_date: NaiveDate,
        period_type: PeriodType,
        tenant: TenantContext,
    ) -> PeriodResult<PostingGate>;

    async fn apply_lock(&self, request: ApplyLockRequest) -> PeriodResult<LedgerLock>;

    async fn release_lock(&self, request: ReleaseLockRequest) -> PeriodResult<LedgerLock>;

    async fn check_lock_status(
        &self,
        date: NaiveDate,
        tenant: TenantContext,
    ) -> PeriodResult<Option<LedgerLock>>;

    async fn list_periods(
        &self,
        period_type: Option<PeriodType>,
        tenant: TenantContext,
    ) -> PeriodResult<Vec<AccountingPeriod>>;

    async fn active_locks(&self, tenant: TenantContext) -> PeriodResult<Vec<LedgerLock>>;
}
