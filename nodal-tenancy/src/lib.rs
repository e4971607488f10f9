#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Display;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

mod in_memory;

pub use crate::in_memory::InMemoryMerchantDirectory;

pub type TenantId = String;
pub type UserId = String;
pub type MerchantId = String;

pub type TenancyResult<T> = Result<T, TenancyError>;

#[derive(Debug, Error)]
pub enum TenancyError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("resource already exists: {0}")]
    Conflict(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("tenant mismatch: caller {caller} cannot touch records of {record}")]
    TenantMismatch { caller: TenantId, record: TenantId },
}

/// Roles recognized by the aggregator control plane. Lock release and
/// override approval are deliberately split across two roles so no single
/// actor can both request and approve an exceptional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    FinanceAdmin,
    ComplianceAdmin,
    Operations,
    Auditor,
    ServiceAccount,
}

impl Role {
    #[must_use]
    pub fn can_release_locks(self) -> bool {
        matches!(self, Role::FinanceAdmin)
    }

    #[must_use]
    pub fn can_approve_overrides(self) -> bool {
        matches!(self, Role::ComplianceAdmin)
    }

    #[must_use]
    pub fn can_post(self) -> bool {
        matches!(
            self,
            Role::FinanceAdmin | Role::Operations | Role::ServiceAccount
        )
    }

    #[must_use]
    pub fn read_only(self) -> bool {
        matches!(self, Role::Auditor)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::FinanceAdmin => write!(f, "finance-admin"),
            Role::ComplianceAdmin => write!(f, "compliance-admin"),
            Role::Operations => write!(f, "operations"),
            Role::Auditor => write!(f, "auditor"),
            Role::ServiceAccount => write!(f, "service-account"),
        }
    }
}

/// Identity every service call runs under. The tenant here comes from the
/// authenticated session, never from a request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
}

impl TenantContext {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        user_id: impl Into<UserId>,
        role: Role,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            role,
        }
    }

    /// Rejects any record belonging to another tenant.
    pub fn ensure_tenant(&self, record_tenant: &TenantId) -> TenancyResult<()> {
        if &self.tenant_id == record_tenant {
            Ok(())
        } else {
            Err(TenancyError::TenantMismatch {
                caller: self.tenant_id.clone(),
                record: record_tenant.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerchantStatus {
    Active,
    Suspended,
}

impl MerchantStatus {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, MerchantStatus::Active)
    }
}

impl Display for MerchantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MerchantStatus::Active => write!(f, "active"),
            MerchantStatus::Suspended => write!(f, "suspended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merchant {
    pub id: MerchantId,
    pub tenant_id: TenantId,
    pub name: String,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub bank_name: String,
    pub status: MerchantStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMerchantRequest {
    pub tenant_id: TenantId,
    pub name: String,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub bank_name: String,
}

impl RegisterMerchantRequest {
    pub fn normalize(mut self) -> TenancyResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(TenancyError::Validation(
                "merchant name cannot be empty".into(),
            ));
        }

        self.bank_account_number = self.bank_account_number.trim().to_string();
        if self.bank_account_number.is_empty()
            || !self
                .bank_account_number
                .chars()
                .all(|ch| ch.is_ascii_digit())
        {
            return Err(TenancyError::Validation(
                "bank account number must be numeric".into(),
            ));
        }

        let ifsc = self.bank_ifsc.trim().to_ascii_uppercase();
        if ifsc.len() != 11 || !ifsc.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(TenancyError::Validation(
                "bank IFSC must be an 11-character alphanumeric code".into(),
            ));
        }
        self.bank_ifsc = ifsc;

        self.bank_name = self.bank_name.trim().to_string();
        if self.bank_name.is_empty() {
            return Err(TenancyError::Validation("bank name cannot be empty".into()));
        }

        Ok(self)
    }
}

#[async_trait]
pub trait MerchantDirectory: Send + Sync {
    async fn register(
        &self,
        request: RegisterMerchantRequest,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant>;

    async fn get(&self, merchant_id: &MerchantId, tenant: TenantContext)
    -> TenancyResult<Merchant>;

    async fn list(&self, tenant: TenantContext) -> TenancyResult<Vec<Merchant>>;

    async fn suspend(
        &self,
        merchant_id: &MerchantId,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant>;

    async fn reactivate(
        &self,
        merchant_id: &MerchantId,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant>;
}
