#![deny(clippy::print_stdout, clippy::print_stderr)]

use std::fmt::Display;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use nodal_tenancy::MerchantId;
use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;

mod memory;

pub use memory::InMemorySettlementService;

pub type SettlementId = String;

pub type SettlementResult<T> = Result<T, SettlementError>;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("illegal settlement transition: {from} -> {to}")]
    InvalidTransition {
        from: SettlementStatus,
        to: SettlementStatus,
    },
    #[error("retry budget exhausted: {retry_count} of {max_retries} used")]
    RetryExhausted { retry_count: u32, max_retries: u32 },
    #[error("bank confirmation requires a non-empty UTR number")]
    MissingUtr,
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),
    #[error("ledger posting failed, transition rolled back: {0}")]
    PostingFailed(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SettlementStatus {
    Created,
    FundsReserved,
    SentToBank,
    BankConfirmed,
    Settled,
    Failed,
    Retried,
}

impl Display for SettlementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementStatus::Created => write!(f, "CREATED"),
            SettlementStatus::FundsReserved => write!(f, "FUNDS_RESERVED"),
            SettlementStatus::SentToBank => write!(f, "SENT_TO_BANK"),
            SettlementStatus::BankConfirmed => write!(f, "BANK_CONFIRMED"),
            SettlementStatus::Settled => write!(f, "SETTLED"),
            SettlementStatus::Failed => write!(f, "FAILED"),
            SettlementStatus::Retried => write!(f, "RETRIED"),
        }
    }
}

impl SettlementStatus {
    /// The full transition graph. `Failed -> Retried` additionally requires
    /// retry budget, which the service checks.
    #[must_use]
    pub fn can_transition_to(self, target: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (self, target),
            (Created, FundsReserved)
                | (FundsReserved, SentToBank)
                | (FundsReserved, Failed)
                | (SentToBank, BankConfirmed)
                | (SentToBank, Failed)
                | (BankConfirmed, Settled)
                | (Failed, Retried)
                | (Retried, FundsReserved)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SettlementStatus::Settled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: Option<SettlementStatus>,
    pub to: SettlementStatus,
    pub at: DateTime<Utc>,
    pub by: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub by: String,
    pub next_retry_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub tenant_id: TenantId,
    pub merchant_id: MerchantId,
    pub settlement_ref: String,
    pub settlement_date: NaiveDate,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub gross_amount: Decimal,
    pub fees_amount: Decimal,
    pub net_amount: Decimal,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub bank_name: String,
    pub status: SettlementStatus,
    pub funds_reserved_at: Option<DateTime<Utc>>,
    pub sent_to_bank_at: Option<DateTime<Utc>>,
    pub bank_confirmed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub bank_reference_number: Option<String>,
    pub bank_transaction_id: Option<String>,
    pub utr_number: Option<String>,
    pub settlement_batch_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub state_transitions: Vec<StateTransition>,
    pub retry_history: Vec<RetryAttempt>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Settlement {
    /// Finality per the disbursement contract: SETTLED and UTR-tracked.
    /// BANK_CONFIRMED alone is never final.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.status == SettlementStatus::Settled
            && self
                .utr_number
                .as_deref()
                .is_some_and(|utr| !utr.trim().is_empty())
    }

    #[must_use]
    pub fn retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Bounded-retry schedule. The backoff list is clamped to its last entry
/// for any attempt past its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_minutes: Vec<i64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_minutes: vec![15, 60, 240],
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let minutes = self
            .backoff_minutes
            .get(retry_count as usize)
            .or_else(|| self.backoff_minutes.last())
            .copied()
            .unwrap_or(0);
        Duration::minutes(minutes)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SettlementHookError(pub String);

/// Seam to the accounting layer. `mark_settled` drives the hook inside the
/// same unit of work as the transition: a hook failure leaves the stored
/// settlement untouched.
#[async_trait]
pub trait SettlementPostingHook: Send + Sync {
    async fn post_settlement(
        &self,
        settlement: &Settlement,
        actor: &TenantContext,
    ) -> Result<serde_json::Value, SettlementHookError>;
}

#[derive(Default)]
pub struct NoopSettlementPostingHook;

#[async_trait]
impl SettlementPostingHook for NoopSettlementPostingHook {
    async fn post_settlement(
        &self,
        _settlement: &Settlement,
        _actor: &TenantContext,
    ) -> Result<serde_json::Value, SettlementHookError> {
        Ok(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSettlementRequest {
    pub merchant_id: MerchantId,
    pub settlement_ref: String,
    pub settlement_date: NaiveDate,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub gross_amount: Decimal,
    pub fees_amount: Decimal,
    pub net_amount: Decimal,
    pub bank_account_number: String,
    pub bank_ifsc: String,
    pub bank_name: String,
    pub tenant: TenantContext,
}

#[async_trait]
pub trait SettlementService: Send + Sync {
    async fn create_settlement(
        &self,
        request: CreateSettlementRequest,
    ) -> SettlementResult<Settlement>;

    async fn get(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    /// Drives the settlement to `target`, validating the transition and
    /// pulling state-specific fields (batch id, UTR, failure reason) out
    /// of `metadata`.
    async fn transition(
        &self,
        settlement_id: &SettlementId,
        target: SettlementStatus,
        metadata: serde_json::Value,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    async fn reserve_funds(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    async fn send_to_bank(
        &self,
        settlement_id: &SettlementId,
        batch_id: &str,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    async fn confirm_by_bank(
        &self,
        settlement_id: &SettlementId,
        utr_number: &str,
        bank_reference_number: Option<String>,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    async fn mark_settled(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    async fn mark_failed(
        &self,
        settlement_id: &SettlementId,
        reason: &str,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    async fn retry_settlement(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement>;

    /// FAILED settlements whose backoff has elapsed, for the poll-based
    /// retry worker.
    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        tenant: TenantContext,
    ) -> SettlementResult<Vec<Settlement>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn transition_graph_matches_contract() {
        use SettlementStatus::*;

        let legal = [
            (Created, FundsReserved),
            (FundsReserved, SentToBank),
            (FundsReserved, Failed),
            (SentToBank, BankConfirmed),
            (SentToBank, Failed),
            (BankConfirmed, Settled),
            (Failed, Retried),
            (Retried, FundsReserved),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
        }

        let illegal = [
            (Created, SentToBank),
            (FundsReserved, BankConfirmed),
            (FundsReserved, Settled),
            (SentToBank, Settled),
            (BankConfirmed, Failed),
            (Settled, Failed),
            (Settled, FundsReserved),
            (Retried, SentToBank),
            (Failed, FundsReserved),
        ];
        for (from, to) in illegal {
            assert!(
                !from.can_transition_to(to),
                "{from} -> {to} should be illegal"
            );
        }
    }

    #[test]
    fn every_non_terminal_state_can_reach_settled_or_exhaustion() {
        use SettlementStatus::*;

        // Breadth-first over the graph: each state must reach SETTLED, or
        // FAILED (where retries either continue the walk or exhaust).
        let all = [
            Created,
            FundsReserved,
            SentToBank,
            BankConfirmed,
            Failed,
            Retried,
        ];
        for start in all {
            let mut frontier = vec![start];
            let mut seen = vec![start];
            let mut reached = false;
            while let Some(state) = frontier.pop() {
                if state == Settled || state == Failed {
                    reached = true;
                    break;
                }
                for next in [
                    Created,
                    FundsReserved,
                    SentToBank,
                    BankConfirmed,
                    Settled,
                    Failed,
                    Retried,
                ] {
                    if state.can_transition_to(next) && !seen.contains(&next) {
                        seen.push(next);
                        frontier.push(next);
                    }
                }
            }
            assert!(reached, "{start} cannot reach settlement or exhaustion");
        }
    }

    #[test]
    fn backoff_sequence_clamps_to_last() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::minutes(15));
        assert_eq!(policy.backoff_for(1), Duration::minutes(60));
        assert_eq!(policy.backoff_for(2), Duration::minutes(240));
        assert_eq!(policy.backoff_for(3), Duration::minutes(240));
        assert_eq!(policy.backoff_for(99), Duration::minutes(240));
    }

    #[test]
    fn finality_requires_settled_and_utr() {
        let mut settlement = Settlement {
            id: "st-1".into(),
            tenant_id: "tenant-1".into(),
            merchant_id: "m-1".into(),
            settlement_ref: "SETTLE-1".into(),
            settlement_date: NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"),
            period_from: NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"),
            period_to: NaiveDate::from_ymd_opt(2024, 5, 31).expect("date"),
            gross_amount: Decimal::new(100_000, 2),
            fees_amount: Decimal::new(2_000, 2),
            net_amount: Decimal::new(98_000, 2),
            bank_account_number: "001234567890".into(),
            bank_ifsc: "HDFC0001234".into(),
            bank_name: "HDFC Bank".into(),
            status: SettlementStatus::BankConfirmed,
            funds_reserved_at: None,
            sent_to_bank_at: None,
            bank_confirmed_at: None,
            settled_at: None,
            failed_at: None,
            bank_reference_number: None,
            bank_transaction_id: None,
            utr_number: Some("UTR-XYZ".into()),
            settlement_batch_id: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            state_transitions: Vec::new(),
            retry_history: Vec::new(),
            failure_reason: None,
            created_at: Utc::now(),
        };

        // Bank confirmation alone is not final.
        assert!(!settlement.is_final());

        settlement.status = SettlementStatus::Settled;
        assert!(settlement.is_final());

        settlement.utr_number = Some("   ".into());
        assert!(!settlement.is_final());
    }
}
