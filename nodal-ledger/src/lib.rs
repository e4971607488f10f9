#![deny(clippy::print_stdout, clippy::print_stderr)]

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use async_trait::async_trait;
use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;

mod memory;

pub use memory::InMemoryLedgerService;

pub type AccountCode = String;
pub type TransactionId = String;
pub type EntryId = String;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown account: {0}")]
    UnknownAccount(String),
    #[error("transaction does not balance: debits {debits} vs credits {credits}")]
    Unbalanced { debits: Decimal, credits: Decimal },
    #[error("currency mismatch: transaction is {expected}, entry is {found}")]
    CurrencyMismatch { expected: String, found: String },
    #[error("idempotency key {0} was already used with a different body")]
    IdempotencyConflict(String),
    #[error("transaction {0} cannot be reversed again")]
    AlreadyReversed(TransactionId),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Tolerances and limits the ledger runs under. Passed explicitly at
/// construction; there is no global configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub balance_tolerance: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            // One minor unit of the transaction currency.
            balance_tolerance: Decimal::new(1, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccountType {
    Escrow,
    Merchant,
    Gateway,
    PlatformRevenue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccountCategory {
    Asset,
    Liability,
    Revenue,
    Expense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NormalBalance {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            EntrySide::Debit => EntrySide::Credit,
            EntrySide::Credit => EntrySide::Debit,
        }
    }
}

/// Immutable master record. Accounts are seeded when a tenant is onboarded
/// and are never user-creatable at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAccount {
    pub tenant_id: TenantId,
    pub code: AccountCode,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub category: AccountCategory,
    pub gateway_name: Option<String>,
    pub is_active: bool,
}

impl LedgerAccount {
    #[must_use]
    pub fn allows_posting(&self) -> bool {
        self.is_active
    }
}

/// Seed template for one account; tenant scoping is applied by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartAccount {
    pub code: AccountCode,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub category: AccountCategory,
    pub gateway_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionStatus {
    Pending,
    Posted,
    Reversed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub transaction_ref: String,
    pub idempotency_key: Option<String>,
    pub event_type: String,
    pub source_transaction_id: Option<String>,
    pub source_order_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub status: TransactionStatus,
    pub transaction_date: NaiveDate,
    pub reverses_transaction_id: Option<TransactionId>,
    pub reversed_by_transaction_id: Option<TransactionId>,
    pub override_reference: Option<String>,
    pub metadata: serde_json::Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Digest over the fields that never change after posting. The status
    /// column and the reversal back-reference are excluded: they are the
    /// only mutation the posted -> reversed transition performs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.tenant_id.as_bytes());
        hasher.update(self.transaction_ref.as_bytes());
        if let Some(key) = &self.idempotency_key {
            hasher.update(key.as_bytes());
        }
        hasher.update(self.event_type.as_bytes());
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(self.currency.as_bytes());
        hasher.update(self.transaction_date.to_string().as_bytes());
        hasher.update(self.created_by.as_bytes());
        let nanos = self
            .created_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.created_at.timestamp_micros() * 1_000);
        hasher.update(nanos.to_be_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One leg of a transaction. Entries are immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub transaction_id: TransactionId,
    pub account_code: AccountCode,
    pub side: EntrySide,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.transaction_id.as_bytes());
        hasher.update(self.account_code.as_bytes());
        hasher.update(format!("{:?}", self.side).as_bytes());
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(self.currency.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// One requested leg. The currency is optional and defaults to the
/// transaction currency; supplying a different one fails the post.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInput {
    pub account_code: AccountCode,
    pub side: EntrySide,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostTransactionRequest {
    pub transaction_ref: String,
    pub idempotency_key: Option<String>,
    pub event_type: String,
    pub source_transaction_id: Option<String>,
    pub source_order_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub transaction_date: NaiveDate,
    pub entries: Vec<EntryInput>,
    pub metadata: serde_json::Value,
    pub override_reference: Option<String>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingValidation {
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostingOutcome {
    pub transaction: LedgerTransaction,
    pub entries: Vec<LedgerEntry>,
    pub duplicate: bool,
    pub validation: PostingValidation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseTransactionRequest {
    pub transaction_id: TransactionId,
    pub reason: String,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedAccountsRequest {
    pub accounts: Vec<ChartAccount>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryWithAccount {
    pub entry: LedgerEntry,
    pub account_name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionView {
    pub transaction: LedgerTransaction,
    pub entries: Vec<EntryWithAccount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceQuery {
    pub account_code: AccountCode,
    pub as_of: Option<DateTime<Utc>>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub account_code: AccountCode,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub balance: Decimal,
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub account_type: Option<AccountType>,
    pub tenant: TenantContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub transaction_count: usize,
    pub total_amount: Decimal,
    pub balances: Vec<AccountBalance>,
}

/// Sums the requested legs and checks them against the tolerance.
#[must_use]
pub fn validate_entries(entries: &[EntryInput], tolerance: Decimal) -> PostingValidation {
    let (debits, credits) = entries
        .iter()
        .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), entry| {
            match entry.side {
                EntrySide::Debit => (d + entry.amount, c),
                EntrySide::Credit => (d, c + entry.amount),
            }
        });
    PostingValidation {
        total_debits: debits,
        total_credits: credits,
        balanced: (debits - credits).abs() <= tolerance,
    }
}

#[must_use]
pub fn signed_balance(
    normal_balance: NormalBalance,
    total_debits: Decimal,
    total_credits: Decimal,
) -> Decimal {
    match normal_balance {
        NormalBalance::Debit => total_debits - total_credits,
        NormalBalance::Credit => total_credits - total_debits,
    }
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn seed_accounts(&self, request: SeedAccountsRequest)
    -> LedgerResult<Vec<LedgerAccount>>;

    async fn post_transaction(
        &self,
        request: PostTransactionRequest,
    ) -> LedgerResult<PostingOutcome>;

    async fn reverse_transaction(
        &self,
        request: ReverseTransactionRequest,
    ) -> LedgerResult<PostingOutcome>;

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
        tenant: TenantContext,
    ) -> LedgerResult<TransactionView>;

    async fn get_account_balance(&self, query: BalanceQuery) -> LedgerResult<AccountBalance>;

    async fn get_summary(&self, query: SummaryQuery) -> LedgerResult<LedgerSummary>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dec(raw: &str) -> Decimal {
        raw.parse().expect("decimal literal")
    }

    fn entry(side: EntrySide, amount: &str) -> EntryInput {
        EntryInput {
            account_code: "1001".into(),
            side,
            amount: dec(amount),
            currency: None,
            description: None,
        }
    }

    #[test]
    fn balanced_entries_pass_within_tolerance() {
        let validation = validate_entries(
            &[
                entry(EntrySide::Debit, "1000.00"),
                entry(EntrySide::Credit, "999.995"),
            ],
            Decimal::new(1, 2),
        );
        assert!(validation.balanced);
        assert_eq!(validation.total_debits, dec("1000.00"));
        assert_eq!(validation.total_credits, dec("999.995"));
    }

    #[test]
    fn unbalanced_entries_fail_beyond_tolerance() {
        let validation = validate_entries(
            &[
                entry(EntrySide::Debit, "100.00"),
                entry(EntrySide::Credit, "99.00"),
            ],
            Decimal::new(1, 2),
        );
        assert!(!validation.balanced);
    }

    #[test]
    fn many_small_legs_do_not_accumulate_error() {
        // 0.10 a hundred times against a single 10.00 credit. Exact with
        // decimals; binary floats would drift here.
        let mut entries = Vec::new();
        for _ in 0..100 {
            entries.push(entry(EntrySide::Debit, "0.10"));
        }
        entries.push(entry(EntrySide::Credit, "10.00"));
        let validation = validate_entries(&entries, Decimal::new(1, 2));
        assert!(validation.balanced);
        assert_eq!(validation.total_debits, dec("10.00"));
    }

    #[test]
    fn signed_balance_respects_normal_balance() {
        assert_eq!(
            signed_balance(NormalBalance::Debit, dec("150.00"), dec("50.00")),
            dec("100.00")
        );
        assert_eq!(
            signed_balance(NormalBalance::Credit, dec("50.00"), dec("150.00")),
            dec("100.00")
        );
    }

    #[test]
    fn entry_side_opposite_swaps() {
        assert_eq!(EntrySide::Debit.opposite(), EntrySide::Credit);
        assert_eq!(EntrySide::Credit.opposite(), EntrySide::Debit);
    }

    #[test]
    fn fingerprint_is_stable_across_status_flip() {
        let mut transaction = LedgerTransaction {
            id: "txn-1".into(),
            tenant_id: "tenant-1".into(),
            transaction_ref: "PAY-1".into(),
            idempotency_key: Some("payment-success-PAY-1".into()),
            event_type: "payment_success".into(),
            source_transaction_id: None,
            source_order_id: None,
            amount: dec("1000.00"),
            currency: "INR".into(),
            description: None,
            status: TransactionStatus::Posted,
            transaction_date: NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"),
            reverses_transaction_id: None,
            reversed_by_transaction_id: None,
            override_reference: None,
            metadata: serde_json::Value::Null,
            created_by: "system".into(),
            created_at: Utc::now(),
        };

        let before = transaction.fingerprint();
        transaction.status = TransactionStatus::Reversed;
        transaction.reversed_by_transaction_id = Some("txn-2".into());
        assert_eq!(before, transaction.fingerprint());
    }
}
