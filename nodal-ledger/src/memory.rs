use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use nodal_audit_log::AppendRequest;
use nodal_audit_log::AuditLog;
use nodal_audit_log::InMemoryAuditLog;
use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;

use crate::AccountBalance;
use crate::AccountCode;
use crate::BalanceQuery;
use crate::EntryWithAccount;
use crate::LedgerAccount;
use crate::LedgerConfig;
use crate::LedgerEntry;
use crate::LedgerError;
use crate::LedgerResult;
use crate::LedgerService;
use crate::LedgerSummary;
use crate::LedgerTransaction;
use crate::PostTransactionRequest;
use crate::PostingOutcome;
use crate::PostingValidation;
use crate::ReverseTransactionRequest;
use crate::SeedAccountsRequest;
use crate::SummaryQuery;
use crate::TransactionId;
use crate::TransactionStatus;
use crate::TransactionView;
use crate::signed_balance;
use crate::validate_entries;

/// In-memory `LedgerService`. The state mutex stands in for the database
/// transaction of a SQL-backed implementation: nothing is visible until the
/// whole posting has been validated and the audit row written.
pub struct InMemoryLedgerService {
    config: LedgerConfig,
    audit: Arc<dyn AuditLog>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<(TenantId, AccountCode), LedgerAccount>,
    transactions: HashMap<TransactionId, LedgerTransaction>,
    entries: HashMap<TransactionId, Vec<LedgerEntry>>,
    idempotency_index: HashMap<String, TransactionId>,
    ref_index: HashMap<(TenantId, String), TransactionId>,
}

impl InMemoryLedgerService {
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_audit(config, InMemoryAuditLog::shared())
    }

    #[must_use]
    pub fn with_audit(config: LedgerConfig, audit: Arc<dyn AuditLog>) -> Self {
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

    fn validate_request(request: &PostTransactionRequest) -> LedgerResult<()> {
        if request.transaction_ref.trim().is_empty() {
            return Err(LedgerError::Validation(
                "transaction_ref cannot be empty".into(),
            ));
        }
        if request.currency.len() != 3 {
            return Err(LedgerError::Validation(
                "currency must be a 3-letter ISO code".into(),
            ));
        }
        if request.entries.len() < 2 {
            return Err(LedgerError::Validation(
                "a transaction needs at least two entries".into(),
            ));
        }
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation("amount must be positive".into()));
        }
        for entry in &request.entries {
            if entry.amount <= Decimal::ZERO {
                return Err(LedgerError::Validation(
                    "entry amounts must be strictly positive".into(),
                ));
            }
            if let Some(currency) = &entry.currency
                && currency != &request.currency
            {
                return Err(LedgerError::CurrencyMismatch {
                    expected: request.currency.clone(),
                    found: currency.clone(),
                });
            }
        }
        Ok(())
    }

    fn stored_outcome(
        state: &State,
        transaction_id: &TransactionId,
        tolerance: Decimal,
        duplicate: bool,
    ) -> LedgerResult<PostingOutcome> {
        let transaction = state
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| LedgerError::Internal(format!("transaction {transaction_id} lost")))?;
        let entries = state
            .entries
            .get(transaction_id)
            .cloned()
            .unwrap_or_default();
        let validation = Self::entry_totals(&entries, tolerance);
        Ok(PostingOutcome {
            transaction,
            entries,
            duplicate,
            validation,
        })
    }

    fn entry_totals(entries: &[LedgerEntry], tolerance: Decimal) -> PostingValidation {
        let (debits, credits) = entries
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), entry| {
                match entry.side {
                    crate::EntrySide::Debit => (d + entry.amount, c),
                    crate::EntrySide::Credit => (d, c + entry.amount),
                }
            });
        PostingValidation {
            total_debits: debits,
            total_credits: credits,
            balanced: (debits - credits).abs() <= tolerance,
        }
    }

    fn transaction_snapshot(transaction: &LedgerTransaction) -> serde_json::Value {
        serde_json::to_value(transaction).unwrap_or(serde_json::Value::Null)
    }

    async fn append_audit(
        &self,
        tenant: &TenantContext,
        entity_id: &str,
        action: &str,
        reason: Option<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> LedgerResult<()> {
        self.audit
            .append(AppendRequest {
                tenant_id: tenant.tenant_id.clone(),
                entity_type: "ledger_transaction".into(),
                entity_id: entity_id.into(),
                actor: tenant.user_id.clone(),
                actor_role: tenant.role.to_string(),
                action: action.into(),
                reason,
                before,
                after,
            })
            .await
            .map_err(|err| LedgerError::Internal(format!("audit append failed: {err}")))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerService for InMemoryLedgerService {
    async fn seed_accounts(
        &self,
        request: SeedAccountsRequest,
    ) -> LedgerResult<Vec<LedgerAccount>> {
        let mut state = self.state.lock().await;
        let tenant_id = request.tenant.tenant_id.clone();

        let mut staged = Vec::new();
        for template in request.accounts {
            let key = (tenant_id.clone(), template.code.clone());
            if state.accounts.contains_key(&key) {
                return Err(LedgerError::Validation(format!(
                    "account code {} already seeded",
                    template.code
                )));
            }
            staged.push(LedgerAccount {
                tenant_id: tenant_id.clone(),
                code: template.code,
                name: template.name,
                account_type: template.account_type,
                normal_balance: template.normal_balance,
                category: template.category,
                gateway_name: template.gateway_name,
                is_active: true,
            });
        }

        for account in &staged {
            state.accounts.insert(
                (tenant_id.clone(), account.code.clone()),
                account.clone(),
            );
        }
        Ok(staged)
    }

    async fn post_transaction(
        &self,
        request: PostTransactionRequest,
    ) -> LedgerResult<PostingOutcome> {
        Self::validate_request(&request)?;
        if request.tenant.role.read_only() {
            self.audit
                .record_denial(
                    &request.tenant.tenant_id,
                    &request.tenant.user_id,
                    &request.tenant.role.to_string(),
                    "read_only_post",
                    "read-only role attempted a ledger post",
                )
                .await
                .ok();
            return Err(LedgerError::Validation(
                "read-only roles cannot post".into(),
            ));
        }

        let mut state = self.state.lock().await;
        let tenant_id = request.tenant.tenant_id.clone();

        // Step (a): idempotent replay returns the stored result untouched.
        if let Some(key) = &request.idempotency_key
            && let Some(existing_id) = state.idempotency_index.get(key).cloned()
        {
            let existing = state.transactions.get(&existing_id).ok_or_else(|| {
                LedgerError::Internal(format!("idempotency index points at missing {existing_id}"))
            })?;
            if existing.tenant_id != tenant_id
                || existing.transaction_ref != request.transaction_ref
                || existing.amount != request.amount
            {
                return Err(LedgerError::IdempotencyConflict(key.clone()));
            }
            return Self::stored_outcome(
                &state,
                &existing_id,
                self.config.balance_tolerance,
                true,
            );
        }

        let ref_key = (tenant_id.clone(), request.transaction_ref.clone());
        if state.ref_index.contains_key(&ref_key) {
            return Err(LedgerError::Validation(format!(
                "transaction_ref {} already used",
                request.transaction_ref
            )));
        }

        // Step (b): the transaction starts out pending and is only flipped
        // to posted after every check below has passed.
        let now = Utc::now();
        let transaction_id = Self::generate_id();
        let mut transaction = LedgerTransaction {
            id: transaction_id.clone(),
            tenant_id: tenant_id.clone(),
            transaction_ref: request.transaction_ref.clone(),
            idempotency_key: request.idempotency_key.clone(),
            event_type: request.event_type.clone(),
            source_transaction_id: request.source_transaction_id.clone(),
            source_order_id: request.source_order_id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            description: request.description.clone(),
            status: TransactionStatus::Pending,
            transaction_date: request.transaction_date,
            reverses_transaction_id: None,
            reversed_by_transaction_id: None,
            override_reference: request.override_reference.clone(),
            metadata: request.metadata.clone(),
            created_by: request.tenant.user_id.clone(),
            created_at: now,
        };

        // Step (c): resolve every account by code; inactive accounts fail
        // the same way missing ones do.
        for entry in &request.entries {
            let account = state
                .accounts
                .get(&(tenant_id.clone(), entry.account_code.clone()))
                .ok_or_else(|| LedgerError::UnknownAccount(entry.account_code.clone()))?;
            if !account.allows_posting() {
                return Err(LedgerError::UnknownAccount(format!(
                    "{} (inactive)",
                    entry.account_code
                )));
            }
        }

        // Step (d)/(e): build the legs, then verify the balance before
        // anything becomes visible.
        let validation = validate_entries(&request.entries, self.config.balance_tolerance);
        if !validation.balanced {
            return Err(LedgerError::Unbalanced {
                debits: validation.total_debits,
                credits: validation.total_credits,
            });
        }

        let entries = request
            .entries
            .iter()
            .map(|input| LedgerEntry {
                id: Self::generate_id(),
                tenant_id: tenant_id.clone(),
                transaction_id: transaction_id.clone(),
                account_code: input.account_code.clone(),
                side: input.side,
                amount: input.amount,
                currency: request.currency.clone(),
                description: input.description.clone(),
                created_at: now,
            })
            .collect::<Vec<_>>();

        // Step (f): flip to posted.
        transaction.status = TransactionStatus::Posted;

        // Step (g): the audit row is part of the same unit of work; if it
        // cannot be written the posting does not happen.
        self.append_audit(
            &request.tenant,
            &transaction_id,
            "transaction_posted",
            None,
            serde_json::Value::Null,
            Self::transaction_snapshot(&transaction),
        )
        .await?;

        if let Some(key) = &request.idempotency_key {
            state
                .idempotency_index
                .insert(key.clone(), transaction_id.clone());
        }
        state.ref_index.insert(ref_key, transaction_id.clone());
        state
            .transactions
            .insert(transaction_id.clone(), transaction.clone());
        state.entries.insert(transaction_id, entries.clone());

        Ok(PostingOutcome {
            transaction,
            entries,
            duplicate: false,
            validation,
        })
    }

    async fn reverse_transaction(
        &self,
        request: ReverseTransactionRequest,
    ) -> LedgerResult<PostingOutcome> {
        if request.reason.trim().is_empty() {
            return Err(LedgerError::Validation(
                "a reversal requires a reason".into(),
            ));
        }

        let mut state = self.state.lock().await;
        let original = state
            .transactions
            .get(&request.transaction_id)
            .cloned()
            .ok_or_else(|| {
                LedgerError::NotFound(format!("transaction {}", request.transaction_id))
            })?;
        request
            .tenant
            .ensure_tenant(&original.tenant_id)
            .map_err(|err| LedgerError::TenantMismatch(err.to_string()))?;

        if original.status != TransactionStatus::Posted {
            return Err(LedgerError::AlreadyReversed(original.id.clone()));
        }

        let now = Utc::now();
        let reversal_id = Self::generate_id();
        let original_entries = state
            .entries
            .get(&original.id)
            .cloned()
            .unwrap_or_default();

        let reversal_entries = original_entries
            .iter()
            .map(|entry| LedgerEntry {
                id: Self::generate_id(),
                tenant_id: entry.tenant_id.clone(),
                transaction_id: reversal_id.clone(),
                account_code: entry.account_code.clone(),
                side: entry.side.opposite(),
                amount: entry.amount,
                currency: entry.currency.clone(),
                description: entry.description.clone(),
                created_at: now,
            })
            .collect::<Vec<_>>();

        let reversal = LedgerTransaction {
            id: reversal_id.clone(),
            tenant_id: original.tenant_id.clone(),
            transaction_ref: format!("{}-REV", original.transaction_ref),
            idempotency_key: None,
            event_type: "reversal".into(),
            source_transaction_id: Some(original.id.clone()),
            source_order_id: original.source_order_id.clone(),
            amount: original.amount,
            currency: original.currency.clone(),
            description: Some(format!(
                "Reversal of {}: {}",
                original.transaction_ref, request.reason
            )),
            status: TransactionStatus::Posted,
            transaction_date: original.transaction_date,
            reverses_transaction_id: Some(original.id.clone()),
            reversed_by_transaction_id: None,
            override_reference: None,
            metadata: serde_json::json!({ "reversal_reason": request.reason }),
            created_by: request.tenant.user_id.clone(),
            created_at: now,
        };

        self.append_audit(
            &request.tenant,
            &original.id,
            "transaction_reversed",
            Some(request.reason.clone()),
            Self::transaction_snapshot(&original),
            Self::transaction_snapshot(&reversal),
        )
        .await?;

        let validation = Self::entry_totals(&reversal_entries, self.config.balance_tolerance);

        let ref_key = (
            reversal.tenant_id.clone(),
            reversal.transaction_ref.clone(),
        );
        state.ref_index.insert(ref_key, reversal_id.clone());
        state
            .entries
            .insert(reversal_id.clone(), reversal_entries.clone());
        state
            .transactions
            .insert(reversal_id.clone(), reversal.clone());
        if let Some(stored) = state.transactions.get_mut(&original.id) {
            stored.status = TransactionStatus::Reversed;
            stored.reversed_by_transaction_id = Some(reversal_id);
        }

        Ok(PostingOutcome {
            transaction: reversal,
            entries: reversal_entries,
            duplicate: false,
            validation,
        })
    }

    async fn get_transaction(
        &self,
        transaction_id: &TransactionId,
        tenant: TenantContext,
    ) -> LedgerResult<TransactionView> {
        let state = self.state.lock().await;
        let transaction = state
            .transactions
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))?;
        tenant
            .ensure_tenant(&transaction.tenant_id)
            .map_err(|err| LedgerError::TenantMismatch(err.to_string()))?;

        let entries = state
            .entries
            .get(transaction_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|entry| {
                let account = state
                    .accounts
                    .get(&(entry.tenant_id.clone(), entry.account_code.clone()))
                    .ok_or_else(|| LedgerError::UnknownAccount(entry.account_code.clone()))?;
                Ok(EntryWithAccount {
                    account_name: account.name.clone(),
                    account_type: account.account_type,
                    normal_balance: account.normal_balance,
                    entry,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        Ok(TransactionView {
            transaction,
            entries,
        })
    }

    async fn get_account_balance(&self, query: BalanceQuery) -> LedgerResult<AccountBalance> {
        let state = self.state.lock().await;
        let tenant_id = query.tenant.tenant_id.clone();
        let account = state
            .accounts
            .get(&(tenant_id.clone(), query.account_code.clone()))
            .ok_or_else(|| LedgerError::UnknownAccount(query.account_code.clone()))?;

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for (transaction_id, entries) in &state.entries {
            let Some(transaction) = state.transactions.get(transaction_id) else {
                continue;
            };
            if transaction.tenant_id != tenant_id
                || transaction.status == TransactionStatus::Pending
            {
                continue;
            }
            for entry in entries {
                if entry.account_code != query.account_code {
                    continue;
                }
                if let Some(as_of) = query.as_of
                    && entry.created_at > as_of
                {
                    continue;
                }
                match entry.side {
                    crate::EntrySide::Debit => debits += entry.amount,
                    crate::EntrySide::Credit => credits += entry.amount,
                }
            }
        }

        Ok(AccountBalance {
            account_code: account.code.clone(),
            account_type: account.account_type,
            normal_balance: account.normal_balance,
            total_debits: debits,
            total_credits: credits,
            balance: signed_balance(account.normal_balance, debits, credits),
            as_of: query.as_of,
        })
    }

    async fn get_summary(&self, query: SummaryQuery) -> LedgerResult<LedgerSummary> {
        if query.from > query.to {
            return Err(LedgerError::Validation(
                "summary window start must not be after its end".into(),
            ));
        }

        let state = self.state.lock().await;
        let tenant_id = query.tenant.tenant_id.clone();

        let mut transaction_count = 0;
        let mut total_amount = Decimal::ZERO;
        for transaction in state.transactions.values() {
            if transaction.tenant_id != tenant_id
                || transaction.status == TransactionStatus::Pending
                || transaction.transaction_date < query.from
                || transaction.transaction_date > query.to
            {
                continue;
            }
            transaction_count += 1;
            total_amount += transaction.amount;
        }

        let mut per_account: HashMap<AccountCode, (Decimal, Decimal)> = HashMap::new();
        for (transaction_id, entries) in &state.entries {
            let Some(transaction) = state.transactions.get(transaction_id) else {
                continue;
            };
            if transaction.tenant_id != tenant_id
                || transaction.status == TransactionStatus::Pending
                || transaction.transaction_date < query.from
                || transaction.transaction_date > query.to
            {
                continue;
            }
            for entry in entries {
                let slot = per_account
                    .entry(entry.account_code.clone())
                    .or_insert((Decimal::ZERO, Decimal::ZERO));
                match entry.side {
                    crate::EntrySide::Debit => slot.0 += entry.amount,
                    crate::EntrySide::Credit => slot.1 += entry.amount,
                }
            }
        }

        let mut balances = Vec::new();
        for (code, (debits, credits)) in per_account {
            let Some(account) = state.accounts.get(&(tenant_id.clone(), code.clone())) else {
                continue;
            };
            if let Some(filter) = query.account_type
                && account.account_type != filter
            {
                continue;
            }
            balances.push(AccountBalance {
                account_code: code,
                account_type: account.account_type,
                normal_balance: account.normal_balance,
                total_debits: debits,
                total_credits: credits,
                balance: signed_balance(account.normal_balance, debits, credits),
                as_of: None,
            });
        }
        balances.sort_by(|a, b| a.account_code.cmp(&b.account_code));

        Ok(LedgerSummary {
            from: query.from,
            to: query.to,
            transaction_count,
            total_amount,
            balances,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountCategory;
    use crate::AccountType;
    use crate::ChartAccount;
    use crate::EntryInput;
    use crate::EntrySide;
    use crate::NormalBalance;
    use chrono::NaiveDate;
    use nodal_tenancy::Role;
    use pretty_assertions::assert_eq;

    fn dec(raw: &str) -> Decimal {
        raw.parse().expect("decimal literal")
    }

    fn tenant(tenant_id: &str) -> TenantContext {
        TenantContext::new(tenant_id, "ops-1", Role::Operations)
    }

    fn service() -> InMemoryLedgerService {
        InMemoryLedgerService::new(LedgerConfig::default())
    }

    fn chart() -> Vec<ChartAccount> {
        vec![
            ChartAccount {
                code: "1001".into(),
                name: "Escrow Bank".into(),
                account_type: AccountType::Escrow,
                normal_balance: NormalBalance::Debit,
                category: AccountCategory::Asset,
                gateway_name: None,
            },
            ChartAccount {
                code: "2001".into(),
                name: "Escrow Liability".into(),
                account_type: AccountType::Escrow,
                normal_balance: NormalBalance::Credit,
                category: AccountCategory::Liability,
                gateway_name: None,
            },
        ]
    }

    async fn seeded(tenant_id: &str) -> InMemoryLedgerService {
        let service = service();
        service
            .seed_accounts(SeedAccountsRequest {
                accounts: chart(),
                tenant: tenant(tenant_id),
            })
            .await
            .expect("seed accounts");
        service
    }

    fn post_request(tenant_id: &str, reference: &str, amount: &str) -> PostTransactionRequest {
        PostTransactionRequest {
            transaction_ref: reference.into(),
            idempotency_key: None,
            event_type: "payment_success".into(),
            source_transaction_id: None,
            source_order_id: None,
            amount: dec(amount),
            currency: "INR".into(),
            description: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 6, 15).expect("date"),
            entries: vec![
                EntryInput {
                    account_code: "1001".into(),
                    side: EntrySide::Debit,
                    amount: dec(amount),
                    currency: None,
                    description: None,
                },
                EntryInput {
                    account_code: "2001".into(),
                    side: EntrySide::Credit,
                    amount: dec(amount),
                    currency: None,
                    description: None,
                },
            ],
            metadata: serde_json::Value::Null,
            override_reference: None,
            tenant: tenant(tenant_id),
        }
    }

    #[tokio::test]
    async fn post_creates_balanced_transaction_with_audit() {
        let service = seeded("tenant-1").await;
        let outcome = service
            .post_transaction(post_request("tenant-1", "PAY-1", "1000.00"))
            .await
            .expect("post succeeds");

        assert_eq!(outcome.transaction.status, TransactionStatus::Posted);
        assert!(!outcome.duplicate);
        assert_eq!(outcome.entries.len(), 2);
        assert!(outcome.validation.balanced);

        let records = service
            .audit_log()
            .records(nodal_audit_log::AuditLogFilter {
                tenant_id: Some("tenant-1".into()),
                ..Default::default()
            })
            .await
            .expect("audit records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "transaction_posted");
    }

    #[tokio::test]
    async fn idempotent_replay_returns_stored_result() {
        let service = seeded("tenant-1").await;
        let mut request = post_request("tenant-1", "PAY-1", "1000.00");
        request.idempotency_key = Some("payment-success-TXN42".into());

        let first = service
            .post_transaction(request.clone())
            .await
            .expect("first post");
        let second = service
            .post_transaction(request)
            .await
            .expect("replay post");

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.transaction.id, second.transaction.id);

        // Balances did not double.
        let balance = service
            .get_account_balance(BalanceQuery {
                account_code: "1001".into(),
                as_of: None,
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("balance");
        assert_eq!(balance.balance, dec("1000.00"));
    }

    #[tokio::test]
    async fn idempotency_reuse_with_different_body_conflicts() {
        let service = seeded("tenant-1").await;
        let mut request = post_request("tenant-1", "PAY-1", "1000.00");
        request.idempotency_key = Some("payment-success-TXN42".into());
        service
            .post_transaction(request)
            .await
            .expect("first post");

        let mut altered = post_request("tenant-1", "PAY-2", "999.00");
        altered.entries[0].amount = dec("999.00");
        altered.entries[1].amount = dec("999.00");
        altered.idempotency_key = Some("payment-success-TXN42".into());
        let err = service.post_transaction(altered).await.unwrap_err();
        assert!(matches!(err, LedgerError::IdempotencyConflict(_)));
    }

    #[tokio::test]
    async fn unbalanced_post_persists_nothing() {
        let service = seeded("tenant-1").await;
        let mut request = post_request("tenant-1", "PAY-1", "100.00");
        request.entries[1].amount = dec("99.00");

        let err = service.post_transaction(request).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unbalanced { .. }));

        let balance = service
            .get_account_balance(BalanceQuery {
                account_code: "1001".into(),
                as_of: None,
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("balance");
        assert_eq!(balance.total_debits, Decimal::ZERO);

        // The failed ref remains available.
        service
            .post_transaction(post_request("tenant-1", "PAY-1", "100.00"))
            .await
            .expect("ref is reusable after a failed post");
    }

    #[tokio::test]
    async fn unknown_account_fails_post() {
        let service = seeded("tenant-1").await;
        let mut request = post_request("tenant-1", "PAY-1", "100.00");
        request.entries[0].account_code = "9999".into();

        let err = service.post_transaction(request).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount(code) if code == "9999"));
    }

    #[tokio::test]
    async fn currency_mismatch_fails_post() {
        let service = seeded("tenant-1").await;
        let mut request = post_request("tenant-1", "PAY-1", "100.00");
        request.entries[0].currency = Some("USD".into());

        let err = service.post_transaction(request).await.unwrap_err();
        assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));
    }

    #[tokio::test]
    async fn reversal_swaps_sides_and_marks_original() {
        let service = seeded("tenant-1").await;
        let posted = service
            .post_transaction(post_request("tenant-1", "PAY-1", "500.00"))
            .await
            .expect("post");

        let reversal = service
            .reverse_transaction(ReverseTransactionRequest {
                transaction_id: posted.transaction.id.clone(),
                reason: "customer dispute".into(),
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("reverse");

        assert_eq!(reversal.transaction.transaction_ref, "PAY-1-REV");
        assert_eq!(
            reversal.transaction.reverses_transaction_id,
            Some(posted.transaction.id.clone())
        );
        assert_eq!(reversal.entries[0].side, EntrySide::Credit);
        assert_eq!(reversal.entries[1].side, EntrySide::Debit);

        let view = service
            .get_transaction(&posted.transaction.id, tenant("tenant-1"))
            .await
            .expect("original view");
        assert_eq!(view.transaction.status, TransactionStatus::Reversed);
        assert_eq!(
            view.transaction.reversed_by_transaction_id,
            Some(reversal.transaction.id.clone())
        );

        // Balances net to zero after the reversal.
        let balance = service
            .get_account_balance(BalanceQuery {
                account_code: "1001".into(),
                as_of: None,
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("balance");
        assert_eq!(balance.balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn double_reversal_is_rejected() {
        let service = seeded("tenant-1").await;
        let posted = service
            .post_transaction(post_request("tenant-1", "PAY-1", "500.00"))
            .await
            .expect("post");

        service
            .reverse_transaction(ReverseTransactionRequest {
                transaction_id: posted.transaction.id.clone(),
                reason: "first".into(),
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("first reversal");

        let err = service
            .reverse_transaction(ReverseTransactionRequest {
                transaction_id: posted.transaction.id.clone(),
                reason: "second".into(),
                tenant: tenant("tenant-1"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyReversed(_)));
    }

    #[tokio::test]
    async fn cross_tenant_reversal_is_rejected() {
        let service = seeded("tenant-1").await;
        let posted = service
            .post_transaction(post_request("tenant-1", "PAY-1", "500.00"))
            .await
            .expect("post");

        let err = service
            .reverse_transaction(ReverseTransactionRequest {
                transaction_id: posted.transaction.id.clone(),
                reason: "not mine".into(),
                tenant: tenant("tenant-2"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TenantMismatch(_)));
    }

    #[tokio::test]
    async fn summary_counts_window_transactions() {
        let service = seeded("tenant-1").await;
        service
            .post_transaction(post_request("tenant-1", "PAY-1", "100.00"))
            .await
            .expect("post");
        service
            .post_transaction(post_request("tenant-1", "PAY-2", "200.00"))
            .await
            .expect("post");

        let summary = service
            .get_summary(SummaryQuery {
                from: NaiveDate::from_ymd_opt(2024, 6, 1).expect("date"),
                to: NaiveDate::from_ymd_opt(2024, 6, 30).expect("date"),
                account_type: None,
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("summary");
        assert_eq!(summary.transaction_count, 2);
        assert_eq!(summary.total_amount, dec("300.00"));
        assert_eq!(summary.balances.len(), 2);

        let out_of_window = service
            .get_summary(SummaryQuery {
                from: NaiveDate::from_ymd_opt(2024, 7, 1).expect("date"),
                to: NaiveDate::from_ymd_opt(2024, 7, 31).expect("date"),
                account_type: None,
                tenant: tenant("tenant-1"),
            })
            .await
            .expect("summary");
        assert_eq!(out_of_window.transaction_count, 0);
    }
}
