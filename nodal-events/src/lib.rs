#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Translates business events into balanced ledger postings. Every handler
//! consults the period controller before writing and derives its
//! idempotency key from the external event identifier, so duplicate
//! deliveries never double-post.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use nodal_ledger::EntryInput;
use nodal_ledger::EntrySide;
use nodal_ledger::LedgerError;
use nodal_ledger::LedgerService;
use nodal_ledger::PostTransactionRequest;
use nodal_ledger::PostingOutcome;
use nodal_ledger::ReverseTransactionRequest;
use nodal_ledger::TransactionId;
use nodal_overrides::OverrideApprovals;
use nodal_overrides::OverridesError;
use nodal_periods::PeriodError;
use nodal_periods::PeriodService;
use nodal_periods::PeriodType;
use nodal_settlements::Settlement;
use nodal_settlements::SettlementHookError;
use nodal_settlements::SettlementPostingHook;
use nodal_tenancy::TenantContext;

pub mod chart;

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("posting blocked by an active ledger lock: {0}")]
    LedgerLocked(String),
    #[error("posting requires an approved override: {0}")]
    OverrideRequired(String),
    #[error("period rejects the posting: {0}")]
    PeriodClosed(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Period(#[from] PeriodError),
    #[error(transparent)]
    Overrides(#[from] OverridesError),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSuccess {
    pub transaction_id: String,
    pub order_id: Option<String>,
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub gateway_fee: Decimal,
    pub gateway_name: Option<String>,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub override_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundCompleted {
    pub refund_id: String,
    pub original_transaction_id: Option<String>,
    pub amount: Decimal,
    pub platform_fee_refund: Decimal,
    pub gateway_fee_refund: Decimal,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub override_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementCompleted {
    pub settlement_id: String,
    pub settlement_ref: String,
    pub amount: Decimal,
    pub utr_number: String,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub override_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargebackDebit {
    pub chargeback_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub override_reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualAdjustment {
    pub adjustment_id: String,
    pub amount: Decimal,
    pub from_account: String,
    pub to_account: String,
    pub approver: Option<String>,
    pub reason: String,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub override_reference: Option<String>,
}

/// Accounting rules for the aggregator. The posting tables here are
/// normative: each event produces exactly these legs and no others.
pub struct AccountingEventHandlers {
    ledger: Arc<dyn LedgerService>,
    periods: Arc<dyn PeriodService>,
    overrides: Arc<dyn OverrideApprovals>,
}

impl AccountingEventHandlers {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerService>,
        periods: Arc<dyn PeriodService>,
        overrides: Arc<dyn OverrideApprovals>,
    ) -> Self {
        Self {
            ledger,
            periods,
            overrides,
        }
    }

    fn debit(account_code: &str, amount: Decimal, description: &str) -> EntryInput {
        EntryInput {
            account_code: account_code.into(),
            side: EntrySide::Debit,
            amount,
            currency: None,
            description: Some(description.into()),
        }
    }

    fn credit(account_code: &str, amount: Decimal, description: &str) -> EntryInput {
        EntryInput {
            account_code: account_code.into(),
            side: EntrySide::Credit,
            amount,
            currency: None,
            description: Some(description.into()),
        }
    }

    /// Checks the posting gate for the transaction date. Returns the
    /// override reference consumed for a soft-closed period, if any.
    async fn ensure_posting_allowed(
        &self,
        transaction_date: NaiveDate,
        override_reference: Option<&str>,
        tenant: &TenantContext,
    ) -> EventResult<Option<String>> {
        // Posting gates run on the monthly accounting calendar.
        let gate = self
            .periods
            .check_period_for_posting(transaction_date, PeriodType::Monthly, tenant.clone())
            .await?;

        if gate.locked {
            let detail = gate
                .message
                .unwrap_or_else(|| format!("an active lock covers {transaction_date}"));
            return Err(EventError::LedgerLocked(detail));
        }
        if gate.posting_allowed {
            return Ok(None);
        }
        if gate.override_required {
            let Some(reference) = override_reference else {
                return Err(EventError::OverrideRequired(format!(
                    "period covering {transaction_date} is soft-closed"
                )));
            };
            let approved = self
                .overrides
                .find_approved(&reference.to_string(), tenant)
                .await?;
            return match approved {
                Some(request) => Ok(Some(request.id)),
                None => Err(EventError::OverrideRequired(format!(
                    "override {reference} is not approved for this tenant"
                ))),
            };
        }
        Err(EventError::PeriodClosed(gate.message.unwrap_or_else(|| {
            format!("no posting is admitted for {transaction_date}")
        })))
    }

    async fn post(
        &self,
        tenant: &TenantContext,
        transaction_date: NaiveDate,
        override_reference: Option<String>,
        transaction_ref: String,
        idempotency_key: String,
        event_type: &str,
        source_transaction_id: Option<String>,
        source_order_id: Option<String>,
        amount: Decimal,
        currency: String,
        description: String,
        entries: Vec<EntryInput>,
        metadata: serde_json::Value,
    ) -> EventResult<PostingOutcome> {
        let consumed_override = self
            .ensure_posting_allowed(transaction_date, override_reference.as_deref(), tenant)
            .await?;

        let outcome = self
            .ledger
            .post_transaction(PostTransactionRequest {
                transaction_ref,
                idempotency_key: Some(idempotency_key),
                event_type: event_type.into(),
                source_transaction_id,
                source_order_id,
                amount,
                currency,
                description: Some(description),
                transaction_date,
                entries,
                metadata,
                override_reference: consumed_override,
                tenant: tenant.clone(),
            })
            .await?;

        debug!(
            event_type,
            transaction_id = %outcome.transaction.id,
            duplicate = outcome.duplicate,
            "business event posted"
        );
        Ok(outcome)
    }

    /// payment_success: gross into escrow, the merchant share earmarked,
    /// and the platform/gateway fee legs when present.
    pub async fn handle_payment_success(
        &self,
        event: PaymentSuccess,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(EventError::Validation("amount must be positive".into()));
        }
        if event.platform_fee < Decimal::ZERO || event.gateway_fee < Decimal::ZERO {
            return Err(EventError::Validation("fees cannot be negative".into()));
        }
        let merchant_amount = event.amount - event.platform_fee - event.gateway_fee;
        if merchant_amount <= Decimal::ZERO {
            return Err(EventError::Validation(
                "fees consume the whole payment".into(),
            ));
        }

        let mut entries = vec![
            Self::debit(chart::ESCROW_BANK, event.amount, "customer payment received"),
            Self::credit(chart::ESCROW_LIABILITY, event.amount, "escrow obligation"),
            Self::debit(
                chart::MERCHANT_RECEIVABLE,
                merchant_amount,
                "merchant share receivable",
            ),
            Self::credit(
                chart::MERCHANT_PAYABLE,
                merchant_amount,
                "merchant share payable",
            ),
        ];
        if event.platform_fee > Decimal::ZERO {
            entries.push(Self::debit(
                chart::PLATFORM_RECEIVABLE,
                event.platform_fee,
                "platform fee receivable",
            ));
            entries.push(Self::credit(
                chart::PLATFORM_MDR,
                event.platform_fee,
                "platform MDR earned",
            ));
        }
        if event.gateway_fee > Decimal::ZERO {
            entries.push(Self::debit(
                chart::GATEWAY_FEE_EXPENSE,
                event.gateway_fee,
                "gateway fee expense",
            ));
            entries.push(Self::credit(
                chart::GATEWAY_PAYABLE,
                event.gateway_fee,
                "gateway fee payable",
            ));
        }

        self.post(
            &tenant,
            event.transaction_date,
            event.override_reference.clone(),
            format!("PAY-{}", event.transaction_id),
            format!("payment-success-{}", event.transaction_id),
            "payment_success",
            Some(event.transaction_id.clone()),
            event.order_id.clone(),
            event.amount,
            event.currency.clone(),
            format!("payment {} captured", event.transaction_id),
            entries,
            serde_json::json!({
                "gateway_name": event.gateway_name,
                "platform_fee": event.platform_fee.to_string(),
                "gateway_fee": event.gateway_fee.to_string(),
            }),
        )
        .await
    }

    /// refund_completed: escrow flows back to the customer; the merchant
    /// absorbs the refund net of fee refunds; the platform returns its MDR
    /// when refunded. Gateway fees are not returned by the processors.
    pub async fn handle_refund_completed(
        &self,
        event: RefundCompleted,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(EventError::Validation("amount must be positive".into()));
        }
        let merchant_share =
            event.amount - event.platform_fee_refund - event.gateway_fee_refund;
        if merchant_share <= Decimal::ZERO {
            return Err(EventError::Validation(
                "fee refunds consume the whole refund".into(),
            ));
        }

        let mut entries = vec![
            Self::debit(chart::ESCROW_LIABILITY, event.amount, "escrow released"),
            Self::credit(chart::ESCROW_BANK, event.amount, "refund paid out"),
            Self::debit(
                chart::MERCHANT_PAYABLE,
                merchant_share,
                "merchant refund share",
            ),
            Self::credit(
                chart::MERCHANT_RECEIVABLE,
                merchant_share,
                "merchant refund share",
            ),
        ];
        if event.platform_fee_refund > Decimal::ZERO {
            entries.push(Self::debit(
                chart::PLATFORM_MDR,
                event.platform_fee_refund,
                "platform MDR returned",
            ));
            entries.push(Self::credit(
                chart::PLATFORM_RECEIVABLE,
                event.platform_fee_refund,
                "platform fee receivable reversed",
            ));
        }

        self.post(
            &tenant,
            event.transaction_date,
            event.override_reference.clone(),
            format!("REF-{}", event.refund_id),
            format!("refund-completed-{}", event.refund_id),
            "refund_completed",
            event.original_transaction_id.clone(),
            None,
            event.amount,
            event.currency.clone(),
            format!("refund {} completed", event.refund_id),
            entries,
            serde_json::json!({
                "platform_fee_refund": event.platform_fee_refund.to_string(),
                "gateway_fee_refund": event.gateway_fee_refund.to_string(),
            }),
        )
        .await
    }

    /// settlement: the merchant payable is discharged and escrow funds
    /// leave the nodal account.
    pub async fn handle_settlement(
        &self,
        event: SettlementCompleted,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(EventError::Validation("amount must be positive".into()));
        }
        if event.utr_number.trim().is_empty() {
            return Err(EventError::Validation(
                "a settlement posting requires the bank UTR".into(),
            ));
        }

        let entries = vec![
            Self::debit(
                chart::MERCHANT_PAYABLE,
                event.amount,
                "merchant payable discharged",
            ),
            Self::credit(
                chart::MERCHANT_SETTLEMENT,
                event.amount,
                "settlement disbursed",
            ),
            Self::debit(chart::ESCROW_LIABILITY, event.amount, "escrow released"),
            Self::credit(chart::ESCROW_BANK, event.amount, "nodal account paid out"),
        ];

        self.post(
            &tenant,
            event.transaction_date,
            event.override_reference.clone(),
            format!("SETTLE-{}", event.settlement_id),
            format!("settlement-{}", event.settlement_id),
            "settlement",
            Some(event.settlement_id.clone()),
            None,
            event.amount,
            event.currency.clone(),
            format!("settlement {} disbursed", event.settlement_ref),
            entries,
            serde_json::json!({ "utr_number": event.utr_number }),
        )
        .await
    }

    /// chargeback_debit: the disputed amount leaves escrow and is clawed
    /// back from the merchant.
    pub async fn handle_chargeback_debit(
        &self,
        event: ChargebackDebit,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(EventError::Validation("amount must be positive".into()));
        }

        let entries = vec![
            Self::debit(
                chart::CHARGEBACK_LIABILITY,
                event.amount,
                "chargeback raised",
            ),
            Self::credit(
                chart::MERCHANT_RECEIVABLE,
                event.amount,
                "merchant clawback",
            ),
            Self::debit(chart::ESCROW_LIABILITY, event.amount, "escrow released"),
            Self::credit(chart::ESCROW_BANK, event.amount, "chargeback funded"),
        ];

        self.post(
            &tenant,
            event.transaction_date,
            event.override_reference.clone(),
            format!("CHB-{}", event.chargeback_id),
            format!("chargeback-debit-{}", event.chargeback_id),
            "chargeback_debit",
            Some(event.chargeback_id.clone()),
            None,
            event.amount,
            event.currency.clone(),
            format!("chargeback {} debited", event.chargeback_id),
            entries,
            serde_json::Value::Null,
        )
        .await
    }

    /// chargeback_reversal: a straight ledger reversal of the original
    /// chargeback transaction.
    pub async fn handle_chargeback_reversal(
        &self,
        original_transaction_id: TransactionId,
        reason: String,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        let outcome = self
            .ledger
            .reverse_transaction(ReverseTransactionRequest {
                transaction_id: original_transaction_id,
                reason,
                tenant,
            })
            .await?;
        Ok(outcome)
    }

    /// manual_adjustment: value moves between two named accounts; requires
    /// a dual-control approver.
    pub async fn handle_manual_adjustment(
        &self,
        event: ManualAdjustment,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        if event.amount <= Decimal::ZERO {
            return Err(EventError::Validation("amount must be positive".into()));
        }
        if event
            .approver
            .as_deref()
            .is_none_or(|approver| approver.trim().is_empty())
        {
            return Err(EventError::Validation(
                "a manual adjustment requires an approver".into(),
            ));
        }

        let entries = vec![
            Self::credit(&event.from_account, event.amount, "adjustment out"),
            Self::debit(&event.to_account, event.amount, "adjustment in"),
        ];

        self.post(
            &tenant,
            event.transaction_date,
            event.override_reference.clone(),
            format!("ADJ-{}", event.adjustment_id),
            format!("manual-adjustment-{}", event.adjustment_id),
            "manual_adjustment",
            None,
            None,
            event.amount,
            event.currency.clone(),
            event.reason.clone(),
            entries,
            serde_json::json!({ "approver": event.approver }),
        )
        .await
    }
}

#[async_trait]
impl SettlementPostingHook for AccountingEventHandlers {
    async fn post_settlement(
        &self,
        settlement: &Settlement,
        actor: &TenantContext,
    ) -> Result<serde_json::Value, SettlementHookError> {
        let utr_number = settlement
            .utr_number
            .clone()
            .ok_or_else(|| SettlementHookError("settlement has no UTR".into()))?;

        let outcome = self
            .handle_settlement(
                SettlementCompleted {
                    settlement_id: settlement.id.clone(),
                    settlement_ref: settlement.settlement_ref.clone(),
                    amount: settlement.net_amount,
                    utr_number,
                    currency: "INR".into(),
                    transaction_date: settlement.settlement_date,
                    override_reference: None,
                },
                actor.clone(),
            )
            .await
            .map_err(|err| SettlementHookError(err.to_string()))?;

        Ok(serde_json::json!({
            "ledger_transaction_id": outcome.transaction.id,
            "duplicate": outcome.duplicate,
        }))
    }
}
