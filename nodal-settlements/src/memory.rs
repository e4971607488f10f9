use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use nodal_audit_log::AppendRequest;
use nodal_audit_log::AuditLog;
use nodal_audit_log::InMemoryAuditLog;
use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;

use crate::CreateSettlementRequest;
use crate::NoopSettlementPostingHook;
use crate::RetryAttempt;
use crate::RetryPolicy;
use crate::Settlement;
use crate::SettlementError;
use crate::SettlementId;
use crate::SettlementPostingHook;
use crate::SettlementResult;
use crate::SettlementService;
use crate::SettlementStatus;
use crate::StateTransition;

/// In-memory `SettlementService`. Transitions are applied to a working copy
/// and stored only after every check (and the ledger hook, for settlement
/// finality) has passed, which stands in for row-level locking plus a
/// database transaction.
pub struct InMemorySettlementService {
    policy: RetryPolicy,
    hook: Arc<dyn SettlementPostingHook>,
    audit: Arc<dyn AuditLog>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    settlements: HashMap<SettlementId, Settlement>,
    ref_index: HashMap<(TenantId, String), SettlementId>,
}

impl InMemorySettlementService {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_components(
            policy,
            Arc::new(NoopSettlementPostingHook),
            InMemoryAuditLog::shared(),
        )
    }

    #[must_use]
    pub fn with_components(
        policy: RetryPolicy,
        hook: Arc<dyn SettlementPostingHook>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            policy,
            hook,
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

    fn validate_create(request: &CreateSettlementRequest) -> SettlementResult<()> {
        if request.settlement_ref.trim().is_empty() {
            return Err(SettlementError::Validation(
                "settlement_ref cannot be empty".into(),
            ));
        }
        if request.period_from > request.period_to {
            return Err(SettlementError::Validation(
                "settlement period start must not be after its end".into(),
            ));
        }
        if request.gross_amount <= Decimal::ZERO {
            return Err(SettlementError::Validation(
                "gross amount must be positive".into(),
            ));
        }
        if request.fees_amount < Decimal::ZERO {
            return Err(SettlementError::Validation(
                "fees amount cannot be negative".into(),
            ));
        }
        if request.gross_amount - request.fees_amount != request.net_amount {
            return Err(SettlementError::Validation(
                "net amount must equal gross minus fees".into(),
            ));
        }
        Ok(())
    }

    fn apply_transition(
        settlement: &mut Settlement,
        target: SettlementStatus,
        actor: &TenantContext,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> SettlementResult<()> {
        if !settlement.status.can_transition_to(target) {
            return Err(SettlementError::InvalidTransition {
                from: settlement.status,
                to: target,
            });
        }
        settlement.state_transitions.push(StateTransition {
            from: Some(settlement.status),
            to: target,
            at: now,
            by: actor.user_id.clone(),
            metadata,
        });
        match target {
            SettlementStatus::FundsReserved => settlement.funds_reserved_at = Some(now),
            SettlementStatus::SentToBank => settlement.sent_to_bank_at = Some(now),
            SettlementStatus::BankConfirmed => settlement.bank_confirmed_at = Some(now),
            SettlementStatus::Settled => settlement.settled_at = Some(now),
            SettlementStatus::Failed => settlement.failed_at = Some(now),
            SettlementStatus::Created | SettlementStatus::Retried => {}
        }
        settlement.status = target;
        Ok(())
    }

    async fn append_audit(
        &self,
        tenant: &TenantContext,
        settlement: &Settlement,
        action: &str,
        reason: Option<String>,
        before: serde_json::Value,
    ) -> SettlementResult<()> {
        self.audit
            .append(AppendRequest {
                tenant_id: tenant.tenant_id.clone(),
                entity_type: "settlement".into(),
                entity_id: settlement.id.clone(),
                actor: tenant.user_id.clone(),
                actor_role: tenant.role.to_string(),
                action: action.into(),
                reason,
                before,
                after: serde_json::to_value(settlement).unwrap_or(serde_json::Value::Null),
            })
            .await
            .map_err(|err| SettlementError::Internal(format!("audit append failed: {err}")))?;
        Ok(())
    }

    async fn load_for_update(
        state: &State,
        settlement_id: &SettlementId,
        tenant: &TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = state
            .settlements
            .get(settlement_id)
            .cloned()
            .ok_or_else(|| SettlementError::NotFound(format!("settlement {settlement_id}")))?;
        tenant
            .ensure_tenant(&settlement.tenant_id)
            .map_err(|err| SettlementError::TenantMismatch(err.to_string()))?;
        Ok(settlement)
    }
}

#[async_trait]
impl SettlementService for InMemorySettlementService {
    async fn create_settlement(
        &self,
        request: CreateSettlementRequest,
    ) -> SettlementResult<Settlement> {
        Self::validate_create(&request)?;

        let mut state = self.state.lock().await;
        let tenant_id = request.tenant.tenant_id.clone();
        let ref_key = (tenant_id.clone(), request.settlement_ref.clone());
        if state.ref_index.contains_key(&ref_key) {
            return Err(SettlementError::Validation(format!(
                "settlement_ref {} already used",
                request.settlement_ref
            )));
        }

        let now = Utc::now();
        let settlement = Settlement {
            id: Self::generate_id(),
            tenant_id,
            merchant_id: request.merchant_id,
            settlement_ref: request.settlement_ref,
            settlement_date: request.settlement_date,
            period_from: request.period_from,
            period_to: request.period_to,
            gross_amount: request.gross_amount,
            fees_amount: request.fees_amount,
            net_amount: request.net_amount,
            bank_account_number: request.bank_account_number,
            bank_ifsc: request.bank_ifsc,
            bank_name: request.bank_name,
            status: SettlementStatus::Created,
            funds_reserved_at: None,
            sent_to_bank_at: None,
            bank_confirmed_at: None,
            settled_at: None,
            failed_at: None,
            bank_reference_number: None,
            bank_transaction_id: None,
            utr_number: None,
            settlement_batch_id: None,
            retry_count: 0,
            max_retries: self.policy.max_retries,
            next_retry_at: None,
            state_transitions: vec![StateTransition {
                from: None,
                to: SettlementStatus::Created,
                at: now,
                by: request.tenant.user_id.clone(),
                metadata: serde_json::Value::Null,
            }],
            retry_history: Vec::new(),
            failure_reason: None,
            created_at: now,
        };

        self.append_audit(
            &request.tenant,
            &settlement,
            "settlement_created",
            None,
            serde_json::Value::Null,
        )
        .await?;

        state
            .ref_index
            .insert(ref_key, settlement.id.clone());
        state
            .settlements
            .insert(settlement.id.clone(), settlement.clone());
        Ok(settlement)
    }

    async fn get(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let state = self.state.lock().await;
        Self::load_for_update(&state, settlement_id, &tenant).await
    }

    async fn transition(
        &self,
        settlement_id: &SettlementId,
        target: SettlementStatus,
        metadata: serde_json::Value,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let metadata_str = |key: &str| {
            metadata
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        match target {
            SettlementStatus::FundsReserved => self.reserve_funds(settlement_id, tenant).await,
            SettlementStatus::SentToBank => {
                let batch_id = metadata_str("settlement_batch_id").ok_or_else(|| {
                    SettlementError::Validation(
                        "SENT_TO_BANK requires settlement_batch_id metadata".into(),
                    )
                })?;
                self.send_to_bank(settlement_id, &batch_id, tenant).await
            }
            SettlementStatus::BankConfirmed => {
                let utr_number =
                    metadata_str("utr_number").ok_or(SettlementError::MissingUtr)?;
                self.confirm_by_bank(
                    settlement_id,
                    &utr_number,
                    metadata_str("bank_reference_number"),
                    tenant,
                )
                .await
            }
            SettlementStatus::Settled => self.mark_settled(settlement_id, tenant).await,
            SettlementStatus::Failed => {
                let reason = metadata_str("failure_reason").ok_or_else(|| {
                    SettlementError::Validation("FAILED requires failure_reason metadata".into())
                })?;
                self.mark_failed(settlement_id, &reason, tenant).await
            }
            SettlementStatus::Retried => self.retry_settlement(settlement_id, tenant).await,
            SettlementStatus::Created => {
                let current = {
                    let state = self.state.lock().await;
                    Self::load_for_update(&state, settlement_id, &tenant)
                        .await?
                        .status
                };
                Err(SettlementError::InvalidTransition {
                    from: current,
                    to: SettlementStatus::Created,
                })
            }
        }
    }

    async fn reserve_funds(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let mut state = self.state.lock().await;
        let before = Self::load_for_update(&state, settlement_id, &tenant).await?;
        let mut updated = before.clone();
        Self::apply_transition(
            &mut updated,
            SettlementStatus::FundsReserved,
            &tenant,
            serde_json::Value::Null,
            Utc::now(),
        )?;
        self.append_audit(
            &tenant,
            &updated,
            "funds_reserved",
            None,
            serde_json::to_value(&before).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        state.settlements.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn send_to_bank(
        &self,
        settlement_id: &SettlementId,
        batch_id: &str,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        if batch_id.trim().is_empty() {
            return Err(SettlementError::Validation(
                "a bank dispatch requires a batch id".into(),
            ));
        }
        let mut state = self.state.lock().await;
        let before = Self::load_for_update(&state, settlement_id, &tenant).await?;
        let mut updated = before.clone();
        Self::apply_transition(
            &mut updated,
            SettlementStatus::SentToBank,
            &tenant,
            serde_json::json!({ "settlement_batch_id": batch_id }),
            Utc::now(),
        )?;
        updated.settlement_batch_id = Some(batch_id.to_string());
        self.append_audit(
            &tenant,
            &updated,
            "sent_to_bank",
            None,
            serde_json::to_value(&before).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        state.settlements.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn confirm_by_bank(
        &self,
        settlement_id: &SettlementId,
        utr_number: &str,
        bank_reference_number: Option<String>,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        if utr_number.trim().is_empty() {
            return Err(SettlementError::MissingUtr);
        }
        let mut state = self.state.lock().await;
        let before = Self::load_for_update(&state, settlement_id, &tenant).await?;
        let mut updated = before.clone();
        Self::apply_transition(
            &mut updated,
            SettlementStatus::BankConfirmed,
            &tenant,
            serde_json::json!({ "utr_number": utr_number }),
            Utc::now(),
        )?;
        updated.utr_number = Some(utr_number.trim().to_string());
        updated.bank_reference_number = bank_reference_number;
        self.append_audit(
            &tenant,
            &updated,
            "bank_confirmed",
            None,
            serde_json::to_value(&before).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        state.settlements.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn mark_settled(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let mut state = self.state.lock().await;
        let before = Self::load_for_update(&state, settlement_id, &tenant).await?;
        if before
            .utr_number
            .as_deref()
            .is_none_or(|utr| utr.trim().is_empty())
        {
            return Err(SettlementError::MissingUtr);
        }

        let mut updated = before.clone();

        // The ledger post and the transition are one unit of work: the
        // hook runs against the working copy and a failure leaves the
        // stored settlement untouched.
        let hook_metadata = self
            .hook
            .post_settlement(&updated, &tenant)
            .await
            .map_err(|err| SettlementError::PostingFailed(err.to_string()))?;

        Self::apply_transition(
            &mut updated,
            SettlementStatus::Settled,
            &tenant,
            hook_metadata,
            Utc::now(),
        )?;
        self.append_audit(
            &tenant,
            &updated,
            "settled",
            None,
            serde_json::to_value(&before).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        state.settlements.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn mark_failed(
        &self,
        settlement_id: &SettlementId,
        reason: &str,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        if reason.trim().is_empty() {
            return Err(SettlementError::Validation(
                "a failure requires a reason".into(),
            ));
        }
        let mut state = self.state.lock().await;
        let before = Self::load_for_update(&state, settlement_id, &tenant).await?;
        if before.status.is_terminal() || before.status == SettlementStatus::Failed {
            return Err(SettlementError::InvalidTransition {
                from: before.status,
                to: SettlementStatus::Failed,
            });
        }

        let now = Utc::now();
        let mut updated = before.clone();
        // Failure is reachable from any non-terminal state, so this
        // bypasses the static graph on purpose.
        updated.state_transitions.push(StateTransition {
            from: Some(updated.status),
            to: SettlementStatus::Failed,
            at: now,
            by: tenant.user_id.clone(),
            metadata: serde_json::json!({ "failure_reason": reason }),
        });
        updated.status = SettlementStatus::Failed;
        updated.failed_at = Some(now);
        updated.failure_reason = Some(reason.to_string());

        self.append_audit(
            &tenant,
            &updated,
            "settlement_failed",
            Some(reason.to_string()),
            serde_json::to_value(&before).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        state.settlements.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn retry_settlement(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let mut state = self.state.lock().await;
        let before = Self::load_for_update(&state, settlement_id, &tenant).await?;
        if before.status != SettlementStatus::Failed {
            return Err(SettlementError::InvalidTransition {
                from: before.status,
                to: SettlementStatus::Retried,
            });
        }
        if !before.retries_left() {
            return Err(SettlementError::RetryExhausted {
                retry_count: before.retry_count,
                max_retries: before.max_retries,
            });
        }

        let now = Utc::now();
        let next_retry_at = now + self.policy.backoff_for(before.retry_count);

        let mut updated = before.clone();
        updated.retry_count += 1;
        updated.next_retry_at = Some(next_retry_at);
        updated.retry_history.push(RetryAttempt {
            attempt: updated.retry_count,
            at: now,
            by: tenant.user_id.clone(),
            next_retry_at,
        });
        let attempt = updated.retry_count;
        Self::apply_transition(
            &mut updated,
            SettlementStatus::Retried,
            &tenant,
            serde_json::json!({ "attempt": attempt }),
            now,
        )?;
        Self::apply_transition(
            &mut updated,
            SettlementStatus::FundsReserved,
            &tenant,
            serde_json::Value::Null,
            now,
        )?;

        self.append_audit(
            &tenant,
            &updated,
            "settlement_retried",
            None,
            serde_json::to_value(&before).unwrap_or(serde_json::Value::Null),
        )
        .await?;
        state.settlements.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    async fn due_for_retry(
        &self,
        now: DateTime<Utc>,
        tenant: TenantContext,
    ) -> SettlementResult<Vec<Settlement>> {
        let state = self.state.lock().await;
        let mut due = state
            .settlements
            .values()
            .filter(|settlement| settlement.tenant_id == tenant.tenant_id)
            .filter(|settlement| settlement.status == SettlementStatus::Failed)
            .filter(|settlement| settlement.retries_left())
            .filter(|settlement| {
                settlement
                    .next_retry_at
                    .is_none_or(|next_retry_at| next_retry_at <= now)
            })
            .cloned()
            .collect::<Vec<_>>();
        due.sort_by(|a, b| a.settlement_ref.cmp(&b.settlement_ref));
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use nodal_tenancy::Role;
    use pretty_assertions::assert_eq;

    fn dec(raw: &str) -> Decimal {
        raw.parse().expect("decimal literal")
    }

    fn tenant(tenant_id: &str) -> TenantContext {
        TenantContext::new(tenant_id, "ops-1", Role::Operations)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn create_request(reference: &str) -> CreateSettlementRequest {
        CreateSettlementRequest {
            merchant_id: "merchant-1".into(),
            settlement_ref: reference.into(),
            settlement_date: date(2024, 6, 3),
            period_from: date(2024, 6, 1),
            period_to: date(2024, 6, 2),
            gross_amount: dec("1000.00"),
            fees_amount: dec("25.00"),
            net_amount: dec("975.00"),
            bank_account_number: "001234567890".into(),
            bank_ifsc: "HDFC0001234".into(),
            bank_name: "HDFC Bank".into(),
            tenant: tenant("tenant-1"),
        }
    }

    fn service() -> InMemorySettlementService {
        InMemorySettlementService::new(RetryPolicy::default())
    }

    #[tokio::test]
    async fn create_seeds_initial_transition() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        assert_eq!(settlement.status, SettlementStatus::Created);
        assert_eq!(settlement.retry_count, 0);
        assert_eq!(settlement.max_retries, 3);
        assert_eq!(settlement.state_transitions.len(), 1);
        assert_eq!(settlement.state_transitions[0].from, None);
        assert_eq!(
            settlement.state_transitions[0].to,
            SettlementStatus::Created
        );
    }

    #[tokio::test]
    async fn net_amount_must_reconcile() {
        let service = service();
        let mut request = create_request("SETTLE-1");
        request.net_amount = dec("974.00");
        let err = service.create_settlement(request).await.unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
    }

    #[tokio::test]
    async fn happy_path_reaches_finality() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");

        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");
        service
            .send_to_bank(&settlement.id, "B1", tenant("tenant-1"))
            .await
            .expect("send");
        let confirmed = service
            .confirm_by_bank(&settlement.id, "UTR-XYZ", None, tenant("tenant-1"))
            .await
            .expect("confirm");
        assert_eq!(confirmed.utr_number.as_deref(), Some("UTR-XYZ"));
        assert!(!confirmed.is_final());

        let settled = service
            .mark_settled(&settlement.id, tenant("tenant-1"))
            .await
            .expect("settle");
        assert!(settled.is_final());
        assert!(settled.settled_at.is_some());
        assert_eq!(settled.state_transitions.len(), 5);
    }

    #[tokio::test]
    async fn skipping_sent_to_bank_is_illegal() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");

        let err = service
            .confirm_by_bank(&settlement.id, "UTR-XYZ", None, tenant("tenant-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InvalidTransition {
                from: SettlementStatus::FundsReserved,
                to: SettlementStatus::BankConfirmed,
            }
        ));
    }

    #[tokio::test]
    async fn confirmation_requires_utr() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");
        service
            .send_to_bank(&settlement.id, "B1", tenant("tenant-1"))
            .await
            .expect("send");

        let err = service
            .confirm_by_bank(&settlement.id, "  ", None, tenant("tenant-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::MissingUtr));
    }

    #[tokio::test]
    async fn retry_backoff_schedule_is_recorded() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");
        service
            .mark_failed(&settlement.id, "bank timeout", tenant("tenant-1"))
            .await
            .expect("fail");

        let retried = service
            .retry_settlement(&settlement.id, tenant("tenant-1"))
            .await
            .expect("retry");
        assert_eq!(retried.status, SettlementStatus::FundsReserved);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.retry_history.len(), 1);
        let expected = retried.retry_history[0].at + chrono::Duration::minutes(15);
        assert_eq!(retried.next_retry_at, Some(expected));
    }

    #[tokio::test]
    async fn fourth_retry_exhausts_budget() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");

        for _ in 0..3 {
            service
                .mark_failed(&settlement.id, "bank timeout", tenant("tenant-1"))
                .await
                .expect("fail");
            service
                .retry_settlement(&settlement.id, tenant("tenant-1"))
                .await
                .expect("retry");
        }

        service
            .mark_failed(&settlement.id, "bank timeout", tenant("tenant-1"))
            .await
            .expect("fail");
        let err = service
            .retry_settlement(&settlement.id, tenant("tenant-1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::RetryExhausted {
                retry_count: 3,
                max_retries: 3,
            }
        ));

        let stuck = service
            .get(&settlement.id, tenant("tenant-1"))
            .await
            .expect("get");
        assert_eq!(stuck.status, SettlementStatus::Failed);
    }

    #[tokio::test]
    async fn due_for_retry_respects_backoff() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");
        service
            .mark_failed(&settlement.id, "bank timeout", tenant("tenant-1"))
            .await
            .expect("fail");

        // Never retried: next_retry_at is unset, due immediately.
        let due = service
            .due_for_retry(Utc::now(), tenant("tenant-1"))
            .await
            .expect("due");
        assert_eq!(due.len(), 1);

        service
            .retry_settlement(&settlement.id, tenant("tenant-1"))
            .await
            .expect("retry");
        service
            .mark_failed(&settlement.id, "bank timeout again", tenant("tenant-1"))
            .await
            .expect("fail");

        // Second failure: backoff pushed next_retry_at into the future.
        let due_now = service
            .due_for_retry(Utc::now(), tenant("tenant-1"))
            .await
            .expect("due");
        assert!(due_now.is_empty());

        let due_later = service
            .due_for_retry(Utc::now() + chrono::Duration::minutes(61), tenant("tenant-1"))
            .await
            .expect("due");
        assert_eq!(due_later.len(), 1);
    }

    #[tokio::test]
    async fn settle_requires_hook_success() {
        struct RefusingHook;

        #[async_trait]
        impl SettlementPostingHook for RefusingHook {
            async fn post_settlement(
                &self,
                _settlement: &Settlement,
                _actor: &TenantContext,
            ) -> Result<serde_json::Value, crate::SettlementHookError> {
                Err(crate::SettlementHookError("posting gate closed".into()))
            }
        }

        let service = InMemorySettlementService::with_components(
            RetryPolicy::default(),
            Arc::new(RefusingHook),
            InMemoryAuditLog::shared(),
        );
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");
        service
            .reserve_funds(&settlement.id, tenant("tenant-1"))
            .await
            .expect("reserve");
        service
            .send_to_bank(&settlement.id, "B1", tenant("tenant-1"))
            .await
            .expect("send");
        service
            .confirm_by_bank(&settlement.id, "UTR-XYZ", None, tenant("tenant-1"))
            .await
            .expect("confirm");

        let err = service
            .mark_settled(&settlement.id, tenant("tenant-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::PostingFailed(_)));

        // The transition was rolled back with the failed post.
        let unchanged = service
            .get(&settlement.id, tenant("tenant-1"))
            .await
            .expect("get");
        assert_eq!(unchanged.status, SettlementStatus::BankConfirmed);
        assert!(unchanged.settled_at.is_none());
    }

    #[tokio::test]
    async fn generic_transition_pulls_fields_from_metadata() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");

        service
            .transition(
                &settlement.id,
                SettlementStatus::FundsReserved,
                serde_json::Value::Null,
                tenant("tenant-1"),
            )
            .await
            .expect("reserve via transition");

        // Dispatch without a batch id is refused.
        let err = service
            .transition(
                &settlement.id,
                SettlementStatus::SentToBank,
                serde_json::Value::Null,
                tenant("tenant-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));

        service
            .transition(
                &settlement.id,
                SettlementStatus::SentToBank,
                serde_json::json!({ "settlement_batch_id": "B7" }),
                tenant("tenant-1"),
            )
            .await
            .expect("dispatch via transition");

        let confirmed = service
            .transition(
                &settlement.id,
                SettlementStatus::BankConfirmed,
                serde_json::json!({ "utr_number": "UTR-777" }),
                tenant("tenant-1"),
            )
            .await
            .expect("confirm via transition");
        assert_eq!(confirmed.utr_number.as_deref(), Some("UTR-777"));
        assert_eq!(confirmed.settlement_batch_id.as_deref(), Some("B7"));

        let err = service
            .transition(
                &settlement.id,
                SettlementStatus::Created,
                serde_json::Value::Null,
                tenant("tenant-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SettlementError::InvalidTransition {
                to: SettlementStatus::Created,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn tenant_isolation_on_lookup() {
        let service = service();
        let settlement = service
            .create_settlement(create_request("SETTLE-1"))
            .await
            .expect("create");

        let err = service
            .get(&settlement.id, tenant("tenant-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::TenantMismatch(_)));
    }
}
