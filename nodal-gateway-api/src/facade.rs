use std::sync::Arc;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use tracing::warn;

use nodal_audit_log::AuditLog;
use nodal_audit_log::AuditLogFilter;
use nodal_audit_log::AuditRecord;
use nodal_audit_log::InMemoryAuditLog;
use nodal_events::AccountingEventHandlers;
use nodal_events::ChargebackDebit;
use nodal_events::EventError;
use nodal_events::EventResult;
use nodal_events::ManualAdjustment;
use nodal_events::PaymentSuccess;
use nodal_events::RefundCompleted;
use nodal_events::chart;
use nodal_ledger::AccountBalance;
use nodal_ledger::BalanceQuery;
use nodal_ledger::InMemoryLedgerService;
use nodal_ledger::LedgerResult;
use nodal_ledger::LedgerService;
use nodal_ledger::LedgerSummary;
use nodal_ledger::PostingOutcome;
use nodal_ledger::SeedAccountsRequest;
use nodal_ledger::SummaryQuery;
use nodal_ledger::TransactionId;
use nodal_ledger::TransactionView;
use nodal_overrides::CreateOverrideRequest;
use nodal_overrides::InMemoryOverrideApprovals;
use nodal_overrides::OverrideApprovals;
use nodal_overrides::OverrideDecision;
use nodal_overrides::OverrideId;
use nodal_overrides::OverrideLogRecord;
use nodal_overrides::OverrideRequest;
use nodal_overrides::OverridesResult;
use nodal_periods::AccountingPeriod;
use nodal_periods::ApplyLockRequest;
use nodal_periods::ClosePeriodRequest;
use nodal_periods::CreatePeriodRequest;
use nodal_periods::InMemoryPeriodService;
use nodal_periods::LedgerLock;
use nodal_periods::PeriodResult;
use nodal_periods::PeriodService;
use nodal_periods::ReleaseLockRequest;
use nodal_reconcile::GatewayReconciliationService;
use nodal_reconcile::ReconcileResult;
use nodal_reconcile::ReconciliationBatch;
use nodal_reconcile::ReconciliationItem;
use nodal_reconcile::ReconciliationService;
use nodal_reconcile::ResolutionStatus;
use nodal_reconcile::RunBatchRequest;
use nodal_router::ConnectorRegistry;
use nodal_router::GatewayHealth;
use nodal_router::GatewayReceipt;
use nodal_router::PaymentContext;
use nodal_router::RouterError;
use nodal_router::RouterResult;
use nodal_router::SmartRouter;
use nodal_settlements::CreateSettlementRequest;
use nodal_settlements::InMemorySettlementService;
use nodal_settlements::Settlement;
use nodal_settlements::SettlementId;
use nodal_settlements::SettlementResult;
use nodal_settlements::SettlementService;
use nodal_tenancy::InMemoryMerchantDirectory;
use nodal_tenancy::Merchant;
use nodal_tenancy::MerchantDirectory;
use nodal_tenancy::RegisterMerchantRequest;
use nodal_tenancy::TenancyResult;
use nodal_tenancy::TenantContext;
use nodal_webhooks::VerifiedWebhook;
use nodal_webhooks::WebhookAck;
use nodal_webhooks::WebhookResult;

use crate::AggregatorConfig;
use crate::AggregatorTelemetry;

/// Wires the aggregator subsystems over one shared audit log and exposes
/// the operations upstream callers need. All services are built from the
/// single configuration record at construction.
pub struct PaymentsFacade {
    config: AggregatorConfig,
    audit: Arc<InMemoryAuditLog>,
    merchants: Arc<InMemoryMerchantDirectory>,
    ledger: Arc<InMemoryLedgerService>,
    periods: Arc<InMemoryPeriodService>,
    overrides: Arc<InMemoryOverrideApprovals>,
    events: Arc<AccountingEventHandlers>,
    settlements: Arc<InMemorySettlementService>,
    router: SmartRouter,
    reconcile: GatewayReconciliationService,
    telemetry: AggregatorTelemetry,
}

impl PaymentsFacade {
    #[must_use]
    pub fn new(config: AggregatorConfig, gateways: Vec<String>) -> Self {
        let audit = InMemoryAuditLog::shared();
        let shared_audit: Arc<dyn AuditLog> = audit.clone();

        let ledger = Arc::new(InMemoryLedgerService::with_audit(
            config.ledger_config(),
            shared_audit.clone(),
        ));
        let periods = Arc::new(InMemoryPeriodService::with_audit(
            config.period_config(),
            shared_audit.clone(),
        ));
        let overrides = Arc::new(InMemoryOverrideApprovals::with_audit(shared_audit.clone()));
        let events = Arc::new(AccountingEventHandlers::new(
            ledger.clone(),
            periods.clone(),
            overrides.clone(),
        ));
        let settlements = Arc::new(InMemorySettlementService::with_components(
            config.retry_policy(),
            events.clone(),
            shared_audit,
        ));
        let router = SmartRouter::new(
            config.router_config(),
            Arc::new(nodal_router::GatewayHealthTracker::new()),
            gateways,
        );
        let reconcile = GatewayReconciliationService::new(config.balance_tolerance);

        Self {
            config,
            audit,
            merchants: Arc::new(InMemoryMerchantDirectory::new()),
            ledger,
            periods,
            overrides,
            events,
            settlements,
            router,
            reconcile,
            telemetry: AggregatorTelemetry::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    #[must_use]
    pub fn telemetry(&self) -> AggregatorTelemetry {
        self.telemetry.clone()
    }

    /// Direct handle on the composed ledger service, for callers that
    /// post outside the business-event vocabulary.
    #[must_use]
    pub fn ledger(&self) -> Arc<dyn LedgerService> {
        self.ledger.clone()
    }

    // ---- tenant bootstrap -------------------------------------------------

    /// Seeds the standard chart of accounts for a new tenant.
    pub async fn onboard_tenant(&self, tenant: TenantContext) -> LedgerResult<()> {
        self.ledger
            .seed_accounts(SeedAccountsRequest {
                accounts: chart::default_chart(),
                tenant,
            })
            .await?;
        Ok(())
    }

    pub async fn register_merchant(
        &self,
        request: RegisterMerchantRequest,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant> {
        self.merchants.register(request, tenant).await
    }

    // ---- accounting periods & locks ---------------------------------------

    pub async fn create_period(
        &self,
        request: CreatePeriodRequest,
    ) -> PeriodResult<AccountingPeriod> {
        self.periods.create_period(request).await
    }

    pub async fn close_period(
        &self,
        request: ClosePeriodRequest,
    ) -> PeriodResult<AccountingPeriod> {
        self.periods.close_period(request).await
    }

    pub async fn list_periods(
        &self,
        period_type: Option<nodal_periods::PeriodType>,
        tenant: TenantContext,
    ) -> PeriodResult<Vec<AccountingPeriod>> {
        self.periods.list_periods(period_type, tenant).await
    }

    pub async fn apply_lock(&self, request: ApplyLockRequest) -> PeriodResult<LedgerLock> {
        self.periods.apply_lock(request).await
    }

    pub async fn release_lock(&self, request: ReleaseLockRequest) -> PeriodResult<LedgerLock> {
        self.periods.release_lock(request).await
    }

    // ---- business events --------------------------------------------------

    fn observe_event(&self, result: &EventResult<PostingOutcome>) {
        match result {
            Ok(outcome) => self.telemetry.record_posting(outcome.duplicate),
            Err(EventError::LedgerLocked(_) | EventError::OverrideRequired(_)) => {
                self.telemetry.record_gate_denial();
            }
            Err(_) => {}
        }
    }

    pub async fn record_payment_success(
        &self,
        event: PaymentSuccess,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        let result = self.events.handle_payment_success(event, tenant).await;
        self.observe_event(&result);
        result
    }

    pub async fn record_refund_completed(
        &self,
        event: RefundCompleted,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        let result = self.events.handle_refund_completed(event, tenant).await;
        self.observe_event(&result);
        result
    }

    pub async fn record_chargeback_debit(
        &self,
        event: ChargebackDebit,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        let result = self.events.handle_chargeback_debit(event, tenant).await;
        self.observe_event(&result);
        result
    }

    pub async fn reverse_chargeback(
        &self,
        original_transaction_id: TransactionId,
        reason: String,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        let result = self
            .events
            .handle_chargeback_reversal(original_transaction_id, reason, tenant)
            .await;
        if result.is_ok() {
            self.telemetry.record_reversal();
        }
        result
    }

    pub async fn record_manual_adjustment(
        &self,
        event: ManualAdjustment,
        tenant: TenantContext,
    ) -> EventResult<PostingOutcome> {
        let result = self.events.handle_manual_adjustment(event, tenant).await;
        self.observe_event(&result);
        result
    }

    // ---- ledger reads -----------------------------------------------------

    pub async fn account_balance(&self, query: BalanceQuery) -> LedgerResult<AccountBalance> {
        self.ledger.get_account_balance(query).await
    }

    pub async fn transaction(
        &self,
        transaction_id: &TransactionId,
        tenant: TenantContext,
    ) -> LedgerResult<TransactionView> {
        self.ledger.get_transaction(transaction_id, tenant).await
    }

    pub async fn summary(&self, query: SummaryQuery) -> LedgerResult<LedgerSummary> {
        self.ledger.get_summary(query).await
    }

    pub async fn audit_trail(&self, filter: AuditLogFilter) -> anyhow::Result<Vec<AuditRecord>> {
        Ok(self.audit.records(filter).await?)
    }

    // ---- overrides --------------------------------------------------------

    pub async fn request_override(
        &self,
        request: CreateOverrideRequest,
    ) -> OverridesResult<OverrideRequest> {
        self.overrides.request_override(request).await
    }

    pub async fn decide_override(
        &self,
        override_id: &OverrideId,
        decision: OverrideDecision,
        approver: TenantContext,
    ) -> OverridesResult<OverrideRequest> {
        self.overrides.decide(override_id, decision, approver).await
    }

    pub async fn override_log(
        &self,
        tenant: TenantContext,
    ) -> OverridesResult<Vec<OverrideLogRecord>> {
        self.overrides.override_log(tenant).await
    }

    // ---- settlements ------------------------------------------------------

    pub async fn create_settlement(
        &self,
        request: CreateSettlementRequest,
    ) -> SettlementResult<Settlement> {
        self.settlements.create_settlement(request).await
    }

    pub async fn reserve_funds(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = self.settlements.reserve_funds(settlement_id, tenant).await?;
        self.telemetry.record_settlement_transition();
        Ok(settlement)
    }

    pub async fn send_to_bank(
        &self,
        settlement_id: &SettlementId,
        batch_id: &str,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = self
            .settlements
            .send_to_bank(settlement_id, batch_id, tenant)
            .await?;
        self.telemetry.record_settlement_transition();
        Ok(settlement)
    }

    pub async fn confirm_by_bank(
        &self,
        settlement_id: &SettlementId,
        utr_number: &str,
        bank_reference_number: Option<String>,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = self
            .settlements
            .confirm_by_bank(settlement_id, utr_number, bank_reference_number, tenant)
            .await?;
        self.telemetry.record_settlement_transition();
        Ok(settlement)
    }

    /// Settlement finality: posts the settlement through the accounting
    /// rules and marks the payout disbursed, as one unit.
    pub async fn settle(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = self.settlements.mark_settled(settlement_id, tenant).await?;
        self.telemetry.record_settlement_transition();
        self.telemetry.record_posting(false);
        Ok(settlement)
    }

    pub async fn fail_settlement(
        &self,
        settlement_id: &SettlementId,
        reason: &str,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = self
            .settlements
            .mark_failed(settlement_id, reason, tenant)
            .await?;
        self.telemetry.record_settlement_transition();
        Ok(settlement)
    }

    pub async fn retry_settlement(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        let settlement = self
            .settlements
            .retry_settlement(settlement_id, tenant)
            .await?;
        self.telemetry.record_settlement_retry();
        Ok(settlement)
    }

    pub async fn settlement(
        &self,
        settlement_id: &SettlementId,
        tenant: TenantContext,
    ) -> SettlementResult<Settlement> {
        self.settlements.get(settlement_id, tenant).await
    }

    /// Scan entry point for the poll-based retry worker.
    pub async fn settlements_due(
        &self,
        now: DateTime<Utc>,
        tenant: TenantContext,
    ) -> SettlementResult<Vec<Settlement>> {
        self.settlements.due_for_retry(now, tenant).await
    }

    // ---- routing ----------------------------------------------------------

    pub fn select_gateway(
        &self,
        payment: &PaymentContext,
        exclude: &[String],
    ) -> RouterResult<String> {
        self.router.select(payment, exclude)
    }

    #[must_use]
    pub fn fallback_gateways(&self, primary: &str, attempted: &[String]) -> Vec<String> {
        self.router.fallback_list(primary, attempted)
    }

    pub fn record_gateway_success(&self, gateway: &str, response_time_ms: u64) {
        self.router.health().record_success(gateway, response_time_ms);
    }

    pub fn record_gateway_failure(&self, gateway: &str, response_time_ms: u64) {
        self.router.health().record_failure(gateway, response_time_ms);
    }

    #[must_use]
    pub fn gateway_health(&self) -> Vec<GatewayHealth> {
        self.router.health().snapshots()
    }

    /// Routes the payment and walks the fallback order until a connector
    /// succeeds, feeding every attempt back into the health tracker.
    pub fn route_and_process(
        &self,
        registry: &ConnectorRegistry,
        payment: &PaymentContext,
    ) -> RouterResult<GatewayReceipt> {
        let primary = self.router.select(payment, &[])?;
        let mut attempted = Vec::new();
        let mut plan = vec![primary.clone()];
        plan.extend(self.router.fallback_list(&primary, &[]));

        for gateway in plan {
            if attempted.contains(&gateway) {
                continue;
            }
            attempted.push(gateway.clone());
            let Some(connector) = registry.get(&gateway) else {
                warn!(gateway = %gateway, "selected gateway has no connector");
                continue;
            };
            let started = Instant::now();
            match connector.process(payment) {
                Ok(receipt) => {
                    self.router
                        .health()
                        .record_success(&gateway, started.elapsed().as_millis() as u64);
                    return Ok(receipt);
                }
                Err(err) => {
                    self.router
                        .health()
                        .record_failure(&gateway, started.elapsed().as_millis() as u64);
                    warn!(gateway = %gateway, error = %err, "gateway attempt failed");
                }
            }
        }

        Err(RouterError::GatewayUnavailable(
            "primary and fallback gateways exhausted".into(),
        ))
    }

    // ---- webhooks ---------------------------------------------------------

    /// Verifies and parses a PSP notification, returning the payload and
    /// the acknowledgement to send back.
    pub fn receive_qr_webhook(
        &self,
        secret: &[u8],
        raw_body: &[u8],
        signature_hex: &str,
    ) -> WebhookResult<(VerifiedWebhook, WebhookAck)> {
        match nodal_webhooks::parse_webhook(secret, raw_body, signature_hex) {
            Ok(webhook) => {
                let ack = nodal_webhooks::acknowledge(&webhook);
                self.telemetry.record_webhook(true);
                Ok((webhook, ack))
            }
            Err(err) => {
                self.telemetry.record_webhook(false);
                Err(err)
            }
        }
    }

    // ---- reconciliation ---------------------------------------------------

    pub fn reconcile_gateway(
        &self,
        request: RunBatchRequest,
    ) -> ReconcileResult<ReconciliationBatch> {
        let batch = self.reconcile.run_batch(request)?;
        self.telemetry.record_reconciliation_items(batch.items.len());
        Ok(batch)
    }

    pub fn resolve_reconciliation_item(
        &self,
        batch_id: &str,
        item_id: &str,
        resolution: ResolutionStatus,
        notes: Option<String>,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationItem> {
        self.reconcile
            .resolve(&batch_id.to_string(), &item_id.to_string(), resolution, notes, tenant)
    }

    pub fn cancel_reconciliation(
        &self,
        batch_id: &str,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationBatch> {
        self.reconcile.cancel(&batch_id.to_string(), tenant)
    }
}
