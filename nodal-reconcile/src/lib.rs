#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Batch reconciliation of gateway reports against the internal ledger.
//! Each external row is classified, discrepancies become individually
//! resolvable items, and long-running batches can be cancelled by flag.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use nodal_tenancy::TenantContext;
use nodal_tenancy::TenantId;

pub type BatchId = String;
pub type ItemId = String;
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("batch {0} not found")]
    BatchNotFound(BatchId),
    #[error("item {0} not found")]
    ItemNotFound(ItemId),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("batch {0} is cancelled")]
    Cancelled(BatchId),
    #[error("tenant mismatch: {0}")]
    TenantMismatch(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStatus {
    Matched,
    MissingInternal,
    MissingExternal,
    AmountMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    Unresolved,
    Resolved,
    Investigating,
    WrittenOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Running,
    Completed,
    Cancelled,
}

/// One row of the gateway's settlement report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTransaction {
    pub order_id: String,
    pub external_ref: String,
    pub amount: Decimal,
    pub occurred_on: NaiveDate,
}

/// One internal ledger transaction for the gateway account in the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalTransaction {
    pub transaction_id: String,
    pub order_id: Option<String>,
    pub amount: Decimal,
    pub occurred_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub id: ItemId,
    pub tenant_id: TenantId,
    pub batch_id: BatchId,
    pub order_id: Option<String>,
    pub external_ref: Option<String>,
    pub external_amount: Option<Decimal>,
    pub internal_amount: Option<Decimal>,
    pub internal_transaction_id: Option<String>,
    pub match_status: MatchStatus,
    pub resolution_status: ResolutionStatus,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationBatch {
    pub id: BatchId,
    pub tenant_id: TenantId,
    pub gateway_name: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub matched_count: usize,
    pub mismatch_count: usize,
    pub missing_internal_count: usize,
    pub missing_external_count: usize,
    pub items: Vec<ReconciliationItem>,
}

impl ReconciliationBatch {
    fn ensure_mutable(&self) -> ReconcileResult<()> {
        if self.status == BatchStatus::Cancelled {
            Err(ReconcileError::Cancelled(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationAuditAction {
    BatchCompleted,
    ItemResolved,
    BatchCancelled,
}

#[derive(Debug, Clone)]
pub struct ReconciliationAuditEvent {
    pub batch_id: BatchId,
    pub item_id: Option<ItemId>,
    pub action: ReconciliationAuditAction,
    pub note: Option<String>,
}

pub trait ReconciliationAuditHook: Send + Sync {
    fn record(&self, event: &ReconciliationAuditEvent);
}

#[derive(Default)]
pub struct NoopReconciliationAuditHook;

impl ReconciliationAuditHook for NoopReconciliationAuditHook {
    fn record(&self, _event: &ReconciliationAuditEvent) {}
}

pub trait ReconciliationStore: Send + Sync {
    fn create_batch(&self, batch: ReconciliationBatch) -> ReconcileResult<ReconciliationBatch>;
    fn save_batch(&self, batch: &ReconciliationBatch) -> ReconcileResult<()>;
    fn get_batch(&self, batch_id: &BatchId) -> ReconcileResult<ReconciliationBatch>;
}

#[derive(Default)]
pub struct InMemoryReconciliationStore {
    batches: RwLock<HashMap<BatchId, ReconciliationBatch>>,
}

impl InMemoryReconciliationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReconciliationStore for InMemoryReconciliationStore {
    fn create_batch(&self, batch: ReconciliationBatch) -> ReconcileResult<ReconciliationBatch> {
        let mut guard = self
            .batches
            .write()
            .map_err(|_| ReconcileError::Storage("batch store poisoned".into()))?;
        guard.insert(batch.id.clone(), batch.clone());
        Ok(batch)
    }

    fn save_batch(&self, batch: &ReconciliationBatch) -> ReconcileResult<()> {
        let mut guard = self
            .batches
            .write()
            .map_err(|_| ReconcileError::Storage("batch store poisoned".into()))?;
        if !guard.contains_key(&batch.id) {
            return Err(ReconcileError::BatchNotFound(batch.id.clone()));
        }
        guard.insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    fn get_batch(&self, batch_id: &BatchId) -> ReconcileResult<ReconciliationBatch> {
        let guard = self
            .batches
            .read()
            .map_err(|_| ReconcileError::Storage("batch store poisoned".into()))?;
        guard
            .get(batch_id)
            .cloned()
            .ok_or_else(|| ReconcileError::BatchNotFound(batch_id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunBatchRequest {
    pub gateway_name: String,
    pub period_from: NaiveDate,
    pub period_to: NaiveDate,
    pub external: Vec<ExternalTransaction>,
    pub internal: Vec<InternalTransaction>,
    pub tenant: TenantContext,
}

pub trait ReconciliationService: Send + Sync {
    fn run_batch(&self, request: RunBatchRequest) -> ReconcileResult<ReconciliationBatch>;
    fn resolve(
        &self,
        batch_id: &BatchId,
        item_id: &ItemId,
        resolution: ResolutionStatus,
        notes: Option<String>,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationItem>;
    fn cancel(
        &self,
        batch_id: &BatchId,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationBatch>;
    fn batch(
        &self,
        batch_id: &BatchId,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationBatch>;
    fn register_audit_hook(&self, hook: Arc<dyn ReconciliationAuditHook>);
}

pub struct GatewayReconciliationService {
    amount_tolerance: Decimal,
    store: Arc<dyn ReconciliationStore>,
    audit_hooks: RwLock<Vec<Arc<dyn ReconciliationAuditHook>>>,
}

impl GatewayReconciliationService {
    #[must_use]
    pub fn new(amount_tolerance: Decimal) -> Self {
        Self::with_store(amount_tolerance, Arc::new(InMemoryReconciliationStore::new()))
    }

    #[must_use]
    pub fn with_store(amount_tolerance: Decimal, store: Arc<dyn ReconciliationStore>) -> Self {
        Self {
            amount_tolerance,
            store,
            audit_hooks: RwLock::new(Vec::new()),
        }
    }

    fn emit_audit(&self, event: ReconciliationAuditEvent) {
        if let Ok(hooks) = self.audit_hooks.read() {
            for hook in hooks.iter() {
                hook.record(&event);
            }
        }
    }

    fn classify(
        &self,
        batch_id: &BatchId,
        tenant_id: &TenantId,
        external: Vec<ExternalTransaction>,
        internal: Vec<InternalTransaction>,
    ) -> Vec<ReconciliationItem> {
        let mut items = Vec::new();
        let mut consumed = vec![false; internal.len()];

        for row in external {
            let candidate = internal.iter().enumerate().find(|(index, tx)| {
                !consumed[*index] && tx.order_id.as_deref() == Some(row.order_id.as_str())
            });

            let item = match candidate {
                Some((index, tx)) => {
                    consumed[index] = true;
                    let delta = (row.amount - tx.amount).abs();
                    let match_status = if delta <= self.amount_tolerance {
                        MatchStatus::Matched
                    } else {
                        MatchStatus::AmountMismatch
                    };
                    ReconciliationItem {
                        id: Uuid::new_v4().to_string(),
                        tenant_id: tenant_id.clone(),
                        batch_id: batch_id.clone(),
                        order_id: Some(row.order_id),
                        external_ref: Some(row.external_ref),
                        external_amount: Some(row.amount),
                        internal_amount: Some(tx.amount),
                        internal_transaction_id: Some(tx.transaction_id.clone()),
                        match_status,
                        resolution_status: ResolutionStatus::Unresolved,
                        resolution_notes: None,
                        resolved_by: None,
                        resolved_at: None,
                    }
                }
                None => ReconciliationItem {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: tenant_id.clone(),
                    batch_id: batch_id.clone(),
                    order_id: Some(row.order_id),
                    external_ref: Some(row.external_ref),
                    external_amount: Some(row.amount),
                    internal_amount: None,
                    internal_transaction_id: None,
                    match_status: MatchStatus::MissingInternal,
                    resolution_status: ResolutionStatus::Unresolved,
                    resolution_notes: None,
                    resolved_by: None,
                    resolved_at: None,
                },
            };
            items.push(item);
        }

        for (index, tx) in internal.into_iter().enumerate() {
            if consumed[index] {
                continue;
            }
            items.push(ReconciliationItem {
                id: Uuid::new_v4().to_string(),
                tenant_id: tenant_id.clone(),
                batch_id: batch_id.clone(),
                order_id: tx.order_id,
                external_ref: None,
                external_amount: None,
                internal_amount: Some(tx.amount),
                internal_transaction_id: Some(tx.transaction_id),
                match_status: MatchStatus::MissingExternal,
                resolution_status: ResolutionStatus::Unresolved,
                resolution_notes: None,
                resolved_by: None,
                resolved_at: None,
            });
        }

        items
    }
}

impl ReconciliationService for GatewayReconciliationService {
    fn run_batch(&self, request: RunBatchRequest) -> ReconcileResult<ReconciliationBatch> {
        if request.gateway_name.trim().is_empty() {
            return Err(ReconcileError::Validation(
                "gateway name cannot be empty".into(),
            ));
        }
        if request.period_from > request.period_to {
            return Err(ReconcileError::Validation(
                "reconciliation window start must not be after its end".into(),
            ));
        }

        let batch_id = Uuid::new_v4().to_string();
        let tenant_id = request.tenant.tenant_id.clone();
        let items = self.classify(&batch_id, &tenant_id, request.external, request.internal);

        let matched_count = items
            .iter()
            .filter(|item| item.match_status == MatchStatus::Matched)
            .count();
        let mismatch_count = items
            .iter()
            .filter(|item| item.match_status == MatchStatus::AmountMismatch)
            .count();
        let missing_internal_count = items
            .iter()
            .filter(|item| item.match_status == MatchStatus::MissingInternal)
            .count();
        let missing_external_count = items
            .iter()
            .filter(|item| item.match_status == MatchStatus::MissingExternal)
            .count();

        let now = Utc::now();
        let batch = ReconciliationBatch {
            id: batch_id,
            tenant_id,
            gateway_name: request.gateway_name,
            period_from: request.period_from,
            period_to: request.period_to,
            status: BatchStatus::Completed,
            created_at: now,
            completed_at: Some(now),
            matched_count,
            mismatch_count,
            missing_internal_count,
            missing_external_count,
            items,
        };

        let stored = self.store.create_batch(batch)?;
        self.emit_audit(ReconciliationAuditEvent {
            batch_id: stored.id.clone(),
            item_id: None,
            action: ReconciliationAuditAction::BatchCompleted,
            note: Some(format!(
                "{} matched, {} mismatched, {} missing internal, {} missing external",
                stored.matched_count,
                stored.mismatch_count,
                stored.missing_internal_count,
                stored.missing_external_count
            )),
        });
        Ok(stored)
    }

    fn resolve(
        &self,
        batch_id: &BatchId,
        item_id: &ItemId,
        resolution: ResolutionStatus,
        notes: Option<String>,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationItem> {
        if resolution == ResolutionStatus::Unresolved {
            return Err(ReconcileError::InvalidTransition(
                "an item cannot be resolved back to unresolved".into(),
            ));
        }

        let mut batch = self.store.get_batch(batch_id)?;
        tenant
            .ensure_tenant(&batch.tenant_id)
            .map_err(|err| ReconcileError::TenantMismatch(err.to_string()))?;
        batch.ensure_mutable()?;

        let item = batch
            .items
            .iter_mut()
            .find(|item| &item.id == item_id)
            .ok_or_else(|| ReconcileError::ItemNotFound(item_id.clone()))?;

        if matches!(
            item.resolution_status,
            ResolutionStatus::Resolved | ResolutionStatus::WrittenOff
        ) {
            return Err(ReconcileError::InvalidTransition(format!(
                "item {item_id} is already finalized"
            )));
        }

        item.resolution_status = resolution;
        item.resolution_notes = notes.clone();
        item.resolved_by = Some(tenant.user_id.clone());
        item.resolved_at = Some(Utc::now());
        let resolved = item.clone();

        self.store.save_batch(&batch)?;
        self.emit_audit(ReconciliationAuditEvent {
            batch_id: batch_id.clone(),
            item_id: Some(item_id.clone()),
            action: ReconciliationAuditAction::ItemResolved,
            note: notes,
        });
        Ok(resolved)
    }

    fn cancel(
        &self,
        batch_id: &BatchId,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationBatch> {
        let mut batch = self.store.get_batch(batch_id)?;
        tenant
            .ensure_tenant(&batch.tenant_id)
            .map_err(|err| ReconcileError::TenantMismatch(err.to_string()))?;
        batch.status = BatchStatus::Cancelled;
        self.store.save_batch(&batch)?;
        self.emit_audit(ReconciliationAuditEvent {
            batch_id: batch_id.clone(),
            item_id: None,
            action: ReconciliationAuditAction::BatchCancelled,
            note: None,
        });
        Ok(batch)
    }

    fn batch(
        &self,
        batch_id: &BatchId,
        tenant: TenantContext,
    ) -> ReconcileResult<ReconciliationBatch> {
        let batch = self.store.get_batch(batch_id)?;
        tenant
            .ensure_tenant(&batch.tenant_id)
            .map_err(|err| ReconcileError::TenantMismatch(err.to_string()))?;
        Ok(batch)
    }

    fn register_audit_hook(&self, hook: Arc<dyn ReconciliationAuditHook>) {
        if let Ok(mut hooks) = self.audit_hooks.write() {
            hooks.push(hook);
        }
    }
}
