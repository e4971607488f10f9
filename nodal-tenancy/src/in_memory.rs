use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Merchant;
use crate::MerchantDirectory;
use crate::MerchantId;
use crate::MerchantStatus;
use crate::RegisterMerchantRequest;
use crate::TenancyError;
use crate::TenancyResult;
use crate::TenantContext;

#[derive(Default)]
struct DirectoryState {
    merchants: HashMap<MerchantId, Merchant>,
}

#[derive(Default)]
pub struct InMemoryMerchantDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryMerchantDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_merchant_id() -> MerchantId {
        Uuid::new_v4().to_string()
    }

    fn ensure_unique_name(
        state: &DirectoryState,
        request: &RegisterMerchantRequest,
    ) -> TenancyResult<()> {
        let normalized = request.name.to_ascii_lowercase();
        let conflict = state.merchants.values().any(|merchant| {
            merchant.tenant_id == request.tenant_id
                && merchant.status == MerchantStatus::Active
                && merchant.name.to_ascii_lowercase() == normalized
        });
        if conflict {
            return Err(TenancyError::Conflict(format!(
                "merchant {} already registered for tenant {}",
                request.name, request.tenant_id
            )));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        merchant_id: &MerchantId,
        tenant: TenantContext,
        status: MerchantStatus,
    ) -> TenancyResult<Merchant> {
        let mut guard = self.state.write().await;
        let merchant = guard
            .merchants
            .get_mut(merchant_id)
            .ok_or_else(|| TenancyError::NotFound(format!("merchant {merchant_id}")))?;
        tenant.ensure_tenant(&merchant.tenant_id)?;
        merchant.status = status;
        Ok(merchant.clone())
    }
}

#[async_trait]
impl MerchantDirectory for InMemoryMerchantDirectory {
    async fn register(
        &self,
        request: RegisterMerchantRequest,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant> {
        let request = request.normalize()?;
        tenant.ensure_tenant(&request.tenant_id)?;

        let mut guard = self.state.write().await;
        Self::ensure_unique_name(&guard, &request)?;

        let merchant = Merchant {
            id: Self::generate_merchant_id(),
            tenant_id: request.tenant_id,
            name: request.name,
            bank_account_number: request.bank_account_number,
            bank_ifsc: request.bank_ifsc,
            bank_name: request.bank_name,
            status: MerchantStatus::Active,
            created_at: Utc::now(),
        };
        guard
            .merchants
            .insert(merchant.id.clone(), merchant.clone());
        Ok(merchant)
    }

    async fn get(
        &self,
        merchant_id: &MerchantId,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant> {
        let guard = self.state.read().await;
        let merchant = guard
            .merchants
            .get(merchant_id)
            .ok_or_else(|| TenancyError::NotFound(format!("merchant {merchant_id}")))?;
        tenant.ensure_tenant(&merchant.tenant_id)?;
        Ok(merchant.clone())
    }

    async fn list(&self, tenant: TenantContext) -> TenancyResult<Vec<Merchant>> {
        let guard = self.state.read().await;
        let mut merchants = guard
            .merchants
            .values()
            .filter(|merchant| merchant.tenant_id == tenant.tenant_id)
            .cloned()
            .collect::<Vec<_>>();
        merchants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(merchants)
    }

    async fn suspend(
        &self,
        merchant_id: &MerchantId,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant> {
        self.set_status(merchant_id, tenant, MerchantStatus::Suspended)
            .await
    }

    async fn reactivate(
        &self,
        merchant_id: &MerchantId,
        tenant: TenantContext,
    ) -> TenancyResult<Merchant> {
        self.set_status(merchant_id, tenant, MerchantStatus::Active)
            .await
    }
}
