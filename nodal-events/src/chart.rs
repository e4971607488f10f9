//! Seeded chart of accounts for the aggregator books. Account codes are
//! stable: postings resolve them at write time and reports key on them.

use nodal_ledger::AccountCategory;
use nodal_ledger::AccountType;
use nodal_ledger::ChartAccount;
use nodal_ledger::NormalBalance;

pub const ESCROW_BANK: &str = "1001";
pub const MERCHANT_RECEIVABLE: &str = "1101";
pub const PLATFORM_RECEIVABLE: &str = "1201";
pub const ESCROW_LIABILITY: &str = "2001";
pub const MERCHANT_PAYABLE: &str = "2101";
pub const GATEWAY_PAYABLE: &str = "2201";
pub const MERCHANT_SETTLEMENT: &str = "2301";
pub const CHARGEBACK_LIABILITY: &str = "2401";
pub const PLATFORM_MDR: &str = "4001";
pub const GATEWAY_FEE_EXPENSE: &str = "5001";

/// The account set every tenant is seeded with.
#[must_use]
pub fn default_chart() -> Vec<ChartAccount> {
    vec![
        ChartAccount {
            code: ESCROW_BANK.into(),
            name: "Escrow Bank".into(),
            account_type: AccountType::Escrow,
            normal_balance: NormalBalance::Debit,
            category: AccountCategory::Asset,
            gateway_name: None,
        },
        ChartAccount {
            code: MERCHANT_RECEIVABLE.into(),
            name: "Merchant Receivable".into(),
            account_type: AccountType::Merchant,
            normal_balance: NormalBalance::Debit,
            category: AccountCategory::Asset,
            gateway_name: None,
        },
        ChartAccount {
            code: PLATFORM_RECEIVABLE.into(),
            name: "Platform Receivable".into(),
            account_type: AccountType::PlatformRevenue,
            normal_balance: NormalBalance::Debit,
            category: AccountCategory::Asset,
            gateway_name: None,
        },
        ChartAccount {
            code: ESCROW_LIABILITY.into(),
            name: "Escrow Liability".into(),
            account_type: AccountType::Escrow,
            normal_balance: NormalBalance::Credit,
            category: AccountCategory::Liability,
            gateway_name: None,
        },
        ChartAccount {
            code: MERCHANT_PAYABLE.into(),
            name: "Merchant Payable".into(),
            account_type: AccountType::Merchant,
            normal_balance: NormalBalance::Credit,
            category: AccountCategory::Liability,
            gateway_name: None,
        },
        ChartAccount {
            code: GATEWAY_PAYABLE.into(),
            name: "Gateway Payable".into(),
            account_type: AccountType::Gateway,
            normal_balance: NormalBalance::Credit,
            category: AccountCategory::Liability,
            gateway_name: None,
        },
        ChartAccount {
            code: MERCHANT_SETTLEMENT.into(),
            name: "Merchant Settlement".into(),
            account_type: AccountType::Merchant,
            normal_balance: NormalBalance::Credit,
            category: AccountCategory::Liability,
            gateway_name: None,
        },
        ChartAccount {
            code: CHARGEBACK_LIABILITY.into(),
            name: "Chargeback Liability".into(),
            account_type: AccountType::Merchant,
            normal_balance: NormalBalance::Credit,
            category: AccountCategory::Liability,
            gateway_name: None,
        },
        ChartAccount {
            code: PLATFORM_MDR.into(),
            name: "Platform MDR".into(),
            account_type: AccountType::PlatformRevenue,
            normal_balance: NormalBalance::Credit,
            category: AccountCategory::Revenue,
            gateway_name: None,
        },
        ChartAccount {
            code: GATEWAY_FEE_EXPENSE.into(),
            name: "Gateway Fee Expense".into(),
            account_type: AccountType::Gateway,
            normal_balance: NormalBalance::Debit,
            category: AccountCategory::Expense,
            gateway_name: None,
        },
    ]
}
