//! Property-based checks of the ledger invariants:
//! - every posted transaction balances within the tolerance
//! - unbalanced inputs beyond the tolerance never persist
//! - idempotent replay leaves state equal to a single post
//! - a reversal carries the original legs with sides swapped
//! - fingerprints survive every operation short of reversal

use proptest::prelude::*;
use rust_decimal::Decimal;

use nodal_ledger::AccountCategory;
use nodal_ledger::AccountType;
use nodal_ledger::BalanceQuery;
use nodal_ledger::ChartAccount;
use nodal_ledger::EntryInput;
use nodal_ledger::EntrySide;
use nodal_ledger::InMemoryLedgerService;
use nodal_ledger::LedgerConfig;
use nodal_ledger::LedgerError;
use nodal_ledger::LedgerService;
use nodal_ledger::NormalBalance;
use nodal_ledger::PostTransactionRequest;
use nodal_ledger::ReverseTransactionRequest;
use nodal_ledger::SeedAccountsRequest;
use nodal_tenancy::Role;
use nodal_tenancy::TenantContext;

const TENANT: &str = "prop-tenant";

fn tenant() -> TenantContext {
    TenantContext::new(TENANT, "prop-user", Role::ServiceAccount)
}

fn txn_date() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2024, 5, 20).expect("date")
}

fn two_account_chart() -> Vec<ChartAccount> {
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

async fn seeded_service() -> InMemoryLedgerService {
    let service = InMemoryLedgerService::new(LedgerConfig::default());
    service
        .seed_accounts(SeedAccountsRequest {
            accounts: two_account_chart(),
            tenant: tenant(),
        })
        .await
        .expect("chart seeds");
    service
}

/// Positive amounts expressed in paise, capped at one crore.
fn amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..=1_000_000_000i64
}

fn request_with_legs(
    reference: &str,
    idempotency_key: Option<String>,
    legs: Vec<(EntrySide, Decimal)>,
) -> PostTransactionRequest {
    let amount = legs
        .iter()
        .filter(|(side, _)| *side == EntrySide::Debit)
        .map(|(_, amount)| *amount)
        .sum();
    PostTransactionRequest {
        transaction_ref: reference.into(),
        idempotency_key,
        event_type: "payment_success".into(),
        source_transaction_id: None,
        source_order_id: None,
        amount,
        currency: "INR".into(),
        description: None,
        transaction_date: txn_date(),
        entries: legs
            .into_iter()
            .enumerate()
            .map(|(index, (side, amount))| EntryInput {
                account_code: if index % 2 == 0 { "1001" } else { "2001" }.into(),
                side,
                amount,
                currency: None,
                description: None,
            })
            .collect(),
        metadata: serde_json::Value::Null,
        override_reference: None,
        tenant: tenant(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Splitting one debit across many credit legs always balances and
    /// always posts, regardless of how the amount fragments.
    #[test]
    fn prop_posted_transactions_balance(amount_minor in amount_minor_strategy(), splits in 1usize..8) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let service = seeded_service().await;

            let total = Decimal::new(amount_minor, 2);
            let mut legs = vec![(EntrySide::Debit, total)];
            let share = Decimal::new(amount_minor / splits as i64, 2);
            let mut credited = Decimal::ZERO;
            for _ in 0..splits - 1 {
                legs.push((EntrySide::Credit, share));
                credited += share;
            }
            legs.push((EntrySide::Credit, total - credited));
            // Zero-value legs are rejected by validation, not the balance
            // check, so skip shapes that produce one.
            if legs.iter().any(|(_, amount)| *amount <= Decimal::ZERO) {
                return Ok(());
            }

            let outcome = service
                .post_transaction(request_with_legs("PROP-1", None, legs))
                .await
                .expect("balanced post succeeds");
            prop_assert!(outcome.validation.balanced);
            prop_assert_eq!(outcome.validation.total_debits, outcome.validation.total_credits);
            Ok(())
        })?;
    }

    /// Any leg pair differing by more than the tolerance is rejected and
    /// leaves no trace in the balances.
    #[test]
    fn prop_unbalanced_posts_never_persist(
        amount_minor in amount_minor_strategy(),
        skew_minor in 2i64..=1_000_000i64,
    ) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let service = seeded_service().await;
            let debit = Decimal::new(amount_minor + skew_minor, 2);
            let credit = Decimal::new(amount_minor, 2);

            let err = service
                .post_transaction(request_with_legs(
                    "PROP-SKEW",
                    None,
                    vec![(EntrySide::Debit, debit), (EntrySide::Credit, credit)],
                ))
                .await
                .unwrap_err();
            let is_unbalanced = matches!(err, LedgerError::Unbalanced { .. });
            prop_assert!(is_unbalanced);

            let balance = service
                .get_account_balance(BalanceQuery {
                    account_code: "1001".into(),
                    as_of: None,
                    tenant: tenant(),
                })
                .await
                .expect("balance");
            prop_assert_eq!(balance.total_debits, Decimal::ZERO);
            Ok(())
        })?;
    }

    /// Replaying a post with the same idempotency key any number of times
    /// produces the state of a single post.
    #[test]
    fn prop_idempotent_replay(amount_minor in amount_minor_strategy(), replays in 1usize..5) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let service = seeded_service().await;
            let amount = Decimal::new(amount_minor, 2);
            let request = request_with_legs(
                "PROP-IDEM",
                Some("payment-success-PROP".into()),
                vec![(EntrySide::Debit, amount), (EntrySide::Credit, amount)],
            );

            let first = service
                .post_transaction(request.clone())
                .await
                .expect("first post");
            prop_assert!(!first.duplicate);

            for _ in 0..replays {
                let replay = service
                    .post_transaction(request.clone())
                    .await
                    .expect("replay");
                prop_assert!(replay.duplicate);
                prop_assert_eq!(&replay.transaction.id, &first.transaction.id);
            }

            let balance = service
                .get_account_balance(BalanceQuery {
                    account_code: "1001".into(),
                    as_of: None,
                    tenant: tenant(),
                })
                .await
                .expect("balance");
            prop_assert_eq!(balance.balance, amount);
            Ok(())
        })?;
    }

    /// A reversal mirrors the original legs exactly, with sides swapped,
    /// and the original's fingerprint never changes.
    #[test]
    fn prop_reversal_swaps_legs(amount_minor in amount_minor_strategy()) {
        let rt = tokio::runtime::Runtime::new().expect("runtime");
        rt.block_on(async {
            let service = seeded_service().await;
            let amount = Decimal::new(amount_minor, 2);

            let posted = service
                .post_transaction(request_with_legs(
                    "PROP-REV",
                    None,
                    vec![(EntrySide::Debit, amount), (EntrySide::Credit, amount)],
                ))
                .await
                .expect("post");
            let original_fingerprint = posted.transaction.fingerprint();
            let entry_fingerprints: Vec<String> = posted
                .entries
                .iter()
                .map(nodal_ledger::LedgerEntry::fingerprint)
                .collect();

            let reversal = service
                .reverse_transaction(ReverseTransactionRequest {
                    transaction_id: posted.transaction.id.clone(),
                    reason: "property check".into(),
                    tenant: tenant(),
                })
                .await
                .expect("reverse");

            prop_assert_eq!(reversal.entries.len(), posted.entries.len());
            for (original, mirrored) in posted.entries.iter().zip(reversal.entries.iter()) {
                prop_assert_eq!(mirrored.side, original.side.opposite());
                prop_assert_eq!(mirrored.amount, original.amount);
                prop_assert_eq!(&mirrored.account_code, &original.account_code);
            }

            // Double reversal is forbidden.
            let err = service
                .reverse_transaction(ReverseTransactionRequest {
                    transaction_id: posted.transaction.id.clone(),
                    reason: "again".into(),
                    tenant: tenant(),
                })
                .await
                .unwrap_err();
            prop_assert!(matches!(err, LedgerError::AlreadyReversed(_)));

            // Immutability: the stored original still fingerprints the same.
            let view = service
                .get_transaction(&posted.transaction.id, tenant())
                .await
                .expect("view");
            prop_assert_eq!(view.transaction.fingerprint(), original_fingerprint);
            let stored_entry_fingerprints: Vec<String> = view
                .entries
                .iter()
                .map(|entry| entry.entry.fingerprint())
                .collect();
            prop_assert_eq!(stored_entry_fingerprints, entry_fingerprints);
            Ok(())
        })?;
    }
}
