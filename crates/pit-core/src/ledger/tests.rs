//! Unit tests for the credit ledger.

use std::sync::Arc;

use serde_json::Value;

use super::*;
use crate::clock::ManualClock;
use crate::config::LedgerConfig;
use crate::store::CreditStore;

fn ledger_with_start(starting_balance_micro: i64) -> CreditLedger {
    CreditLedger::with_clock(
        CreditStore::in_memory().unwrap(),
        LedgerConfig {
            starting_balance_micro,
        },
        Arc::new(ManualClock::new(1_700_000_000_000)),
    )
}

/// Ledger with one account funded to `balance` through a grant.
fn funded(account: &str, balance: i64) -> CreditLedger {
    let ledger = ledger_with_start(0);
    ledger
        .grant(account, balance, "seed", TransactionKind::Grant)
        .unwrap();
    ledger
}

fn count_transactions(ledger: &CreditLedger) -> i64 {
    ledger
        .store()
        .conn()
        .query_row("SELECT COUNT(*) FROM credit_transactions", [], |row| {
            row.get(0)
        })
        .unwrap()
}

fn assert_consistent(ledger: &CreditLedger, account: &str) {
    let report = ledger.audit(account).unwrap();
    assert!(
        report.is_consistent(),
        "balance {} != ledger sum {}",
        report.balance_micro,
        report.ledger_sum_micro
    );
}

// =============================================================================
// Preauthorization
// =============================================================================

#[test]
fn test_preauthorize_holds_and_records() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();

    assert!(!hold.replayed);
    assert_eq!(hold.balance_micro, 300);
    assert_eq!(hold.reservation.status, ReservationStatus::Held);
    assert!(hold.reservation.id.starts_with("RSV-"));
    assert_eq!(ledger.balance("alice").unwrap(), 300);

    let txns = ledger.transactions("alice", 10).unwrap();
    assert_eq!(txns[0].kind, TransactionKind::Preauth);
    assert_eq!(txns[0].delta_micro, -200);
    assert_eq!(txns[0].reference_id, "b1");
    assert_consistent(&ledger, "alice");
}

#[test]
fn test_preauthorize_exact_balance() {
    let ledger = funded("alice", 200);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    assert_eq!(hold.balance_micro, 0);
}

#[test]
fn test_preauthorize_insufficient_balance_writes_nothing() {
    let ledger = funded("alice", 100);
    let before = count_transactions(&ledger);

    let err = ledger.preauthorize("alice", "b1", 101).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientBalance {
            available: 100,
            required: 101
        }
    ));
    assert_eq!(err.status_code(), 402);
    assert_eq!(ledger.balance("alice").unwrap(), 100);
    assert_eq!(count_transactions(&ledger), before);
    assert!(ledger.reservation_for_bout("alice", "b1").unwrap().is_none());
}

#[test]
fn test_preauthorize_rejects_non_positive_amounts() {
    let ledger = funded("alice", 100);
    for amount in [0, -5] {
        assert!(matches!(
            ledger.preauthorize("alice", "b1", amount),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
}

#[test]
fn test_preauthorize_retry_returns_open_hold() {
    let ledger = funded("alice", 500);
    let first = ledger.preauthorize("alice", "b1", 200).unwrap();
    let retry = ledger.preauthorize("alice", "b1", 200).unwrap();

    assert!(retry.replayed);
    assert_eq!(retry.reservation.id, first.reservation.id);
    assert_eq!(ledger.balance("alice").unwrap(), 300);
}

#[test]
fn test_preauthorize_after_terminal_is_already_reserved() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    ledger.settle(&hold.reservation.id, 100).unwrap();

    let err = ledger.preauthorize("alice", "b1", 200).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AlreadyReserved {
            status: ReservationStatus::Settled,
            ..
        }
    ));
    assert_eq!(err.status_code(), 409);
}

#[test]
fn test_insufficient_new_account_is_rolled_back() {
    let ledger = ledger_with_start(100);
    assert!(ledger.preauthorize("newbie", "b1", 500).is_err());
    // The lazy account creation rolled back with the failed hold.
    assert!(matches!(
        ledger.balance("newbie"),
        Err(LedgerError::NotFound { .. })
    ));
}

// =============================================================================
// Settlement
// =============================================================================

#[test]
fn test_settle_refunds_unused_hold() {
    // Balance 500; hold 200; settle at 150.
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    assert_eq!(ledger.balance("alice").unwrap(), 300);

    let settled = ledger.settle(&hold.reservation.id, 150).unwrap();
    assert_eq!(settled.status, ReservationStatus::Settled);
    assert_eq!(settled.charged_micro, 150);
    assert_eq!(settled.refund_micro, 50);
    assert_eq!(settled.overage_micro, 0);
    assert_eq!(settled.balance_micro, 350);
    assert!(!settled.replayed);

    let reservation = ledger.reservation(&hold.reservation.id).unwrap();
    assert_eq!(reservation.status, ReservationStatus::Settled);
    assert_eq!(reservation.actual_cost_micro, Some(150));
    assert!(reservation.resolved_at_ms.is_some());
    assert_consistent(&ledger, "alice");
}

#[test]
fn test_second_settle_is_a_no_op() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    ledger.settle(&hold.reservation.id, 150).unwrap();
    let txns_after_first = count_transactions(&ledger);

    let again = ledger.settle(&hold.reservation.id, 10).unwrap();
    assert!(again.replayed);
    assert_eq!(again.charged_micro, 150);
    assert_eq!(again.refund_micro, 50);
    assert_eq!(ledger.balance("alice").unwrap(), 350);
    assert_eq!(count_transactions(&ledger), txns_after_first);
}

#[test]
fn test_settle_overage_is_capped_at_hold() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();

    let settled = ledger.settle(&hold.reservation.id, 260).unwrap();
    assert_eq!(settled.charged_micro, 200);
    assert_eq!(settled.refund_micro, 0);
    assert_eq!(settled.overage_micro, 60);
    assert_eq!(ledger.balance("alice").unwrap(), 300);

    let txns = ledger.transactions("alice", 10).unwrap();
    assert_eq!(txns[0].kind, TransactionKind::Settle);
    assert_eq!(txns[0].delta_micro, 0);
    let metadata: Value = serde_json::from_str(&txns[0].metadata).unwrap();
    assert_eq!(metadata["overage_micro"], 60);
    assert_consistent(&ledger, "alice");

    let replay = ledger.settle(&hold.reservation.id, 260).unwrap();
    assert_eq!(replay.overage_micro, 60);
}

#[test]
fn test_settle_at_zero_refunds_everything() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    let settled = ledger.settle(&hold.reservation.id, 0).unwrap();
    assert_eq!(settled.refund_micro, 200);
    assert_eq!(ledger.balance("alice").unwrap(), 500);
}

#[test]
fn test_settle_validates_input() {
    let ledger = funded("alice", 500);
    assert!(matches!(
        ledger.settle("RSV-missing", 10),
        Err(LedgerError::NotFound { .. })
    ));
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    assert!(matches!(
        ledger.settle(&hold.reservation.id, -1),
        Err(LedgerError::InvalidAmount { .. })
    ));
}

// =============================================================================
// Release
// =============================================================================

#[test]
fn test_release_returns_full_hold() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();

    let released = ledger.release(&hold.reservation.id).unwrap();
    assert_eq!(released.status, ReservationStatus::Released);
    assert_eq!(released.refund_micro, 200);
    assert_eq!(released.balance_micro, 500);
    assert_consistent(&ledger, "alice");

    let again = ledger.release(&hold.reservation.id).unwrap();
    assert!(again.replayed);
    assert_eq!(ledger.balance("alice").unwrap(), 500);
}

#[test]
fn test_release_then_settle_resolves_once() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    ledger.release(&hold.reservation.id).unwrap();
    let txns = count_transactions(&ledger);

    let late = ledger.settle(&hold.reservation.id, 150).unwrap();
    assert!(late.replayed);
    assert_eq!(late.status, ReservationStatus::Released);
    assert_eq!(late.charged_micro, 0);
    assert_eq!(ledger.balance("alice").unwrap(), 500);
    assert_eq!(count_transactions(&ledger), txns);
}

#[test]
fn test_settle_then_release_resolves_once() {
    let ledger = funded("alice", 500);
    let hold = ledger.preauthorize("alice", "b1", 200).unwrap();
    ledger.settle(&hold.reservation.id, 150).unwrap();

    let late = ledger.release(&hold.reservation.id).unwrap();
    assert!(late.replayed);
    assert_eq!(late.status, ReservationStatus::Settled);
    assert_eq!(ledger.balance("alice").unwrap(), 350);
}

// =============================================================================
// Grants
// =============================================================================

#[test]
fn test_duplicate_grant_credits_once() {
    let ledger = ledger_with_start(0);
    let first = ledger
        .grant("alice", 100, "evt-1", TransactionKind::Purchase)
        .unwrap();
    let second = ledger
        .grant("alice", 100, "evt-1", TransactionKind::Purchase)
        .unwrap();

    assert_eq!(first, GrantOutcome::Applied { balance_micro: 100 });
    assert_eq!(second, GrantOutcome::Duplicate);
    assert!(!second.is_applied());
    assert_eq!(ledger.balance("alice").unwrap(), 100);
}

#[test]
fn test_same_reference_different_kind_is_distinct() {
    let ledger = ledger_with_start(0);
    ledger
        .grant("alice", 100, "evt-1", TransactionKind::Purchase)
        .unwrap();
    ledger
        .grant("alice", 100, "evt-1", TransactionKind::Subscription)
        .unwrap();
    assert_eq!(ledger.balance("alice").unwrap(), 200);
}

#[test]
fn test_grant_past_i64_max_is_rejected_and_rolled_back() {
    let ledger = funded("alice", i64::MAX - 10);
    let before = count_transactions(&ledger);

    let err = ledger
        .grant("alice", 11, "evt-overflow", TransactionKind::Purchase)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount { amount: 11, .. }));
    assert_eq!(ledger.balance("alice").unwrap(), i64::MAX - 10);
    assert_eq!(count_transactions(&ledger), before);

    // Exactly reaching the limit is still a valid credit.
    ledger
        .grant("alice", 10, "evt-fill", TransactionKind::Purchase)
        .unwrap();
    assert_eq!(ledger.balance("alice").unwrap(), i64::MAX);
}

#[test]
fn test_grant_rejects_debit_kinds_and_bad_amounts() {
    let ledger = ledger_with_start(0);
    for kind in [
        TransactionKind::Preauth,
        TransactionKind::Settle,
        TransactionKind::Refund,
    ] {
        assert!(matches!(
            ledger.grant("alice", 100, "evt", kind),
            Err(LedgerError::InvalidKind { .. })
        ));
    }
    assert!(matches!(
        ledger.grant("alice", 0, "evt", TransactionKind::Grant),
        Err(LedgerError::InvalidAmount { .. })
    ));
    assert_eq!(count_transactions(&ledger), 0);
}

// =============================================================================
// Accounts, queries and audit
// =============================================================================

#[test]
fn test_starting_balance_is_logged() {
    let ledger = ledger_with_start(50_000);
    assert_eq!(ledger.ensure_account("alice").unwrap(), 50_000);
    assert_eq!(ledger.ensure_account("alice").unwrap(), 50_000);

    let txns = ledger.transactions("alice", 10).unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].reference_id, ACCOUNT_OPEN_REFERENCE);
    assert_eq!(txns[0].kind, TransactionKind::Grant);
    assert_consistent(&ledger, "alice");
}

#[test]
fn test_unknown_account_balance_is_not_found() {
    let ledger = ledger_with_start(0);
    let err = ledger.balance("ghost").unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { entity: "account", .. }));
    assert_eq!(err.status_code(), 404);
    assert!(ledger.audit("ghost").is_err());
}

#[test]
fn test_transactions_newest_first_with_limit() {
    let ledger = ledger_with_start(0);
    for i in 1..=5 {
        ledger
            .grant("alice", i, &format!("evt-{i}"), TransactionKind::Grant)
            .unwrap();
    }
    let txns = ledger.transactions("alice", 3).unwrap();
    let refs: Vec<&str> = txns.iter().map(|t| t.reference_id.as_str()).collect();
    assert_eq!(refs, ["evt-5", "evt-4", "evt-3"]);
}

#[test]
fn test_audit_tracks_open_holds() {
    let ledger = funded("alice", 1_000);
    ledger.preauthorize("alice", "b1", 300).unwrap();
    let hold = ledger.preauthorize("alice", "b2", 200).unwrap();
    ledger.settle(&hold.reservation.id, 50).unwrap();

    let report = ledger.audit("alice").unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.held_micro, 300);
    assert_eq!(report.balance_micro, 1_000 - 300 - 50);
}

#[test]
fn test_audit_detects_tampering() {
    let ledger = funded("alice", 1_000);
    ledger
        .store()
        .conn()
        .execute(
            "UPDATE accounts SET balance_micro = balance_micro + 1 WHERE account_id = 'alice'",
            [],
        )
        .unwrap();
    assert!(!ledger.audit("alice").unwrap().is_consistent());
}

#[test]
fn test_format_credits() {
    assert_eq!(format_credits(0), "0.00");
    assert_eq!(format_credits(12_345), "123.45");
    assert_eq!(format_credits(-5), "-0.05");
}

#[test]
fn test_many_bouts_keep_log_consistent() {
    let ledger = funded("alice", 10_000);
    for i in 0..20_i64 {
        let hold = ledger
            .preauthorize("alice", &format!("bout-{i}"), 100 + i)
            .unwrap();
        match i % 3 {
            0 => {
                ledger.release(&hold.reservation.id).unwrap();
            },
            1 => {
                ledger.settle(&hold.reservation.id, 40 + i).unwrap();
            },
            _ => {
                ledger.settle(&hold.reservation.id, 500).unwrap();
            },
        }
    }
    assert_consistent(&ledger, "alice");
    assert_eq!(ledger.audit("alice").unwrap().held_micro, 0);
}
