//! Concurrency tests on independent connections.
//!
//! Every worker opens its own [`CreditStore`] on the same database file,
//! which is what separate server instances do. Nothing here shares an
//! in-process lock, so the results depend only on `SQLite` transactions,
//! conditional updates and unique constraints.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pit_core::clock::ManualClock;
use pit_core::config::LedgerConfig;
use pit_core::intro_pool::{ClaimRequest, IntroPool, IntroPoolConfig};
use pit_core::ledger::{CreditLedger, GrantOutcome, LedgerError, ReservationStatus, TransactionKind};
use pit_core::rate_limit::{RateLimitConfig, RateLimiter, SqliteCounterBackend};
use pit_core::referral::{ReferralOutcome, Referrals};
use pit_core::store::CreditStore;
use serde_json::Value;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000_000;
const WORKERS: usize = 8;

fn db_path(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("credits.db");
    // Initialize the schema once before the workers race on it.
    drop(CreditStore::open(&path).unwrap());
    path
}

fn open_ledger(path: &Path, clock: &Arc<ManualClock>) -> CreditLedger {
    let store = CreditStore::open_with_timeout(path, Duration::from_secs(30)).unwrap();
    CreditLedger::with_clock(
        store,
        LedgerConfig {
            starting_balance_micro: 0,
        },
        clock.clone(),
    )
}

/// Runs `work(worker_index, ledger)` on `WORKERS` threads, each with its own
/// connection, released together by a barrier.
fn race<T, F>(path: &Path, clock: &Arc<ManualClock>, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, CreditLedger) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(WORKERS));
    let work = Arc::new(work);
    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let ledger = open_ledger(path, clock);
            let barrier = Arc::clone(&barrier);
            let work = Arc::clone(&work);
            thread::spawn(move || {
                barrier.wait();
                work(i, ledger)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn concurrent_preauthorizations_never_overdraw() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(NOW));
    open_ledger(&path, &clock)
        .grant("alice", 1_000, "seed", TransactionKind::Grant)
        .unwrap();

    let results = race(&path, &clock, |i, ledger| {
        ledger.preauthorize("alice", &format!("bout-{i}"), 300)
    });

    let mut granted = 0;
    for result in results {
        match result {
            Ok(_) => granted += 1,
            Err(LedgerError::InsufficientBalance { required: 300, .. }) => {},
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(granted, 3);

    let ledger = open_ledger(&path, &clock);
    assert_eq!(ledger.balance("alice").unwrap(), 100);
    let report = ledger.audit("alice").unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.held_micro, 900);
}

#[test]
fn concurrent_duplicate_grants_apply_once() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(NOW));

    let outcomes = race(&path, &clock, |_, ledger| {
        ledger
            .grant("alice", 100, "evt-1", TransactionKind::Purchase)
            .unwrap()
    });

    let applied = outcomes.iter().filter(|o| o.is_applied()).count();
    assert_eq!(applied, 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == GrantOutcome::Duplicate)
            .count(),
        WORKERS - 1
    );
    assert_eq!(open_ledger(&path, &clock).balance("alice").unwrap(), 100);
}

#[test]
fn concurrent_settle_and_release_resolve_once() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(NOW));
    let setup = open_ledger(&path, &clock);
    setup
        .grant("alice", 500, "seed", TransactionKind::Grant)
        .unwrap();
    let reservation_id = setup.preauthorize("alice", "b1", 200).unwrap().reservation.id;

    let id = reservation_id.clone();
    let results = race(&path, &clock, move |i, ledger| {
        if i % 2 == 0 {
            ledger.settle(&id, 150).map(|r| (r.status, r.replayed))
        } else {
            ledger.release(&id).map(|r| (r.status, r.replayed))
        }
    });

    let results: Vec<(ReservationStatus, bool)> =
        results.into_iter().map(Result::unwrap).collect();
    assert_eq!(results.iter().filter(|(_, replayed)| !replayed).count(), 1);

    let ledger = open_ledger(&path, &clock);
    let final_status = ledger.reservation(&reservation_id).unwrap().status;
    assert!(results.iter().all(|(status, _)| *status == final_status));
    let expected = match final_status {
        ReservationStatus::Settled => 350,
        ReservationStatus::Released => 500,
        ReservationStatus::Held => panic!("reservation left unresolved"),
    };
    assert_eq!(ledger.balance("alice").unwrap(), expected);
    assert!(ledger.audit("alice").unwrap().is_consistent());
}

#[test]
fn concurrent_intro_claims_stay_within_pool() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(NOW));
    let config = IntroPoolConfig {
        initial_micro: 10_000,
        ..IntroPoolConfig::default()
    };
    IntroPool::open(open_ledger(&path, &clock), config).unwrap();

    let claimed = race(&path, &clock, move |i, ledger| {
        let pool = IntroPool::open(ledger, config).unwrap();
        pool.claim_intro_credits(&ClaimRequest {
            account_id: format!("user-{i}"),
            credits_micro: 3_000,
            kind: TransactionKind::Intro,
            reference_id: format!("signup:user-{i}"),
            metadata: Value::Null,
        })
        .unwrap()
        .claimed_micro
    });

    let total: i64 = claimed.iter().sum();
    assert_eq!(total, 10_000);
    assert_eq!(claimed.iter().filter(|c| **c == 3_000).count(), 3);
    assert_eq!(claimed.iter().filter(|c| **c == 1_000).count(), 1);

    let ledger = open_ledger(&path, &clock);
    let pool = IntroPool::open(ledger.clone(), config).unwrap();
    assert_eq!(pool.snapshot().unwrap().claimed_micro, 10_000);
    let credited: i64 = (0..WORKERS)
        .filter_map(|i| ledger.balance(&format!("user-{i}")).ok())
        .sum();
    assert_eq!(credited, 10_000);
}

#[test]
fn concurrent_referrals_for_one_account_pay_once() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(NOW));
    let config = IntroPoolConfig::default();
    let referrals = Referrals::new(IntroPool::open(open_ledger(&path, &clock), config).unwrap());
    let code = referrals.ensure_referral_code("referrer").unwrap();

    let outcomes = race(&path, &clock, move |_, ledger| {
        Referrals::new(IntroPool::open(ledger, config).unwrap())
            .apply_referral_bonus("newcomer", &code)
            .unwrap()
    });

    let credited = outcomes
        .iter()
        .filter(|o| matches!(o, ReferralOutcome::Credited { .. }))
        .count();
    assert_eq!(credited, 1);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        ReferralOutcome::Credited { .. } | ReferralOutcome::Already { .. }
    )));
    let ledger = open_ledger(&path, &clock);
    assert_eq!(ledger.balance("referrer").unwrap(), config.referral_bonus_micro);
}

#[test]
fn shared_rate_limit_counter_across_connections() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    let clock = Arc::new(ManualClock::new(NOW));
    let config = RateLimitConfig::new("bout", 10, 60_000);

    let allowed = race(&path, &clock, move |_, ledger| {
        let limiter = RateLimiter::new(Arc::new(SqliteCounterBackend::new(ledger.store().clone())));
        (0..5)
            .filter(|_| limiter.check(&config, "203.0.113.9", NOW).unwrap().success)
            .count()
    });

    assert_eq!(allowed.iter().sum::<usize>(), 10);
}
