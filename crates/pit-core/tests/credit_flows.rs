//! End-to-end credit flows over a file-backed store.
//!
//! These walk a user through the paths the web app drives: signup bonus,
//! referral, purchase, a metered bout, the free-bout pool and a final audit.

#![allow(clippy::items_after_statements)]

use std::sync::Arc;

use pit_core::PitConfig;
use pit_core::bout::{BoutPlan, MeteredBout};
use pit_core::clock::{MS_PER_DAY, ManualClock};
use pit_core::config::LedgerConfig;
use pit_core::free_pool::{FreeBoutPool, FreePoolConfig, utc_date};
use pit_core::intro_pool::{ClaimRequest, IntroPool, IntroPoolConfig};
use pit_core::ledger::{CreditLedger, LedgerError, ReservationStatus, TransactionKind};
use pit_core::pricing::TokenUsage;
use pit_core::referral::{ReferralOutcome, Referrals};
use pit_core::store::CreditStore;
use pit_core::webhook::{CreditEventKind, CreditGrantEvent, WebhookGrants, WebhookOutcome};
use serde_json::Value;
use tempfile::TempDir;

const NOW: i64 = 1_700_000_000_000;
const HAIKU: &str = "claude-haiku-4-5-20251001";

struct Harness {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    ledger: CreditLedger,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = CreditStore::open(dir.path().join("credits.db")).unwrap();
    let clock = Arc::new(ManualClock::new(NOW));
    let ledger = CreditLedger::with_clock(
        store,
        LedgerConfig {
            starting_balance_micro: 0,
        },
        clock.clone(),
    );
    Harness {
        _dir: dir,
        clock,
        ledger,
    }
}

#[test]
fn preauthorize_then_settle_refunds_the_difference() {
    let h = harness();
    h.ledger
        .grant("alice", 500, "seed", TransactionKind::Grant)
        .unwrap();

    let preauth = h.ledger.preauthorize("alice", "bout-1", 200).unwrap();
    assert_eq!(preauth.balance_micro, 300);

    let settled = h.ledger.settle(&preauth.reservation.id, 150).unwrap();
    assert_eq!(settled.refund_micro, 50);
    assert_eq!(settled.status, ReservationStatus::Settled);
    assert_eq!(h.ledger.balance("alice").unwrap(), 350);

    let kinds: Vec<_> = h
        .ledger
        .transactions("alice", 10)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect();
    assert!(kinds.contains(&TransactionKind::Preauth));
    assert!(kinds.contains(&TransactionKind::Refund));
}

#[test]
fn intro_pool_halves_after_one_half_life() {
    let h = harness();
    let pool = IntroPool::open(
        h.ledger.clone(),
        IntroPoolConfig {
            initial_micro: 1_000_000,
            half_life_days: 30,
            ..IntroPoolConfig::default()
        },
    )
    .unwrap();

    h.clock.advance(30 * MS_PER_DAY);
    let status = pool.status(NOW + 30 * MS_PER_DAY).unwrap();
    assert_eq!(status.remaining_micro, 500_000);

    let outcome = pool
        .claim_intro_credits(&ClaimRequest {
            account_id: "whale".into(),
            credits_micro: 600_000,
            kind: TransactionKind::Intro,
            reference_id: "signup:whale".into(),
            metadata: Value::Null,
        })
        .unwrap();
    assert_eq!(outcome.claimed_micro, 500_000);
    assert!(outcome.exhausted);
    assert_eq!(h.ledger.balance("whale").unwrap(), 500_000);
}

#[test]
fn full_user_journey_keeps_the_books_balanced() {
    let h = harness();
    let config = PitConfig::default();
    let pool = IntroPool::open(h.ledger.clone(), config.intro_pool).unwrap();
    let referrals = Referrals::new(pool.clone());

    // Signup: the bonus comes out of the intro pool.
    let signup = pool.claim_signup_bonus("alice").unwrap();
    assert_eq!(signup.claimed_micro, config.intro_pool.signup_bonus_micro);
    assert!(pool.claim_signup_bonus("alice").unwrap().replayed);

    // Bob joins through Alice's code.
    let code = referrals.ensure_referral_code("alice").unwrap();
    assert_eq!(referrals.ensure_referral_code("alice").unwrap(), code);
    let referral = referrals.apply_referral_bonus("bob", &code).unwrap();
    assert!(matches!(referral, ReferralOutcome::Credited { .. }));
    assert!(referrals.referral("bob").unwrap().unwrap().credited);

    // Alice buys a pack; the provider redelivers the event.
    let webhooks = WebhookGrants::new(h.ledger.clone());
    let event = CreditGrantEvent {
        provider: "stripe".into(),
        event_id: "cs_test_abc".into(),
        account_id: Some("alice".into()),
        credits: 10,
        kind: CreditEventKind::Purchase,
        metadata: Value::Null,
    };
    assert!(matches!(
        webhooks.apply(&event).unwrap(),
        WebhookOutcome::Applied { .. }
    ));
    assert!(matches!(
        webhooks.apply(&event).unwrap(),
        WebhookOutcome::Duplicate { .. }
    ));

    let funded =
        config.intro_pool.signup_bonus_micro + config.intro_pool.referral_bonus_micro + 1_000;
    assert_eq!(h.ledger.balance("alice").unwrap(), funded);

    // A two-turn bout on Haiku.
    let plan = BoutPlan {
        turns: 2,
        model_id: HAIKU.into(),
        output_tokens_per_turn: None,
    };
    let mut bout =
        MeteredBout::start_planned(&h.ledger, &config.pricing, "alice", "bout-1", &plan).unwrap();
    let hold = bout.reservation().amount_micro;
    assert_eq!(h.ledger.balance("alice").unwrap(), funded - hold);
    let settled = bout
        .complete_with_usage(&config.pricing, TokenUsage::new(660, 120), HAIKU)
        .unwrap();
    drop(bout);
    assert_eq!(
        h.ledger.balance("alice").unwrap(),
        funded - settled.charged_micro
    );

    // The same bout id cannot be billed again.
    let err = h.ledger.preauthorize("alice", "bout-1", 10).unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyReserved { .. }));

    let report = h.ledger.audit("alice").unwrap();
    assert!(report.is_consistent());
    assert_eq!(report.held_micro, 0);
    assert_eq!(
        pool.snapshot().unwrap().claimed_micro,
        config.intro_pool.signup_bonus_micro + config.intro_pool.referral_bonus_micro
    );
}

#[test]
fn abandoned_bout_returns_the_hold() {
    let h = harness();
    h.ledger
        .grant("alice", 1_000, "seed", TransactionKind::Grant)
        .unwrap();

    let id = {
        let bout = MeteredBout::start(&h.ledger, "alice", "bout-9", 400).unwrap();
        assert_eq!(h.ledger.balance("alice").unwrap(), 600);
        bout.reservation().id.clone()
    };

    assert_eq!(h.ledger.balance("alice").unwrap(), 1_000);
    assert_eq!(
        h.ledger.reservation(&id).unwrap().status,
        ReservationStatus::Released
    );
    // A settle arriving after the release changes nothing.
    assert!(h.ledger.settle(&id, 400).unwrap().replayed);
    assert_eq!(h.ledger.balance("alice").unwrap(), 1_000);
}

#[test]
fn free_pool_resets_at_utc_midnight() {
    let h = harness();
    let pool = FreeBoutPool::new(
        &h.ledger,
        FreePoolConfig {
            max_daily: 2,
            spend_cap_micro: 1_000,
        },
    );

    assert!(pool.consume_today(100).unwrap().consumed);
    assert!(pool.consume_today(100).unwrap().consumed);
    let blocked = pool.consume_today(100).unwrap();
    assert!(!blocked.consumed);
    assert!(blocked.status.exhausted);

    let today = utc_date(NOW);
    assert_eq!(pool.status(today).unwrap().used, 2);

    h.clock.advance(MS_PER_DAY);
    assert_ne!(pool.today(), today);
    let next = pool.consume_today(100).unwrap();
    assert!(next.consumed);
    assert_eq!(next.status.used, 1);
}

#[test]
fn config_file_drives_a_file_backed_ledger() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("pit.db");
    let config_path = dir.path().join("pit.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[store]
path = "{}"
busy_timeout_ms = 2000

[ledger]
starting_balance_micro = 2500

[intro_pool]
initial_micro = 50000
half_life_days = 7

[free_pool]
max_daily = 10

[[rate_limits]]
name = "bout"
max_requests = 3
window_ms = 60000
"#,
            db.display()
        ),
    )
    .unwrap();

    let config = PitConfig::from_file(&config_path).unwrap();
    assert_eq!(config.intro_pool.half_life_days, 7);
    assert_eq!(config.rate_limit("bout").unwrap().max_requests, 3);
    assert!(config.rate_limit("reactions").is_none());

    let store =
        CreditStore::open_with_timeout(&config.store.path, config.store.busy_timeout()).unwrap();
    assert!(store.verify_wal_mode().unwrap());
    let ledger = CreditLedger::new(store, config.ledger);
    assert_eq!(ledger.ensure_account("newcomer").unwrap(), 2_500);
    assert!(ledger.audit("newcomer").unwrap().is_consistent());

    // State survives reopening the file.
    drop(ledger);
    let reopened = CreditLedger::new(CreditStore::open(&db).unwrap(), config.ledger);
    assert_eq!(reopened.balance("newcomer").unwrap(), 2_500);
}
