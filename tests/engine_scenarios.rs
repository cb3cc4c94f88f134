//! End-to-end draw scenarios against a deterministic oracle

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use wagerpool::{
    config::EngineConfig,
    errors::{ErrorKind, WagerResult},
    payout, Amount, DrawOutcome, EngineState, Identity, ManualClock, OracleRegistry, PoolEvent,
    RandomnessConsumer, RandomnessOracle, RequestId, Settings, WagerPool,
};

/// Oracle whose values are pushed by the test through the wired target
struct ManualOracle {
    identity: Identity,
    next: AtomicU64,
    target: Mutex<Option<Weak<dyn RandomnessConsumer>>>,
}

impl ManualOracle {
    fn new(identity: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: Identity::new(identity),
            next: AtomicU64::new(100),
            target: Mutex::new(None),
        })
    }

    fn answer(&self, request_id: RequestId, value: u128) -> WagerResult<()> {
        let target = self.target.lock().unwrap().clone().unwrap().upgrade().unwrap();
        target.deliver_randomness(&self.identity, request_id, value)
    }
}

impl RandomnessOracle for ManualOracle {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn request_randomness(&self, _caller: &Identity) -> WagerResult<RequestId> {
        Ok(RequestId(self.next.fetch_add(1, Ordering::SeqCst)))
    }

    fn set_lottery_target(
        &self,
        _caller: &Identity,
        target: Weak<dyn RandomnessConsumer>,
    ) -> WagerResult<()> {
        *self.target.lock().unwrap() = Some(target);
        Ok(())
    }

    fn fund(&self, amount: Amount) -> Amount {
        amount
    }

    fn withdraw_operational_funds(&self, _caller: &Identity, _amount: Amount) -> WagerResult<Amount> {
        Ok(0)
    }

    fn operational_balance(&self) -> Amount {
        0
    }
}

const LOSING_VALUE: u128 = 9_999;

struct Harness {
    pool: Arc<WagerPool>,
    oracle: Arc<ManualOracle>,
    clock: Arc<ManualClock>,
    owner: Identity,
}

fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let pool = WagerPool::new(
        &EngineConfig::default(),
        Settings::default(),
        OracleRegistry::new(),
        clock.clone(),
    )
    .unwrap();
    let oracle = ManualOracle::new("randomizer");
    pool.attach_oracle(oracle.clone(), &Identity::new("operator")).unwrap();
    Harness {
        pool,
        oracle,
        clock,
        owner: Identity::new("owner"),
    }
}

fn certain_win() -> Settings {
    Settings {
        min_chance: 10_000,
        max_chance: 10_000,
        ..Settings::default()
    }
}

#[test]
fn test_win_after_loss_pays_expected_split() {
    let h = harness();
    let alice = Identity::new("alice");
    let bob = Identity::new("bob");
    let mut events = h.pool.subscribe();

    h.pool.credit_pool(&h.owner, 1000).unwrap();
    let id = h.pool.place_wager(&bob, 2000).unwrap();
    h.oracle.answer(id, LOSING_VALUE).unwrap();
    assert_eq!(h.pool.pool_balance(), 3000);
    assert_eq!(h.pool.draw_count(), 1);

    h.pool.queue_settings(&h.owner, certain_win()).unwrap();
    // Promotion needs a resolved draw
    let id = h.pool.place_wager(&bob, 30).unwrap();
    h.oracle.answer(id, LOSING_VALUE).unwrap();
    assert_eq!(h.pool.active_settings(), certain_win());
    let bob_before = h.pool.disbursed_to(&bob);

    let id = h.pool.place_wager(&alice, 500).unwrap();
    assert_eq!(h.pool.pool_balance(), 3530);
    h.oracle.answer(id, 0).unwrap();

    let win_amount = h.pool.disbursed_to(&alice);
    assert_eq!(win_amount, 3530 * 90 / 100);
    let fee_value = 3530 - win_amount;
    assert_eq!(h.pool.disbursed_to(&h.owner), fee_value * 90 / 100);
    assert_eq!(h.pool.pool_balance(), fee_value - fee_value * 90 / 100);
    assert_eq!(h.pool.disbursed_to(&bob), bob_before);
    assert_eq!(h.pool.draw_count(), 0);

    let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.name())
        .collect();
    assert_eq!(
        names,
        vec![
            "pool_credited",
            "wager_placed",
            "draw_lost",
            "settings_queued",
            "wager_placed",
            "draw_lost",
            "settings_promoted",
            "wager_placed",
            "draw_won",
        ]
    );
}

#[test]
fn test_exact_3500_scenario() {
    let h = harness();
    let alice = Identity::new("alice");

    // Max-chance rules queued during the losing draw apply from the next wager
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    let id = h.pool.place_wager(&Identity::new("bob"), 2000).unwrap();
    h.pool.queue_settings(&h.owner, certain_win()).unwrap();
    h.oracle.answer(id, LOSING_VALUE).unwrap();
    assert_eq!(h.pool.pool_balance(), 3000);

    let id = h.pool.place_wager(&alice, 500).unwrap();
    let resolution = h
        .pool
        .deliver_randomness(&Identity::new("randomizer"), id, 0)
        .unwrap()
        .unwrap();

    assert_eq!(resolution.split.total_balance, 3500);
    assert_eq!(resolution.split.win_amount, 3150);
    assert_eq!(resolution.split.owner_cut, 315);
    assert_eq!(resolution.split.remainder, 35);
    assert_eq!(h.pool.disbursed_to(&alice) - 500, 2650);
    assert_eq!(h.pool.pool_balance(), 35);
    assert_eq!(h.pool.draw_count(), 0);
}

#[test]
fn test_minimum_bet_boundary() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1000).unwrap();

    let err = h.pool.place_wager(&Identity::new("alice"), 9).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.reason(), "small bet");
    assert!(h.pool.place_wager(&Identity::new("alice"), 10).is_ok());
}

#[test]
fn test_settings_queued_mid_draw_do_not_touch_open_draw() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    let id = h.pool.place_wager(&Identity::new("alice"), 100).unwrap();

    // Would make every draw a certain win if it leaked into the open draw
    h.pool.queue_settings(&h.owner, certain_win()).unwrap();
    let resolution = h
        .pool
        .deliver_randomness(&Identity::new("randomizer"), id, LOSING_VALUE)
        .unwrap()
        .unwrap();

    let expected = payout::compute(&Settings::default(), 1000, 100, LOSING_VALUE, false);
    assert_eq!(resolution.split, expected);
    assert_eq!(resolution.split.outcome, DrawOutcome::Loss);
    assert_eq!(h.pool.active_settings(), certain_win());
    assert!(h.pool.pending_settings().is_none());
}

#[test]
fn test_stop_drains_pool_on_next_resolution_regardless_of_value() {
    for value in [0u128, 1, LOSING_VALUE, u128::MAX] {
        let h = harness();
        let alice = Identity::new("alice");
        h.pool.credit_pool(&h.owner, 5000).unwrap();
        let id = h.pool.place_wager(&alice, 777).unwrap();
        h.pool.set_stopped(&h.owner, true).unwrap();

        h.oracle.answer(id, value).unwrap();

        assert_eq!(h.pool.pool_balance(), 0);
        assert_eq!(h.pool.disbursed_to(&alice), 5777);
        assert!(h.pool.is_stopped());
    }
}

#[test]
fn test_stopped_pool_refuses_new_money() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    h.pool.set_stopped(&h.owner, true).unwrap();

    assert_eq!(h.pool.credit_pool(&h.owner, 1).unwrap_err().kind(), ErrorKind::State);
    assert_eq!(
        h.pool.place_wager(&Identity::new("alice"), 100).unwrap_err().reason(),
        "stopped"
    );
    assert_eq!(h.pool.pool_balance(), 1000);

    h.pool.set_stopped(&h.owner, false).unwrap();
    assert!(h.pool.place_wager(&Identity::new("alice"), 100).is_ok());
}

#[test]
fn test_recovery_refunds_exact_wager_after_timeout() {
    let h = harness();
    let alice = Identity::new("alice");
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    let id = h.pool.place_wager(&alice, 400).unwrap();

    h.clock.advance(1_800);
    let err = h.pool.recover_stuck_draw().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.reason(), "wait timeout");
    assert_eq!(h.pool.state(), EngineState::AwaitingRandomness);

    h.clock.advance(1_800);
    assert_eq!(h.pool.recover_stuck_draw().unwrap(), 400);
    assert_eq!(h.pool.pool_balance(), 1000);
    assert_eq!(h.pool.disbursed_to(&alice), 400);
    assert_eq!(h.pool.state(), EngineState::Idle);

    // The late answer is a harmless no-op
    h.oracle.answer(id, 0).unwrap();
    assert_eq!(h.pool.pool_balance(), 1000);
    assert_eq!(h.pool.metrics().snapshot().stale_deliveries, 1);
}

#[test]
fn test_duplicate_delivery_resolves_once() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    let id = h.pool.place_wager(&Identity::new("alice"), 100).unwrap();

    h.oracle.answer(id, LOSING_VALUE).unwrap();
    h.oracle.answer(id, LOSING_VALUE).unwrap();
    h.oracle.answer(id, 0).unwrap();

    assert_eq!(h.pool.draw_count(), 1);
    assert_eq!(h.pool.pool_balance(), 1100);
}

#[test]
fn test_single_draw_at_a_time() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    h.pool.place_wager(&Identity::new("alice"), 100).unwrap();

    for player in ["bob", "carol", "alice"] {
        let err = h.pool.place_wager(&Identity::new(player), 100).unwrap_err();
        assert_eq!(err.reason(), "draw in progress");
    }
    assert_eq!(h.pool.pool_balance(), 1100);
}

#[test]
fn test_concurrent_wagers_open_exactly_one_draw() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1_000_000).unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let pool = h.pool.clone();
            std::thread::spawn(move || {
                pool.place_wager(&Identity::new(format!("player-{}", i)), 50_000)
                    .is_ok()
            })
        })
        .collect();
    let accepted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(accepted, 1);
    assert_eq!(h.pool.pool_balance(), 1_050_000);
}

#[test]
fn test_huge_wager_is_capped_at_max_chance() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 10).unwrap();
    let id = h.pool.place_wager(&Identity::new("whale"), 1_000_000_000).unwrap();

    let resolution = h
        .pool
        .deliver_randomness(&Identity::new("randomizer"), id, LOSING_VALUE)
        .unwrap()
        .unwrap();
    assert_eq!(resolution.split.chance, Settings::default().max_chance);
    assert_eq!(resolution.split.outcome, DrawOutcome::Loss);
}

#[test]
fn test_only_snapshot_oracle_may_deliver() {
    let h = harness();
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    let id = h.pool.place_wager(&Identity::new("alice"), 100).unwrap();

    let err = h
        .pool
        .deliver_randomness(&Identity::new("impostor"), id, 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(h.pool.state(), EngineState::AwaitingRandomness);
    assert_eq!(h.pool.pool_balance(), 1100);
}

#[test]
fn test_events_report_recovery_and_admin_changes() {
    let h = harness();
    let mut events = h.pool.subscribe();
    h.pool.credit_pool(&h.owner, 1000).unwrap();
    h.pool.place_wager(&Identity::new("alice"), 100).unwrap();
    h.clock.advance(h.pool.recovery_timeout_secs());
    h.pool.recover_stuck_draw().unwrap();
    h.pool.transfer_owner(&h.owner, Identity::new("carol")).unwrap();

    let collected: Vec<PoolEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(collected.contains(&PoolEvent::DrawRecovered {
        wagerer: Identity::new("alice"),
        refunded: 100,
        new_total: 1000,
    }));
    assert!(collected.contains(&PoolEvent::OwnerTransferred {
        previous: Identity::new("owner"),
        new: Identity::new("carol"),
    }));
}
