//! Resolution engine
//!
//! [`WagerPool`] owns the ledger, the settings store, the open draw session
//! and the draw counter behind a single mutex. Every mutating call runs as
//! one critical section and either applies completely or not at all.
//!
//! The engine is `Idle` until a wager opens a draw, then `AwaitingRandomness`
//! until the oracle named by the draw's settings snapshot delivers a value
//! for the draw's request id, or until anyone recovers the draw after the
//! recovery timeout.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::errors::{
    AuthorizationError, ConfigurationError, StateError, TimeoutError, ValidationError, WagerError,
    WagerResult,
};
use crate::events::{EventBus, PoolEvent};
use crate::ledger::PoolLedger;
use crate::metrics::EngineMetrics;
use crate::oracle::{OracleRegistry, RandomnessConsumer, RandomnessOracle};
use crate::payout::{self, PayoutSplit};
use crate::settings::{Settings, SettingsStore};
use crate::types::{Amount, DrawOutcome, Identity, OpenDraw, RequestId, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;

/// The single in-flight wager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawSession {
    pub wagerer: Identity,
    pub wagered_amount: Amount,
    /// Rules active when the wager was accepted
    pub settings_snapshot: Settings,
    pub request_id: RequestId,
    pub opened_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineState {
    Idle,
    AwaitingRandomness,
}

/// Result of a delivery that closed a draw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub wagerer: Identity,
    pub request_id: RequestId,
    pub split: PayoutSplit,
    /// Count reported for this draw: losses since the last win, including
    /// this one
    pub draw_count: u64,
    pub new_total: Amount,
}

/// Serializable image of the engine, open draw included
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub identity: Identity,
    pub recovery_timeout_secs: u64,
    pub ledger: PoolLedger,
    pub settings: SettingsStore,
    pub session: Option<DrawSession>,
    pub draw_count: u64,
}

impl EngineSnapshot {
    pub fn to_json(&self) -> WagerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> WagerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> WagerResult<()> {
        std::fs::write(path.as_ref(), self.to_json()?).map_err(|e| {
            ConfigurationError::SaveFailed(format!(
                "Failed to write snapshot to {}: {}",
                path.as_ref().display(),
                e
            ))
            .into()
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> WagerResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }
}

struct PoolState {
    ledger: PoolLedger,
    settings: SettingsStore,
    session: Option<DrawSession>,
    draw_count: u64,
}

pub struct WagerPool {
    identity: Identity,
    recovery_timeout_secs: u64,
    state: Mutex<PoolState>,
    oracles: OracleRegistry,
    clock: Arc<dyn Clock>,
    events: EventBus,
    metrics: EngineMetrics,
}

impl WagerPool {
    pub fn new(
        config: &EngineConfig,
        settings: Settings,
        oracles: OracleRegistry,
        clock: Arc<dyn Clock>,
    ) -> WagerResult<Arc<Self>> {
        check_engine_config(&config.identity, config.recovery_timeout_secs)?;
        let state = PoolState {
            ledger: PoolLedger::new(config.owner.clone()),
            settings: SettingsStore::new(settings)?,
            session: None,
            draw_count: 0,
        };

        tracing::info!(
            "Wager pool {} created (owner {}, recovery timeout {}s)",
            config.identity,
            config.owner,
            config.recovery_timeout_secs
        );
        Ok(Arc::new(Self::from_parts(
            config.identity.clone(),
            config.recovery_timeout_secs,
            state,
            oracles,
            clock,
        )))
    }

    /// Rebuilds an engine from a snapshot. An open draw stays open and can
    /// still be resolved or recovered.
    pub fn restore(
        snapshot: EngineSnapshot,
        oracles: OracleRegistry,
        clock: Arc<dyn Clock>,
    ) -> WagerResult<Arc<Self>> {
        check_engine_config(&snapshot.identity, snapshot.recovery_timeout_secs)?;
        snapshot.settings.active().validate()?;
        if let Some(pending) = snapshot.settings.pending() {
            pending.validate()?;
        }
        if let Some(session) = &snapshot.session {
            if session.wagered_amount > snapshot.ledger.balance() {
                return Err(WagerError::Internal(format!(
                    "snapshot draw of {} exceeds pool balance {}",
                    session.wagered_amount,
                    snapshot.ledger.balance()
                )));
            }
        }

        tracing::info!(
            "Wager pool {} restored (balance {}, draw open: {})",
            snapshot.identity,
            snapshot.ledger.balance(),
            snapshot.session.is_some()
        );
        let state = PoolState {
            ledger: snapshot.ledger,
            settings: snapshot.settings,
            session: snapshot.session,
            draw_count: snapshot.draw_count,
        };
        Ok(Arc::new(Self::from_parts(
            snapshot.identity,
            snapshot.recovery_timeout_secs,
            state,
            oracles,
            clock,
        )))
    }

    fn from_parts(
        identity: Identity,
        recovery_timeout_secs: u64,
        state: PoolState,
        oracles: OracleRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            recovery_timeout_secs,
            state: Mutex::new(state),
            oracles,
            clock,
            events: EventBus::new(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Points `oracle` at this engine and makes it resolvable by identity.
    /// `oracle_owner` must own the adapter.
    pub fn attach_oracle(
        self: &Arc<Self>,
        oracle: Arc<dyn RandomnessOracle>,
        oracle_owner: &Identity,
    ) -> WagerResult<()> {
        let target: Weak<dyn RandomnessConsumer> = Arc::downgrade(self) as Weak<dyn RandomnessConsumer>;
        oracle.set_lottery_target(oracle_owner, target)?;
        tracing::info!("Oracle {} attached to pool {}", oracle.identity(), self.identity);
        self.oracles.register(oracle);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts a wager and opens a draw. Returns the oracle's request id.
    pub fn place_wager(&self, wagerer: &Identity, amount: Amount) -> WagerResult<RequestId> {
        let mut state = self.lock();

        if state.session.is_some() {
            return Err(StateError::DrawInProgress.into());
        }
        if state.ledger.is_stopped() {
            return Err(StateError::Stopped.into());
        }
        if wagerer == state.ledger.owner() {
            return Err(AuthorizationError::OwnerWager.into());
        }

        let balance = state.ledger.balance();
        if balance == 0 {
            return Err(ValidationError::EmptyBalance.into());
        }
        if amount == 0 {
            return Err(ValidationError::ZeroWager.into());
        }
        let minimum = state.settings.active().minimum_wager(balance);
        if amount < minimum {
            return Err(ValidationError::SmallBet { amount, minimum }.into());
        }
        if balance.checked_add(amount).is_none() {
            return Err(WagerError::Internal("pool balance overflow".to_string()));
        }

        let settings_snapshot = state.settings.active().clone();
        let oracle = self.oracles.resolve(&settings_snapshot.oracle_identity)?;
        let request_id = oracle.request_randomness(&self.identity).map_err(|e| {
            tracing::warn!(
                "Oracle {} refused randomness request: {}",
                settings_snapshot.oracle_identity,
                e
            );
            e
        })?;

        // Nothing below can fail once the overflow check has passed
        let new_total = state.ledger.accept_wager(amount)?;
        state.session = Some(DrawSession {
            wagerer: wagerer.clone(),
            wagered_amount: amount,
            settings_snapshot,
            request_id,
            opened_at: self.clock.now(),
        });
        drop(state);

        self.metrics.record_wager();
        tracing::info!(
            "Wager of {} from {} accepted, awaiting {} (pool {})",
            amount,
            wagerer,
            request_id,
            new_total
        );
        self.events.publish(PoolEvent::WagerPlaced {
            wagerer: wagerer.clone(),
            amount,
            request_id,
            new_total,
        });
        Ok(request_id)
    }

    /// Oracle callback. Stale or duplicate deliveries return `Ok(None)`.
    pub fn deliver_randomness(
        &self,
        caller: &Identity,
        request_id: RequestId,
        value: u128,
    ) -> WagerResult<Option<Resolution>> {
        let mut state = self.lock();

        let Some(session) = state.session.as_ref() else {
            let expected = &state.settings.active().oracle_identity;
            if caller != expected {
                self.reject_delivery(caller, expected);
                return Err(AuthorizationError::OracleOnly.into());
            }
            self.metrics.record_stale_delivery();
            tracing::debug!("Ignoring delivery for {}: no draw is open", request_id);
            return Ok(None);
        };

        if caller != &session.settings_snapshot.oracle_identity {
            self.reject_delivery(caller, &session.settings_snapshot.oracle_identity);
            return Err(AuthorizationError::OracleOnly.into());
        }
        if session.request_id != request_id {
            self.metrics.record_stale_delivery();
            tracing::debug!(
                "Ignoring delivery for {}: open draw awaits {}",
                request_id,
                session.request_id
            );
            return Ok(None);
        }

        let balance = state.ledger.balance();
        let balance_before = balance
            .checked_sub(session.wagered_amount)
            .ok_or_else(|| {
                fault(format!(
                    "open wager {} exceeds pool balance {}",
                    session.wagered_amount, balance
                ))
            })?;
        let split = payout::compute(
            &session.settings_snapshot,
            balance_before,
            session.wagered_amount,
            value,
            state.ledger.is_stopped(),
        );
        let paid_out = split
            .win_amount
            .checked_add(split.owner_cut)
            .filter(|paid| *paid <= balance)
            .ok_or_else(|| fault(format!("payout {:?} exceeds pool balance {}", split, balance)))?;
        debug_assert_eq!(balance - paid_out, split.remainder);

        let session = state
            .session
            .take()
            .ok_or_else(|| fault("draw session vanished during resolution".to_string()))?;

        let draw_count = match split.outcome {
            DrawOutcome::Win => {
                state.ledger.debit(&session.wagerer, split.win_amount)?;
                let owner = state.ledger.owner().clone();
                state.ledger.debit(&owner, split.owner_cut)?;
                let reported = state.draw_count + 1;
                state.draw_count = 0;
                reported
            }
            DrawOutcome::Loss => {
                state.draw_count += 1;
                state.draw_count
            }
        };
        let promoted = state.settings.promote_pending().cloned();
        let new_total = state.ledger.balance();
        drop(state);

        let resolution = Resolution {
            wagerer: session.wagerer,
            request_id,
            split,
            draw_count,
            new_total,
        };
        self.announce(&resolution, session.wagered_amount);
        if let Some(settings) = promoted {
            tracing::info!("Pending settings promoted after {}", request_id);
            self.events.publish(PoolEvent::SettingsPromoted { settings });
        }
        Ok(Some(resolution))
    }

    fn reject_delivery(&self, caller: &Identity, expected: &Identity) {
        self.metrics.record_rejected_delivery();
        tracing::warn!(
            "Rejected delivery from {}: only {} may deliver",
            caller,
            expected
        );
    }

    fn announce(&self, resolution: &Resolution, wager_amount: Amount) {
        let split = &resolution.split;
        match split.outcome {
            DrawOutcome::Win => {
                self.metrics.record_win();
                tracing::info!(
                    "{} won {} (owner cut {}, drained: {}), pool now {}",
                    resolution.wagerer,
                    split.win_amount,
                    split.owner_cut,
                    split.drained,
                    resolution.new_total
                );
                self.events.publish(PoolEvent::DrawWon {
                    winner: resolution.wagerer.clone(),
                    win_amount: split.win_amount,
                    owner_cut: split.owner_cut,
                    draw_count: resolution.draw_count,
                    new_total: resolution.new_total,
                    drained: split.drained,
                });
            }
            DrawOutcome::Loss => {
                self.metrics.record_loss();
                tracing::info!(
                    "{} lost {} (chance {}), pool now {}",
                    resolution.wagerer,
                    wager_amount,
                    split.chance,
                    resolution.new_total
                );
                self.events.publish(PoolEvent::DrawLost {
                    wager_amount,
                    draw_count: resolution.draw_count,
                    new_total: resolution.new_total,
                });
            }
        }
    }

    /// Refunds and closes a draw the oracle never answered. Callable by
    /// anyone once the recovery timeout has elapsed. Returns the refund.
    pub fn recover_stuck_draw(&self) -> WagerResult<Amount> {
        let mut state = self.lock();

        let session = state.session.as_ref().ok_or(StateError::NoCurrentDraw)?;
        let elapsed = self.clock.now().saturating_sub(session.opened_at);
        if elapsed < self.recovery_timeout_secs {
            return Err(TimeoutError::WaitTimeout {
                remaining_secs: self.recovery_timeout_secs - elapsed,
            }
            .into());
        }

        let wagerer = session.wagerer.clone();
        let refunded = session.wagered_amount;
        let new_total = state.ledger.debit(&wagerer, refunded).map_err(|e| {
            tracing::error!("Refund of {} to {} failed: {}", refunded, wagerer, e);
            e
        })?;
        state.session = None;
        drop(state);

        self.metrics.record_recovery();
        tracing::info!(
            "Recovered stuck draw after {}s: refunded {} to {}",
            elapsed,
            refunded,
            wagerer
        );
        self.events.publish(PoolEvent::DrawRecovered {
            wagerer,
            refunded,
            new_total,
        });
        Ok(refunded)
    }

    /// Whether `recover_stuck_draw` would succeed now
    pub fn is_recoverable(&self) -> bool {
        let state = self.lock();
        state.session.as_ref().is_some_and(|session| {
            self.clock.now().saturating_sub(session.opened_at) >= self.recovery_timeout_secs
        })
    }

    fn require_owner(&self, state: &PoolState, caller: &Identity) -> WagerResult<()> {
        if caller != state.ledger.owner() {
            return Err(AuthorizationError::OwnerOnly.into());
        }
        Ok(())
    }

    /// Owner top-up of the pool. Returns the new balance.
    pub fn credit_pool(&self, caller: &Identity, amount: Amount) -> WagerResult<Amount> {
        let mut state = self.lock();
        self.require_owner(&state, caller)?;
        let new_total = state.ledger.credit(amount)?;
        drop(state);

        tracing::info!("Pool credited with {}, now {}", amount, new_total);
        self.events.publish(PoolEvent::PoolCredited { amount, new_total });
        Ok(new_total)
    }

    /// Queues rules for the next draw. An open draw keeps its snapshot.
    pub fn queue_settings(&self, caller: &Identity, new_settings: Settings) -> WagerResult<()> {
        let mut state = self.lock();
        self.require_owner(&state, caller)?;
        state.settings.queue_update(new_settings.clone())?;
        drop(state);

        tracing::info!("Settings queued: {:?}", new_settings);
        self.events.publish(PoolEvent::SettingsQueued {
            settings: new_settings,
        });
        Ok(())
    }

    pub fn set_stopped(&self, caller: &Identity, stopped: bool) -> WagerResult<()> {
        let mut state = self.lock();
        self.require_owner(&state, caller)?;
        state.ledger.set_stopped(stopped);
        drop(state);

        tracing::info!("Pool stopped flag set to {}", stopped);
        self.events.publish(PoolEvent::StoppedChanged { stopped });
        Ok(())
    }

    pub fn transfer_owner(&self, caller: &Identity, new_owner: Identity) -> WagerResult<()> {
        if new_owner.is_empty() {
            return Err(ConfigurationError::MissingRequired("new owner".to_string()).into());
        }
        let mut state = self.lock();
        self.require_owner(&state, caller)?;
        let previous = state.ledger.set_owner(new_owner.clone());
        drop(state);

        tracing::info!("Ownership transferred from {} to {}", previous, new_owner);
        self.events.publish(PoolEvent::OwnerTransferred {
            previous,
            new: new_owner,
        });
        Ok(())
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn recovery_timeout_secs(&self) -> u64 {
        self.recovery_timeout_secs
    }

    pub fn active_settings(&self) -> Settings {
        self.lock().settings.active().clone()
    }

    pub fn pending_settings(&self) -> Option<Settings> {
        self.lock().settings.pending().cloned()
    }

    pub fn pool_balance(&self) -> Amount {
        self.lock().ledger.balance()
    }

    pub fn draw_count(&self) -> u64 {
        self.lock().draw_count
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().ledger.is_stopped()
    }

    pub fn owner(&self) -> Identity {
        self.lock().ledger.owner().clone()
    }

    /// Total paid out of the pool to `who` (winnings, fees, refunds)
    pub fn disbursed_to(&self, who: &Identity) -> Amount {
        self.lock().ledger.disbursed_to(who)
    }

    pub fn open_draw(&self) -> Option<OpenDraw> {
        self.lock().session.as_ref().map(|session| OpenDraw {
            wagerer: session.wagerer.clone(),
            amount: session.wagered_amount,
            opened_at: session.opened_at,
            request_id: session.request_id,
        })
    }

    pub fn state(&self) -> EngineState {
        if self.lock().session.is_some() {
            EngineState::AwaitingRandomness
        } else {
            EngineState::Idle
        }
    }

    pub fn oracles(&self) -> &OracleRegistry {
        &self.oracles
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock();
        EngineSnapshot {
            identity: self.identity.clone(),
            recovery_timeout_secs: self.recovery_timeout_secs,
            ledger: state.ledger.clone(),
            settings: state.settings.clone(),
            session: state.session.clone(),
            draw_count: state.draw_count,
        }
    }
}

impl RandomnessConsumer for WagerPool {
    fn consumer_identity(&self) -> Identity {
        self.identity.clone()
    }

    fn is_callable(&self) -> bool {
        true
    }

    fn deliver_randomness(
        &self,
        caller: &Identity,
        request_id: RequestId,
        value: u128,
    ) -> WagerResult<()> {
        WagerPool::deliver_randomness(self, caller, request_id, value).map(|_| ())
    }
}

fn check_engine_config(identity: &Identity, recovery_timeout_secs: u64) -> WagerResult<()> {
    if identity.is_empty() {
        return Err(ConfigurationError::MissingRequired("engine.identity".to_string()).into());
    }
    if recovery_timeout_secs == 0 {
        return Err(ConfigurationError::InvalidValue {
            field: "engine.recovery_timeout_secs".to_string(),
            value: "0".to_string(),
            reason: "Recovery timeout cannot be zero".to_string(),
        }
        .into());
    }
    Ok(())
}

fn fault(message: String) -> WagerError {
    tracing::error!("Internal consistency fault: {}", message);
    WagerError::Internal(message)
}
