//! Randomness oracle adapters
//!
//! The engine asks an adapter for a request id and later receives the value
//! through [`RandomnessConsumer::deliver_randomness`]. Adapters differ only
//! in how the value arrives: an operator loop polling [`PollOracle`], or an
//! external VRF service calling back into [`SubscriptionOracle`].

pub mod poll;
pub mod subscription;
pub mod vrf;

pub use poll::PollOracle;
pub use subscription::{SubscriptionOracle, VrfCoordinator, VrfRequest};
pub use vrf::{VrfBundle, VrfGenerator};

use crate::errors::{
    AuthorizationError, ConfigurationError, ValidationError, WagerResult,
};
use crate::types::{Amount, Identity, RequestId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

/// Receiving side of an adapter: the engine.
pub trait RandomnessConsumer: Send + Sync {
    fn consumer_identity(&self) -> Identity;

    /// Whether the consumer is live and accepting deliveries
    fn is_callable(&self) -> bool;

    fn deliver_randomness(
        &self,
        caller: &Identity,
        request_id: RequestId,
        value: u128,
    ) -> WagerResult<()>;
}

/// Requesting side of an adapter.
///
/// `request_randomness` runs inside the engine's critical section: it must
/// not block and must not call back into the consumer.
pub trait RandomnessOracle: Send + Sync {
    fn identity(&self) -> &Identity;

    fn request_randomness(&self, caller: &Identity) -> WagerResult<RequestId>;

    fn set_lottery_target(
        &self,
        caller: &Identity,
        target: Weak<dyn RandomnessConsumer>,
    ) -> WagerResult<()>;

    fn fund(&self, amount: Amount) -> Amount;

    fn withdraw_operational_funds(&self, caller: &Identity, amount: Amount) -> WagerResult<Amount>;

    fn operational_balance(&self) -> Amount;
}

/// State shared by every adapter: owner, wired target and the operational
/// balance used to pay for randomness.
pub(crate) struct AdapterCore {
    identity: Identity,
    owner: Identity,
    target: RwLock<Option<(Identity, Weak<dyn RandomnessConsumer>)>>,
    operational_balance: Mutex<Amount>,
}

impl AdapterCore {
    pub(crate) fn new(identity: Identity, owner: Identity) -> Self {
        Self {
            identity,
            owner,
            target: RwLock::new(None),
            operational_balance: Mutex::new(0),
        }
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn check_owner(&self, caller: &Identity) -> WagerResult<()> {
        if caller != &self.owner {
            return Err(AuthorizationError::OwnerOnly.into());
        }
        Ok(())
    }

    pub(crate) fn set_target(
        &self,
        caller: &Identity,
        target: Weak<dyn RandomnessConsumer>,
    ) -> WagerResult<()> {
        self.check_owner(caller)?;
        let live = target
            .upgrade()
            .filter(|consumer| consumer.is_callable())
            .ok_or(ConfigurationError::TargetNotCallable)?;
        let target_identity = live.consumer_identity();
        tracing::info!("Oracle {} wired to target {}", self.identity, target_identity);
        *self.target.write().unwrap_or_else(PoisonError::into_inner) = Some((target_identity, target));
        Ok(())
    }

    /// Only the wired target may request randomness.
    pub(crate) fn check_requester(&self, caller: &Identity) -> WagerResult<()> {
        let guard = self.target.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            None => Err(ConfigurationError::TargetNotCallable.into()),
            Some((target_identity, _)) if target_identity == caller => Ok(()),
            Some(_) => Err(AuthorizationError::LotteryOnly.into()),
        }
    }

    pub(crate) fn target(&self) -> WagerResult<Arc<dyn RandomnessConsumer>> {
        let guard = self.target.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .and_then(|(_, weak)| weak.upgrade())
            .ok_or_else(|| ConfigurationError::TargetNotCallable.into())
    }

    /// Hands `value` to the target. No adapter lock is held here.
    pub(crate) fn deliver(&self, request_id: RequestId, value: u128) -> WagerResult<()> {
        let target = self.target()?;
        target.deliver_randomness(&self.identity, request_id, value)
    }

    pub(crate) fn fund(&self, amount: Amount) -> Amount {
        let mut balance = self
            .operational_balance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *balance = balance.saturating_add(amount);
        *balance
    }

    pub(crate) fn withdraw(&self, caller: &Identity, amount: Amount) -> WagerResult<Amount> {
        self.check_owner(caller)?;
        if amount == 0 {
            return Err(ValidationError::ZeroCredit.into());
        }
        let mut balance = self
            .operational_balance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let remaining = balance
            .checked_sub(amount)
            .ok_or(ValidationError::InsufficientFunds {
                requested: amount,
                available: *balance,
            })?;
        *balance = remaining;
        tracing::info!("Oracle {} withdrew {} operational funds", self.identity, amount);
        Ok(remaining)
    }

    pub(crate) fn operational_balance(&self) -> Amount {
        *self
            .operational_balance
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Adapters known to the engine, keyed by identity
#[derive(Default, Clone)]
pub struct OracleRegistry {
    adapters: Arc<RwLock<HashMap<Identity, Arc<dyn RandomnessOracle>>>>,
}

impl OracleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, oracle: Arc<dyn RandomnessOracle>) {
        self.adapters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(oracle.identity().clone(), oracle);
    }

    pub fn get(&self, identity: &Identity) -> Option<Arc<dyn RandomnessOracle>> {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn resolve(&self, identity: &Identity) -> WagerResult<Arc<dyn RandomnessOracle>> {
        self.get(identity)
            .ok_or_else(|| ConfigurationError::OracleUnreachable(identity.to_string()).into())
    }

    pub fn len(&self) -> usize {
        self.adapters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Consumer that records deliveries
    pub(crate) struct RecordingConsumer {
        pub identity: Identity,
        pub callable: AtomicBool,
        pub delivered: Mutex<Vec<(Identity, RequestId, u128)>>,
    }

    impl RecordingConsumer {
        pub(crate) fn new(identity: &str) -> Arc<Self> {
            Arc::new(Self {
                identity: Identity::new(identity),
                callable: AtomicBool::new(true),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    impl RandomnessConsumer for RecordingConsumer {
        fn consumer_identity(&self) -> Identity {
            self.identity.clone()
        }

        fn is_callable(&self) -> bool {
            self.callable.load(Ordering::SeqCst)
        }

        fn deliver_randomness(
            &self,
            caller: &Identity,
            request_id: RequestId,
            value: u128,
        ) -> WagerResult<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((caller.clone(), request_id, value));
            Ok(())
        }
    }

    fn core() -> AdapterCore {
        AdapterCore::new(Identity::new("randomizer"), Identity::new("operator"))
    }

    #[test]
    fn test_set_target_requires_owner() {
        let core = core();
        let consumer = RecordingConsumer::new("lottery");
        let weak: Weak<dyn RandomnessConsumer> = Arc::downgrade(&consumer) as Weak<dyn RandomnessConsumer>;

        let err = core.set_target(&Identity::new("mallory"), weak.clone()).unwrap_err();
        assert_eq!(err.reason(), "owner only");

        core.set_target(&Identity::new("operator"), weak).unwrap();
        assert!(core.check_requester(&Identity::new("lottery")).is_ok());
    }

    #[test]
    fn test_set_target_rejects_dead_or_uncallable_target() {
        let core = core();
        let operator = Identity::new("operator");

        let consumer = RecordingConsumer::new("lottery");
        let weak: Weak<dyn RandomnessConsumer> = Arc::downgrade(&consumer) as Weak<dyn RandomnessConsumer>;
        consumer.callable.store(false, Ordering::SeqCst);
        let err = core.set_target(&operator, weak).unwrap_err();
        assert_eq!(err.reason(), "target is not callable");

        let dropped = RecordingConsumer::new("gone");
        let weak: Weak<dyn RandomnessConsumer> = Arc::downgrade(&dropped) as Weak<dyn RandomnessConsumer>;
        drop(dropped);
        let err = core.set_target(&operator, weak).unwrap_err();
        assert_eq!(err.reason(), "target is not callable");
    }

    #[test]
    fn test_only_target_may_request() {
        let core = core();
        assert_eq!(
            core.check_requester(&Identity::new("lottery")).unwrap_err().reason(),
            "target is not callable"
        );

        let consumer = RecordingConsumer::new("lottery");
        core.set_target(&Identity::new("operator"), Arc::downgrade(&consumer) as Weak<dyn RandomnessConsumer>)
            .unwrap();
        assert_eq!(
            core.check_requester(&Identity::new("someone")).unwrap_err().reason(),
            "lottery only"
        );
    }

    #[test]
    fn test_operational_funds() {
        let core = core();
        let operator = Identity::new("operator");
        assert_eq!(core.fund(100), 100);

        assert_eq!(core.withdraw(&Identity::new("x"), 10).unwrap_err().reason(), "owner only");
        assert_eq!(core.withdraw(&operator, 101).unwrap_err().reason(), "insufficient funds");
        assert_eq!(core.withdraw(&operator, 40).unwrap(), 60);
        assert_eq!(core.operational_balance(), 60);
    }

    #[test]
    fn test_registry_resolve() {
        let registry = OracleRegistry::new();
        assert!(registry.is_empty());

        let err = registry.resolve(&Identity::new("missing")).err().unwrap();
        assert_eq!(err.reason(), "oracle not reachable");
    }
}
