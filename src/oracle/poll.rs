//! Poll-based oracle
//!
//! The engine's request only marks randomness as needed. An operator loop
//! checks [`PollOracle::needs_randomness`] on an interval and pushes a VRF
//! value when one is outstanding.

use super::vrf::{VrfBundle, VrfGenerator};
use super::{AdapterCore, RandomnessConsumer, RandomnessOracle};
use crate::errors::{AuthorizationError, StateError, WagerResult};
use crate::types::{Amount, Identity, RequestId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct PollOracle {
    core: AdapterCore,
    operator: Identity,
    vrf: VrfGenerator,
    next_request: AtomicU64,
    outstanding: Mutex<Option<RequestId>>,
    last_bundle: Mutex<Option<VrfBundle>>,
}

impl PollOracle {
    /// `operator` owns the adapter and runs the poll loop.
    pub fn new(identity: Identity, operator: Identity, vrf: VrfGenerator) -> Self {
        Self {
            core: AdapterCore::new(identity, operator.clone()),
            operator,
            vrf,
            next_request: AtomicU64::new(1),
            outstanding: Mutex::new(None),
            last_bundle: Mutex::new(None),
        }
    }

    pub fn operator(&self) -> &Identity {
        &self.operator
    }

    pub fn needs_randomness(&self) -> bool {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn outstanding_request(&self) -> Option<RequestId> {
        *self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Proof for the most recent delivery
    pub fn last_bundle(&self) -> Option<VrfBundle> {
        self.last_bundle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Marks a request issued before a restart as outstanding again so the
    /// operator loop answers it. Later ids continue after `request_id`.
    pub fn resume(&self, caller: &Identity, request_id: RequestId) -> WagerResult<()> {
        self.check_operator(caller)?;
        self.next_request
            .fetch_max(request_id.0.saturating_add(1), Ordering::SeqCst);
        *self.outstanding.lock().unwrap_or_else(PoisonError::into_inner) = Some(request_id);
        tracing::info!("Poll oracle {} resumed {}", self.identity(), request_id);
        Ok(())
    }

    /// Delivers if a request is outstanding. Returns whether it delivered.
    pub fn send_if_needed(&self, caller: &Identity) -> WagerResult<bool> {
        self.check_operator(caller)?;
        match self.outstanding_request() {
            Some(request_id) => self.fulfill(request_id).map(|_| true),
            None => Ok(false),
        }
    }

    /// Delivers unconditionally; fails when nothing was requested.
    pub fn send_force(&self, caller: &Identity) -> WagerResult<()> {
        self.check_operator(caller)?;
        let request_id = self
            .outstanding_request()
            .ok_or(StateError::NothingRequested)?;
        self.fulfill(request_id)
    }

    /// Operator loop: one `send_if_needed` per tick. Failures are logged and
    /// retried on the next tick.
    pub fn spawn_poll_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                match self.send_if_needed(&self.operator) {
                    Ok(true) => tracing::debug!("Poll oracle {} delivered randomness", self.identity()),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Poll oracle {} delivery failed: {}", self.identity(), e),
                }
            }
        })
    }

    fn check_operator(&self, caller: &Identity) -> WagerResult<()> {
        if caller != &self.operator {
            return Err(AuthorizationError::OwnerOnly.into());
        }
        Ok(())
    }

    fn fulfill(&self, request_id: RequestId) -> WagerResult<()> {
        let input = VrfGenerator::input_for(self.identity().as_str(), request_id.0, "poll");
        let bundle = self.vrf.generate(input);
        let value = bundle.value().map_err(crate::errors::WagerError::Internal)?;

        self.core.deliver(request_id, value)?;

        // Clear only if no newer request replaced it meanwhile
        let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        if *outstanding == Some(request_id) {
            *outstanding = None;
        }
        drop(outstanding);
        *self.last_bundle.lock().unwrap_or_else(PoisonError::into_inner) = Some(bundle);
        Ok(())
    }
}

impl RandomnessOracle for PollOracle {
    fn identity(&self) -> &Identity {
        self.core.identity()
    }

    fn request_randomness(&self, caller: &Identity) -> WagerResult<RequestId> {
        self.core.check_requester(caller)?;
        let request_id = RequestId(self.next_request.fetch_add(1, Ordering::SeqCst));
        *self.outstanding.lock().unwrap_or_else(PoisonError::into_inner) = Some(request_id);
        tracing::debug!("Poll oracle {} marked {} as needed", self.identity(), request_id);
        Ok(request_id)
    }

    fn set_lottery_target(
        &self,
        caller: &Identity,
        target: Weak<dyn RandomnessConsumer>,
    ) -> WagerResult<()> {
        self.core.set_target(caller, target)
    }

    fn fund(&self, amount: Amount) -> Amount {
        self.core.fund(amount)
    }

    fn withdraw_operational_funds(&self, caller: &Identity, amount: Amount) -> WagerResult<Amount> {
        self.core.withdraw(caller, amount)
    }

    fn operational_balance(&self) -> Amount {
        self.core.operational_balance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::RecordingConsumer;

    fn wired() -> (PollOracle, Arc<RecordingConsumer>) {
        let oracle = PollOracle::new(
            Identity::new("randomizer"),
            Identity::new("operator"),
            VrfGenerator::new_random(),
        );
        let consumer = RecordingConsumer::new("lottery");
        oracle
            .set_lottery_target(
                &Identity::new("operator"),
                Arc::downgrade(&consumer) as Weak<dyn RandomnessConsumer>,
            )
            .unwrap();
        (oracle, consumer)
    }

    #[test]
    fn test_request_then_poll_delivers_once() {
        let (oracle, consumer) = wired();
        let operator = Identity::new("operator");

        assert!(!oracle.needs_randomness());
        let request_id = oracle.request_randomness(&Identity::new("lottery")).unwrap();
        assert!(oracle.needs_randomness());

        assert!(oracle.send_if_needed(&operator).unwrap());
        assert!(!oracle.needs_randomness());
        assert!(!oracle.send_if_needed(&operator).unwrap());

        let delivered = consumer.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, Identity::new("randomizer"));
        assert_eq!(delivered[0].1, request_id);

        let bundle = oracle.last_bundle().unwrap();
        assert_eq!(bundle.value().unwrap(), delivered[0].2);
        assert!(VrfGenerator::verify(&bundle, &bundle.input_message).unwrap());
    }

    #[test]
    fn test_send_force_without_request() {
        let (oracle, _consumer) = wired();
        let err = oracle.send_force(&Identity::new("operator")).unwrap_err();
        assert_eq!(err.reason(), "wrong receive call");
    }

    #[test]
    fn test_only_lottery_may_request() {
        let (oracle, _consumer) = wired();
        let err = oracle.request_randomness(&Identity::new("player")).unwrap_err();
        assert_eq!(err.reason(), "lottery only");
    }

    #[test]
    fn test_only_operator_may_send() {
        let (oracle, _consumer) = wired();
        oracle.request_randomness(&Identity::new("lottery")).unwrap();
        let err = oracle.send_if_needed(&Identity::new("player")).unwrap_err();
        assert_eq!(err.reason(), "owner only");
        assert!(oracle.needs_randomness());
    }

    #[test]
    fn test_resume_answers_old_request() {
        let (oracle, consumer) = wired();
        let operator = Identity::new("operator");

        let err = oracle.resume(&Identity::new("player"), RequestId(7)).unwrap_err();
        assert_eq!(err.reason(), "owner only");

        oracle.resume(&operator, RequestId(7)).unwrap();
        assert_eq!(oracle.outstanding_request(), Some(RequestId(7)));
        assert!(oracle.send_if_needed(&operator).unwrap());
        assert_eq!(consumer.delivered.lock().unwrap()[0].1, RequestId(7));

        let next = oracle.request_randomness(&Identity::new("lottery")).unwrap();
        assert_eq!(next, RequestId(8));
    }

    #[tokio::test]
    async fn test_poll_loop_delivers() {
        let (oracle, consumer) = wired();
        let oracle = Arc::new(oracle);
        oracle.request_randomness(&Identity::new("lottery")).unwrap();

        let handle = oracle.clone().spawn_poll_loop(Duration::from_millis(10));
        for _ in 0..50 {
            if !consumer.delivered.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(consumer.delivered.lock().unwrap().len(), 1);
    }
}
