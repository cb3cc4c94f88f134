//! Subscription-based oracle
//!
//! Requests are issued against a subscription and queued to an external
//! VRF coordinator, which answers asynchronously by calling
//! [`SubscriptionOracle::fulfill_random_words`] with the request id.

use super::vrf::VrfGenerator;
use super::{AdapterCore, RandomnessConsumer, RandomnessOracle};
use crate::errors::{AuthorizationError, ConfigurationError, WagerError, WagerResult};
use crate::types::{Amount, Identity, RequestId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One randomness request as seen by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfRequest {
    pub request_id: RequestId,
    pub subscription_id: u64,
    pub key_hash: String,
    pub num_words: u32,
}

pub struct SubscriptionOracle {
    core: AdapterCore,
    coordinator: Identity,
    subscription_id: u64,
    key_hash: String,
    next_request: AtomicU64,
    last_request: AtomicU64,
    /// Requests issued and not yet fulfilled
    pending: DashMap<RequestId, VrfRequest>,
    requests: mpsc::UnboundedSender<VrfRequest>,
}

impl SubscriptionOracle {
    /// Returns the adapter and the request stream to hand to the coordinator.
    pub fn new(
        identity: Identity,
        owner: Identity,
        coordinator: Identity,
        subscription_id: u64,
        key_hash: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<VrfRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        let oracle = Self {
            core: AdapterCore::new(identity, owner),
            coordinator,
            subscription_id,
            key_hash: key_hash.into(),
            next_request: AtomicU64::new(1),
            last_request: AtomicU64::new(0),
            pending: DashMap::new(),
            requests,
        };
        (oracle, rx)
    }

    pub fn subscription_id(&self) -> u64 {
        self.subscription_id
    }

    /// Most recently issued request id, 0 if none
    pub fn last_request_id(&self) -> RequestId {
        RequestId(self.last_request.load(Ordering::SeqCst))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    /// Re-issues a request made before a restart: it is pending again and
    /// queued to the coordinator. Later ids continue after `request_id`.
    pub fn resume(&self, caller: &Identity, request_id: RequestId) -> WagerResult<()> {
        self.core.check_owner(caller)?;
        self.next_request
            .fetch_max(request_id.0.saturating_add(1), Ordering::SeqCst);
        self.issue(request_id)?;
        tracing::info!("Subscription {} resumed {}", self.subscription_id, request_id);
        Ok(())
    }

    /// Records `request_id` as the only live request and queues it.
    /// Anything older can no longer be waited on and is dropped.
    fn issue(&self, request_id: RequestId) -> WagerResult<()> {
        let request = VrfRequest {
            request_id,
            subscription_id: self.subscription_id,
            key_hash: self.key_hash.clone(),
            num_words: 1,
        };

        self.pending.insert(request_id, request.clone());
        if self.requests.send(request).is_err() {
            self.pending.remove(&request_id);
            return Err(ConfigurationError::OracleUnreachable(format!(
                "coordinator for {} is gone",
                self.identity()
            ))
            .into());
        }
        self.pending.retain(|id, _| *id >= request_id);
        self.last_request.fetch_max(request_id.0, Ordering::SeqCst);
        Ok(())
    }

    /// Coordinator callback. Unknown or already fulfilled ids are ignored
    /// and reported as `Ok(false)`.
    pub fn fulfill_random_words(
        &self,
        caller: &Identity,
        request_id: RequestId,
        words: &[u128],
    ) -> WagerResult<bool> {
        if caller != &self.coordinator {
            return Err(AuthorizationError::CoordinatorOnly.into());
        }
        let Some(word) = words.first().copied() else {
            return Err(WagerError::Internal(format!(
                "fulfillment for {} carried no words",
                request_id
            )));
        };
        if self.pending.remove(&request_id).is_none() {
            tracing::debug!("Ignoring fulfillment for unknown {}", request_id);
            return Ok(false);
        }
        self.core.deliver(request_id, word)?;
        Ok(true)
    }
}

impl RandomnessOracle for SubscriptionOracle {
    fn identity(&self) -> &Identity {
        self.core.identity()
    }

    fn request_randomness(&self, caller: &Identity) -> WagerResult<RequestId> {
        self.core.check_requester(caller)?;
        let request_id = RequestId(self.next_request.fetch_add(1, Ordering::SeqCst));
        self.issue(request_id)?;
        tracing::debug!(
            "Subscription {} requested {} from coordinator",
            self.subscription_id,
            request_id
        );
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

/// External verifiable-randomness service answering [`VrfRequest`]s
pub struct VrfCoordinator {
    identity: Identity,
    vrf: VrfGenerator,
    consumer: Weak<SubscriptionOracle>,
    fulfillment_delay: Duration,
    paused: AtomicBool,
}

impl VrfCoordinator {
    pub fn new(
        identity: Identity,
        vrf: VrfGenerator,
        consumer: &Arc<SubscriptionOracle>,
        fulfillment_delay: Duration,
    ) -> Self {
        Self {
            identity,
            vrf,
            consumer: Arc::downgrade(consumer),
            fulfillment_delay,
            paused: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// While paused, incoming requests are dropped unanswered.
    pub fn pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Answers one request immediately.
    pub fn fulfill(&self, request: &VrfRequest) -> WagerResult<bool> {
        let consumer = self
            .consumer
            .upgrade()
            .ok_or(ConfigurationError::TargetNotCallable)?;
        let input = VrfGenerator::input_for(
            self.identity.as_str(),
            request.request_id.0,
            &request.key_hash,
        );
        let bundle = self.vrf.generate(input);
        let word = bundle.value().map_err(WagerError::Internal)?;
        consumer.fulfill_random_words(&self.identity, request.request_id, &[word])
    }

    /// Serves the request stream until the adapter is dropped.
    pub fn spawn(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<VrfRequest>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                if self.is_paused() {
                    tracing::warn!("Coordinator {} paused; dropping {}", self.identity, request.request_id);
                    continue;
                }
                if !self.fulfillment_delay.is_zero() {
                    tokio::time::sleep(self.fulfillment_delay).await;
                }
                if let Err(e) = self.fulfill(&request) {
                    tracing::warn!(
                        "Coordinator {} failed to fulfill {}: {}",
                        self.identity,
                        request.request_id,
                        e
                    );
                }
            }
        })
    }
}
