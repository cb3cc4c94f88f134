//! Builds a wired engine from configuration
//!
//! Picks the oracle adapter named by `oracle.kind`, attaches it to a fresh
//! [`WagerPool`] and returns a handle that owns the adapter's background
//! task.

use crate::clock::Clock;
use crate::config::{OracleKind, WagerPoolConfig};
use crate::engine::{EngineSnapshot, WagerPool};
use crate::errors::WagerResult;
use crate::oracle::{
    OracleRegistry, PollOracle, RandomnessOracle, SubscriptionOracle, VrfCoordinator,
    VrfGenerator, VrfRequest,
};
use crate::types::RequestId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Running oracle side of a pool
pub trait OracleHandle: Send {
    fn oracle_kind(&self) -> OracleKind;

    fn oracle(&self) -> Arc<dyn RandomnessOracle>;

    /// Spawns the delivery task. Needs a tokio runtime.
    fn start(&mut self);

    fn shutdown(&mut self);
}

pub struct PollHandle {
    oracle: Arc<PollOracle>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn adapter(&self) -> &Arc<PollOracle> {
        &self.oracle
    }
}

impl OracleHandle for PollHandle {
    fn oracle_kind(&self) -> OracleKind {
        OracleKind::Poll
    }

    fn oracle(&self) -> Arc<dyn RandomnessOracle> {
        self.oracle.clone()
    }

    fn start(&mut self) {
        if self.task.is_none() {
            self.task = Some(self.oracle.clone().spawn_poll_loop(self.interval));
        }
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct SubscriptionHandle {
    oracle: Arc<SubscriptionOracle>,
    coordinator: Arc<VrfCoordinator>,
    requests: Option<mpsc::UnboundedReceiver<VrfRequest>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn adapter(&self) -> &Arc<SubscriptionOracle> {
        &self.oracle
    }

    pub fn coordinator(&self) -> &Arc<VrfCoordinator> {
        &self.coordinator
    }
}

impl OracleHandle for SubscriptionHandle {
    fn oracle_kind(&self) -> OracleKind {
        OracleKind::Subscription
    }

    fn oracle(&self) -> Arc<dyn RandomnessOracle> {
        self.oracle.clone()
    }

    fn start(&mut self) {
        if let Some(requests) = self.requests.take() {
            self.task = Some(self.coordinator.clone().spawn(requests));
        }
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Factory for pools with their configured oracle
pub struct PoolFactory;

impl PoolFactory {
    /// Creates a validated, oracle-wired pool. The handle is not started.
    pub fn create(
        config: &WagerPoolConfig,
        clock: Arc<dyn Clock>,
    ) -> WagerResult<(Arc<WagerPool>, Box<dyn OracleHandle>)> {
        crate::config::ConfigLoader::new().validate(config)?;

        let pool = WagerPool::new(
            &config.engine,
            config.settings.clone(),
            OracleRegistry::new(),
            clock,
        )?;
        let handle = Self::attach_configured_oracle(&pool, config, None)?;
        Ok((pool, handle))
    }

    /// Rebuilds a pool from a snapshot and re-attaches the configured oracle.
    ///
    /// A draw left open by the snapshot is handed back to the adapter when
    /// the draw was placed against it, so it resolves once the handle starts.
    pub fn restore(
        config: &WagerPoolConfig,
        snapshot: EngineSnapshot,
        clock: Arc<dyn Clock>,
    ) -> WagerResult<(Arc<WagerPool>, Box<dyn OracleHandle>)> {
        crate::config::ConfigLoader::new().validate(config)?;

        let resume = snapshot
            .session
            .as_ref()
            .filter(|session| session.settings_snapshot.oracle_identity == config.oracle.identity)
            .map(|session| session.request_id);
        let pool = WagerPool::restore(snapshot, OracleRegistry::new(), clock)?;
        let handle = Self::attach_configured_oracle(&pool, config, resume)?;
        Ok((pool, handle))
    }

    fn attach_configured_oracle(
        pool: &Arc<WagerPool>,
        config: &WagerPoolConfig,
        resume: Option<RequestId>,
    ) -> WagerResult<Box<dyn OracleHandle>> {
        let oracle_config = &config.oracle;
        let handle: Box<dyn OracleHandle> = match oracle_config.kind {
            OracleKind::Poll => {
                let oracle = Arc::new(PollOracle::new(
                    oracle_config.identity.clone(),
                    oracle_config.operator.clone(),
                    VrfGenerator::new_random(),
                ));
                pool.attach_oracle(oracle.clone(), &oracle_config.operator)?;
                if let Some(request_id) = resume {
                    oracle.resume(&oracle_config.operator, request_id)?;
                }
                Box::new(PollHandle {
                    oracle,
                    interval: oracle_config.poll_interval(),
                    task: None,
                })
            }
            OracleKind::Subscription => {
                let (oracle, requests) = SubscriptionOracle::new(
                    oracle_config.identity.clone(),
                    oracle_config.operator.clone(),
                    oracle_config.coordinator.clone(),
                    oracle_config.subscription_id,
                    oracle_config.key_hash.clone(),
                );
                let oracle = Arc::new(oracle);
                pool.attach_oracle(oracle.clone(), &oracle_config.operator)?;
                if let Some(request_id) = resume {
                    oracle.resume(&oracle_config.operator, request_id)?;
                }
                let coordinator = Arc::new(VrfCoordinator::new(
                    oracle_config.coordinator.clone(),
                    VrfGenerator::new_random(),
                    &oracle,
                    oracle_config.fulfillment_delay(),
                ));
                Box::new(SubscriptionHandle {
                    oracle,
                    coordinator,
                    requests: Some(requests),
                    task: None,
                })
            }
        };

        tracing::info!(
            "Pool {} using {:?} oracle {}",
            pool.identity(),
            oracle_config.kind,
            oracle_config.identity
        );
        Ok(handle)
    }
}
